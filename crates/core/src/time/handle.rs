// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::rendezvous::{GrantPort, Outcome};
use super::{SinkId, TimeInterval, TimeSink};
use crate::{panic_message, TimeError, TimeResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Not participating in grants.
    Disabled,
    /// Waiting for the next grant.
    Blocked,
    /// Executing a grant.
    Granted,
}

impl SinkState {
    fn encode(self) -> u8 {
        match self {
            SinkState::Disabled => 0,
            SinkState::Blocked => 1,
            SinkState::Granted => 2,
        }
    }

    fn decode(v: u8) -> Self {
        match v {
            1 => SinkState::Blocked,
            2 => SinkState::Granted,
            _ => SinkState::Disabled,
        }
    }
}

/// State shared between the master and a sink's worker thread.
#[derive(Debug)]
pub(crate) struct HandleStatus {
    state: AtomicU8,
    enabled: AtomicBool,
    consumed: AtomicI64,
}

impl HandleStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SinkState::Blocked.encode()),
            enabled: AtomicBool::new(true),
            consumed: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> SinkState {
        SinkState::decode(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SinkState) {
        self.state.store(state.encode(), Ordering::Release);
    }

    fn settle(&self) {
        let state = if self.is_enabled() {
            SinkState::Blocked
        } else {
            SinkState::Disabled
        };
        self.set_state(state);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if self.state() != SinkState::Granted {
            self.settle();
        }
    }

    /// Total virtual time the sink has consumed.
    pub fn consumed(&self) -> TimeInterval {
        TimeInterval::from_ticks(self.consumed.load(Ordering::Acquire))
    }
}

/// Master-side handle of one sink and its worker thread.
pub(crate) struct TimeHandle {
    pub id: SinkId,
    pub name: String,
    pub sink: Arc<dyn TimeSink>,
    pub status: Arc<HandleStatus>,
    worker: Option<JoinHandle<()>>,
}

impl TimeHandle {
    pub fn spawn(id: SinkId, sink: Arc<dyn TimeSink>, port: GrantPort) -> TimeResult<Self> {
        let name = sink.name().to_string();
        let status = Arc::new(HandleStatus::new());

        let thread_name = format!("time-sink-{}", name);
        let worker = {
            let (sink, status) = (sink.clone(), status.clone());
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(port, sink, status))
                .map_err(|e| TimeError::Spawn {
                    name: thread_name,
                    message: e.to_string(),
                })?
        };

        Ok(Self {
            id,
            name,
            sink,
            status,
            worker: Some(worker),
        })
    }

    /// Waits for the worker to exit. Its port must have been released first.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Worker thread of '{}' terminated abnormally", self.name);
            }
        }
        self.status.set_state(SinkState::Disabled);
    }
}

fn worker_loop(port: GrantPort, sink: Arc<dyn TimeSink>, status: Arc<HandleStatus>) {
    tracing::trace!("{} ('{}') worker started", port.sink(), sink.name());

    while let Some(interval) = port.wait_grant() {
        status.set_state(SinkState::Granted);
        let result = panic::catch_unwind(AssertUnwindSafe(|| sink.grant_time(interval)));
        let outcome = match result {
            Ok(consumed) => {
                let consumed = consumed.clamp(TimeInterval::ZERO, interval);
                status
                    .consumed
                    .fetch_add(consumed.ticks(), Ordering::AcqRel);
                Outcome::Consumed(consumed)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Time sink '{}' panicked: {}", sink.name(), message);
                Outcome::Failed(message)
            }
        };
        status.settle();
        port.report(interval, outcome);
    }

    status.set_state(SinkState::Disabled);
    tracing::trace!("{} ('{}') worker released", port.sink(), sink.name());
}
