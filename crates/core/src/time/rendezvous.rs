// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Grant/report rendezvous between the master clock and sink workers.
//!
//! Every attached port gets its own grant channel; all ports report on one
//! shared completion channel. A round sends one grant to each participant and
//! waits for exactly that many reports.

use super::{SinkId, TimeInterval};
use std::collections::BTreeMap;
use crossbeam_channel::{unbounded, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantMessage {
    Grant(TimeInterval),
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Consumed(TimeInterval),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub sink: SinkId,
    pub granted: TimeInterval,
    pub outcome: Outcome,
}

/// Worker side of the rendezvous.
#[derive(Debug)]
pub struct GrantPort {
    sink: SinkId,
    grants: Receiver<GrantMessage>,
    reports: Sender<Report>,
}

impl GrantPort {
    pub fn sink(&self) -> SinkId {
        self.sink
    }

    /// Blocks until the next grant. `None` once released or detached.
    pub fn wait_grant(&self) -> Option<TimeInterval> {
        match self.grants.recv() {
            Ok(GrantMessage::Grant(interval)) => Some(interval),
            Ok(GrantMessage::Release) | Err(_) => None,
        }
    }

    pub fn report(&self, granted: TimeInterval, outcome: Outcome) {
        let report = Report {
            sink: self.sink,
            granted,
            outcome,
        };
        if self.reports.send(report).is_err() {
            tracing::warn!("{}: master went away before the report was delivered", self.sink);
        }
    }
}

#[derive(Debug)]
pub struct Rendezvous {
    grants: BTreeMap<SinkId, Sender<GrantMessage>>,
    reports_tx: Sender<Report>,
    reports_rx: Receiver<Report>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        let (reports_tx, reports_rx) = unbounded();
        Self {
            grants: BTreeMap::new(),
            reports_tx,
            reports_rx,
        }
    }

    pub fn attach(&mut self, sink: SinkId) -> GrantPort {
        let (tx, rx) = unbounded();
        self.grants.insert(sink, tx);
        GrantPort {
            sink,
            grants: rx,
            reports: self.reports_tx.clone(),
        }
    }

    /// Releases one port. Returns `false` if it was not attached.
    pub fn detach(&mut self, sink: SinkId) -> bool {
        match self.grants.remove(&sink) {
            Some(tx) => {
                let _ = tx.send(GrantMessage::Release);
                true
            }
            None => false,
        }
    }

    /// Sends exactly one release to every attached port.
    pub fn release_all(&mut self) -> usize {
        let released = self.grants.len();
        for (_, tx) in std::mem::take(&mut self.grants) {
            let _ = tx.send(GrantMessage::Release);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Grants each listed sink its interval and blocks until every one of
    /// them has reported. Reports come back in sink order.
    pub fn round(&self, grants: &[(SinkId, TimeInterval)]) -> Vec<Report> {
        let mut expected = 0usize;
        for (sink, interval) in grants {
            match self.grants.get(sink) {
                Some(tx) if tx.send(GrantMessage::Grant(*interval)).is_ok() => expected += 1,
                _ => tracing::warn!("{} is not attached; skipping its grant", sink),
            }
        }

        let mut reports = Vec::with_capacity(expected);
        while reports.len() < expected {
            // The rendezvous holds a sender itself, so this only fails if
            // every port and the rendezvous are gone.
            match self.reports_rx.recv() {
                Ok(report) => reports.push(report),
                Err(_) => break,
            }
        }
        reports.sort_by_key(|r| r.sink);
        reports
    }
}
