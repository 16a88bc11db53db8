// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Active components that execute against the bus as virtual time passes.

pub mod dma;
pub mod timer;

pub use dma::{BlockCopyEngine, Transfer};
pub use timer::CountdownTimer;

use crate::bus::SystemBus;
use crate::time::{TimeInterval, TimeSink};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something that does work on the bus for a granted slice of virtual time.
pub trait ExecutionUnit: Send {
    fn name(&self) -> &str;

    /// Runs for at most `budget` and returns the time actually used.
    fn execute(&mut self, bus: &SystemBus, budget: TimeInterval) -> TimeInterval;

    /// Distance to the next event the unit must not run past.
    fn max_grant(&self) -> TimeInterval {
        TimeInterval::INFINITE
    }

    fn reset(&mut self) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}
}

/// Drives an [`ExecutionUnit`] as a [`TimeSink`].
pub struct ExecutionSink<E> {
    name: String,
    unit: Mutex<E>,
    bus: Arc<SystemBus>,
    grants: AtomicU64,
    pauses: AtomicU64,
    paused: AtomicBool,
}

impl<E: ExecutionUnit> ExecutionSink<E> {
    pub fn new(unit: E, bus: Arc<SystemBus>) -> Self {
        Self {
            name: unit.name().to_string(),
            unit: Mutex::new(unit),
            bus,
            grants: AtomicU64::new(0),
            pauses: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        }
    }

    fn unit(&self) -> MutexGuard<'_, E> {
        self.unit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the unit.
    pub fn with_unit<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.unit())
    }

    /// Number of grants served so far.
    pub fn grants(&self) -> u64 {
        self.grants.load(Ordering::Acquire)
    }

    /// Number of pause notifications received.
    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.unit().reset();
    }
}

impl<E: ExecutionUnit> TimeSink for ExecutionSink<E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_grant(&self) -> TimeInterval {
        self.unit().max_grant()
    }

    fn grant_time(&self, interval: TimeInterval) -> TimeInterval {
        self.grants.fetch_add(1, Ordering::AcqRel);
        self.unit().execute(&self.bus, interval)
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::AcqRel);
        self.paused.store(true, Ordering::Release);
        self.unit().pause();
        tracing::debug!("'{}' paused", self.name);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.unit().resume();
        tracing::debug!("'{}' resumed", self.name);
    }
}
