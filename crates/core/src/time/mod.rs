// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Virtual time: a master clock driving any number of time sinks in lock-step.

mod handle;
mod interval;
mod master;
pub mod rendezvous;

pub use handle::SinkState;
pub use interval::{DomainId, TimeInterval, TimeStamp, TICKS_PER_SECOND};
pub use master::{MasterTimeSource, DEFAULT_QUANTUM};

use std::fmt;

/// Stable identifier of a sink registered with a [`MasterTimeSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub(crate) u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// Something that consumes granted virtual time.
///
/// Each registered sink is driven from its own worker thread. `grant_time`
/// returns how much of the grant was actually consumed; a sink that returns
/// less is granted the remainder again before the clock moves on.
pub trait TimeSink: Send + Sync {
    fn name(&self) -> &str {
        "sink"
    }

    /// Largest step this sink accepts, typically the distance to its next
    /// internal event.
    fn max_grant(&self) -> TimeInterval {
        TimeInterval::INFINITE
    }

    fn grant_time(&self, interval: TimeInterval) -> TimeInterval;

    fn pause(&self) {}

    fn resume(&self) {}
}
