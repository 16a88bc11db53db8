// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod machine;
pub mod metrics;
pub mod peripherals;
pub mod range;
pub mod system;
pub mod time;
pub mod units;

pub use bus::{Registration, SystemBus};
pub use machine::Machine;
pub use peripherals::{AccessHandlers, AccessWidths, Peripheral, Width};
pub use range::AddressRange;
pub use time::{MasterTimeSource, SinkId, SinkState, TimeInterval, TimeSink, TimeStamp};
pub use units::{ExecutionSink, ExecutionUnit};


/// Errors raised while (un)registering peripherals on the system bus.
///
/// Accesses themselves never fail: unmapped reads return zero and unmapped
/// writes are dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Invalid address range [{start:#x}, {end:#x})")]
    InvalidRange { start: u64, end: u64 },
    #[error("Range {range} overlaps existing mapping {existing}")]
    Overlap {
        range: AddressRange,
        existing: AddressRange,
    },
    #[error("Range {0} is already claimed by an identical registration")]
    DuplicateRegistration(AddressRange),
    #[error("Peripheral does not expose region '{0}'")]
    UnknownRegion(String),
    #[error("Point registration at {0:#x} requires a peripheral with a known size")]
    UnknownSize(u64),
    #[error("Registration set is empty")]
    EmptyRegistration,
    #[error("No registration at {0:#x}")]
    NotRegistered(u64),
    #[error("Peripheral is not registered on this bus")]
    PeripheralNotRegistered,
    #[error("A peripheral named '{0}' already exists")]
    DuplicateName(String),
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("Time source has been disposed")]
    Disposed,
    #[error("Time source is paused")]
    Paused,
    #[error("Dispatcher thread is running; stop it before driving time synchronously")]
    AlreadyRunning,
    #[error("Quantum must be a positive, finite interval")]
    InvalidQuantum,
    #[error("Unknown time sink {0}")]
    UnknownSink(SinkId),
    #[error("Time sink '{name}' panicked: {message}")]
    SinkPanicked { name: String, message: String },
    #[error("Dispatcher thread panicked: {0}")]
    DispatcherPanicked(String),
    #[error("Failed to spawn thread '{name}': {message}")]
    Spawn { name: String, message: String },
}

pub type TimeResult<T> = Result<T, TimeError>;

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_grant(&self, _sink: SinkId, _interval: TimeInterval) {}
    fn on_sync_point(&self, _at: TimeStamp) {}
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
