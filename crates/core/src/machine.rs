// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::time::{MasterTimeSource, SinkId, TimeInterval};
use crate::units::{ExecutionSink, ExecutionUnit};
use crate::{BusError, BusResult, Peripheral, Registration, SimulationObserver, TimeResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A bus, its peripherals and the execution units sharing one time domain.
pub struct Machine {
    name: String,
    bus: Arc<SystemBus>,
    time: MasterTimeSource,
    peripherals: BTreeMap<String, Arc<dyn Peripheral>>,
    units: BTreeMap<String, SinkId>,
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_time_source(name, MasterTimeSource::new())
    }

    pub fn with_quantum(name: impl Into<String>, quantum: TimeInterval) -> TimeResult<Self> {
        Ok(Self::with_time_source(
            name,
            MasterTimeSource::with_quantum(quantum)?,
        ))
    }

    /// Assembles a machine from a parsed descriptor. See
    /// [`crate::system::machine_from_descriptor`].
    pub fn from_descriptor(
        descriptor: &labwired_config::MachineDescriptor,
        base_dir: &std::path::Path,
    ) -> anyhow::Result<Self> {
        crate::system::machine_from_descriptor(descriptor, base_dir)
    }

    fn with_time_source(name: impl Into<String>, time: MasterTimeSource) -> Self {
        Self {
            name: name.into(),
            bus: Arc::new(SystemBus::new()),
            time,
            peripherals: BTreeMap::new(),
            units: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<SystemBus> {
        &self.bus
    }

    pub fn time(&self) -> &MasterTimeSource {
        &self.time
    }

    pub fn add_peripheral(
        &mut self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
    ) -> BusResult<()> {
        self.attach(name, peripheral, registration, false)
    }

    pub fn add_overlay(
        &mut self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
    ) -> BusResult<()> {
        self.attach(name, peripheral, registration, true)
    }

    fn attach(
        &mut self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
        overlay: bool,
    ) -> BusResult<()> {
        if self.peripherals.contains_key(name) {
            return Err(BusError::DuplicateName(name.to_string()));
        }
        if overlay {
            self.bus
                .register_overlay(name, peripheral.clone(), registration)?;
        } else {
            self.bus.register(name, peripheral.clone(), registration)?;
        }
        self.peripherals.insert(name.to_string(), peripheral);
        Ok(())
    }

    /// Unmaps a peripheral from every window it occupies.
    pub fn remove_peripheral(&mut self, name: &str) -> BusResult<()> {
        let peripheral = self
            .peripherals
            .remove(name)
            .ok_or(BusError::PeripheralNotRegistered)?;
        self.bus.unregister_peripheral(&peripheral)?;
        Ok(())
    }

    pub fn peripheral(&self, name: &str) -> Option<&Arc<dyn Peripheral>> {
        self.peripherals.get(name)
    }

    /// Typed access to a named peripheral.
    pub fn peripheral_as<T: 'static>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .get(name)?
            .as_any()?
            .downcast_ref::<T>()
    }

    pub fn peripheral_names(&self) -> impl Iterator<Item = &str> {
        self.peripherals.keys().map(String::as_str)
    }

    /// Wraps `unit` in an [`ExecutionSink`] and attaches it to the clock.
    pub fn add_unit<E: ExecutionUnit + 'static>(
        &mut self,
        unit: E,
    ) -> TimeResult<Arc<ExecutionSink<E>>> {
        let sink = Arc::new(ExecutionSink::new(unit, self.bus.clone()));
        let name = crate::TimeSink::name(sink.as_ref()).to_string();
        let id = self.time.register_sink(sink.clone())?;
        self.units.insert(name, id);
        Ok(sink)
    }

    pub fn unit(&self, name: &str) -> Option<SinkId> {
        self.units.get(name).copied()
    }

    pub fn add_observer(&self, observer: Arc<dyn SimulationObserver>) {
        self.time.add_observer(observer);
    }

    /// Resets every peripheral on the bus.
    pub fn reset(&self) {
        tracing::info!("Resetting machine '{}'", self.name);
        self.bus.reset();
    }

    pub fn run_for(&self, period: TimeInterval) -> TimeResult<()> {
        self.time.run_for(period)
    }

    pub fn start(&self) -> TimeResult<()> {
        self.time.start()
    }

    pub fn pause(&self) -> TimeResult<()> {
        self.time.pause()
    }

    pub fn resume(&self) -> TimeResult<()> {
        self.time.resume()
    }

    pub fn stop(&self) -> TimeResult<()> {
        self.time.stop()
    }

    pub fn dispose(&self) -> TimeResult<()> {
        self.time.dispose()
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("peripherals", &self.peripherals.keys().collect::<Vec<_>>())
            .field("units", &self.units)
            .field("time", &self.time)
            .finish()
    }
}
