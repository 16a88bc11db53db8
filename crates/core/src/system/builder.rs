// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::machine::Machine;
use crate::peripherals::declarative::DeclarativePeripheral;
use crate::peripherals::memory::MappedMemory;
use crate::peripherals::pressure_sensor::PressureSensor;
use crate::{AddressRange, Peripheral, Registration, TimeInterval};
use anyhow::Context;
use labwired_config::{parse_size, MachineDescriptor, PeripheralConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Builds a machine from a descriptor file. Relative paths inside the
/// descriptor resolve against the descriptor's directory.
pub fn build_machine(path: &Path) -> anyhow::Result<Machine> {
    info!("Loading machine descriptor: {:?}", path);
    let descriptor = MachineDescriptor::from_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    machine_from_descriptor(&descriptor, base_dir)
}

pub fn machine_from_descriptor(
    descriptor: &MachineDescriptor,
    base_dir: &Path,
) -> anyhow::Result<Machine> {
    let quantum = TimeInterval::from_micros(descriptor.time.quantum_us);
    let mut machine = Machine::with_quantum(descriptor.name.clone(), quantum)?;

    for mem in &descriptor.memory {
        let size = parse_size(&mem.size)
            .with_context(|| format!("Invalid size for memory '{}'", mem.id))?;
        let memory: Arc<dyn Peripheral> = Arc::new(MappedMemory::new(size as usize));

        let registration = if mem.aliases.is_empty() {
            Registration::by(mem.base, size)?
        } else {
            let ranges = std::iter::once(mem.base)
                .chain(mem.aliases.iter().copied())
                .map(|base| AddressRange::by(base, size))
                .collect::<Result<Vec<_>, _>>()?;
            Registration::range_set(ranges)
        };
        info!("Mapping memory '{}' ({} bytes) at {}", mem.id, size, registration);
        machine
            .add_peripheral(&mem.id, memory, registration)
            .with_context(|| format!("Failed to map memory '{}'", mem.id))?;
    }

    for p_cfg in &descriptor.peripherals {
        let Some(dev) = create_peripheral(p_cfg, base_dir)? else {
            continue;
        };
        let registration = registration_for(p_cfg)?;
        info!("Mapping '{}' ({}) at {}", p_cfg.id, p_cfg.r#type, registration);

        let result = if p_cfg.overlay {
            machine.add_overlay(&p_cfg.id, dev, registration)
        } else {
            machine.add_peripheral(&p_cfg.id, dev, registration)
        };
        result.with_context(|| format!("Failed to map peripheral '{}'", p_cfg.id))?;
    }

    Ok(machine)
}

fn create_peripheral(
    p_cfg: &PeripheralConfig,
    base_dir: &Path,
) -> anyhow::Result<Option<Arc<dyn Peripheral>>> {
    let dev: Arc<dyn Peripheral> = match p_cfg.r#type.as_str() {
        "declarative" => {
            let descriptor_path = p_cfg
                .config
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Field 'path' is required in 'config' for declarative peripheral '{}'",
                        p_cfg.id
                    )
                })?;
            let full_path = base_dir.join(descriptor_path);
            let dev = DeclarativePeripheral::from_file(&full_path).with_context(|| {
                format!(
                    "Failed to load declarative descriptor for '{}' from {:?}",
                    p_cfg.id, full_path
                )
            })?;
            Arc::new(dev)
        }
        "pressure_sensor" => {
            let sensor = PressureSensor::new();
            if let Some(hpa) = p_cfg.config.get("pressure_hpa").and_then(|v| v.as_f64()) {
                sensor.set_pressure(hpa);
            }
            if let Some(c) = p_cfg.config.get("temperature_c").and_then(|v| v.as_f64()) {
                sensor.set_temperature(c);
            }
            Arc::new(sensor)
        }
        "memory" => {
            let size = p_cfg
                .size
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Memory peripheral '{}' needs a size", p_cfg.id))?;
            Arc::new(MappedMemory::new(parse_size(size)? as usize))
        }
        other => {
            tracing::warn!(
                "Unsupported peripheral type '{}' for id '{}'; skipping",
                other,
                p_cfg.id
            );
            return Ok(None);
        }
    };
    Ok(Some(dev))
}

fn registration_for(p_cfg: &PeripheralConfig) -> anyhow::Result<Registration> {
    let size = p_cfg.size.as_deref().map(parse_size).transpose()?;
    Ok(match (&p_cfg.region, size) {
        (Some(region), Some(size)) => {
            Registration::region(AddressRange::by(p_cfg.base_address, size)?, region.clone())
        }
        (Some(region), None) => anyhow::bail!(
            "Region '{}' of peripheral '{}' needs an explicit size",
            region,
            p_cfg.id
        ),
        (None, Some(size)) => Registration::by(p_cfg.base_address, size)?,
        (None, None) => Registration::point(p_cfg.base_address),
    })
}
