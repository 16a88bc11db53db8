// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::registers::{FieldMode, FieldSpec, RegisterCollection, RegisterError, RegisterSpec};
use crate::{AccessWidths, Peripheral};
use anyhow::Context;
use labwired_config::{Access, PeripheralDescriptor, ReadAction, SideEffectsDescriptor, WriteAction};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A generic peripheral whose register layout and access permissions come
/// from a `PeripheralDescriptor`.
///
/// This allows modeling memory-mapped peripherals without writing custom Rust
/// code. Registers of any width are reachable at any access width.
#[derive(Debug)]
pub struct DeclarativePeripheral {
    name: String,
    registers: Mutex<RegisterCollection>,
    ids: HashMap<String, u64>,
    size: u64,
}

fn field_mode(access: Access, side_effects: Option<&SideEffectsDescriptor>) -> FieldMode {
    let read_clear = side_effects.and_then(|s| s.read_action) == Some(ReadAction::Clear);
    let w1c = side_effects.and_then(|s| s.write_action) == Some(WriteAction::WriteOneToClear);
    match access {
        Access::WriteOnly => FieldMode::Write,
        Access::ReadOnly if read_clear => FieldMode::ReadToClear,
        Access::ReadOnly => FieldMode::Read,
        Access::ReadWrite if w1c => FieldMode::WriteOneToClear,
        Access::ReadWrite if read_clear => FieldMode::ReadToClear,
        Access::ReadWrite => FieldMode::ReadWrite,
    }
}

/// Compiles a descriptor into a register collection.
pub fn compile(descriptor: &PeripheralDescriptor) -> Result<RegisterCollection, RegisterError> {
    let mut collection = RegisterCollection::new(descriptor.peripheral.clone());

    for reg in &descriptor.registers {
        let mut spec = RegisterSpec::new(reg.address_offset, reg.size)
            .named(reg.id.clone())
            .with_reset(reg.reset_value);

        if reg.fields.is_empty() {
            let mode = field_mode(reg.access, reg.side_effects.as_ref());
            if mode != FieldMode::ReadWrite {
                spec = spec.with_value_field(&reg.id, 0, reg.size, mode);
            }
        } else {
            for field in &reg.fields {
                let mode = match field.tagged {
                    Some(value) => FieldMode::Tagged(value),
                    None => field_mode(
                        field.access.unwrap_or(reg.access),
                        field.side_effects.as_ref().or(reg.side_effects.as_ref()),
                    ),
                };
                spec = spec.with_field(FieldSpec::value(
                    field.name.clone(),
                    field.lsb(),
                    field.width(),
                    mode,
                ));
            }
        }
        collection.define(spec)?;
    }
    Ok(collection)
}

impl DeclarativePeripheral {
    pub fn new(descriptor: &PeripheralDescriptor) -> Result<Self, RegisterError> {
        let registers = compile(descriptor)?;
        let ids = descriptor
            .registers
            .iter()
            .map(|r| (r.id.clone(), r.address_offset))
            .collect();
        let size = descriptor
            .registers
            .iter()
            .map(|r| r.address_offset + r.size as u64 / 8)
            .max()
            .unwrap_or(0)
            .max(1);

        tracing::debug!(
            "Compiled '{}' with {} registers",
            descriptor.peripheral,
            registers.len()
        );
        Ok(Self {
            name: descriptor.peripheral.clone(),
            registers: Mutex::new(registers),
            ids,
            size,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let descriptor = PeripheralDescriptor::from_file(path)?;
        Self::new(&descriptor)
            .with_context(|| format!("Invalid register layout in {:?}", path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn registers(&self) -> MutexGuard<'_, RegisterCollection> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored value of a register by id, without read side effects.
    pub fn peek(&self, id: &str) -> Option<u64> {
        let offset = *self.ids.get(id)?;
        self.registers().peek(offset)
    }

    /// Sets a register by id from the model side, bypassing access modes.
    pub fn poke(&self, id: &str, value: u64) -> bool {
        match self.ids.get(id) {
            Some(offset) => self.registers().poke(*offset, value),
            None => false,
        }
    }
}

impl Peripheral for DeclarativePeripheral {
    fn widths(&self) -> AccessWidths {
        AccessWidths::all()
    }

    fn read_u8(&self, offset: u64) -> u8 {
        self.registers().read_sized(offset, 1) as u8
    }

    fn write_u8(&self, offset: u64, value: u8) {
        self.registers().write_sized(offset, 1, value as u64)
    }

    fn read_u16(&self, offset: u64) -> u16 {
        self.registers().read_sized(offset, 2) as u16
    }

    fn write_u16(&self, offset: u64, value: u16) {
        self.registers().write_sized(offset, 2, value as u64)
    }

    fn read_u32(&self, offset: u64) -> u32 {
        self.registers().read_sized(offset, 4) as u32
    }

    fn write_u32(&self, offset: u64, value: u32) {
        self.registers().write_sized(offset, 4, value as u64)
    }

    fn read_u64(&self, offset: u64) -> u64 {
        self.registers().read_sized(offset, 8)
    }

    fn write_u64(&self, offset: u64, value: u64) {
        self.registers().write_sized(offset, 8, value)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn reset(&self) {
        self.registers().reset();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
