// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Offset-addressed register files with per-field access semantics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type ValueProvider = Arc<dyn Fn(u64) -> u64 + Send + Sync>;
pub type FieldCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("Register at {0:#x} defined twice")]
    DuplicateOffset(u64),
    #[error("Registers at {first:#x} and {second:#x} overlap")]
    OverlappingRegisters { first: u64, second: u64 },
    #[error("Register at {offset:#x} has unsupported width {width}")]
    InvalidWidth { offset: u64, width: u8 },
    #[error("Field '{field}' does not fit register at {offset:#x}")]
    FieldOutOfRange { offset: u64, field: String },
    #[error("Fields '{first}' and '{second}' overlap in register at {offset:#x}")]
    OverlappingFields {
        offset: u64,
        first: String,
        second: String,
    },
    #[error("Register at {offset:#x} runs past the end of the address space")]
    OffsetOverflow { offset: u64 },
    #[error("Register array at {first:#x} with stride {stride:#x} overflows at index {index}")]
    ArrayOverflow { first: u64, stride: u64, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Read,
    Write,
    ReadWrite,
    /// Writing 1 clears the bit; writing 0 leaves it.
    WriteOneToClear,
    /// Reads return the value, then clear it.
    ReadToClear,
    /// Accepts any write and always reads back the given value.
    Tagged(u64),
}

/// A bit field inside a register.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub position: u8,
    pub width: u8,
    pub mode: FieldMode,
    value_provider: Option<ValueProvider>,
    write_callback: Option<FieldCallback>,
    change_callback: Option<FieldCallback>,
}

impl FieldSpec {
    pub fn value(name: impl Into<String>, position: u8, width: u8, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            position,
            width,
            mode,
            value_provider: None,
            write_callback: None,
            change_callback: None,
        }
    }

    pub fn flag(name: impl Into<String>, position: u8, mode: FieldMode) -> Self {
        Self::value(name, position, 1, mode)
    }

    pub fn tag(name: impl Into<String>, position: u8, width: u8, value: u64) -> Self {
        Self::value(name, position, width, FieldMode::Tagged(value))
    }

    /// Computes the value seen by reads from the stored field value.
    pub fn with_value_provider(mut self, f: impl Fn(u64) -> u64 + Send + Sync + 'static) -> Self {
        self.value_provider = Some(Arc::new(f));
        self
    }

    /// Called as `(old, new)` after every write reaching the field.
    pub fn with_write_callback(mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.write_callback = Some(Arc::new(f));
        self
    }

    /// Called as `(old, new)` after a write that changed the field.
    pub fn with_change_callback(mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.change_callback = Some(Arc::new(f));
        self
    }

    pub fn mask(&self) -> u64 {
        let bits = if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        bits << self.position
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("width", &self.width)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RegisterSpec {
    pub offset: u64,
    pub width_bits: u8,
    pub name: String,
    pub reset_value: u64,
    pub fields: Vec<FieldSpec>,
}

impl RegisterSpec {
    pub fn new(offset: u64, width_bits: u8) -> Self {
        Self {
            offset,
            width_bits,
            name: format!("reg_{:#x}", offset),
            reset_value: 0,
            fields: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reset(mut self, value: u64) -> Self {
        self.reset_value = value;
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_value_field(self, name: &str, position: u8, width: u8, mode: FieldMode) -> Self {
        self.with_field(FieldSpec::value(name, position, width, mode))
    }

    pub fn with_flag(self, name: &str, position: u8, mode: FieldMode) -> Self {
        self.with_field(FieldSpec::flag(name, position, mode))
    }

    pub fn with_tag(self, name: &str, position: u8, width: u8, value: u64) -> Self {
        self.with_field(FieldSpec::tag(name, position, width, value))
    }

    pub fn bytes(&self) -> u64 {
        self.width_bits as u64 / 8
    }

    fn width_mask(&self) -> u64 {
        byte_mask(self.bytes())
    }

    fn validate(&self) -> Result<(), RegisterError> {
        if !matches!(self.width_bits, 8 | 16 | 32 | 64) {
            return Err(RegisterError::InvalidWidth {
                offset: self.offset,
                width: self.width_bits,
            });
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.width == 0 || field.position as u32 + field.width as u32 > self.width_bits as u32
            {
                return Err(RegisterError::FieldOutOfRange {
                    offset: self.offset,
                    field: field.name.clone(),
                });
            }
            if let Some(other) = self.fields[i + 1..]
                .iter()
                .find(|o| o.mask() & field.mask() != 0)
            {
                return Err(RegisterError::OverlappingFields {
                    offset: self.offset,
                    first: field.name.clone(),
                    second: other.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn byte_mask(bytes: u64) -> u64 {
    if bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (bytes * 8)) - 1
    }
}

#[derive(Debug)]
struct Register {
    spec: RegisterSpec,
    value: u64,
}

impl Register {
    fn covered(&self) -> u64 {
        self.spec.fields.iter().fold(0, |acc, f| acc | f.mask())
    }

    fn read(&mut self) -> u64 {
        let stored = self.value;
        let mut result = stored & !self.covered() & self.spec.width_mask();
        let mut clear = 0u64;

        for field in &self.spec.fields {
            let mask = field.mask();
            let current = (stored & mask) >> field.position;
            let value = match field.mode {
                FieldMode::Write => continue,
                FieldMode::Tagged(v) => v,
                _ => field
                    .value_provider
                    .as_ref()
                    .map_or(current, |provider| provider(current)),
            };
            result |= (value << field.position) & mask;
            if field.mode == FieldMode::ReadToClear {
                clear |= mask;
            }
        }

        self.value &= !clear;
        result
    }

    /// Applies `value` to the bits selected by `select`.
    fn write(&mut self, value: u64, select: u64) -> Vec<(FieldCallback, u64, u64)> {
        let old = self.value;
        let select = select & self.spec.width_mask();
        let mut pending = Vec::new();

        if self.spec.fields.is_empty() {
            self.value = (old & !select) | (value & select);
            return pending;
        }

        let mut new = old;
        for field in &self.spec.fields {
            let mask = field.mask();
            let current = (old & mask) >> field.position;
            let incoming = (value & mask) >> field.position;
            let sel = (select & mask) >> field.position;
            if sel == 0 {
                continue;
            }

            let next = match field.mode {
                FieldMode::Write | FieldMode::ReadWrite => (current & !sel) | (incoming & sel),
                FieldMode::WriteOneToClear => current & !(incoming & sel),
                FieldMode::Read | FieldMode::ReadToClear | FieldMode::Tagged(_) => continue,
            };
            new = (new & !mask) | ((next << field.position) & mask);

            if let Some(cb) = &field.write_callback {
                pending.push((cb.clone(), current, next));
            }
            if next != current {
                if let Some(cb) = &field.change_callback {
                    pending.push((cb.clone(), current, next));
                }
            }
        }
        self.value = new;
        pending
    }
}

/// A set of registers addressed by byte offset.
///
/// Unknown offsets read as zero and ignore writes; both are logged.
#[derive(Debug)]
pub struct RegisterCollection {
    name: String,
    registers: BTreeMap<u64, Register>,
}

impl RegisterCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registers: BTreeMap::new(),
        }
    }

    pub fn with_registers(
        name: impl Into<String>,
        specs: impl IntoIterator<Item = RegisterSpec>,
    ) -> Result<Self, RegisterError> {
        let mut collection = Self::new(name);
        for spec in specs {
            collection.define(spec)?;
        }
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn define(&mut self, spec: RegisterSpec) -> Result<(), RegisterError> {
        spec.validate()?;
        if self.registers.contains_key(&spec.offset) {
            return Err(RegisterError::DuplicateOffset(spec.offset));
        }
        let end = spec
            .offset
            .checked_add(spec.bytes())
            .ok_or(RegisterError::OffsetOverflow { offset: spec.offset })?;
        if let Some(prev) = self.containing(spec.offset) {
            return Err(RegisterError::OverlappingRegisters {
                first: prev,
                second: spec.offset,
            });
        }
        if let Some((&next, _)) = self.registers.range(spec.offset..end).next() {
            return Err(RegisterError::OverlappingRegisters {
                first: spec.offset,
                second: next,
            });
        }

        let value = spec.reset_value & spec.width_mask();
        self.registers.insert(spec.offset, Register { spec, value });
        Ok(())
    }

    /// Defines `count` registers `stride` bytes apart, starting at `first`.
    pub fn define_many(
        &mut self,
        first: u64,
        count: usize,
        stride: u64,
        template: impl Fn(usize, u64) -> RegisterSpec,
    ) -> Result<(), RegisterError> {
        for i in 0..count {
            let offset = (i as u64)
                .checked_mul(stride)
                .and_then(|delta| first.checked_add(delta))
                .ok_or(RegisterError::ArrayOverflow {
                    first,
                    stride,
                    index: i,
                })?;
            let mut spec = template(i, offset);
            spec.offset = offset;
            self.define(spec)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn has_register(&self, offset: u64) -> bool {
        self.registers.contains_key(&offset)
    }

    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.registers.keys().copied()
    }

    fn containing(&self, address: u64) -> Option<u64> {
        self.registers
            .range(..=address)
            .next_back()
            .filter(|(offset, reg)| address < *offset + reg.spec.bytes())
            .map(|(offset, _)| *offset)
    }

    pub fn try_read(&mut self, offset: u64) -> Option<u64> {
        self.registers.get_mut(&offset).map(Register::read)
    }

    pub fn try_write(&mut self, offset: u64, value: u64) -> bool {
        let Some(reg) = self.registers.get_mut(&offset) else {
            return false;
        };
        let pending = reg.write(value, u64::MAX);
        for (cb, old, new) in pending {
            cb(old, new);
        }
        true
    }

    pub fn read(&mut self, offset: u64) -> u64 {
        self.try_read(offset).unwrap_or_else(|| {
            tracing::debug!("{}: unhandled read from offset {:#x}", self.name, offset);
            0
        })
    }

    pub fn write(&mut self, offset: u64, value: u64) {
        if !self.try_write(offset, value) {
            tracing::debug!(
                "{}: unhandled write to offset {:#x} (value {:#x})",
                self.name,
                offset,
                value
            );
        }
    }

    /// Raw stored value, without read side effects.
    pub fn peek(&self, offset: u64) -> Option<u64> {
        self.registers.get(&offset).map(|r| r.value)
    }

    /// Overwrites the stored value, bypassing field modes and callbacks.
    pub fn poke(&mut self, offset: u64, value: u64) -> bool {
        match self.registers.get_mut(&offset) {
            Some(reg) => {
                reg.value = value & reg.spec.width_mask();
                true
            }
            None => false,
        }
    }

    /// Reads `bytes` bytes at `offset`, which need not line up with a single
    /// register. Each register touched is read once.
    pub fn read_sized(&mut self, offset: u64, bytes: u64) -> u64 {
        if self
            .registers
            .get(&offset)
            .is_some_and(|r| r.spec.bytes() == bytes)
        {
            return self.read(offset);
        }

        let mut value = 0u64;
        let mut i = 0;
        while i < bytes {
            let Some(address) = offset.checked_add(i) else {
                break;
            };
            let Some(reg_offset) = self.containing(address) else {
                tracing::debug!("{}: unhandled read from offset {:#x}", self.name, address);
                i += 1;
                continue;
            };
            let reg_bytes = self.registers[&reg_offset].spec.bytes();
            let from = address - reg_offset;
            let n = (reg_bytes - from).min(bytes - i);
            let full = self.read(reg_offset);
            value |= ((full >> (from * 8)) & byte_mask(n)) << (i * 8);
            i += n;
        }
        value
    }

    /// Writes `bytes` bytes at `offset`. Bits of a register outside the
    /// access are left untouched.
    pub fn write_sized(&mut self, offset: u64, bytes: u64, value: u64) {
        let mut i = 0;
        while i < bytes {
            let Some(address) = offset.checked_add(i) else {
                break;
            };
            let Some(reg_offset) = self.containing(address) else {
                tracing::debug!("{}: unhandled write to offset {:#x}", self.name, address);
                i += 1;
                continue;
            };
            let Some(reg) = self.registers.get_mut(&reg_offset) else {
                break;
            };
            let from = address - reg_offset;
            let n = (reg.spec.bytes() - from).min(bytes - i);
            let part = ((value >> (i * 8)) & byte_mask(n)) << (from * 8);
            let select = byte_mask(n) << (from * 8);
            for (cb, old, new) in reg.write(part, select) {
                cb(old, new);
            }
            i += n;
        }
    }

    pub fn read_u8(&mut self, offset: u64) -> u8 {
        self.read_sized(offset, 1) as u8
    }

    pub fn read_u16(&mut self, offset: u64) -> u16 {
        self.read_sized(offset, 2) as u16
    }

    pub fn read_u32(&mut self, offset: u64) -> u32 {
        self.read_sized(offset, 4) as u32
    }

    pub fn read_u64(&mut self, offset: u64) -> u64 {
        self.read_sized(offset, 8)
    }

    pub fn reset(&mut self) {
        for reg in self.registers.values_mut() {
            reg.value = reg.spec.reset_value & reg.spec.width_mask();
        }
    }
}
