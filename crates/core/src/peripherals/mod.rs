// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod declarative;
pub mod memory;
pub mod pressure_sensor;
pub mod registers;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

bitflags::bitflags! {
    /// Access widths a peripheral (or one of its regions) serves natively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessWidths: u8 {
        const BYTE = 1 << 0;
        const WORD = 1 << 1;
        const DOUBLE_WORD = 1 << 2;
        const QUAD_WORD = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    DoubleWord,
    QuadWord,
}

impl Width {
    pub const ALL: [Width; 4] = [Width::Byte, Width::Word, Width::DoubleWord, Width::QuadWord];

    pub fn bytes(self) -> u64 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::DoubleWord => 4,
            Width::QuadWord => 8,
        }
    }

    pub fn flag(self) -> AccessWidths {
        match self {
            Width::Byte => AccessWidths::BYTE,
            Width::Word => AccessWidths::WORD,
            Width::DoubleWord => AccessWidths::DOUBLE_WORD,
            Width::QuadWord => AccessWidths::QUAD_WORD,
        }
    }

    pub fn mask(self) -> u64 {
        match self {
            Width::QuadWord => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }

    fn narrower(self) -> impl Iterator<Item = Width> {
        Width::ALL
            .into_iter()
            .rev()
            .filter(move |w| w.bytes() < self.bytes())
    }

    fn wider(self) -> impl Iterator<Item = Width> {
        Width::ALL
            .into_iter()
            .filter(move |w| w.bytes() > self.bytes())
    }
}

/// A memory-mapped device reachable through the system bus.
///
/// Offsets are relative to the registration that routed the access. All
/// methods take `&self`: the bus never holds its own lock while calling into a
/// peripheral, so implementors guard their state with interior mutability and
/// may freely call back into the bus.
///
/// Only widths reported by [`Peripheral::widths`] are called by the bus; the
/// remaining ones are synthesized (see [`AccessHandlers`]).
pub trait Peripheral: fmt::Debug + Send + Sync {
    fn widths(&self) -> AccessWidths;

    fn read_u8(&self, _offset: u64) -> u8 {
        0
    }
    fn write_u8(&self, _offset: u64, _value: u8) {}
    fn read_u16(&self, _offset: u64) -> u16 {
        0
    }
    fn write_u16(&self, _offset: u64, _value: u16) {}
    fn read_u32(&self, _offset: u64) -> u32 {
        0
    }
    fn write_u32(&self, _offset: u64, _value: u32) {}
    fn read_u64(&self, _offset: u64) -> u64 {
        0
    }
    fn write_u64(&self, _offset: u64, _value: u64) {}

    /// Whether [`Peripheral::read_bytes`]/[`Peripheral::write_bytes`] are
    /// implemented.
    fn supports_bulk(&self) -> bool {
        false
    }
    fn read_bytes(&self, _offset: u64, buf: &mut [u8]) {
        buf.fill(0);
    }
    fn write_bytes(&self, _offset: u64, _data: &[u8]) {}

    /// Size of the peripheral's address window, when it has a natural one.
    fn size(&self) -> Option<u64> {
        None
    }

    fn reset(&self) {}

    /// Handlers for a named sub-region, used by [`crate::Registration::Region`].
    fn region_handlers(self: Arc<Self>, _region: &str) -> Option<AccessHandlers> {
        None
    }

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

type ReadFn = Arc<dyn Fn(u64) -> u64 + Send + Sync>;
type WriteFn = Arc<dyn Fn(u64, u64) + Send + Sync>;
type BulkReadFn = Arc<dyn Fn(u64, &mut [u8]) + Send + Sync>;
type BulkWriteFn = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;

/// Per-width read/write entry points for one registration.
///
/// Built once when a registration is made. Accesses of a width with no
/// handler are composed little-endian from narrower handlers, or extracted
/// from (read-modify-written through) a wider one.
#[derive(Clone, Default)]
pub struct AccessHandlers {
    reads: [Option<ReadFn>; 4],
    writes: [Option<WriteFn>; 4],
    bulk_read: Option<BulkReadFn>,
    bulk_write: Option<BulkWriteFn>,
}

fn slot(width: Width) -> usize {
    match width {
        Width::Byte => 0,
        Width::Word => 1,
        Width::DoubleWord => 2,
        Width::QuadWord => 3,
    }
}

impl AccessHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a read handler. The returned value is truncated to `width`.
    pub fn with_read(
        mut self,
        width: Width,
        f: impl Fn(u64) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.reads[slot(width)] = Some(Arc::new(f));
        self
    }

    pub fn with_write(
        mut self,
        width: Width,
        f: impl Fn(u64, u64) + Send + Sync + 'static,
    ) -> Self {
        self.writes[slot(width)] = Some(Arc::new(f));
        self
    }

    pub fn with_bulk(
        mut self,
        read: impl Fn(u64, &mut [u8]) + Send + Sync + 'static,
        write: impl Fn(u64, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.bulk_read = Some(Arc::new(read));
        self.bulk_write = Some(Arc::new(write));
        self
    }

    /// Default handlers of a plain (non-region) registration.
    pub fn for_peripheral(peripheral: Arc<dyn Peripheral>) -> Self {
        let widths = peripheral.widths();
        let mut handlers = Self::new();

        if widths.contains(AccessWidths::BYTE) {
            let (r, w) = (peripheral.clone(), peripheral.clone());
            handlers = handlers
                .with_read(Width::Byte, move |o| r.read_u8(o) as u64)
                .with_write(Width::Byte, move |o, v| w.write_u8(o, v as u8));
        }
        if widths.contains(AccessWidths::WORD) {
            let (r, w) = (peripheral.clone(), peripheral.clone());
            handlers = handlers
                .with_read(Width::Word, move |o| r.read_u16(o) as u64)
                .with_write(Width::Word, move |o, v| w.write_u16(o, v as u16));
        }
        if widths.contains(AccessWidths::DOUBLE_WORD) {
            let (r, w) = (peripheral.clone(), peripheral.clone());
            handlers = handlers
                .with_read(Width::DoubleWord, move |o| r.read_u32(o) as u64)
                .with_write(Width::DoubleWord, move |o, v| w.write_u32(o, v as u32));
        }
        if widths.contains(AccessWidths::QUAD_WORD) {
            let (r, w) = (peripheral.clone(), peripheral.clone());
            handlers = handlers
                .with_read(Width::QuadWord, move |o| r.read_u64(o))
                .with_write(Width::QuadWord, move |o, v| w.write_u64(o, v));
        }
        if peripheral.supports_bulk() {
            let (r, w) = (peripheral.clone(), peripheral);
            handlers = handlers.with_bulk(
                move |o, buf| r.read_bytes(o, buf),
                move |o, data| w.write_bytes(o, data),
            );
        }
        handlers
    }

    pub fn readable(&self) -> AccessWidths {
        Width::ALL
            .into_iter()
            .filter(|w| self.reads[slot(*w)].is_some())
            .fold(AccessWidths::empty(), |acc, w| acc | w.flag())
    }

    pub fn writable(&self) -> AccessWidths {
        Width::ALL
            .into_iter()
            .filter(|w| self.writes[slot(*w)].is_some())
            .fold(AccessWidths::empty(), |acc, w| acc | w.flag())
    }

    pub fn is_empty(&self) -> bool {
        self.readable().is_empty() && self.writable().is_empty() && self.bulk_read.is_none()
    }

    /// Reads `width` bytes at `offset`, or `None` when no handler can serve it.
    pub fn read(&self, offset: u64, width: Width) -> Option<u64> {
        if let Some(f) = &self.reads[slot(width)] {
            return Some(f(offset) & width.mask());
        }

        if let Some(narrow) = width.narrower().find(|w| self.reads[slot(*w)].is_some()) {
            let chunks = width.bytes() / narrow.bytes();
            let mut value = 0u64;
            for i in 0..chunks {
                let part = self.read(offset.wrapping_add(i * narrow.bytes()), narrow)?;
                value |= part << (i * narrow.bytes() * 8);
            }
            return Some(value);
        }

        let wide = width.wider().find(|w| self.reads[slot(*w)].is_some())?;
        let base = offset & !(wide.bytes() - 1);
        let shift = offset - base;
        if shift + width.bytes() <= wide.bytes() {
            let value = self.read(base, wide)?;
            Some((value >> (shift * 8)) & width.mask())
        } else if width == Width::Byte {
            None
        } else {
            // Straddles two wide words.
            let mut value = 0u64;
            for i in 0..width.bytes() {
                let byte = self.read(offset.wrapping_add(i), Width::Byte)?;
                value |= byte << (i * 8);
            }
            Some(value)
        }
    }

    /// Writes `width` bytes at `offset`. Returns `false` when nothing could
    /// accept the access.
    pub fn write(&self, offset: u64, width: Width, value: u64) -> bool {
        let value = value & width.mask();
        if let Some(f) = &self.writes[slot(width)] {
            f(offset, value);
            return true;
        }

        if let Some(narrow) = width.narrower().find(|w| self.writes[slot(*w)].is_some()) {
            let chunks = width.bytes() / narrow.bytes();
            for i in 0..chunks {
                let part = (value >> (i * narrow.bytes() * 8)) & narrow.mask();
                if !self.write(offset.wrapping_add(i * narrow.bytes()), narrow, part) {
                    return false;
                }
            }
            return true;
        }

        let Some(wide) = width
            .wider()
            .find(|w| self.writes[slot(*w)].is_some() && self.reads[slot(*w)].is_some())
        else {
            return false;
        };
        let base = offset & !(wide.bytes() - 1);
        let shift = offset - base;
        if shift + width.bytes() <= wide.bytes() {
            let Some(current) = self.read(base, wide) else {
                return false;
            };
            let mask = width.mask() << (shift * 8);
            let merged = (current & !mask) | (value << (shift * 8));
            self.write(base, wide, merged)
        } else if width == Width::Byte {
            false
        } else {
            (0..width.bytes()).all(|i| {
                self.write(
                    offset.wrapping_add(i),
                    Width::Byte,
                    (value >> (i * 8)) & 0xFF,
                )
            })
        }
    }

    /// Fills `buf` from `offset`, falling back to per-byte reads. Bytes no
    /// handler can serve read as zero.
    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        if let Some(f) = &self.bulk_read {
            f(offset, buf);
            return;
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self
                .read(offset.wrapping_add(i as u64), Width::Byte)
                .unwrap_or(0) as u8;
        }
    }

    pub fn write_bytes(&self, offset: u64, data: &[u8]) {
        if let Some(f) = &self.bulk_write {
            f(offset, data);
            return;
        }
        for (i, byte) in data.iter().enumerate() {
            self.write(offset.wrapping_add(i as u64), Width::Byte, *byte as u64);
        }
    }
}

impl fmt::Debug for AccessHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessHandlers")
            .field("readable", &self.readable())
            .field("writable", &self.writable())
            .field("bulk", &self.bulk_read.is_some())
            .finish()
    }
}
