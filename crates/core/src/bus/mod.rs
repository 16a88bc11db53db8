// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub(crate) mod map;
mod registration;

pub use registration::Registration;

use crate::peripherals::{AccessHandlers, Width};
use crate::{AddressRange, BusError, BusResult, Peripheral};
use map::{peripheral_key, BusMap, Entry};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A registered window as reported by [`SystemBus::registrations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingInfo {
    pub name: String,
    pub range: AddressRange,
    pub offset: u64,
    pub region: Option<String>,
    pub overlay: bool,
}

/// Result of resolving a single bus address.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub name: String,
    pub peripheral: Arc<dyn Peripheral>,
    /// The window that owns the address.
    pub range: AddressRange,
    pub region: Option<String>,
    /// Offset the peripheral sees for the resolved address.
    pub offset: u64,
}

/// Routes addressed accesses to registered peripherals.
///
/// Lookups work on an immutable snapshot of the table; registration changes
/// build a fresh snapshot and swap it in. No bus lock is held while a
/// peripheral handler runs, so handlers may re-enter the bus (including to
/// register or unregister).
pub struct SystemBus {
    map: RwLock<Arc<BusMap>>,
    entries: Mutex<Vec<Arc<Entry>>>,
    next_seq: AtomicU64,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBus")
            .field("registrations", &self.registrations())
            .finish()
    }
}

impl SystemBus {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(BusMap::default())),
            entries: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<BusMap> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, entries: &[Arc<Entry>]) {
        let map = Arc::new(BusMap::build(entries.to_vec()));
        *self.map.write().unwrap_or_else(PoisonError::into_inner) = map;
    }

    /// Maps `peripheral`. The new windows must not intersect any existing one.
    pub fn register(
        &self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
    ) -> BusResult<()> {
        self.insert(name, peripheral, registration, false)
    }

    /// Maps `peripheral` on top of existing windows. Inside its windows the
    /// overlay takes precedence over any wider registration; exact duplicates
    /// of another overlay are rejected.
    pub fn register_overlay(
        &self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
    ) -> BusResult<()> {
        self.insert(name, peripheral, registration, true)
    }

    fn insert(
        &self,
        name: &str,
        peripheral: Arc<dyn Peripheral>,
        registration: Registration,
        overlay: bool,
    ) -> BusResult<()> {
        let mappings = registration.resolve(peripheral.size())?;
        let key = peripheral_key(&peripheral);

        // Handler tables are built once, outside the table lock.
        let mut resolved = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let handlers = match &mapping.region {
                Some(region) => peripheral
                    .clone()
                    .region_handlers(region)
                    .ok_or_else(|| BusError::UnknownRegion(region.clone()))?,
                None => AccessHandlers::for_peripheral(peripheral.clone()),
            };
            resolved.push((mapping, handlers));
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (mapping, _) in &resolved {
            for existing in entries.iter() {
                if !mapping.range.intersects(&existing.range) {
                    continue;
                }
                let conflict = !overlay || existing.peripheral_key() == key;
                if mapping.range == existing.range && (conflict || existing.overlay) {
                    return Err(BusError::DuplicateRegistration(mapping.range));
                }
                if conflict {
                    return Err(BusError::Overlap {
                        range: mapping.range,
                        existing: existing.range,
                    });
                }
            }
        }

        let registration_id = self.next_seq.fetch_add(1, Ordering::Relaxed);
        for (mapping, handlers) in resolved {
            entries.push(Arc::new(Entry {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                registration: registration_id,
                name: name.to_string(),
                peripheral: peripheral.clone(),
                range: mapping.range,
                offset: mapping.offset,
                region: mapping.region,
                overlay,
                handlers,
            }));
        }
        self.publish(&entries);

        tracing::debug!(
            "Registered '{}' at {}{}",
            name,
            registration,
            if overlay { " (overlay)" } else { "" }
        );
        Ok(())
    }

    /// Removes the registration owning `address`, including its sibling
    /// windows.
    pub fn unregister_at(&self, address: u64) -> BusResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let owner = {
            let map = self.snapshot();
            map.lookup(address)
                .map(|s| s.entry.registration)
                .ok_or(BusError::NotRegistered(address))?
        };

        let before = entries.len();
        entries.retain(|e| e.registration != owner);
        let removed = before - entries.len();
        self.publish(&entries);

        tracing::debug!("Unregistered {} window(s) owning {:#x}", removed, address);
        Ok(())
    }

    /// Removes every window of `peripheral`. Returns the number removed.
    pub fn unregister_peripheral(&self, peripheral: &Arc<dyn Peripheral>) -> BusResult<usize> {
        let key = peripheral_key(peripheral);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|e| e.peripheral_key() != key);
        let removed = before - entries.len();
        if removed == 0 {
            return Err(BusError::PeripheralNotRegistered);
        }
        self.publish(&entries);

        tracing::debug!("Unregistered peripheral ({} window(s))", removed);
        Ok(removed)
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        self.snapshot().lookup(address).is_some()
    }

    pub fn find(&self, address: u64) -> Option<Resolved> {
        let map = self.snapshot();
        let segment = map.lookup(address)?;
        let entry = &segment.entry;
        Some(Resolved {
            name: entry.name.clone(),
            peripheral: entry.peripheral.clone(),
            range: entry.range,
            region: entry.region.clone(),
            offset: entry.translate(address),
        })
    }

    /// All registered windows, in registration order.
    pub fn registrations(&self) -> Vec<MappingInfo> {
        self.snapshot()
            .entries
            .iter()
            .map(|e| MappingInfo {
                name: e.name.clone(),
                range: e.range,
                offset: e.offset,
                region: e.region.clone(),
                overlay: e.overlay,
            })
            .collect()
    }

    /// Distinct registered peripherals, in registration order.
    pub fn peripherals(&self) -> Vec<(String, Arc<dyn Peripheral>)> {
        let mut seen = HashSet::new();
        self.snapshot()
            .entries
            .iter()
            .filter(|e| seen.insert(e.peripheral_key()))
            .map(|e| (e.name.clone(), e.peripheral.clone()))
            .collect()
    }

    /// Resets every registered peripheral once.
    pub fn reset(&self) {
        for (name, peripheral) in self.peripherals() {
            tracing::trace!("Resetting '{}'", name);
            peripheral.reset();
        }
    }

    /// Reads `width` bytes at `address`. Unmapped reads return zero.
    pub fn read(&self, address: u64, width: Width) -> u64 {
        let map = self.snapshot();
        let Some(segment) = map.lookup(address) else {
            tracing::debug!("Unmapped {:?} read from {:#x}", width, address);
            return 0;
        };
        let entry = &segment.entry;
        match entry.handlers.read(entry.translate(address), width) {
            Some(value) => value,
            None => {
                tracing::debug!(
                    "'{}' cannot serve {:?} read at {:#x}",
                    entry.name,
                    width,
                    address
                );
                0
            }
        }
    }

    /// Writes `width` bytes at `address`. Unmapped writes are dropped.
    pub fn write(&self, address: u64, width: Width, value: u64) {
        let map = self.snapshot();
        let Some(segment) = map.lookup(address) else {
            tracing::debug!(
                "Unmapped {:?} write to {:#x} (value {:#x})",
                width,
                address,
                value
            );
            return;
        };
        let entry = &segment.entry;
        if !entry.handlers.write(entry.translate(address), width, value) {
            tracing::debug!(
                "'{}' cannot serve {:?} write at {:#x}",
                entry.name,
                width,
                address
            );
        }
    }

    pub fn read_u8(&self, address: u64) -> u8 {
        self.read(address, Width::Byte) as u8
    }

    pub fn read_u16(&self, address: u64) -> u16 {
        self.read(address, Width::Word) as u16
    }

    pub fn read_u32(&self, address: u64) -> u32 {
        self.read(address, Width::DoubleWord) as u32
    }

    pub fn read_u64(&self, address: u64) -> u64 {
        self.read(address, Width::QuadWord)
    }

    pub fn write_u8(&self, address: u64, value: u8) {
        self.write(address, Width::Byte, value as u64)
    }

    pub fn write_u16(&self, address: u64, value: u16) {
        self.write(address, Width::Word, value as u64)
    }

    pub fn write_u32(&self, address: u64, value: u32) {
        self.write(address, Width::DoubleWord, value as u64)
    }

    pub fn write_u64(&self, address: u64, value: u64) {
        self.write(address, Width::QuadWord, value)
    }

    pub fn read_bytes(&self, start: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_bytes_into(start, &mut buf);
        buf
    }

    /// Bulk read that may span several windows and gaps. Gaps read as zero.
    pub fn read_bytes_into(&self, start: u64, buf: &mut [u8]) {
        let map = self.snapshot();
        let mut done = 0usize;

        while done < buf.len() {
            let remaining = (buf.len() - done) as u64;
            let Some(address) = start.checked_add(done as u64) else {
                buf[done..].fill(0);
                break;
            };

            let chunk = match map.lookup(address) {
                Some(segment) => {
                    let n = (segment.end - address).min(remaining) as usize;
                    let entry = &segment.entry;
                    entry
                        .handlers
                        .read_bytes(entry.translate(address), &mut buf[done..done + n]);
                    n
                }
                None => {
                    let n = map
                        .next_mapped(address)
                        .map_or(remaining, |next| (next - address).min(remaining))
                        as usize;
                    tracing::debug!("Unmapped bulk read of {} byte(s) at {:#x}", n, address);
                    buf[done..done + n].fill(0);
                    n
                }
            };
            done += chunk;
        }
    }

    /// Bulk write that may span several windows and gaps. Bytes falling in
    /// gaps are dropped.
    pub fn write_bytes(&self, start: u64, data: &[u8]) {
        let map = self.snapshot();
        let mut done = 0usize;

        while done < data.len() {
            let remaining = (data.len() - done) as u64;
            let Some(address) = start.checked_add(done as u64) else {
                break;
            };

            let chunk = match map.lookup(address) {
                Some(segment) => {
                    let n = (segment.end - address).min(remaining) as usize;
                    let entry = &segment.entry;
                    entry
                        .handlers
                        .write_bytes(entry.translate(address), &data[done..done + n]);
                    n
                }
                None => {
                    let n = map
                        .next_mapped(address)
                        .map_or(remaining, |next| (next - address).min(remaining))
                        as usize;
                    tracing::debug!("Unmapped bulk write of {} byte(s) at {:#x}", n, address);
                    n
                }
            };
            done += chunk;
        }
    }
}
