// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AccessHandlers, AddressRange, Peripheral};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One window of one registration, as stored in the bus table.
#[derive(Debug)]
pub(crate) struct Entry {
    /// Monotonic; later entries win ties between equally narrow windows.
    pub seq: u64,
    /// Shared by all windows created by the same `register` call.
    pub registration: u64,
    pub name: String,
    pub peripheral: Arc<dyn Peripheral>,
    pub range: AddressRange,
    pub offset: u64,
    pub region: Option<String>,
    pub overlay: bool,
    pub handlers: AccessHandlers,
}

impl Entry {
    pub fn translate(&self, address: u64) -> u64 {
        address - self.range.start() + self.offset
    }

    pub fn peripheral_key(&self) -> usize {
        peripheral_key(&self.peripheral)
    }
}

/// Identity of a peripheral instance, independent of vtable.
pub(crate) fn peripheral_key(peripheral: &Arc<dyn Peripheral>) -> usize {
    Arc::as_ptr(peripheral) as *const () as usize
}

#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub start: u64,
    pub end: u64,
    pub entry: Arc<Entry>,
}

/// Immutable snapshot of the bus table, flattened into disjoint segments.
#[derive(Debug, Default)]
pub(crate) struct BusMap {
    pub entries: Vec<Arc<Entry>>,
    segments: BTreeMap<u64, Segment>,
}

impl BusMap {
    /// Flattens possibly nested windows so each address resolves to the
    /// narrowest window containing it.
    pub fn build(entries: Vec<Arc<Entry>>) -> Self {
        let mut bounds: Vec<u64> = entries
            .iter()
            .flat_map(|e| [e.range.start(), e.range.end()])
            .collect();
        bounds.sort_unstable();
        bounds.dedup();

        let mut segments: BTreeMap<u64, Segment> = BTreeMap::new();
        let mut last: Option<Segment> = None;

        for pair in bounds.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let winner = entries
                .iter()
                .filter(|e| e.range.start() <= start && end <= e.range.end())
                .min_by(|a, b| {
                    a.range
                        .len()
                        .cmp(&b.range.len())
                        .then_with(|| b.seq.cmp(&a.seq))
                });

            if let Some(w) = winner {
                if let Some(prev) = last.as_mut() {
                    if prev.end == start && Arc::ptr_eq(&prev.entry, w) {
                        prev.end = end;
                        continue;
                    }
                }
                if let Some(prev) = last.take() {
                    segments.insert(prev.start, prev);
                }
                last = Some(Segment {
                    start,
                    end,
                    entry: w.clone(),
                });
            } else if let Some(prev) = last.take() {
                segments.insert(prev.start, prev);
            }
        }
        if let Some(prev) = last {
            segments.insert(prev.start, prev);
        }

        Self { entries, segments }
    }

    pub fn lookup(&self, address: u64) -> Option<&Segment> {
        self.segments
            .range(..=address)
            .next_back()
            .map(|(_, s)| s)
            .filter(|s| address < s.end)
    }

    /// First mapped address strictly after `address`, if any.
    pub fn next_mapped(&self, address: u64) -> Option<u64> {
        self.segments
            .range(address.checked_add(1)?..)
            .next()
            .map(|(start, _)| *start)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessWidths;

    #[derive(Debug)]
    struct Dummy;

    impl Peripheral for Dummy {
        fn widths(&self) -> AccessWidths {
            AccessWidths::BYTE
        }
    }

    fn entry(seq: u64, start: u64, end: u64) -> Arc<Entry> {
        let peripheral: Arc<dyn Peripheral> = Arc::new(Dummy);
        Arc::new(Entry {
            seq,
            registration: seq,
            name: format!("e{}", seq),
            handlers: AccessHandlers::for_peripheral(peripheral.clone()),
            peripheral,
            range: AddressRange::new(start, end).unwrap(),
            offset: 0,
            region: None,
            overlay: seq > 0,
        })
    }

    #[test]
    fn test_narrowest_window_wins() {
        let map = BusMap::build(vec![entry(0, 0, 0x1000), entry(1, 0x100, 0x200)]);

        assert_eq!(map.lookup(0x50).unwrap().entry.seq, 0);
        assert_eq!(map.lookup(0x150).unwrap().entry.seq, 1);
        assert_eq!(map.lookup(0x250).unwrap().entry.seq, 0);
        assert!(map.lookup(0x1000).is_none());
        assert_eq!(map.segments().count(), 3);
    }

    #[test]
    fn test_newest_wins_ties() {
        let map = BusMap::build(vec![entry(0, 0, 0x100), entry(1, 0, 0x100)]);
        assert_eq!(map.lookup(0).unwrap().entry.seq, 1);
        assert_eq!(map.segments().count(), 1);
    }

    #[test]
    fn test_gaps() {
        let map = BusMap::build(vec![entry(0, 0x10, 0x20), entry(1, 0x40, 0x50)]);
        assert!(map.lookup(0x30).is_none());
        assert_eq!(map.next_mapped(0x20), Some(0x40));
        assert_eq!(map.next_mapped(0x40), None);
        assert_eq!(map.next_mapped(0), Some(0x10));
    }
}
