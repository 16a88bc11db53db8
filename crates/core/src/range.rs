// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open interval `[start, end)` of bus addresses.
///
/// Ranges are never empty. Since `end` is exclusive, the very last address of
/// the 64-bit space (`u64::MAX`) cannot be covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressRange {
    start: u64,
    end: u64,
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> BusResult<Self> {
        if start >= end {
            return Err(BusError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range of `size` bytes beginning at `start`.
    pub fn by(start: u64, size: u64) -> BusResult<Self> {
        let end = start
            .checked_add(size)
            .ok_or(BusError::InvalidRange {
                start,
                end: u64::MAX,
            })?;
        Self::new(start, end)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Last address inside the range.
    pub fn last(&self) -> u64 {
        self.end - 1
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn contains_range(&self, other: &AddressRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn intersects(&self, other: &AddressRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: &AddressRange) -> Option<AddressRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(AddressRange { start, end })
    }

    /// Moves the range by `delta` bytes, failing on address-space overflow.
    pub fn shift(&self, delta: u64) -> BusResult<AddressRange> {
        let start = self.start.checked_add(delta);
        let end = self.end.checked_add(delta);
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            _ => Err(BusError::InvalidRange {
                start: self.start,
                end: u64::MAX,
            }),
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert_eq!(
            AddressRange::new(0x100, 0x100),
            Err(BusError::InvalidRange {
                start: 0x100,
                end: 0x100
            })
        );
        assert!(AddressRange::new(0x200, 0x100).is_err());
        assert!(AddressRange::by(0x100, 0).is_err());
        assert!(AddressRange::by(u64::MAX - 1, 4).is_err());
    }

    #[test]
    fn test_half_open_bounds() {
        let r = AddressRange::by(1000, 1000).unwrap();
        assert_eq!(r.start(), 1000);
        assert_eq!(r.end(), 2000);
        assert_eq!(r.last(), 1999);
        assert_eq!(r.len(), 1000);
        assert!(r.contains(1000));
        assert!(r.contains(1999));
        assert!(!r.contains(2000));
        assert!(!r.contains(999));
    }

    #[test]
    fn test_intersection() {
        let a = AddressRange::new(0, 100).unwrap();
        let b = AddressRange::new(50, 150).unwrap();
        let c = AddressRange::new(100, 200).unwrap();

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c)); // adjacent, not overlapping
        assert_eq!(a.intersection(&b), Some(AddressRange::new(50, 100).unwrap()));
        assert_eq!(a.intersection(&c), None);
        assert!(AddressRange::new(0, 200).unwrap().contains_range(&b));
        assert!(!a.contains_range(&b));
    }

    #[test]
    fn test_shift_and_display() {
        let r = AddressRange::by(0x10, 0x10).unwrap();
        assert_eq!(r.shift(0x100).unwrap(), AddressRange::new(0x110, 0x120).unwrap());
        assert!(r.shift(u64::MAX).is_err());
        assert_eq!(r.to_string(), "[0x10, 0x20)");
    }
}
