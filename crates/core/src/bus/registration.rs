// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AddressRange, BusError, BusResult};
use std::fmt;

/// Describes where a peripheral appears on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Contiguous window. Accesses reach the peripheral at
    /// `address - range.start + offset`.
    Range { range: AddressRange, offset: u64 },
    /// Window starting at `address`, sized by [`crate::Peripheral::size`].
    Point { address: u64, offset: u64 },
    /// Window routed to a named sub-region of the peripheral. Offsets are
    /// relative to the window start.
    Region { range: AddressRange, region: String },
    /// Several windows onto the same peripheral, each addressed from zero.
    RangeSet { ranges: Vec<AddressRange> },
}

/// One resolved window of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mapping {
    pub range: AddressRange,
    pub offset: u64,
    pub region: Option<String>,
}

impl Registration {
    pub fn range(range: AddressRange) -> Self {
        Registration::Range { range, offset: 0 }
    }

    pub fn by(start: u64, size: u64) -> BusResult<Self> {
        Ok(Self::range(AddressRange::by(start, size)?))
    }

    pub fn point(address: u64) -> Self {
        Registration::Point { address, offset: 0 }
    }

    pub fn region(range: AddressRange, region: impl Into<String>) -> Self {
        Registration::Region {
            range,
            region: region.into(),
        }
    }

    pub fn range_set(ranges: impl IntoIterator<Item = AddressRange>) -> Self {
        Registration::RangeSet {
            ranges: ranges.into_iter().collect(),
        }
    }

    /// Sets the peripheral-side offset of `Range` and `Point` registrations.
    pub fn with_offset(self, offset: u64) -> Self {
        match self {
            Registration::Range { range, .. } => Registration::Range { range, offset },
            Registration::Point { address, .. } => Registration::Point { address, offset },
            other => other,
        }
    }

    pub(crate) fn resolve(&self, peripheral_size: Option<u64>) -> BusResult<Vec<Mapping>> {
        let mappings = match self {
            Registration::Range { range, offset } => vec![Mapping {
                range: *range,
                offset: *offset,
                region: None,
            }],
            Registration::Point { address, offset } => {
                let size = peripheral_size.ok_or(BusError::UnknownSize(*address))?;
                vec![Mapping {
                    range: AddressRange::by(*address, size)?,
                    offset: *offset,
                    region: None,
                }]
            }
            Registration::Region { range, region } => vec![Mapping {
                range: *range,
                offset: 0,
                region: Some(region.clone()),
            }],
            Registration::RangeSet { ranges } => {
                if ranges.is_empty() {
                    return Err(BusError::EmptyRegistration);
                }
                ranges
                    .iter()
                    .map(|range| Mapping {
                        range: *range,
                        offset: 0,
                        region: None,
                    })
                    .collect()
            }
        };

        for (i, a) in mappings.iter().enumerate() {
            if let Some(b) = mappings[i + 1..].iter().find(|b| a.range.intersects(&b.range)) {
                return Err(BusError::Overlap {
                    range: b.range,
                    existing: a.range,
                });
            }
        }
        Ok(mappings)
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Range { range, offset: 0 } => write!(f, "{}", range),
            Registration::Range { range, offset } => write!(f, "{} (+{:#x})", range, offset),
            Registration::Point { address, .. } => write!(f, "@{:#x}", address),
            Registration::Region { range, region } => write!(f, "{} '{}'", range, region),
            Registration::RangeSet { ranges } => {
                let parts: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}
