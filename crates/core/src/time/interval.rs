// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Virtual-time resolution: one tick per microsecond.
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// A span of virtual time.
///
/// Arithmetic saturates; [`TimeInterval::INFINITE`] absorbs additions and is
/// the identity for `min`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimeInterval {
    ticks: i64,
}

impl TimeInterval {
    pub const ZERO: TimeInterval = TimeInterval { ticks: 0 };
    pub const INFINITE: TimeInterval = TimeInterval { ticks: i64::MAX };

    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    pub const fn from_micros(us: u64) -> Self {
        Self::from_ticks(saturate(us))
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self::from_ticks(saturate(ms.saturating_mul(1_000)))
    }

    pub const fn from_seconds(s: u64) -> Self {
        Self::from_ticks(saturate(s.saturating_mul(TICKS_PER_SECOND as u64)))
    }

    pub const fn ticks(&self) -> i64 {
        self.ticks
    }

    pub const fn is_infinite(&self) -> bool {
        self.ticks == i64::MAX
    }

    pub const fn is_positive(&self) -> bool {
        self.ticks > 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.ticks as f64 / TICKS_PER_SECOND as f64
    }
}

const fn saturate(v: u64) -> i64 {
    if v > i64::MAX as u64 {
        i64::MAX
    } else {
        v as i64
    }
}

impl Add for TimeInterval {
    type Output = TimeInterval;

    fn add(self, rhs: TimeInterval) -> TimeInterval {
        if self.is_infinite() || rhs.is_infinite() {
            return TimeInterval::INFINITE;
        }
        TimeInterval::from_ticks(self.ticks.saturating_add(rhs.ticks))
    }
}

impl Sub for TimeInterval {
    type Output = TimeInterval;

    fn sub(self, rhs: TimeInterval) -> TimeInterval {
        if self.is_infinite() {
            return TimeInterval::INFINITE;
        }
        TimeInterval::from_ticks(self.ticks.saturating_sub(rhs.ticks))
    }
}

impl AddAssign for TimeInterval {
    fn add_assign(&mut self, rhs: TimeInterval) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeInterval {
    fn sub_assign(&mut self, rhs: TimeInterval) {
        *self = *self - rhs;
    }
}

impl Sum for TimeInterval {
    fn sum<I: Iterator<Item = TimeInterval>>(iter: I) -> TimeInterval {
        iter.fold(TimeInterval::ZERO, Add::add)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return write!(f, "inf");
        }
        let sign = if self.ticks < 0 { "-" } else { "" };
        let abs = self.ticks.unsigned_abs();
        write!(
            f,
            "{}{}.{:06}s",
            sign,
            abs / TICKS_PER_SECOND as u64,
            abs % TICKS_PER_SECOND as u64
        )
    }
}

/// Identifies a time domain. Stamps from different domains do not compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainId(u64);

impl DomainId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DomainId(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

/// A point in virtual time, tied to the domain that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeStamp {
    pub interval: TimeInterval,
    pub domain: DomainId,
}

impl TimeStamp {
    pub fn new(interval: TimeInterval, domain: DomainId) -> Self {
        Self { interval, domain }
    }
}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.domain != other.domain {
            return None;
        }
        Some(self.interval.cmp(&other.interval))
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.interval, self.domain)
    }
}
