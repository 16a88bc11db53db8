// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::ExecutionUnit;
use crate::bus::SystemBus;
use crate::time::TimeInterval;

/// Down-counting timer that sets bit 0 of a status word on the bus when it
/// expires.
///
/// It caps every grant at its remaining count, so expiry always lands exactly
/// on a step boundary.
#[derive(Debug)]
pub struct CountdownTimer {
    name: String,
    period: TimeInterval,
    remaining: TimeInterval,
    status_address: u64,
    periodic: bool,
    running: bool,
    expirations: u64,
}

impl CountdownTimer {
    pub fn new(name: impl Into<String>, period: TimeInterval, status_address: u64) -> Self {
        let period = period.max(TimeInterval::from_ticks(1));
        Self {
            name: name.into(),
            period,
            remaining: period,
            status_address,
            periodic: false,
            running: true,
            expirations: 0,
        }
    }

    pub fn periodic(mut self) -> Self {
        self.periodic = true;
        self
    }

    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn remaining(&self) -> TimeInterval {
        self.remaining
    }

    fn expire(&mut self, bus: &SystemBus) {
        self.expirations += 1;
        let status = bus.read_u32(self.status_address);
        bus.write_u32(self.status_address, status | 1);
        tracing::trace!("{}: expired ({} so far)", self.name, self.expirations);

        if self.periodic {
            self.remaining = self.period;
        } else {
            self.running = false;
        }
    }
}

impl ExecutionUnit for CountdownTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_grant(&self) -> TimeInterval {
        if self.running {
            self.remaining
        } else {
            TimeInterval::INFINITE
        }
    }

    fn execute(&mut self, bus: &SystemBus, budget: TimeInterval) -> TimeInterval {
        let mut left = budget;
        while self.running && left >= self.remaining {
            left -= self.remaining;
            self.expire(bus);
        }
        if self.running {
            self.remaining -= left;
        }
        budget
    }

    fn reset(&mut self) {
        self.remaining = self.period;
        self.running = true;
        self.expirations = 0;
    }
}
