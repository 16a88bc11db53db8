// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::ExecutionUnit;
use crate::bus::SystemBus;
use crate::time::TimeInterval;
use std::collections::VecDeque;

/// A queued memory-to-memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub source: u64,
    pub destination: u64,
    pub length: u64,
    /// Bus address that receives a 32-bit `1` once the copy completes.
    pub done_flag: Option<u64>,
}

#[derive(Debug)]
struct Active {
    transfer: Transfer,
    copied: u64,
}

/// Bus-master copy engine moving a fixed number of bytes per tick.
///
/// Copies go through the bus in bulk, so they may span several peripherals
/// and unmapped gaps.
#[derive(Debug)]
pub struct BlockCopyEngine {
    name: String,
    bytes_per_tick: u64,
    queue: VecDeque<Transfer>,
    active: Option<Active>,
    completed: u64,
}

impl BlockCopyEngine {
    pub fn new(name: impl Into<String>, bytes_per_tick: u64) -> Self {
        Self {
            name: name.into(),
            bytes_per_tick: bytes_per_tick.max(1),
            queue: VecDeque::new(),
            active: None,
            completed: 0,
        }
    }

    pub fn submit(&mut self, transfer: Transfer) {
        tracing::debug!(
            "{}: queued {} bytes {:#x} -> {:#x}",
            self.name,
            transfer.length,
            transfer.source,
            transfer.destination
        );
        self.queue.push_back(transfer);
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }
}

impl ExecutionUnit for BlockCopyEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, bus: &SystemBus, budget: TimeInterval) -> TimeInterval {
        let mut ticks_left = budget.ticks().max(0) as u64;

        while ticks_left > 0 {
            let active = match self.active.take() {
                Some(active) => active,
                None => match self.queue.pop_front() {
                    Some(transfer) => Active {
                        transfer,
                        copied: 0,
                    },
                    None => break,
                },
            };
            let Active { transfer, copied } = active;

            let remaining = transfer.length - copied;
            let chunk = remaining.min(ticks_left.saturating_mul(self.bytes_per_tick));
            let data = bus.read_bytes(transfer.source + copied, chunk as usize);
            bus.write_bytes(transfer.destination + copied, &data);
            ticks_left = ticks_left.saturating_sub(chunk.div_ceil(self.bytes_per_tick));

            let copied = copied + chunk;
            if copied < transfer.length {
                self.active = Some(Active { transfer, copied });
                continue;
            }

            self.completed += 1;
            if let Some(flag) = transfer.done_flag {
                bus.write_u32(flag, 1);
            }
            tracing::trace!("{}: transfer to {:#x} done", self.name, transfer.destination);
        }

        // Idle time passes as well.
        budget
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.active = None;
        self.completed = 0;
    }
}
