// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::time::{SinkId, TimeInterval, TimeStamp};
use crate::SimulationObserver;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Counts grants and sync points of a time source.
#[derive(Debug)]
pub struct TimeMetrics {
    grant_count: AtomicU64,
    sync_point_count: AtomicU64,
    run_count: AtomicU64,
    last_sync_ticks: AtomicI64,
    granted_by_sink: Mutex<HashMap<SinkId, i64>>,
    start_time: Instant,
}

impl Default for TimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeMetrics {
    pub fn new() -> Self {
        Self {
            grant_count: AtomicU64::new(0),
            sync_point_count: AtomicU64::new(0),
            run_count: AtomicU64::new(0),
            last_sync_ticks: AtomicI64::new(0),
            granted_by_sink: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.grant_count.store(0, Ordering::SeqCst);
        self.sync_point_count.store(0, Ordering::SeqCst);
        self.run_count.store(0, Ordering::SeqCst);
        self.last_sync_ticks.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.granted_by_sink.lock() {
            m.clear();
        }
    }

    pub fn get_grants(&self) -> u64 {
        self.grant_count.load(Ordering::SeqCst)
    }

    pub fn get_sync_points(&self) -> u64 {
        self.sync_point_count.load(Ordering::SeqCst)
    }

    /// Number of dispatcher or synchronous runs started.
    pub fn get_runs(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }

    pub fn get_last_sync_point(&self) -> TimeInterval {
        TimeInterval::from_ticks(self.last_sync_ticks.load(Ordering::SeqCst))
    }

    /// Total time granted to one sink, re-grants included.
    pub fn get_granted(&self, sink: SinkId) -> TimeInterval {
        let ticks = self
            .granted_by_sink
            .lock()
            .ok()
            .and_then(|m| m.get(&sink).copied())
            .unwrap_or(0);
        TimeInterval::from_ticks(ticks)
    }

    /// Virtual seconds per host second, measured up to the last sync point.
    pub fn get_speed(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_last_sync_point().as_secs_f64() / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for TimeMetrics {
    fn on_simulation_start(&self) {
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_grant(&self, sink: SinkId, interval: TimeInterval) {
        self.grant_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.granted_by_sink.lock() {
            let total = m.entry(sink).or_insert(0);
            *total = total.saturating_add(interval.ticks());
        }
    }

    fn on_sync_point(&self, at: TimeStamp) {
        self.sync_point_count.fetch_add(1, Ordering::SeqCst);
        self.last_sync_ticks
            .store(at.interval.ticks(), Ordering::SeqCst);
    }
}
