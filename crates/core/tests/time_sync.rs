// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use labwired_emucore::{
    MasterTimeSource, SinkState, TimeError, TimeInterval, TimeSink, TimeStamp,
};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn ticks(n: i64) -> TimeInterval {
    TimeInterval::from_ticks(n)
}

/// Records every grant and optionally limits how much of one it consumes.
#[derive(Default)]
struct RecordingSink {
    name: String,
    max_grant: Option<TimeInterval>,
    consume_limit: Option<TimeInterval>,
    panic_after: Option<u64>,
    consumed: AtomicI64,
    grants: AtomicU64,
    pauses: AtomicU64,
    resumes: AtomicU64,
    sizes: Mutex<Vec<TimeInterval>>,
}

impl RecordingSink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn with_max_grant(mut self, max: i64) -> Self {
        self.max_grant = Some(ticks(max));
        self
    }

    fn with_consume_limit(mut self, limit: i64) -> Self {
        self.consume_limit = Some(ticks(limit));
        self
    }

    fn panicking_after(mut self, grants: u64) -> Self {
        self.panic_after = Some(grants);
        self
    }

    fn consumed(&self) -> TimeInterval {
        ticks(self.consumed.load(Ordering::SeqCst))
    }

    fn grants(&self) -> u64 {
        self.grants.load(Ordering::SeqCst)
    }
}

impl TimeSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_grant(&self) -> TimeInterval {
        self.max_grant.unwrap_or(TimeInterval::INFINITE)
    }

    fn grant_time(&self, interval: TimeInterval) -> TimeInterval {
        let n = self.grants.fetch_add(1, Ordering::SeqCst);
        if self.panic_after.is_some_and(|limit| n >= limit) {
            panic!("{} failed on grant {}", self.name, n);
        }
        self.sizes.lock().unwrap().push(interval);
        let used = match self.consume_limit {
            Some(limit) => interval.min(limit),
            None => interval,
        };
        self.consumed.fetch_add(used.ticks(), Ordering::SeqCst);
        used
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn test_run_for_advances_every_sink_by_period() {
    let time = MasterTimeSource::with_quantum(ticks(100)).unwrap();
    let sinks = [
        Arc::new(RecordingSink::new("a").with_max_grant(30)),
        Arc::new(RecordingSink::new("b").with_max_grant(70)),
        Arc::new(RecordingSink::new("c")),
    ];
    let ids: Vec<_> = sinks
        .iter()
        .map(|s| time.register_sink(s.clone()).unwrap())
        .collect();

    time.run_for(ticks(1000)).unwrap();

    assert_eq!(time.elapsed_virtual_time().interval, ticks(1000));
    for (sink, id) in sinks.iter().zip(&ids) {
        assert_eq!(sink.consumed(), ticks(1000));
        assert_eq!(time.sink_elapsed(*id).unwrap(), ticks(1000));
        // Nobody ever sees a step larger than the smallest cap.
        assert!(sink.sizes.lock().unwrap().iter().all(|s| *s <= ticks(30)));
    }
    // Every sink saw the same sequence of steps.
    let first = sinks[0].sizes.lock().unwrap().clone();
    assert_eq!(*sinks[2].sizes.lock().unwrap(), first);
    time.dispose().unwrap();
}

/// Fails the test if it is granted time while another sink lags behind.
struct BarrierSink {
    index: usize,
    clocks: Arc<Vec<AtomicI64>>,
    violated: Arc<AtomicBool>,
}

impl TimeSink for BarrierSink {
    fn max_grant(&self) -> TimeInterval {
        ticks(7 + self.index as i64 * 5)
    }

    fn grant_time(&self, interval: TimeInterval) -> TimeInterval {
        let own = self.clocks[self.index].load(Ordering::SeqCst);
        if self.clocks.iter().any(|c| c.load(Ordering::SeqCst) < own) {
            self.violated.store(true, Ordering::SeqCst);
        }
        thread::yield_now();
        self.clocks[self.index].fetch_add(interval.ticks(), Ordering::SeqCst);
        interval
    }
}

#[test]
fn test_no_sink_runs_ahead_of_the_barrier() {
    let time = MasterTimeSource::with_quantum(ticks(50)).unwrap();
    let clocks = Arc::new((0..4).map(|_| AtomicI64::new(0)).collect::<Vec<_>>());
    let violated = Arc::new(AtomicBool::new(false));
    for index in 0..4 {
        time.register_sink(Arc::new(BarrierSink {
            index,
            clocks: clocks.clone(),
            violated: violated.clone(),
        }))
        .unwrap();
    }

    time.run_for(ticks(500)).unwrap();

    assert!(!violated.load(Ordering::SeqCst));
    assert!(clocks.iter().all(|c| c.load(Ordering::SeqCst) == 500));
}

#[test]
fn test_under_consumed_remainder_is_regranted() {
    let time = MasterTimeSource::with_quantum(ticks(100)).unwrap();
    let slow = Arc::new(RecordingSink::new("slow").with_consume_limit(7));
    let fast = Arc::new(RecordingSink::new("fast"));
    time.register_sink(slow.clone()).unwrap();
    time.register_sink(fast.clone()).unwrap();

    time.run_for(ticks(100)).unwrap();

    assert_eq!(slow.consumed(), ticks(100));
    assert_eq!(fast.consumed(), ticks(100));
    // 100 ticks at 7 per grant
    assert_eq!(slow.grants(), 15);
    assert_eq!(fast.grants(), 1);
    let sizes = slow.sizes.lock().unwrap();
    assert_eq!(sizes[0], ticks(100));
    assert_eq!(sizes[1], ticks(93));
}

#[test]
fn test_run_counts_sync_periods() {
    let time = MasterTimeSource::with_quantum(ticks(40)).unwrap();
    let sink = Arc::new(RecordingSink::new("s").with_max_grant(15));
    time.register_sink(sink.clone()).unwrap();

    time.run(3).unwrap();

    assert_eq!(time.elapsed_virtual_time().interval, ticks(120));
    assert_eq!(time.nearest_sync_point().interval, ticks(120));
    assert_eq!(sink.consumed(), ticks(120));
}

#[test]
fn test_pause_and_resume_delivered_once_each() {
    let time = MasterTimeSource::new();
    let sink = Arc::new(RecordingSink::new("s"));
    time.register_sink(sink.clone()).unwrap();

    for _ in 0..5 {
        time.pause().unwrap();
        time.pause().unwrap();
        assert!(time.is_paused());
        assert_eq!(time.run_for(ticks(10)), Err(TimeError::Paused));
        time.resume().unwrap();
        time.resume().unwrap();
    }

    assert_eq!(sink.pauses.load(Ordering::SeqCst), 5);
    assert_eq!(sink.resumes.load(Ordering::SeqCst), 5);
    assert_eq!(sink.grants(), 0);
}

#[test]
fn test_sink_registered_while_paused_is_paused() {
    let time = MasterTimeSource::new();
    time.pause().unwrap();
    let sink = Arc::new(RecordingSink::new("late"));
    time.register_sink(sink.clone()).unwrap();
    assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);

    // Starting a paused source resumes it.
    time.start().unwrap();
    assert!(!time.is_paused());
    assert_eq!(sink.resumes.load(Ordering::SeqCst), 1);
    time.stop().unwrap();
}

#[test]
fn test_running_sinks_see_one_pause_and_one_resume() {
    let time = MasterTimeSource::with_quantum(ticks(10)).unwrap();
    let sinks: Vec<_> = (0..4)
        .map(|i| Arc::new(RecordingSink::new(&format!("core{}", i))))
        .collect();
    for sink in &sinks {
        time.register_sink(sink.clone()).unwrap();
    }

    time.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || sinks
        .iter()
        .all(|s| s.consumed() >= ticks(100))));

    for _ in 0..10 {
        time.pause().unwrap();
    }
    assert!(!time.is_running());
    for sink in &sinks {
        assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resumes.load(Ordering::SeqCst), 0);
    }

    for i in 0..10 {
        if i % 2 == 0 {
            time.start().unwrap();
        } else {
            time.resume().unwrap();
        }
    }
    assert!(time.is_running());
    for sink in &sinks {
        assert_eq!(sink.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(sink.resumes.load(Ordering::SeqCst), 1);
    }

    let resumed_at = sinks[0].consumed();
    assert!(wait_until(Duration::from_secs(5), || sinks[0].consumed() > resumed_at));
    time.stop().unwrap();
    time.dispose().unwrap();
}

#[test]
fn test_registration_during_pause_toggling_stays_balanced() {
    let time = MasterTimeSource::new();
    let sinks: Vec<Arc<RecordingSink>> = thread::scope(|scope| {
        let toggler = scope.spawn(|| {
            for _ in 0..1000 {
                time.pause().unwrap();
                time.resume().unwrap();
            }
        });
        let sinks: Vec<_> = (0..100)
            .map(|i| {
                let sink = Arc::new(RecordingSink::new(&format!("late{}", i)));
                time.register_sink(sink.clone()).unwrap();
                sink
            })
            .collect();
        toggler.join().unwrap();
        sinks
    });

    assert!(!time.is_paused());
    for sink in &sinks {
        assert_eq!(
            sink.pauses.load(Ordering::SeqCst),
            sink.resumes.load(Ordering::SeqCst),
            "{} is unbalanced",
            sink.name
        );
    }
    time.dispose().unwrap();
}

#[test]
fn test_dispatcher_advances_time() {
    let time = MasterTimeSource::with_quantum(ticks(10)).unwrap();
    let sink = Arc::new(RecordingSink::new("s"));
    time.register_sink(sink.clone()).unwrap();

    time.start().unwrap();
    time.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.consumed() >= ticks(1000)));
    assert_eq!(time.run_for(ticks(10)), Err(TimeError::AlreadyRunning));

    time.pause().unwrap();
    assert!(!time.is_running());
    let frozen = time.elapsed_virtual_time();
    thread::sleep(Duration::from_millis(10));
    assert_eq!(time.elapsed_virtual_time(), frozen);

    // Resuming restarts the dispatcher that pausing stopped.
    time.resume().unwrap();
    assert!(time.is_running());
    assert!(wait_until(Duration::from_secs(5), || {
        time.elapsed_virtual_time().interval > frozen.interval
    }));
    time.stop().unwrap();
    assert!(!time.is_running());

    // Stopped: synchronous driving works again.
    let before = time.elapsed_virtual_time().interval;
    time.run_for(ticks(25)).unwrap();
    assert_eq!(time.elapsed_virtual_time().interval, before + ticks(25));
}

#[test]
fn test_dispose_is_idempotent() {
    let time = MasterTimeSource::new();
    let sink = Arc::new(RecordingSink::new("s"));
    let id = time.register_sink(sink.clone()).unwrap();
    time.start().unwrap();

    time.dispose().unwrap();
    time.dispose().unwrap();

    assert!(time.is_disposed());
    assert!(!time.is_running());
    assert_eq!(time.sink_count(), 0);
    assert_eq!(time.sink_state(id), Err(TimeError::UnknownSink(id)));
    assert_eq!(time.run_for(ticks(1)), Err(TimeError::Disposed));
    assert_eq!(time.start(), Err(TimeError::Disposed));
    assert_eq!(
        time.register_sink(Arc::new(RecordingSink::new("x"))).unwrap_err(),
        TimeError::Disposed
    );
    time.stop().unwrap();
}

#[test]
fn test_sink_panic_surfaces_from_run_for() {
    let time = MasterTimeSource::new();
    time.register_sink(Arc::new(RecordingSink::new("faulty").panicking_after(2)))
        .unwrap();

    match time.run_for(TimeInterval::from_millis(1)) {
        Err(TimeError::SinkPanicked { name, message }) => {
            assert_eq!(name, "faulty");
            assert!(message.contains("failed on grant 2"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    // Two full steps happened before the failure.
    assert_eq!(time.elapsed_virtual_time().interval, TimeInterval::from_micros(200));
}

#[test]
fn test_sink_panic_surfaces_from_stop_and_dispose() {
    let time = MasterTimeSource::new();
    time.register_sink(Arc::new(RecordingSink::new("faulty").panicking_after(0)))
        .unwrap();
    time.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !time.is_running()));
    assert!(matches!(time.stop(), Err(TimeError::SinkPanicked { .. })));
    // Reported once.
    assert_eq!(time.stop(), Ok(()));

    let time = MasterTimeSource::new();
    time.register_sink(Arc::new(RecordingSink::new("faulty").panicking_after(0)))
        .unwrap();
    time.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !time.is_running()));
    assert!(matches!(time.dispose(), Err(TimeError::SinkPanicked { .. })));
    assert_eq!(time.dispose(), Ok(()));
}

#[test]
fn test_synced_action_runs_at_next_sync_point() {
    let time = MasterTimeSource::with_quantum(ticks(100)).unwrap();
    let sink = Arc::new(RecordingSink::new("s"));
    time.register_sink(sink.clone()).unwrap();

    let seen: Arc<Mutex<Vec<(TimeStamp, TimeInterval)>>> = Arc::default();
    {
        let (seen, sink) = (seen.clone(), sink.clone());
        time.execute_in_nearest_synced_state(move |at| {
            seen.lock().unwrap().push((at, sink.consumed()));
        });
    }

    time.run_for(ticks(250)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.interval, ticks(100));
    assert_eq!(seen[0].0.domain, time.domain());
    // The sink had consumed exactly up to the sync point.
    assert_eq!(seen[0].1, ticks(100));
}

#[test]
fn test_disabled_sink_is_skipped() {
    let time = MasterTimeSource::with_quantum(ticks(100)).unwrap();
    let on = Arc::new(RecordingSink::new("on"));
    let off = Arc::new(RecordingSink::new("off").with_max_grant(1));
    time.register_sink(on.clone()).unwrap();
    let off_id = time.register_sink(off.clone()).unwrap();

    time.set_sink_enabled(off_id, false).unwrap();
    assert_eq!(time.sink_state(off_id), Ok(SinkState::Disabled));
    time.run_for(ticks(300)).unwrap();

    assert_eq!(off.grants(), 0);
    assert_eq!(on.consumed(), ticks(300));
    // A disabled sink's cap no longer limits the step.
    assert_eq!(on.grants(), 3);

    time.set_sink_enabled(off_id, true).unwrap();
    assert_eq!(time.sink_state(off_id), Ok(SinkState::Blocked));
    time.run_for(ticks(5)).unwrap();
    assert_eq!(off.consumed(), ticks(5));
}

#[test]
fn test_detached_sink_stops_receiving_grants() {
    let time = MasterTimeSource::with_quantum(ticks(10)).unwrap();
    let sink = Arc::new(RecordingSink::new("s"));
    let id = time.register_sink(sink.clone()).unwrap();
    time.run_for(ticks(20)).unwrap();

    time.detach_sink(id).unwrap();
    assert_eq!(time.detach_sink(id), Err(TimeError::UnknownSink(id)));
    time.run_for(ticks(20)).unwrap();

    assert_eq!(sink.consumed(), ticks(20));
    assert_eq!(time.elapsed_virtual_time().interval, ticks(40));
    assert_eq!(time.sink_count(), 0);
}

#[test]
fn test_quantum_validation() {
    assert_eq!(
        MasterTimeSource::with_quantum(TimeInterval::ZERO).unwrap_err(),
        TimeError::InvalidQuantum
    );
    let time = MasterTimeSource::new();
    assert_eq!(
        time.set_quantum(TimeInterval::INFINITE),
        Err(TimeError::InvalidQuantum)
    );
    time.set_quantum(ticks(20)).unwrap();
    assert_eq!(time.quantum(), ticks(20));
}

#[test]
fn test_timestamps_from_different_domains_do_not_compare() {
    let a = MasterTimeSource::new();
    let b = MasterTimeSource::new();
    assert_ne!(a.domain(), b.domain());
    assert_eq!(
        a.elapsed_virtual_time()
            .partial_cmp(&b.elapsed_virtual_time()),
        None
    );
}
