// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::handle::{HandleStatus, SinkState, TimeHandle};
use super::rendezvous::{Outcome, Rendezvous};
use super::{DomainId, SinkId, TimeInterval, TimeSink, TimeStamp};
use crate::{panic_message, SimulationObserver, TimeError, TimeResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

pub const DEFAULT_QUANTUM: TimeInterval = TimeInterval::from_micros(100);

type SyncedAction = Box<dyn FnOnce(TimeStamp) + Send>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock state touched only between barrier rounds.
struct Engine {
    rendezvous: Rendezvous,
    handles: BTreeMap<SinkId, TimeHandle>,
    elapsed: TimeInterval,
    sync_point: TimeInterval,
    quantum: TimeInterval,
}

struct SinkEntry {
    name: String,
    status: Arc<HandleStatus>,
}

#[derive(Debug, Clone, Copy)]
struct StepOutcome {
    advanced: TimeInterval,
    synced: bool,
    participants: usize,
}

struct Shared {
    domain: DomainId,
    engine: Mutex<Engine>,
    directory: RwLock<BTreeMap<SinkId, SinkEntry>>,
    // Lock-free mirrors of the engine clock.
    elapsed: AtomicI64,
    sync_point: AtomicI64,
    quantum: AtomicI64,
    /// Set while the dispatcher should keep looping.
    running: AtomicBool,
    /// Held by whoever is currently advancing time (dispatcher or `run_for`).
    driving: AtomicBool,
    paused: AtomicBool,
    disposed: AtomicBool,
    next_sink: AtomicU64,
    synced_actions: Mutex<Vec<SyncedAction>>,
    observers: RwLock<Vec<Arc<dyn SimulationObserver>>>,
}

struct DrivingGuard<'a>(&'a AtomicBool);

impl Drop for DrivingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    fn lock_engine(&self) -> MutexGuard<'_, Engine> {
        lock(&self.engine)
    }

    fn claim_driving(&self) -> TimeResult<()> {
        self.driving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| TimeError::AlreadyRunning)
    }

    fn try_drive(&self) -> TimeResult<DrivingGuard<'_>> {
        self.claim_driving()?;
        Ok(DrivingGuard(&self.driving))
    }

    fn notify(&self, f: impl Fn(&dyn SimulationObserver)) {
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            f(observer.as_ref());
        }
    }

    fn stamp(&self, interval: TimeInterval) -> TimeStamp {
        TimeStamp::new(interval, self.domain)
    }

    /// Advances the clock by one barrier step of at most `limit`.
    ///
    /// The step is bounded by the next sync point and every enabled sink's
    /// `max_grant`. All enabled sinks are granted the step; sinks that consume
    /// less get their remainder re-granted until every one has consumed the
    /// whole step. Only then does the clock move.
    fn step(&self, limit: TimeInterval) -> TimeResult<StepOutcome> {
        let mut engine = self.lock_engine();

        if engine.sync_point <= engine.elapsed {
            engine.sync_point = engine.elapsed + engine.quantum;
            self.sync_point
                .store(engine.sync_point.ticks(), Ordering::Release);
        }

        let participants: Vec<(SinkId, Arc<dyn TimeSink>)> = engine
            .handles
            .values()
            .filter(|h| h.status.is_enabled())
            .map(|h| (h.id, h.sink.clone()))
            .collect();

        let mut step = (engine.sync_point - engine.elapsed).min(limit);
        for (_, sink) in &participants {
            step = step.min(sink.max_grant());
        }
        if !step.is_positive() {
            step = TimeInterval::from_ticks(1);
        }

        let mut pending: Vec<(SinkId, TimeInterval)> =
            participants.iter().map(|(id, _)| (*id, step)).collect();
        while !pending.is_empty() {
            for (id, interval) in &pending {
                self.notify(|o| o.on_grant(*id, *interval));
            }

            let reports = engine.rendezvous.round(&pending);
            pending.clear();

            let mut failure = None;
            for report in reports {
                match report.outcome {
                    Outcome::Consumed(consumed) if consumed < report.granted => {
                        pending.push((report.sink, report.granted - consumed));
                    }
                    Outcome::Consumed(_) => {}
                    Outcome::Failed(message) => {
                        if failure.is_none() {
                            let name = engine
                                .handles
                                .get(&report.sink)
                                .map_or_else(|| report.sink.to_string(), |h| h.name.clone());
                            failure = Some(TimeError::SinkPanicked { name, message });
                        }
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if self.disposed.load(Ordering::Acquire) {
                return Ok(StepOutcome {
                    advanced: TimeInterval::ZERO,
                    synced: false,
                    participants: participants.len(),
                });
            }
            if !pending.is_empty() {
                thread::yield_now();
            }
        }

        engine.elapsed += step;
        self.elapsed.store(engine.elapsed.ticks(), Ordering::Release);

        let synced = engine.elapsed >= engine.sync_point;
        if synced {
            let at = self.stamp(engine.elapsed);
            let actions = std::mem::take(&mut *lock(&self.synced_actions));
            for action in actions {
                action(at);
            }
            self.notify(|o| o.on_sync_point(at));
            tracing::trace!("Reached sync point {}", at);
        }

        Ok(StepOutcome {
            advanced: step,
            synced,
            participants: participants.len(),
        })
    }
}

fn dispatcher_loop(shared: Arc<Shared>) -> TimeResult<()> {
    // Claimed by the spawner.
    let _driving = DrivingGuard(&shared.driving);
    tracing::debug!("Dispatcher started in {}", shared.domain);
    shared.notify(|o| o.on_simulation_start());

    let mut result = Ok(());
    while shared.running.load(Ordering::Acquire) && !shared.disposed.load(Ordering::Acquire) {
        match shared.step(TimeInterval::INFINITE) {
            Ok(outcome) if outcome.participants == 0 => thread::yield_now(),
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Dispatcher stopped: {}", e);
                result = Err(e);
                break;
            }
        }
    }

    shared.running.store(false, Ordering::Release);
    shared.notify(|o| o.on_simulation_stop());
    tracing::debug!("Dispatcher stopped");
    result
}

#[derive(Debug, Default)]
struct Control {
    /// Restart the dispatcher when resuming.
    resume_dispatcher: bool,
}

/// The master clock of a time domain.
///
/// Drives registered [`TimeSink`]s in lock-step, either from a background
/// dispatcher thread ([`MasterTimeSource::start`]) or synchronously from the
/// caller ([`MasterTimeSource::run_for`], [`MasterTimeSource::run`]).
///
/// Sinks, synced-state actions and observers run while the clock is
/// mid-step and must not call the lifecycle or sink-management methods of
/// the same time source; clock queries are always safe.
pub struct MasterTimeSource {
    shared: Arc<Shared>,
    control: Mutex<Control>,
    dispatcher: Mutex<Option<JoinHandle<TimeResult<()>>>>,
}

impl Default for MasterTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MasterTimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterTimeSource")
            .field("domain", &self.shared.domain)
            .field("elapsed", &self.elapsed_virtual_time().interval)
            .field("quantum", &self.quantum())
            .field("sinks", &self.sink_count())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl MasterTimeSource {
    pub fn new() -> Self {
        Self::build(DEFAULT_QUANTUM)
    }

    pub fn with_quantum(quantum: TimeInterval) -> TimeResult<Self> {
        validate_quantum(quantum)?;
        Ok(Self::build(quantum))
    }

    fn build(quantum: TimeInterval) -> Self {
        let shared = Arc::new(Shared {
            domain: DomainId::fresh(),
            engine: Mutex::new(Engine {
                rendezvous: Rendezvous::new(),
                handles: BTreeMap::new(),
                elapsed: TimeInterval::ZERO,
                sync_point: TimeInterval::ZERO,
                quantum,
            }),
            directory: RwLock::new(BTreeMap::new()),
            elapsed: AtomicI64::new(0),
            sync_point: AtomicI64::new(0),
            quantum: AtomicI64::new(quantum.ticks()),
            running: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            next_sink: AtomicU64::new(0),
            synced_actions: Mutex::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
        });
        Self {
            shared,
            control: Mutex::new(Control::default()),
            dispatcher: Mutex::new(None),
        }
    }

    fn ensure_live(&self) -> TimeResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(TimeError::Disposed);
        }
        Ok(())
    }

    pub fn domain(&self) -> DomainId {
        self.shared.domain
    }

    pub fn elapsed_virtual_time(&self) -> TimeStamp {
        self.shared.stamp(TimeInterval::from_ticks(
            self.shared.elapsed.load(Ordering::Acquire),
        ))
    }

    /// End of the current sync period. Equals the elapsed time until the
    /// first step of a new period.
    pub fn nearest_sync_point(&self) -> TimeStamp {
        self.shared.stamp(TimeInterval::from_ticks(
            self.shared.sync_point.load(Ordering::Acquire),
        ))
    }

    pub fn quantum(&self) -> TimeInterval {
        TimeInterval::from_ticks(self.shared.quantum.load(Ordering::Acquire))
    }

    /// Changes the sync period length. Applies from the next sync period.
    pub fn set_quantum(&self, quantum: TimeInterval) -> TimeResult<()> {
        self.ensure_live()?;
        validate_quantum(quantum)?;
        self.shared.lock_engine().quantum = quantum;
        self.shared.quantum.store(quantum.ticks(), Ordering::Release);
        tracing::debug!("Quantum set to {}", quantum);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn add_observer(&self, observer: Arc<dyn SimulationObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Runs `action` once, at the next sync point, while every sink is
    /// blocked.
    pub fn execute_in_nearest_synced_state(&self, action: impl FnOnce(TimeStamp) + Send + 'static) {
        lock(&self.shared.synced_actions).push(Box::new(action));
    }

    /// Attaches a sink. It takes part in grants from the next step on.
    pub fn register_sink(&self, sink: Arc<dyn TimeSink>) -> TimeResult<SinkId> {
        self.ensure_live()?;
        let id = SinkId(self.shared.next_sink.fetch_add(1, Ordering::Relaxed));

        // Holding `control` keeps the paused check and the insert on one
        // side of any pause or resume transition.
        let _control = lock(&self.control);
        let mut engine = self.shared.lock_engine();
        let port = engine.rendezvous.attach(id);
        let handle = match TimeHandle::spawn(id, sink, port) {
            Ok(handle) => handle,
            Err(e) => {
                engine.rendezvous.detach(id);
                return Err(e);
            }
        };
        if self.is_paused() {
            handle.sink.pause();
        }

        tracing::debug!("Registered time sink '{}' as {}", handle.name, id);
        self.shared
            .directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                SinkEntry {
                    name: handle.name.clone(),
                    status: handle.status.clone(),
                },
            );
        engine.handles.insert(id, handle);
        Ok(id)
    }

    /// Detaches a sink and waits for its worker to exit.
    pub fn detach_sink(&self, id: SinkId) -> TimeResult<()> {
        let handle = {
            let mut engine = self.shared.lock_engine();
            let handle = engine.handles.remove(&id).ok_or(TimeError::UnknownSink(id))?;
            engine.rendezvous.detach(id);
            handle
        };
        self.shared
            .directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        tracing::debug!("Detached time sink '{}' ({})", handle.name, id);
        handle.join();
        Ok(())
    }

    fn with_entry<T>(&self, id: SinkId, f: impl FnOnce(&SinkEntry) -> T) -> TimeResult<T> {
        let directory = self
            .shared
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        directory.get(&id).map(f).ok_or(TimeError::UnknownSink(id))
    }

    /// Disabled sinks are skipped by grants; the clock runs on without them.
    pub fn set_sink_enabled(&self, id: SinkId, enabled: bool) -> TimeResult<()> {
        self.with_entry(id, |e| {
            e.status.set_enabled(enabled);
            tracing::debug!(
                "Time sink '{}' {}",
                e.name,
                if enabled { "enabled" } else { "disabled" }
            );
        })
    }

    pub fn sink_state(&self, id: SinkId) -> TimeResult<SinkState> {
        self.with_entry(id, |e| e.status.state())
    }

    /// Virtual time consumed by the sink so far.
    pub fn sink_elapsed(&self, id: SinkId) -> TimeResult<TimeInterval> {
        self.with_entry(id, |e| e.status.consumed())
    }

    pub fn sink_count(&self) -> usize {
        self.shared
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn deliver(&self, pause: bool) {
        let engine = self.shared.lock_engine();
        for handle in engine.handles.values() {
            if pause {
                handle.sink.pause();
            } else {
                handle.sink.resume();
            }
        }
    }

    fn spawn_dispatcher(&self) -> TimeResult<()> {
        let mut slot = lock(&self.dispatcher);
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
            // A dispatcher that stopped on its own still owes its result.
            if let Some(handle) = slot.take() {
                join_dispatcher(handle)?;
            }
        }

        self.shared.claim_driving()?;
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("time-dispatcher".to_string())
            .spawn(move || dispatcher_loop(shared))
        {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.driving.store(false, Ordering::Release);
                Err(TimeError::Spawn {
                    name: "time-dispatcher".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn stop_dispatcher(&self) -> TimeResult<()> {
        self.shared.running.store(false, Ordering::Release);
        let handle = lock(&self.dispatcher).take();
        match handle {
            Some(handle) => join_dispatcher(handle),
            None => Ok(()),
        }
    }

    /// Starts the background dispatcher. Idempotent; resumes a paused source.
    pub fn start(&self) -> TimeResult<()> {
        self.ensure_live()?;
        let mut control = lock(&self.control);
        if self.is_paused() {
            self.deliver(false);
            self.shared.paused.store(false, Ordering::Release);
            control.resume_dispatcher = false;
            tracing::debug!("Time source resumed by start");
        }
        self.spawn_dispatcher()
    }

    /// Stops the dispatcher and reports any sink failure it hit.
    pub fn stop(&self) -> TimeResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let mut control = lock(&self.control);
        control.resume_dispatcher = false;
        self.stop_dispatcher()
    }

    /// Stops advancing time and notifies every sink once. Repeated calls are
    /// no-ops until the next resume.
    pub fn pause(&self) -> TimeResult<()> {
        self.ensure_live()?;
        let mut control = lock(&self.control);
        if self.is_paused() {
            tracing::trace!("Time source already paused");
            return Ok(());
        }

        control.resume_dispatcher = self.is_running();
        let stopped = self.stop_dispatcher();
        self.shared.paused.store(true, Ordering::Release);
        self.deliver(true);
        tracing::debug!("Time source paused at {}", self.elapsed_virtual_time());
        stopped
    }

    /// Notifies every sink once and restarts the dispatcher if pausing
    /// stopped it.
    pub fn resume(&self) -> TimeResult<()> {
        self.ensure_live()?;
        let mut control = lock(&self.control);
        if !self.is_paused() {
            tracing::trace!("Time source not paused");
            return Ok(());
        }

        self.deliver(false);
        self.shared.paused.store(false, Ordering::Release);
        tracing::debug!("Time source resumed at {}", self.elapsed_virtual_time());
        if std::mem::take(&mut control.resume_dispatcher) {
            self.spawn_dispatcher()?;
        }
        Ok(())
    }

    /// Advances virtual time by exactly `period` on the calling thread.
    pub fn run_for(&self, period: TimeInterval) -> TimeResult<()> {
        self.drive(|shared, remaining: &mut TimeInterval| {
            if !remaining.is_positive() {
                return Ok(true);
            }
            let outcome = shared.step(*remaining)?;
            *remaining -= outcome.advanced;
            Ok(!remaining.is_positive())
        }, period)
    }

    /// Advances virtual time through `periods` whole sync periods.
    pub fn run(&self, periods: u64) -> TimeResult<()> {
        self.drive(|shared, left: &mut u64| {
            if *left == 0 {
                return Ok(true);
            }
            if shared.step(TimeInterval::INFINITE)?.synced {
                *left -= 1;
            }
            Ok(*left == 0)
        }, periods)
    }

    fn drive<S>(
        &self,
        mut advance: impl FnMut(&Shared, &mut S) -> TimeResult<bool>,
        mut state: S,
    ) -> TimeResult<()> {
        self.ensure_live()?;
        if self.is_paused() {
            return Err(TimeError::Paused);
        }
        let _driving = self.shared.try_drive()?;

        self.shared.notify(|o| o.on_simulation_start());
        let result = loop {
            match advance(&self.shared, &mut state) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Synchronous run stopped: {}", e);
                    break Err(e);
                }
            }
            if self.is_disposed() {
                break Err(TimeError::Disposed);
            }
            if self.is_paused() {
                break Err(TimeError::Paused);
            }
        };
        self.shared.notify(|o| o.on_simulation_stop());
        result
    }

    /// Stops everything and releases every sink worker exactly once.
    /// Subsequent calls are no-ops.
    pub fn dispose(&self) -> TimeResult<()> {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _control = lock(&self.control);
        let result = self.stop_dispatcher();

        let handles = {
            let mut engine = self.shared.lock_engine();
            let released = engine.rendezvous.release_all();
            tracing::debug!("Released {} time sink(s)", released);
            std::mem::take(&mut engine.handles)
        };
        for handle in handles.into_values() {
            handle.join();
        }
        self.shared
            .directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        lock(&self.shared.synced_actions).clear();

        tracing::debug!("Time source disposed at {}", self.elapsed_virtual_time());
        result
    }
}

fn validate_quantum(quantum: TimeInterval) -> TimeResult<()> {
    if !quantum.is_positive() || quantum.is_infinite() {
        return Err(TimeError::InvalidQuantum);
    }
    Ok(())
}

fn join_dispatcher(handle: JoinHandle<TimeResult<()>>) -> TimeResult<()> {
    match handle.join() {
        Ok(result) => result,
        Err(payload) => Err(TimeError::DispatcherPanicked(panic_message(payload.as_ref()))),
    }
}

impl Drop for MasterTimeSource {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::error!("Error while disposing time source: {}", e);
        }
    }
}
