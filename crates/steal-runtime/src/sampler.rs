//! The background sampling loop.
//!
//! One dedicated thread wakes once per configured period, samples every
//! CPU in the set, and publishes the summed ticks to the shared counter.
//! Exactly two actors exist: the caller (start/stop) and the sampling
//! thread. The handshake uses one mutex around the loop state and two
//! condvars — `wake` doubles as the periodic timer and the stop wakeup,
//! `done` is signaled once per run when the thread has exited, so a
//! stop-wakeup can never be mistaken for thread completion.
//!
//! The thread holds the state lock across each sampling cycle. A stop
//! request must take that lock to be posted, so a cycle in progress always
//! completes before the request is observed; cancellation is cooperative
//! and never preempts mid-cycle.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use steal_common::{AccountingConfig, LoopState, StealError, StealResult};
use tracing::{debug, info, warn};

use crate::accumulator::StolenTimeAccumulator;
use crate::counter::StolenTickCounter;
use crate::cpuset::CpuSet;
use crate::runstate::RunstateSource;

/// Handshake state shared between the caller and the sampling thread.
#[derive(Debug)]
struct LoopShared {
    state: Mutex<LoopState>,
    /// Periodic wait; also signaled to deliver a stop request immediately.
    wake: Condvar,
    /// Signaled when the sampling thread has exited.
    done: Condvar,
}

impl LoopShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::Stopped),
            wake: Condvar::new(),
            done: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parking slot for the accounting engine: the caller baselines it here,
/// the sampling thread takes it for the duration of a run and parks it
/// again on exit.
type EngineSlot<S> = Arc<Mutex<Option<StolenTimeAccumulator<S>>>>;

fn lock_slot<S: RunstateSource>(
    slot: &EngineSlot<S>,
) -> MutexGuard<'_, Option<StolenTimeAccumulator<S>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic driver for stolen-time accounting.
pub struct SamplingLoop<S: RunstateSource + 'static> {
    shared: Arc<LoopShared>,
    engine: EngineSlot<S>,
    counter: Arc<StolenTickCounter>,
    cpus: CpuSet,
    period: Duration,
    stop_timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl<S: RunstateSource + 'static> SamplingLoop<S> {
    /// Build a loop over `cpus`, fed by `source`, with timing taken from
    /// `config` (which is validated here).
    pub fn new(source: S, cpus: CpuSet, config: &AccountingConfig) -> StealResult<Self> {
        config.validate()?;
        let engine = StolenTimeAccumulator::new(source, config.tick_length()?);
        Ok(Self {
            shared: Arc::new(LoopShared::new()),
            engine: Arc::new(Mutex::new(Some(engine))),
            counter: Arc::new(StolenTickCounter::new()),
            cpus,
            period: config.sample_period,
            stop_timeout: config.stop_timeout,
            handle: None,
        })
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.shared.lock_state()
    }

    /// Handle to the published counter.
    #[must_use]
    pub fn counter(&self) -> Arc<StolenTickCounter> {
        Arc::clone(&self.counter)
    }

    /// Total stolen ticks published so far.
    #[must_use]
    pub fn stolen_ticks(&self) -> u64 {
        self.counter.total()
    }

    /// The CPUs this loop samples.
    #[must_use]
    pub fn cpus(&self) -> &CpuSet {
        &self.cpus
    }

    /// Run `f` against the accounting engine while it is parked.
    ///
    /// Returns `None` while the sampling thread owns the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&StolenTimeAccumulator<S>) -> R) -> Option<R> {
        lock_slot(&self.engine).as_ref().map(f)
    }

    /// Baseline every CPU and spawn the sampling thread.
    ///
    /// Fails atomically: if any CPU's initial snapshot cannot be obtained,
    /// no thread is spawned, no baseline survives, and the loop stays
    /// STOPPED.
    pub fn start(&mut self) -> StealResult<()> {
        let mut state = self.shared.lock_state();
        if *state != LoopState::Stopped {
            return Err(StealError::InvalidStateTransition {
                from: state.to_string(),
                to: LoopState::Running.to_string(),
            });
        }
        if self.cpus.is_empty() {
            return Err(StealError::Config("cpu set is empty".into()));
        }

        {
            let mut slot = lock_slot(&self.engine);
            let engine = slot
                .as_mut()
                .ok_or_else(|| StealError::Config("accounting engine unavailable".into()))?;
            engine.initialize_all(&self.cpus)?;
        }

        state.transition_to(LoopState::Running)?;
        info!(
            cpus = self.cpus.len(),
            period_us = self.period.as_micros() as u64,
            "starting sampling loop"
        );

        let shared = Arc::clone(&self.shared);
        let slot = Arc::clone(&self.engine);
        let counter = Arc::clone(&self.counter);
        let cpus = self.cpus.clone();
        let period = self.period;

        match thread::Builder::new()
            .name("steal-sampler".into())
            .spawn(move || run_loop(&shared, &slot, &counter, &cpus, period))
        {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                // Roll back; the engine is still parked with its baselines.
                *state = LoopState::Stopped;
                Err(StealError::Config(format!(
                    "failed to spawn sampling thread: {e}"
                )))
            }
        }
    }

    /// Request a stop and block until the sampling thread has exited.
    ///
    /// The wait is bounded by the configured stop timeout; expiry is
    /// reported as [`StealError::StopTimeout`] and the thread is left
    /// running (it is never killed). After an `Ok` return, no further
    /// sample will be taken.
    pub fn stop(&mut self) -> StealResult<()> {
        let mut state = self.shared.lock_state();
        state.transition_to(LoopState::StopRequested)?;
        info!("stopping sampling loop");
        self.shared.wake.notify_all();

        let waited = Instant::now();
        let (state, timeout) = self
            .shared
            .done
            .wait_timeout_while(state, self.stop_timeout, |s| *s != LoopState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);

        if timeout.timed_out() && *state != LoopState::Stopped {
            warn!("sampling thread did not acknowledge stop in time");
            return Err(StealError::StopTimeout {
                waited_ms: waited.elapsed().as_millis() as u64,
            });
        }
        drop(state);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(StealError::Config("sampling thread panicked".into()));
            }
        }

        info!(stolen_ticks = self.counter.total(), "sampling loop stopped");
        Ok(())
    }
}

impl<S: RunstateSource + 'static> Drop for SamplingLoop<S> {
    fn drop(&mut self) {
        if self.state() == LoopState::Running {
            if let Err(e) = self.stop() {
                warn!(error = %e, "failed to stop sampling loop on drop");
            }
        }
    }
}

/// Body of the sampling thread.
fn run_loop<S: RunstateSource>(
    shared: &LoopShared,
    slot: &EngineSlot<S>,
    counter: &StolenTickCounter,
    cpus: &CpuSet,
    period: Duration,
) {
    debug!("sampling thread started");

    let Some(mut engine) = lock_slot(slot).take() else {
        // start() parks the engine before spawning; an empty slot means the
        // loop object is gone, so just acknowledge and bail.
        let mut state = shared.lock_state();
        *state = LoopState::Stopped;
        shared.done.notify_all();
        return;
    };

    let mut state = shared.lock_state();
    loop {
        let (guard, _) = shared
            .wake
            .wait_timeout(state, period)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
        if *state == LoopState::StopRequested {
            break;
        }
        let ticks = engine.sample_all(cpus);
        counter.add(ticks);
    }

    // Park the engine before publishing STOPPED so a caller observing the
    // transition can immediately reuse it.
    *lock_slot(slot) = Some(engine);
    *state = LoopState::Stopped;
    shared.done.notify_all();
    drop(state);

    debug!("sampling thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runstate::SimulatedRunstateSource;

    fn test_config() -> AccountingConfig {
        AccountingConfig {
            scheduler_hz: 100,
            sample_period: Duration::from_millis(2),
            stop_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Poll until `cond` holds or `timeout` elapses.
    fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
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
    fn test_counts_stolen_ticks_end_to_end() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(1), &test_config()).unwrap();

        sampler.start().unwrap();
        assert_eq!(sampler.state(), LoopState::Running);

        let counter = sampler.counter();
        source.advance(0, 25_000_000, 0);
        assert!(wait_for(|| counter.total() == 2, Duration::from_secs(2)));

        source.advance(0, 15_000_000, 0);
        assert!(wait_for(|| counter.total() == 4, Duration::from_secs(2)));

        sampler.stop().unwrap();
        assert_eq!(sampler.state(), LoopState::Stopped);
        assert_eq!(sampler.stolen_ticks(), 4);
    }

    #[test]
    fn test_stop_halts_sampling() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(1), &test_config()).unwrap();

        sampler.start().unwrap();
        sampler.stop().unwrap();

        // Anything advanced after stop() returns must never be accounted.
        let before = sampler.stolen_ticks();
        source.advance(0, 500_000_000, 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sampler.stolen_ticks(), before);
    }

    #[test]
    fn test_start_is_atomic_on_baseline_failure() {
        let source = SimulatedRunstateSource::new();
        source.set_failing(1, true);
        let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(2), &test_config()).unwrap();

        let err = sampler.start().unwrap_err();
        assert!(matches!(err, StealError::Hypercall { cpu: 1, .. }));
        assert_eq!(sampler.state(), LoopState::Stopped);

        // No CPU kept a baseline, including the one that fetched fine.
        let baselined = sampler
            .with_engine(|e| (0..2).filter(|&c| e.is_initialized(c)).count())
            .unwrap();
        assert_eq!(baselined, 0);

        // Recovery: clear the fault and start normally.
        source.set_failing(1, false);
        sampler.start().unwrap();
        sampler.stop().unwrap();
    }

    #[test]
    fn test_double_start_rejected() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source, CpuSet::first(1), &test_config()).unwrap();

        sampler.start().unwrap();
        assert!(matches!(
            sampler.start(),
            Err(StealError::InvalidStateTransition { .. })
        ));
        sampler.stop().unwrap();
    }

    #[test]
    fn test_stop_without_start_rejected() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source, CpuSet::first(1), &test_config()).unwrap();

        assert!(matches!(
            sampler.stop(),
            Err(StealError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_empty_cpu_set_rejected() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source, CpuSet::first(0), &test_config()).unwrap();

        assert!(matches!(sampler.start(), Err(StealError::Config(_))));
        assert_eq!(sampler.state(), LoopState::Stopped);
    }

    #[test]
    fn test_restart_resumes_counting() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(1), &test_config()).unwrap();
        let counter = sampler.counter();

        sampler.start().unwrap();
        source.advance(0, 20_000_000, 0);
        assert!(wait_for(|| counter.total() == 2, Duration::from_secs(2)));
        sampler.stop().unwrap();

        // Steal accrued while stopped is re-baselined away on restart, not
        // retroactively accounted.
        source.advance(0, 100_000_000, 0);
        sampler.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.total(), 2);

        source.advance(0, 10_000_000, 0);
        assert!(wait_for(|| counter.total() == 3, Duration::from_secs(2)));
        sampler.stop().unwrap();
    }

    #[test]
    fn test_fetch_failure_does_not_kill_loop() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(1), &test_config()).unwrap();
        let counter = sampler.counter();

        sampler.start().unwrap();
        source.set_failing(0, true);
        source.advance(0, 30_000_000, 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.total(), 0);

        // The loop is still alive and catches up from the old baseline.
        source.set_failing(0, false);
        assert!(wait_for(|| counter.total() == 3, Duration::from_secs(2)));
        sampler.stop().unwrap();
    }

    #[test]
    fn test_drop_while_running_stops_thread() {
        let source = SimulatedRunstateSource::new();
        let mut sampler = SamplingLoop::new(source, CpuSet::first(1), &test_config()).unwrap();
        sampler.start().unwrap();
        drop(sampler);
    }
}
