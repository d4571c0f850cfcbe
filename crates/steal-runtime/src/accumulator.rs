//! Per-CPU stolen-time delta-and-carry accounting.
//!
//! For each sampled CPU the accumulator keeps the last observed runstate
//! snapshot and a sub-tick nanosecond remainder. Each sample computes the
//! runnable+offline delta since the last snapshot, adds the carried
//! remainder, emits the whole ticks, and carries the rest — so repeated
//! truncation never loses time across cycles.

use std::collections::HashMap;
use std::num::NonZeroU64;

use steal_common::StealResult;
use tracing::warn;

use crate::cpuset::CpuSet;
use crate::runstate::{CpuId, RunstateSnapshot, RunstateSource};

/// Accounting state for one CPU.
#[derive(Debug, Clone, Copy)]
struct CpuAccount {
    /// Last successfully observed snapshot; baseline for the next delta.
    last: RunstateSnapshot,
    /// Carried nanoseconds, always `< tick_length_ns`.
    remainder_ns: u64,
}

/// The stolen-time accounting engine.
///
/// Owns the runstate source and all per-CPU state. Only ever driven from
/// one thread at a time; the sampling loop moves it into the background
/// thread for the lifetime of a run.
pub struct StolenTimeAccumulator<S: RunstateSource> {
    source: S,
    tick_length_ns: NonZeroU64,
    accounts: HashMap<CpuId, CpuAccount>,
}

impl<S: RunstateSource> StolenTimeAccumulator<S> {
    /// Create an engine with no baselines. `tick_length_ns` is fixed for
    /// the accumulator's lifetime.
    pub fn new(source: S, tick_length_ns: NonZeroU64) -> Self {
        Self {
            source,
            tick_length_ns,
            accounts: HashMap::new(),
        }
    }

    /// Length of one scheduler tick in nanoseconds.
    #[must_use]
    pub fn tick_length_ns(&self) -> u64 {
        self.tick_length_ns.get()
    }

    /// Whether `cpu` has a baseline snapshot.
    #[must_use]
    pub fn is_initialized(&self, cpu: CpuId) -> bool {
        self.accounts.contains_key(&cpu)
    }

    /// Carried remainder for `cpu`, if baselined.
    #[must_use]
    pub fn remainder_ns(&self, cpu: CpuId) -> Option<u64> {
        self.accounts.get(&cpu).map(|a| a.remainder_ns)
    }

    /// Take the initial baseline snapshot for `cpu` and reset its carry.
    ///
    /// A fetch failure propagates: no tick may ever be attributed to a CPU
    /// without a baseline.
    pub fn initialize(&mut self, cpu: CpuId) -> StealResult<()> {
        let last = self.source.fetch(cpu)?;
        self.accounts.insert(
            cpu,
            CpuAccount {
                last,
                remainder_ns: 0,
            },
        );
        Ok(())
    }

    /// Baseline every CPU in `cpus`, atomically.
    ///
    /// On any failure all accounts are cleared before the error is
    /// returned, so a partial start can never leave a CPU half-baselined.
    pub fn initialize_all(&mut self, cpus: &CpuSet) -> StealResult<()> {
        self.accounts.clear();
        for cpu in cpus.iter() {
            if let Err(e) = self.initialize(cpu) {
                self.accounts.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Perform one delta-and-carry step for `cpu`, returning the whole
    /// stolen ticks to attribute for this cycle.
    ///
    /// A failed fetch contributes 0 and leaves the baseline and remainder
    /// untouched, so the next successful sample still measures from the
    /// last good snapshot. Counters reported lower than the baseline clamp
    /// to a zero delta instead of wrapping.
    pub fn sample(&mut self, cpu: CpuId) -> u64 {
        let Some(account) = self.accounts.get_mut(&cpu) else {
            warn!(cpu, "sample requested for unbaselined cpu, skipping");
            return 0;
        };

        let cur = match self.source.fetch(cpu) {
            Ok(cur) => cur,
            Err(e) => {
                warn!(cpu, error = %e, "runstate fetch failed, skipping cycle");
                return 0;
            }
        };

        let delta_runnable = cur.runnable_ns.saturating_sub(account.last.runnable_ns);
        let delta_offline = cur.offline_ns.saturating_sub(account.last.offline_ns);
        // blocked_ns is deliberately not accounted.

        let total_ns = delta_runnable
            .saturating_add(delta_offline)
            .saturating_add(account.remainder_ns);

        let ticks = total_ns / self.tick_length_ns;
        account.remainder_ns = total_ns % self.tick_length_ns;
        account.last = cur;

        ticks
    }

    /// Sample every CPU in `cpus` in order, returning the summed ticks.
    pub fn sample_all(&mut self, cpus: &CpuSet) -> u64 {
        cpus.iter().map(|cpu| self.sample(cpu)).sum()
    }
}
