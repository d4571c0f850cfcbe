//! Runstate snapshots and the sources that supply them.
//!
//! A [`RunstateSource`] answers "how long has virtual CPU N cumulatively
//! spent in each runstate" on behalf of the virtualization layer. The
//! accounting engine treats it as an external collaborator: a pure,
//! stateless read that either returns a snapshot or reports failure.
//!
//! Two implementations ship with the crate:
//! - [`SimulatedRunstateSource`] drives tests and the daemon's simulated
//!   mode from in-memory counters.
//! - [`ProcStatSource`] (Linux) reads the guest-visible `steal` column of
//!   `/proc/stat`, which any KVM or Xen host populates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use steal_common::{StealError, StealResult};

/// Logical CPU identifier.
pub type CpuId = u32;

/// Cumulative per-state time counters for one virtual CPU.
///
/// Every field is a monotonically non-decreasing nanosecond count for the
/// lifetime of the CPU. `blocked_ns` is fetched and carried but never
/// accounted: guest-initiated blocking is not stolen time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunstateSnapshot {
    /// Time spent runnable but not running (waiting on the hypervisor).
    pub runnable_ns: u64,
    /// Time spent blocked on a guest-initiated wait.
    pub blocked_ns: u64,
    /// Time spent offline.
    pub offline_ns: u64,
}

/// Per-CPU runstate query supplied by the virtualization layer.
///
/// `fetch` is expected to be fast (microseconds) and is only ever invoked
/// from a single thread at a time, so implementations need interior
/// mutability only if they share state with other actors.
pub trait RunstateSource: Send {
    /// Fetch the current cumulative runstate counters for `cpu`.
    fn fetch(&self, cpu: CpuId) -> StealResult<RunstateSnapshot>;
}

impl RunstateSource for Box<dyn RunstateSource> {
    fn fetch(&self, cpu: CpuId) -> StealResult<RunstateSnapshot> {
        (**self).fetch(cpu)
    }
}

/// In-memory runstate source for tests and simulated operation.
///
/// Clones share the same underlying counters, so a test (or the daemon's
/// simulation driver) can keep a handle and advance counters while a
/// sampling loop owns another handle.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRunstateSource {
    inner: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    cpus: HashMap<CpuId, RunstateSnapshot>,
    failing: HashSet<CpuId>,
}

impl SimulatedRunstateSource {
    /// Create a source where every CPU starts with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the runnable and offline counters for `cpu`.
    pub fn advance(&self, cpu: CpuId, runnable_ns: u64, offline_ns: u64) {
        let mut state = self.lock();
        let entry = state.cpus.entry(cpu).or_default();
        entry.runnable_ns += runnable_ns;
        entry.offline_ns += offline_ns;
    }

    /// Advance the (never accounted) blocked counter for `cpu`.
    pub fn advance_blocked(&self, cpu: CpuId, blocked_ns: u64) {
        let mut state = self.lock();
        state.cpus.entry(cpu).or_default().blocked_ns += blocked_ns;
    }

    /// Overwrite the counters for `cpu` with absolute values. Lets tests
    /// exercise the defensive handling of a misbehaving source that
    /// reports counters going backwards.
    pub fn set_counters(&self, cpu: CpuId, snapshot: RunstateSnapshot) {
        self.lock().cpus.insert(cpu, snapshot);
    }

    /// Make fetches for `cpu` fail until cleared.
    pub fn set_failing(&self, cpu: CpuId, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(cpu);
        } else {
            state.failing.remove(&cpu);
        }
    }

    /// Current counters for `cpu` (zeroes if never advanced).
    #[must_use]
    pub fn snapshot(&self, cpu: CpuId) -> RunstateSnapshot {
        self.lock().cpus.get(&cpu).copied().unwrap_or_default()
    }
}

impl RunstateSource for SimulatedRunstateSource {
    fn fetch(&self, cpu: CpuId) -> StealResult<RunstateSnapshot> {
        let state = self.lock();
        if state.failing.contains(&cpu) {
            return Err(StealError::Hypercall { cpu, code: -1 });
        }
        Ok(state.cpus.get(&cpu).copied().unwrap_or_default())
    }
}

/// Runstate source backed by the `steal` column of `/proc/stat`.
///
/// Inside a KVM or Xen guest the kernel accumulates hypervisor-stolen time
/// per CPU in USER_HZ ticks; this source converts it to nanoseconds and
/// presents it as the runnable counter. The guest cannot distinguish
/// offline time through this interface, so `offline_ns` is reported as 0;
/// idle plus iowait stand in for the blocked counter.
#[cfg(target_os = "linux")]
pub struct ProcStatSource {
    path: std::path::PathBuf,
    ns_per_user_tick: u64,
}

#[cfg(target_os = "linux")]
impl ProcStatSource {
    /// Open the system `/proc/stat`.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts("/proc/stat".into(), detect_user_hz())
    }

    /// Read from an alternate stat file (same format as `/proc/stat`).
    #[must_use]
    pub fn with_path(path: std::path::PathBuf) -> Self {
        Self::from_parts(path, detect_user_hz())
    }

    fn from_parts(path: std::path::PathBuf, user_hz: u64) -> Self {
        Self {
            path,
            ns_per_user_tick: 1_000_000_000 / user_hz.max(1),
        }
    }
}

#[cfg(target_os = "linux")]
impl Default for ProcStatSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl RunstateSource for ProcStatSource {
    fn fetch(&self, cpu: CpuId) -> StealResult<RunstateSnapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| StealError::Hypercall {
            cpu,
            code: e.raw_os_error().unwrap_or(libc::EIO),
        })?;

        let fields = parse_cpu_fields(&content, cpu).ok_or(StealError::Hypercall {
            cpu,
            code: libc::ENOENT,
        })?;

        Ok(RunstateSnapshot {
            runnable_ns: fields.steal_ticks * self.ns_per_user_tick,
            blocked_ns: (fields.idle_ticks + fields.iowait_ticks) * self.ns_per_user_tick,
            offline_ns: 0,
        })
    }
}

#[cfg(target_os = "linux")]
fn detect_user_hz() -> u64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 {
        hz as u64
    } else {
        100
    }
}

#[cfg(target_os = "linux")]
struct CpuStatFields {
    idle_ticks: u64,
    iowait_ticks: u64,
    steal_ticks: u64,
}

/// Extract the idle, iowait, and steal tick counts for `cpuN` from
/// `/proc/stat` content. Kernels older than 2.6.11 omit the steal column;
/// that reads as a missing CPU here.
#[cfg(target_os = "linux")]
fn parse_cpu_fields(content: &str, cpu: CpuId) -> Option<CpuStatFields> {
    let label = format!("cpu{cpu}");
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some(label.as_str()))?;

    // cpuN user nice system idle iowait irq softirq steal guest guest_nice
    let mut fields = line.split_whitespace().skip(1);
    let mut nth = |n: usize| -> Option<u64> { fields.nth(n)?.parse().ok() };

    let idle_ticks = nth(3)?;
    let iowait_ticks = nth(0)?;
    let steal_ticks = nth(2)?;

    Some(CpuStatFields {
        idle_ticks,
        iowait_ticks,
        steal_ticks,
    })
}
