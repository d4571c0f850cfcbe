//! Enumeration of the logical CPUs to sample.
//!
//! The set is fixed for the lifetime of the accounting domain: hotplug
//! after start is out of scope, matching the source behavior of iterating
//! a boot-time CPU list every cycle.

use crate::runstate::CpuId;
use steal_common::{StealError, StealResult};

/// Ordered, duplicate-free set of logical CPU identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSet {
    cpus: Vec<CpuId>,
}

impl CpuSet {
    /// CPUs `0..n`.
    #[must_use]
    pub fn first(n: u32) -> Self {
        Self {
            cpus: (0..n).collect(),
        }
    }

    /// Build from explicit ids, preserving first-seen order and dropping
    /// duplicates.
    pub fn from_ids<I: IntoIterator<Item = CpuId>>(ids: I) -> Self {
        let mut cpus = Vec::new();
        for id in ids {
            if !cpus.contains(&id) {
                cpus.push(id);
            }
        }
        Self { cpus }
    }

    /// The CPUs currently online, per the operating system.
    pub fn online() -> StealResult<Self> {
        let n = online_cpu_count()?;
        Ok(Self::first(n))
    }

    /// Iterate the CPU ids in sampling order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.cpus.iter().copied()
    }

    /// Number of CPUs in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// True if the set contains no CPUs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// The ids as a slice, in sampling order.
    #[must_use]
    pub fn as_slice(&self) -> &[CpuId] {
        &self.cpus
    }
}

#[cfg(target_os = "linux")]
fn online_cpu_count() -> StealResult<u32> {
    // SAFETY: sysconf with a valid name has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n > 0 {
        Ok(n as u32)
    } else {
        Err(StealError::Config(
            "could not determine online CPU count".into(),
        ))
    }
}

#[cfg(not(target_os = "linux"))]
fn online_cpu_count() -> StealResult<u32> {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .map_err(|e| StealError::Config(format!("could not determine online CPU count: {e}")))
}
