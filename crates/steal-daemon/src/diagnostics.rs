//! Counter exposition for external monitoring.
//!
//! The accounting engine publishes a single process-wide integer; this
//! module renders it (plus loop health) as Prometheus text exposition or
//! a JSON snapshot, on demand or on the periodic report interval.

use std::time::Duration;

use steal_common::{AccountingConfig, LoopState};
use steal_runtime::{AccountingModule, RunstateSource};

/// Point-in-time view of the accounting domain.
#[derive(Debug, Clone)]
pub struct StealSnapshot {
    /// Cumulative stolen scheduler ticks across all CPUs.
    pub stolen_ticks: u64,
    /// Current sampling-loop state.
    pub state: LoopState,
    /// Number of CPUs being sampled.
    pub cpus: usize,
    /// Configured scheduler frequency.
    pub scheduler_hz: u32,
    /// Configured sampling period.
    pub sample_period: Duration,
    /// Daemon uptime.
    pub uptime: Duration,
}

impl StealSnapshot {
    /// Capture the current state of `module`.
    pub fn capture<S: RunstateSource + 'static>(
        module: &AccountingModule<S>,
        config: &AccountingConfig,
        uptime: Duration,
    ) -> Self {
        Self {
            stolen_ticks: module.counter().total(),
            state: module.sampler().state(),
            cpus: module.sampler().cpus().len(),
            scheduler_hz: config.scheduler_hz,
            sample_period: config.sample_period,
            uptime,
        }
    }

    /// Render as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stolen_ticks": self.stolen_ticks,
            "state": self.state.to_string(),
            "cpus": self.cpus,
            "scheduler_hz": self.scheduler_hz,
            "sample_period_ns": self.sample_period.as_nanos() as u64,
            "uptime_seconds": self.uptime.as_secs_f64(),
        })
    }
}

/// Format a snapshot in Prometheus text exposition format.
#[must_use]
pub fn format_prometheus_metrics(snapshot: &StealSnapshot) -> String {
    let mut output = String::new();

    output.push_str("# HELP stolen_ticks Cumulative scheduler ticks stolen by the hypervisor across all CPUs\n");
    output.push_str("# TYPE stolen_ticks counter\n");
    output.push_str(&format!("stolen_ticks {}\n", snapshot.stolen_ticks));

    output.push_str("# HELP steal_loop_running Whether the sampling loop is running (1=running)\n");
    output.push_str("# TYPE steal_loop_running gauge\n");
    output.push_str(&format!(
        "steal_loop_running {{state=\"{}\"}} {}\n",
        snapshot.state,
        u8::from(snapshot.state == LoopState::Running)
    ));

    output.push_str("# HELP steal_sampled_cpus Number of logical CPUs being sampled\n");
    output.push_str("# TYPE steal_sampled_cpus gauge\n");
    output.push_str(&format!("steal_sampled_cpus {}\n", snapshot.cpus));

    output.push_str("# HELP steal_scheduler_hz Configured scheduler tick frequency\n");
    output.push_str("# TYPE steal_scheduler_hz gauge\n");
    output.push_str(&format!("steal_scheduler_hz {}\n", snapshot.scheduler_hz));

    output.push_str("# HELP steal_uptime_seconds Daemon uptime in seconds\n");
    output.push_str("# TYPE steal_uptime_seconds gauge\n");
    output.push_str(&format!(
        "steal_uptime_seconds {:.3}\n",
        snapshot.uptime.as_secs_f64()
    ));

    output
}
