//! Shared helpers for acceptance tests.

use std::time::{Duration, Instant};

use steal_common::AccountingConfig;

/// 100 Hz with a fast sampling period so tests converge quickly.
pub fn fast_config() -> AccountingConfig {
    AccountingConfig {
        scheduler_hz: 100,
        sample_period: Duration::from_millis(2),
        stop_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Poll until `cond` holds or `timeout` elapses; returns the final check.
pub fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
