//! End-to-end accounting scenarios through a live sampling loop.

use std::time::Duration;

use steal_runtime::{CpuSet, SamplingLoop, SimulatedRunstateSource};

use super::common::{fast_config, wait_for};

/// The worked example from the design: 100 Hz, a 25 ms steal burst then a
/// 15 ms one, observed through the real background loop.
#[test]
fn worked_example_through_live_loop() {
    let source = SimulatedRunstateSource::new();
    let mut sampler =
        SamplingLoop::new(source.clone(), CpuSet::first(1), &fast_config()).unwrap();
    let counter = sampler.counter();

    sampler.start().unwrap();

    source.advance(0, 25_000_000, 0);
    assert!(wait_for(|| counter.total() == 2, Duration::from_secs(2)));

    source.advance(0, 15_000_000, 0);
    assert!(wait_for(|| counter.total() == 4, Duration::from_secs(2)));

    sampler.stop().unwrap();
    assert_eq!(counter.total(), 4);
}

/// Contributions from several CPUs aggregate into the one counter, and
/// sub-tick amounts carry per CPU instead of being pooled.
#[test]
fn multi_cpu_aggregation() {
    let source = SimulatedRunstateSource::new();
    let mut sampler =
        SamplingLoop::new(source.clone(), CpuSet::first(4), &fast_config()).unwrap();
    let counter = sampler.counter();

    sampler.start().unwrap();

    // 4 CPUs x 9 ms: each is sub-tick, so nothing is published yet even
    // though the pooled total would be 3.6 ticks.
    for cpu in 0..4 {
        source.advance(cpu, 9_000_000, 0);
    }
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.total(), 0);

    // Another 9 ms each crosses the tick boundary on every CPU.
    for cpu in 0..4 {
        source.advance(cpu, 9_000_000, 0);
    }
    assert!(wait_for(|| counter.total() == 4, Duration::from_secs(2)));

    sampler.stop().unwrap();
}

/// The published counter never decreases, cycle after cycle.
#[test]
fn counter_is_monotonic() {
    let source = SimulatedRunstateSource::new();
    let mut sampler =
        SamplingLoop::new(source.clone(), CpuSet::first(2), &fast_config()).unwrap();
    let counter = sampler.counter();

    sampler.start().unwrap();

    let mut last = 0;
    for step in 0..50 {
        source.advance(step % 2, 3_700_000, if step % 5 == 0 { 1_000_000 } else { 0 });
        std::thread::sleep(Duration::from_millis(3));
        let now = counter.total();
        assert!(now >= last, "counter regressed from {last} to {now}");
        last = now;
    }

    sampler.stop().unwrap();
    assert!(counter.total() >= last);
}

/// A CPU whose fetches fail mid-run contributes nothing while failing and
/// catches up losslessly once the source recovers.
#[test]
fn fetch_failure_recovery_preserves_time() {
    let source = SimulatedRunstateSource::new();
    let mut sampler =
        SamplingLoop::new(source.clone(), CpuSet::first(1), &fast_config()).unwrap();
    let counter = sampler.counter();

    sampler.start().unwrap();

    source.set_failing(0, true);
    source.advance(0, 70_000_000, 0);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.total(), 0);

    source.set_failing(0, false);
    assert!(wait_for(|| counter.total() == 7, Duration::from_secs(2)));

    sampler.stop().unwrap();
}
