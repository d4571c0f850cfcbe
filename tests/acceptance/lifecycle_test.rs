//! Lifecycle control: module events, stop-join guarantees, and
//! configuration loaded from disk.

use std::time::Duration;

use steal_common::{AccountingConfig, LoopState, StealError};
use steal_runtime::{
    AccountingModule, CpuSet, ModuleEvent, SamplingLoop, SimulatedRunstateSource,
};

use super::common::{fast_config, wait_for};

#[test]
fn load_accounts_and_unload_drains() {
    let source = SimulatedRunstateSource::new();
    let sampler = SamplingLoop::new(source.clone(), CpuSet::first(2), &fast_config()).unwrap();
    let mut module = AccountingModule::new(sampler);

    module.handle_event(ModuleEvent::Load).unwrap();
    assert_eq!(module.sampler().state(), LoopState::Running);

    let counter = module.counter();
    source.advance(0, 25_000_000, 0);
    source.advance(1, 10_000_000, 0);
    assert!(wait_for(|| counter.total() == 3, Duration::from_secs(2)));

    module.handle_event(ModuleEvent::Unload).unwrap();
    assert_eq!(module.sampler().state(), LoopState::Stopped);

    // The stop join is synchronous: once Unload returns, nothing advanced
    // afterwards is ever accounted.
    source.advance(0, 1_000_000_000, 0);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.total(), 3);
}

#[test]
fn load_fails_atomically_when_a_cpu_cannot_baseline() {
    let source = SimulatedRunstateSource::new();
    source.set_failing(3, true);
    let sampler = SamplingLoop::new(source, CpuSet::first(4), &fast_config()).unwrap();
    let mut module = AccountingModule::new(sampler);

    let err = module.handle_event(ModuleEvent::Load).unwrap_err();
    assert!(matches!(err, StealError::Hypercall { cpu: 3, .. }));
    assert_eq!(module.sampler().state(), LoopState::Stopped);

    let baselined = module
        .sampler()
        .with_engine(|e| (0..4).filter(|&c| e.is_initialized(c)).count())
        .unwrap();
    assert_eq!(baselined, 0, "a failed load must not leave partial baselines");
}

#[test]
fn events_outside_load_unload_are_rejected() {
    let source = SimulatedRunstateSource::new();
    let sampler = SamplingLoop::new(source, CpuSet::first(1), &fast_config()).unwrap();
    let mut module = AccountingModule::new(sampler);

    assert!(matches!(
        module.handle_event(ModuleEvent::Quiesce),
        Err(StealError::Unsupported(_))
    ));
    assert!(matches!(
        module.handle_event(ModuleEvent::Shutdown),
        Err(StealError::Unsupported(_))
    ));
}

#[test]
fn config_loaded_from_disk_drives_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steal.toml");
    std::fs::write(
        &path,
        r#"
            scheduler_hz = 1000
            sample_period = "1ms"
            stop_timeout = "2s"
        "#,
    )
    .unwrap();

    let config = AccountingConfig::from_file(&path).unwrap();
    assert_eq!(config.tick_length_ns(), 1_000_000);

    let source = SimulatedRunstateSource::new();
    let mut sampler = SamplingLoop::new(source.clone(), CpuSet::first(1), &config).unwrap();
    let counter = sampler.counter();

    sampler.start().unwrap();
    // 5.5 ms at a 1 ms tick -> 5 ticks with 0.5 ms carried.
    source.advance(0, 5_500_000, 0);
    assert!(wait_for(|| counter.total() == 5, Duration::from_secs(2)));
    sampler.stop().unwrap();

    assert_eq!(
        sampler.with_engine(|e| e.remainder_ns(0)).unwrap(),
        Some(500_000)
    );
}
