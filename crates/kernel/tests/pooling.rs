mod fixtures;

use anyhow::Result;
use fixtures::{counter, init_test_logging, Counter, Tracker};
use kernel::{Kernel, KernelConfig, KernelError, LifestyleKind, PoolConfig, PoolExhaustion, PoolSettings};
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn pooled_kernel(settings: PoolSettings) -> Result<(Kernel, Tracker)> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    kernel.register(
        counter("Connection", &tracker)
            .lifestyle(LifestyleKind::Pooled(settings))
            .build(),
    )?;
    Ok((kernel, tracker))
}

#[test]
fn third_resolve_fails_when_pool_is_exhausted() -> Result<()> {
    let (kernel, tracker) = pooled_kernel(PoolSettings::new(1, 2).with_exhaustion(PoolExhaustion::Fail))?;

    let first = kernel.resolve::<Counter>()?;
    let second = kernel.resolve::<Counter>()?;
    assert!(!Arc::ptr_eq(&first, &second));

    match kernel.resolve::<Counter>() {
        Err(KernelError::PoolExhausted { component, max }) => {
            assert_eq!(component, "Connection");
            assert_eq!(max, 2);
        }
        other => panic!("expected PoolExhausted, got {:?}", other.err()),
    }
    assert_eq!(tracker.created(), 2);
    Ok(())
}

#[test]
fn released_instance_is_reused_up_to_min_idle() -> Result<()> {
    let (kernel, tracker) = pooled_kernel(PoolSettings::new(1, 2).with_exhaustion(PoolExhaustion::Fail))?;

    let first = kernel.resolve::<Counter>()?;
    let second = kernel.resolve::<Counter>()?;

    assert!(kernel.release(&first));
    assert_eq!(tracker.destroyed(), 0, "returned to the free list");

    let third = kernel.resolve::<Counter>()?;
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(third.id, first.id);
    assert_eq!(tracker.created(), 2);

    assert!(kernel.release(&second));
    assert!(kernel.release(&third));
    assert_eq!(tracker.destroyed(), 1, "only `min` idle instances are kept");

    kernel.dispose();
    assert_eq!(tracker.destroyed(), 2);
    Ok(())
}

#[test]
fn blocking_pool_times_out() -> Result<()> {
    let (kernel, _tracker) =
        pooled_kernel(PoolSettings::new(0, 1).with_exhaustion(PoolExhaustion::Block { timeout_ms: 50 }))?;
    let _held = kernel.resolve::<Counter>()?;

    let started = Instant::now();
    let result = kernel.resolve::<Counter>();
    assert!(matches!(result, Err(KernelError::PoolExhausted { .. })));
    assert!(started.elapsed() >= Duration::from_millis(50));
    Ok(())
}

#[test]
fn blocking_pool_wakes_up_on_release() -> Result<()> {
    let (kernel, tracker) =
        pooled_kernel(PoolSettings::new(1, 1).with_exhaustion(PoolExhaustion::Block { timeout_ms: 5_000 }))?;
    let held = kernel.resolve::<Counter>()?;

    let releaser = {
        let kernel = kernel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            kernel.release(&held)
        })
    };

    let reused = kernel.resolve::<Counter>()?;
    assert!(releaser.join().expect("releaser panicked"));
    assert_eq!(reused.id, 0);
    assert_eq!(tracker.created(), 1);
    Ok(())
}

#[rstest]
#[case::fail(PoolExhaustion::Fail)]
#[case::block(PoolExhaustion::Block { timeout_ms: 20 })]
fn pool_falls_back_to_kernel_exhaustion_policy(#[case] exhaustion: PoolExhaustion) -> Result<()> {
    init_test_logging();
    let config = KernelConfig {
        pool: PoolConfig { exhaustion },
        ..KernelConfig::minimal()
    };
    let kernel = Kernel::with_config(config)?;
    kernel.register(counter("Connection", &Tracker::new()).pooled(0, 1).build())?;

    let _held = kernel.resolve::<Counter>()?;
    assert!(matches!(kernel.resolve::<Counter>(), Err(KernelError::PoolExhausted { .. })));
    Ok(())
}

#[test]
fn concurrent_borrowers_never_exceed_max() -> Result<()> {
    let (kernel, _tracker) =
        pooled_kernel(PoolSettings::new(1, 2).with_exhaustion(PoolExhaustion::Block { timeout_ms: 10_000 }))?;
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let (shared, active_ref, peak_ref) = (&kernel, &active, &peak);

    thread::scope(|s| -> Result<()> {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || -> Result<()> {
                    for _ in 0..5 {
                        let instance = shared.resolve::<Counter>()?;
                        let now = active_ref.fetch_add(1, Ordering::SeqCst) + 1;
                        peak_ref.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        active_ref.fetch_sub(1, Ordering::SeqCst);
                        shared.release(&instance);
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("borrower panicked")?;
        }
        Ok(())
    })?;

    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak borrowers: {}", peak);
    Ok(())
}

#[test]
fn dispose_destroys_idle_and_borrowed_instances() -> Result<()> {
    let (kernel, tracker) = pooled_kernel(PoolSettings::new(1, 2).with_exhaustion(PoolExhaustion::Fail))?;
    let idle = kernel.resolve::<Counter>()?;
    let _borrowed = kernel.resolve::<Counter>()?;
    kernel.release(&idle);
    assert_eq!(tracker.destroyed(), 0);

    kernel.dispose();
    assert_eq!(tracker.created(), 2);
    assert_eq!(tracker.destroyed(), 2);
    Ok(())
}
