mod fixtures;

use anyhow::Result;
use fixtures::{counter, init_test_logging, Counter, Tracker};
use kernel::lifestyle::TransientLifestyle;
use kernel::{
    track_instance, Burden, ComponentDescription, CreationContext, Handler, Kernel, KernelResult, LifestyleFactory,
    LifestyleKind, LifestyleManager, ReleaseReason,
};
use mockall::mock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

mock! {
    pub Factory {}

    impl LifestyleFactory for Factory {
        fn create(&self, description: &ComponentDescription) -> Arc<dyn LifestyleManager>;
    }
}

#[test]
fn per_thread_instances_are_isolated() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    kernel.register(counter("Session", &tracker).per_thread().build())?;

    let main_first = kernel.resolve::<Counter>()?;
    let main_second = kernel.resolve::<Counter>()?;
    assert!(Arc::ptr_eq(&main_first, &main_second));

    let worker = {
        let kernel = kernel.clone();
        thread::spawn(move || -> Result<usize> {
            let a = kernel.resolve::<Counter>()?;
            let b = kernel.resolve::<Counter>()?;
            assert!(Arc::ptr_eq(&a, &b));
            Ok(a.id)
        })
    };
    let worker_id = worker.join().expect("worker panicked")?;
    assert_ne!(worker_id, main_first.id);
    assert_eq!(tracker.created(), 2);

    assert!(kernel.release(&main_first));
    assert_eq!(tracker.destroyed(), 0, "per-thread instances live until disposal");

    kernel.dispose();
    assert_eq!(tracker.destroyed(), 2);
    Ok(())
}

#[test]
fn custom_factory_creates_one_manager_per_component() -> Result<()> {
    init_test_logging();
    let mut factory = MockFactory::new();
    factory
        .expect_create()
        .withf(|description| description.name() == "Job")
        .times(1)
        .returning(|_| Arc::new(TransientLifestyle) as Arc<dyn LifestyleManager>);

    let kernel = Kernel::new();
    let tracker = Tracker::new();
    kernel.register(
        counter("Job", &tracker)
            .lifestyle(LifestyleKind::Custom(Arc::new(factory)))
            .build(),
    )?;

    let first = kernel.resolve::<Counter>()?;
    let second = kernel.resolve::<Counter>()?;
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(kernel.handler("Job").expect("registered").lifestyle().name(), "transient");

    assert!(kernel.release(&first));
    assert_eq!(tracker.destroyed(), 1);
    Ok(())
}

/// Переиспользует один экземпляр, пока его не отпустят `limit` раз
struct RecyclingLifestyle {
    limit: usize,
    current: Mutex<Option<Arc<Burden>>>,
    releases: AtomicUsize,
}

impl RecyclingLifestyle {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            current: Mutex::new(None),
            releases: AtomicUsize::new(0),
        }
    }
}

impl LifestyleManager for RecyclingLifestyle {
    fn name(&self) -> &str {
        "recycling"
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        if let Some(current) = self.current.lock().as_ref().filter(|burden| !burden.is_destroyed()) {
            return Ok(current.clone());
        }
        let burden = handler.activator().create(handler, context)?;
        burden.mark_retained();
        track_instance(context.policy(), &burden)?;
        *self.current.lock() = Some(burden.clone());
        Ok(burden)
    }

    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool {
        let releases = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        if reason != ReleaseReason::Disposal && releases < self.limit {
            return false;
        }
        self.current.lock().take();
        burden.teardown()
    }

    fn dispose(&self) {
        if let Some(burden) = self.current.lock().take() {
            burden.teardown();
        }
    }
}

#[test]
fn hand_written_lifestyle_plugs_into_kernel() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    let factory = |_: &ComponentDescription| -> Arc<dyn LifestyleManager> { Arc::new(RecyclingLifestyle::new(3)) };
    kernel.register(
        counter("Recycled", &tracker)
            .lifestyle(LifestyleKind::Custom(Arc::new(factory)))
            .build(),
    )?;

    let first = kernel.resolve::<Counter>()?;
    let second = kernel.resolve::<Counter>()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(kernel.handler("Recycled").expect("registered").lifestyle().name(), "recycling");

    // Retained: явный release не доходит до lifestyle
    assert!(kernel.release(&first));
    assert_eq!(tracker.destroyed(), 0);

    kernel.dispose();
    assert_eq!(tracker.created(), 1);
    assert_eq!(tracker.destroyed(), 1);
    Ok(())
}
