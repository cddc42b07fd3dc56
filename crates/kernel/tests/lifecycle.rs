mod fixtures;

use anyhow::Result;
use fixtures::{init_test_logging, logger_and_service, Logger, MemoryLogger, Service, Tracker};
use kernel::{Component, DependencySlot, HandlerState, Kernel, KernelError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn transient_services_share_singleton_logger() -> Result<()> {
    let (kernel, logger, service) = logger_and_service()?;

    let first = kernel.resolve_named::<Service>("Service")?;
    let second = kernel.resolve_named::<Service>("Service")?;

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.logger, &second.logger));
    assert_eq!(logger.created(), 1);
    assert_eq!(service.created(), 2);

    first.run("first");
    second.run("second");
    assert_eq!(first.logger.lines(), vec!["first", "second"]);

    assert!(kernel.release(&first));
    assert!(kernel.release(&second));
    assert_eq!(service.destroyed(), 2);
    assert_eq!(logger.destroyed(), 0, "singleton lives until disposal");

    kernel.dispose();
    assert_eq!(logger.destroyed(), 1);
    Ok(())
}

#[test]
fn dispose_destroys_singleton_exactly_once() -> Result<()> {
    let (kernel, logger, service) = logger_and_service()?;
    let resolved = kernel.resolve::<dyn Logger>()?;
    let _unreleased = kernel.resolve_named::<Service>("Service")?;

    kernel.dispose();
    kernel.dispose();
    drop(kernel);

    assert_eq!(logger.created(), 1);
    assert_eq!(logger.destroyed(), 1);
    assert_eq!(service.destroyed(), 1, "tracked transient is destroyed on dispose");
    // Экземпляр остаётся валидной Rust-ссылкой и после teardown
    resolved.log("after dispose");
    Ok(())
}

#[test]
fn dropping_last_kernel_handle_disposes() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    let clone = kernel.clone();
    kernel.resolve::<dyn Logger>()?;

    drop(kernel);
    assert_eq!(logger.destroyed(), 0);
    drop(clone);
    assert_eq!(logger.destroyed(), 1);
    Ok(())
}

#[test]
fn operations_after_dispose_fail() -> Result<()> {
    let (kernel, _logger, _service) = logger_and_service()?;
    kernel.dispose();

    assert!(kernel.is_disposed());
    assert!(matches!(kernel.resolve::<dyn Logger>(), Err(KernelError::Disposed)));
    assert!(matches!(
        kernel.register(fixtures::logger(&Tracker::new())),
        Err(KernelError::Disposed)
    ));
    assert!(kernel.begin_scope().is_err());
    assert!(!kernel.release(&(Arc::new(MemoryLogger::default()) as Arc<dyn Logger>)));
    Ok(())
}

#[test]
fn singleton_resolves_to_same_instance_transient_to_distinct() -> Result<()> {
    let (kernel, _logger, _service) = logger_and_service()?;

    let a = kernel.resolve::<dyn Logger>()?;
    let b = kernel.resolve::<dyn Logger>()?;
    let by_name = kernel.resolve_named::<dyn Logger>("Logger")?;
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &by_name));

    let first = kernel.resolve::<Service>()?;
    let second = kernel.resolve::<Service>()?;
    assert!(!Arc::ptr_eq(&first, &second));
    Ok(())
}

#[test]
fn release_is_idempotent() -> Result<()> {
    let (kernel, _logger, service) = logger_and_service()?;
    let instance = kernel.resolve::<Service>()?;

    assert!(kernel.is_tracked(&instance));
    assert!(kernel.release(&instance));
    assert!(!kernel.is_tracked(&instance));
    assert!(!kernel.release(&instance));
    assert!(!kernel.release(&instance));
    assert_eq!(service.destroyed(), 1);

    let stats = kernel.stats();
    assert_eq!(stats.releases, 3);
    assert_eq!(stats.untracked_releases, 2);
    Ok(())
}

#[test]
fn releasing_singleton_keeps_it_alive() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    let instance = kernel.resolve::<dyn Logger>()?;

    assert!(kernel.release(&instance), "singleton is tracked by the container");
    assert!(kernel.is_tracked(&instance));
    assert_eq!(logger.destroyed(), 0);

    let again = kernel.resolve::<dyn Logger>()?;
    assert!(Arc::ptr_eq(&instance, &again));
    Ok(())
}

#[test]
fn foreign_instances_are_not_tracked() -> Result<()> {
    let (kernel, _logger, _service) = logger_and_service()?;
    let foreign: Arc<dyn Logger> = Arc::new(MemoryLogger::default());

    assert!(!kernel.is_tracked(&foreign));
    assert!(!kernel.release(&foreign));
    Ok(())
}

pub struct Connection;

pub struct Repository {
    pub connection: Arc<Connection>,
    pub logger: Arc<dyn Logger>,
}

/// "Repository" (singleton) единолично владеет "Connection" (transient) и
/// делит "Logger" (singleton) с остальным контейнером
fn repository_kernel() -> Result<(Kernel, Tracker, Tracker, Tracker)> {
    init_test_logging();
    let kernel = Kernel::new();
    let logger = Tracker::new();
    let connection = Tracker::new();
    let repository = Tracker::new();

    kernel.register(fixtures::logger(&logger))?;
    kernel.register(
        connection
            .attach(Component::<Connection>::named("Connection"))
            .factory(|| Ok(Connection))
            .transient()
            .build(),
    )?;
    kernel.register(
        repository
            .attach(Component::<Repository>::named("Repository"))
            .constructor(
                vec![
                    DependencySlot::service::<Connection>("connection"),
                    DependencySlot::service::<dyn Logger>("logger"),
                ],
                |args| {
                    Ok(Repository {
                        connection: args.get("connection")?,
                        logger: args.get("logger")?,
                    })
                },
            )
            .singleton()
            .build(),
    )?;
    Ok((kernel, logger, connection, repository))
}

#[test]
fn singleton_teardown_destroys_exclusive_dependency_only() -> Result<()> {
    let (kernel, logger, connection, repository) = repository_kernel()?;

    let shared = kernel.resolve::<dyn Logger>()?;
    let resolved = kernel.resolve::<Repository>()?;
    assert!(Arc::ptr_eq(&shared, &resolved.logger));
    assert!(!kernel.is_tracked(&resolved.connection), "dependency is owned by its parent");
    assert_eq!(connection.created(), 1);

    assert!(kernel.unregister("Repository")?);
    assert_eq!(repository.destroyed(), 1);
    assert_eq!(connection.destroyed(), 1);
    assert_eq!(logger.destroyed(), 0, "logger is still tracked by the container");
    assert!(kernel.is_tracked(&shared));

    kernel.dispose();
    assert_eq!(logger.destroyed(), 1);
    assert_eq!(connection.destroyed(), 1);
    assert_eq!(repository.destroyed(), 1);
    Ok(())
}

#[test]
fn dispose_tears_down_graph_newest_first() -> Result<()> {
    let (kernel, logger, connection, repository) = repository_kernel()?;
    kernel.resolve::<Repository>()?;

    kernel.dispose();
    assert_eq!(repository.destroyed(), 1);
    assert_eq!(connection.destroyed(), 1);
    assert_eq!(logger.destroyed(), 1);
    Ok(())
}

#[test]
fn unregistering_dependency_puts_dependents_back_to_waiting() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    kernel.resolve::<Service>()?;
    assert_eq!(kernel.handler_state("Service"), Some(HandlerState::Valid));

    assert!(kernel.unregister("Logger")?);
    assert!(!kernel.unregister("Logger")?);
    assert_eq!(logger.destroyed(), 1, "retired singleton is destroyed");
    assert_eq!(kernel.handler_state("Service"), Some(HandlerState::WaitingForDependencies));
    assert!(matches!(
        kernel.resolve::<Service>(),
        Err(KernelError::HandlerNotValid { .. })
    ));
    Ok(())
}

#[test]
fn unregistered_singleton_is_not_kept_alive_by_kernel() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    let resolved = kernel.resolve::<dyn Logger>()?;
    assert!(Arc::strong_count(&resolved) > 1);

    assert!(kernel.unregister("Logger")?);
    assert_eq!(logger.destroyed(), 1);
    assert!(!kernel.is_tracked(&resolved));
    assert_eq!(Arc::strong_count(&resolved), 1, "kernel released every reference");
    Ok(())
}

#[test]
fn replacing_singleton_repeatedly_does_not_accumulate_instances() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    let mut previous = Vec::new();
    for _ in 0..5 {
        previous.push(kernel.resolve::<dyn Logger>()?);
        kernel.replace(fixtures::logger(&logger))?;
    }

    assert_eq!(logger.created(), 5);
    assert_eq!(logger.destroyed(), 5);
    assert!(previous.iter().all(|instance| Arc::strong_count(instance) == 1));
    assert_eq!(kernel.stats().tracked_instances, 0);
    Ok(())
}

#[test]
fn registered_instance_is_decommissioned_on_dispose() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    let existing = Arc::new(MemoryLogger::default());

    kernel.register(
        tracker
            .attach(Component::<MemoryLogger>::instance("Existing", existing.clone()))
            .service::<dyn Logger>(|logger| logger)
            .build(),
    )?;
    let resolved = kernel.resolve::<dyn Logger>()?;
    resolved.log("hello");
    assert_eq!(existing.lines(), vec!["hello"]);

    kernel.dispose();
    assert_eq!(tracker.created(), 1);
    assert_eq!(tracker.destroyed(), 1);
    Ok(())
}

#[test]
fn failing_decommission_hook_does_not_stop_teardown() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();

    kernel.register(
        Component::<MemoryLogger>::named("Fragile")
            .service::<dyn Logger>(|logger| logger)
            .factory(|| Ok(MemoryLogger::default()))
            .on_destroy(|_| Err(anyhow::anyhow!("flush failed")))
            .on_destroy(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .transient()
            .build(),
    )?;

    let instance = kernel.resolve::<dyn Logger>()?;
    assert!(kernel.release(&instance));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn failing_commission_hook_reports_activation_error() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    kernel.register(
        Component::<MemoryLogger>::named("Broken")
            .service::<dyn Logger>(|logger| logger)
            .factory(|| Ok(MemoryLogger::default()))
            .on_create(|_| Err(anyhow::anyhow!("not configured")))
            .build(),
    )?;

    let error = kernel.resolve::<dyn Logger>().err().expect("activation must fail");
    assert!(matches!(error, KernelError::Activation { ref component, .. } if component == "Broken"));
    assert_eq!(kernel.stats().tracked_instances, 0);
    Ok(())
}

#[test]
fn later_commission_failure_decommissions_the_instance() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    kernel.register(
        tracker
            .attach(Component::<MemoryLogger>::named("HalfReady"))
            .service::<dyn Logger>(|logger| logger)
            .factory(|| Ok(MemoryLogger::default()))
            .on_create(|_| Err(anyhow::anyhow!("pool warmup failed")))
            .transient()
            .build(),
    )?;

    assert!(matches!(
        kernel.resolve::<dyn Logger>(),
        Err(KernelError::Activation { ref component, .. }) if component == "HalfReady"
    ));
    assert_eq!(tracker.created(), 1);
    assert_eq!(tracker.destroyed(), 1);
    assert_eq!(kernel.stats().tracked_instances, 0);
    Ok(())
}

#[test]
fn failed_activation_releases_created_dependencies() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let connection = Tracker::new();

    kernel.register(
        connection
            .attach(Component::<Connection>::named("Connection"))
            .factory(|| Ok(Connection))
            .transient()
            .build(),
    )?;
    kernel.register(
        Component::<Repository>::named("Repository")
            .constructor(vec![DependencySlot::service::<Connection>("connection")], |_| {
                Err(anyhow::anyhow!("schema mismatch"))
            })
            .transient()
            .build(),
    )?;

    assert!(matches!(
        kernel.resolve::<Repository>(),
        Err(KernelError::Activation { .. })
    ));
    assert_eq!(connection.created(), 1);
    assert_eq!(connection.destroyed(), 1);
    Ok(())
}
