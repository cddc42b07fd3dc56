mod fixtures;

use anyhow::Result;
use fixtures::{counter, init_test_logging, logger_and_service, Counter, Logger, MemoryLogger, Service, Tracker};
use kernel::{
    Component, ComponentDescription, CreationContext, DependencyResolver, DependencySlot, Kernel, KernelError,
    KernelResult, ResolvedDependency, ResolverPriority,
};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;

#[test]
fn racing_threads_share_one_slow_singleton() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    let tracker = Tracker::new();
    kernel.register(
        tracker
            .attach(Component::<MemoryLogger>::named("SlowLogger"))
            .service::<dyn Logger>(|logger| logger)
            .factory(|| {
                thread::sleep(Duration::from_millis(20));
                Ok(MemoryLogger::default())
            })
            .singleton()
            .build(),
    )?;

    let barrier = Barrier::new(THREADS);
    let (shared, gate) = (&kernel, &barrier);
    let resolved: Vec<Arc<dyn Logger>> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(move || {
                    gate.wait();
                    shared.resolve::<dyn Logger>()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("worker panicked"))
            .collect::<Result<_, _>>()
    })?;

    assert_eq!(resolved.len(), THREADS);
    assert!(resolved.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    // Дубликаты проигравших гонку уже уничтожены
    assert_eq!(tracker.alive(), 1);
    assert_eq!(kernel.stats().tracked_instances, 1);

    kernel.dispose();
    assert_eq!(tracker.alive(), 0);
    Ok(())
}

#[test]
fn registration_while_resolving_is_safe() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    let shared = &kernel;

    thread::scope(|s| -> Result<()> {
        let registrar = s.spawn(move || -> Result<()> {
            for index in 0..20 {
                shared.register(counter(&format!("Counter-{}", index), &Tracker::new()).transient().build())?;
            }
            Ok(())
        });
        let readers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(move || -> Result<()> {
                    for _ in 0..50 {
                        let service = shared.resolve::<Service>()?;
                        service.run("tick");
                        shared.release(&service);
                    }
                    Ok(())
                })
            })
            .collect();

        registrar.join().expect("registrar panicked")?;
        for reader in readers {
            reader.join().expect("reader panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(kernel.component_names().len(), 22);
    assert_eq!(kernel.resolve_all::<Counter>()?.len(), 20);
    assert_eq!(kernel.resolve::<dyn Logger>()?.lines().len(), 200);
    assert_eq!(logger.alive(), 1);
    Ok(())
}

#[test]
fn concurrent_transient_resolve_and_release_balance_out() -> Result<()> {
    let (kernel, _logger, service) = logger_and_service()?;
    let shared = &kernel;

    thread::scope(|s| -> Result<()> {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(move || -> Result<()> {
                    for _ in 0..25 {
                        let instance = shared.resolve::<Service>()?;
                        assert!(shared.release(&instance));
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(service.created(), THREADS * 25);
    assert_eq!(service.destroyed(), THREADS * 25);
    assert_eq!(kernel.stats().tracked_instances, 1, "only the singleton logger remains");
    Ok(())
}

#[test]
fn dispose_from_another_thread_stops_resolution() -> Result<()> {
    let (kernel, logger, _service) = logger_and_service()?;
    kernel.resolve::<dyn Logger>()?;

    let disposer = {
        let kernel = kernel.clone();
        thread::spawn(move || kernel.dispose())
    };
    disposer.join().expect("disposer panicked");

    assert!(kernel.is_disposed());
    assert!(kernel.resolve::<Service>().is_err());
    assert_eq!(logger.destroyed(), 1);
    Ok(())
}

/// Задерживает оба потока у корня запроса, пока каждый не начал строить
/// свой singleton; сам ничего не разрешает
struct Rendezvous(Barrier);

impl DependencyResolver for Rendezvous {
    fn name(&self) -> &str {
        "rendezvous"
    }

    fn can_resolve(&self, context: &CreationContext<'_>, _owner: &ComponentDescription, _slot: &DependencySlot) -> bool {
        if !context.is_probe() && context.depth() == 1 {
            self.0.wait();
        }
        false
    }

    fn resolve(
        &self,
        _context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency> {
        Err(KernelError::resolution(owner.name(), slot.key(), "rendezvous resolves nothing"))
    }
}

pub struct Left(#[allow(dead_code)] Arc<Right>);
pub struct Right(#[allow(dead_code)] Arc<Left>);

#[test]
fn singleton_cycle_entered_from_both_ends_fails_instead_of_hanging() -> Result<()> {
    init_test_logging();
    let kernel = Kernel::new();
    kernel.register(
        Component::<Left>::named("Left")
            .constructor(vec![DependencySlot::service::<Right>("right").named("Right")], |args| {
                Ok(Left(args.get("right")?))
            })
            .singleton()
            .build(),
    )?;
    kernel.register(
        Component::<Right>::named("Right")
            .constructor(vec![DependencySlot::service::<Left>("left").named("Left")], |args| {
                Ok(Right(args.get("left")?))
            })
            .singleton()
            .build(),
    )?;
    kernel.insert_resolver(Arc::new(Rendezvous(Barrier::new(2))), ResolverPriority::First)?;

    let (sender, receiver) = mpsc::channel();
    let left = {
        let (kernel, sender) = (kernel.clone(), sender.clone());
        thread::spawn(move || {
            let outcome = kernel.resolve::<Left>().map(|_| ());
            let _ = sender.send(("Left", outcome));
        })
    };
    let right = {
        let kernel = kernel.clone();
        thread::spawn(move || {
            let outcome = kernel.resolve::<Right>().map(|_| ());
            let _ = sender.send(("Right", outcome));
        })
    };

    for _ in 0..2 {
        let (root, outcome) = receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("both resolutions finish");
        match outcome {
            Err(KernelError::CircularDependency { chain }) => {
                assert_eq!(chain.first().map(String::as_str), Some(root));
                assert_eq!(chain.last().map(String::as_str), Some(root));
            }
            other => panic!("expected CircularDependency for {}, got {:?}", root, other.err()),
        }
    }
    left.join().expect("left worker panicked");
    right.join().expect("right worker panicked");

    assert_eq!(kernel.stats().tracked_instances, 0);
    Ok(())
}
