//! Общие fixtures для интеграционных тестов kernel
#![allow(dead_code)]

use kernel::{Component, ComponentDescription, DependencySlot, Kernel};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_test_logging() {
    ::common::init_test_logging();
}

/// Счётчики commission/decommission одного компонента
#[derive(Clone, Default)]
pub struct Tracker {
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.created() - self.destroyed()
    }

    /// Подключить счётчики к описанию через hooks
    pub fn attach<I: Send + Sync + 'static>(&self, component: Component<I>) -> Component<I> {
        let created = self.created.clone();
        let destroyed = self.destroyed.clone();
        component
            .on_create(move |_: &I| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_destroy(move |_: &I| {
                destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn lines(&self) -> Vec<String>;
}

#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl Logger for MemoryLogger {
    fn log(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

pub struct Service {
    pub logger: Arc<dyn Logger>,
}

impl Service {
    pub fn run(&self, task: &str) {
        self.logger.log(task);
    }
}

/// "Logger": singleton без зависимостей
pub fn logger(tracker: &Tracker) -> ComponentDescription {
    tracker
        .attach(Component::<MemoryLogger>::named("Logger"))
        .service::<dyn Logger>(|logger| logger)
        .factory(|| Ok(MemoryLogger::default()))
        .singleton()
        .build()
}

/// "Service": transient, зависит от `dyn Logger`
pub fn service(tracker: &Tracker) -> ComponentDescription {
    tracker
        .attach(Component::<Service>::named("Service"))
        .constructor(vec![DependencySlot::service::<dyn Logger>("logger")], |args| {
            Ok(Service {
                logger: args.get::<dyn Logger>("logger")?,
            })
        })
        .transient()
        .build()
}

/// Kernel с зарегистрированными "Logger" и "Service"
pub fn logger_and_service() -> anyhow::Result<(Kernel, Tracker, Tracker)> {
    init_test_logging();
    let kernel = Kernel::new();
    let logger_tracker = Tracker::new();
    let service_tracker = Tracker::new();
    kernel.register(logger(&logger_tracker))?;
    kernel.register(service(&service_tracker))?;
    Ok((kernel, logger_tracker, service_tracker))
}

/// Простой компонент-значение для тестов lifestyle
pub struct Counter {
    pub id: usize,
}

pub fn counter(name: &str, tracker: &Tracker) -> Component<Counter> {
    let sequence = Arc::new(AtomicUsize::new(0));
    tracker.attach(Component::<Counter>::named(name)).factory(move || {
        Ok(Counter {
            id: sequence.fetch_add(1, Ordering::SeqCst),
        })
    })
}
