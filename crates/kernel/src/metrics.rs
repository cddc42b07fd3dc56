use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Атомарные счётчики kernel
#[derive(Default)]
struct AtomicCounters {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    resolutions: AtomicU64,
    failed_resolutions: AtomicU64,
    releases: AtomicU64,
    untracked_releases: AtomicU64,
    total_resolve_nanos: AtomicU64,
}

/// Счётчики по компонентам
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentMetrics {
    pub resolutions: u64,
    pub failures: u64,
    pub total_time: Duration,
}

impl ComponentMetrics {
    pub fn average_time(&self) -> Duration {
        if self.resolutions == 0 {
            return Duration::ZERO;
        }
        self.total_time / self.resolutions as u32
    }
}

/// Снимок состояния kernel (`Kernel::stats`)
#[derive(Debug, Clone, Default, Serialize)]
pub struct KernelStats {
    pub registrations: u64,
    pub unregistrations: u64,
    pub resolutions: u64,
    pub failed_resolutions: u64,
    pub releases: u64,
    pub untracked_releases: u64,
    pub average_resolve_time: Duration,
    pub tracked_instances: usize,
    pub registered_components: usize,
    pub valid_handlers: usize,
    pub waiting_handlers: usize,
    pub live_scopes: usize,
}

impl KernelStats {
    pub fn success_rate(&self) -> f64 {
        if self.resolutions == 0 {
            return 1.0;
        }
        let succeeded = self.resolutions.saturating_sub(self.failed_resolutions);
        succeeded as f64 / self.resolutions as f64
    }
}

pub(crate) struct KernelMetrics {
    counters: AtomicCounters,
    components: RwLock<HashMap<String, ComponentMetrics>>,
}

impl KernelMetrics {
    pub fn new() -> Self {
        Self {
            counters: AtomicCounters::default(),
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_registration(&self) {
        self.counters.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unregistration(&self) {
        self.counters.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    /// `component`: handler, выбранный для запроса (если дошло до выбора)
    pub fn record_resolution(&self, component: Option<&str>, duration: Duration, success: bool) {
        self.counters.resolutions.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_resolve_nanos
            .fetch_add(duration.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        if !success {
            self.counters.failed_resolutions.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(component) = component {
            let mut components = self.components.write();
            let entry = components.entry(component.to_string()).or_default();
            entry.resolutions += 1;
            entry.total_time += duration;
            if !success {
                entry.failures += 1;
            }
        }
    }

    pub fn record_release(&self, tracked: bool) {
        self.counters.releases.fetch_add(1, Ordering::Relaxed);
        if !tracked {
            self.counters.untracked_releases.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn component(&self, name: &str) -> Option<ComponentMetrics> {
        self.components.read().get(name).cloned()
    }

    /// Счётчики; поля состояния заполняет kernel
    pub fn snapshot(&self) -> KernelStats {
        let resolutions = self.counters.resolutions.load(Ordering::Relaxed);
        let total = self.counters.total_resolve_nanos.load(Ordering::Relaxed);
        KernelStats {
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            unregistrations: self.counters.unregistrations.load(Ordering::Relaxed),
            resolutions,
            failed_resolutions: self.counters.failed_resolutions.load(Ordering::Relaxed),
            releases: self.counters.releases.load(Ordering::Relaxed),
            untracked_releases: self.counters.untracked_releases.load(Ordering::Relaxed),
            average_resolve_time: if resolutions == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total / resolutions)
            },
            ..KernelStats::default()
        }
    }
}
