use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::{LifestyleManager, ReleaseReason};
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;

/// Что делать, когда все `max` экземпляров пула заняты
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolExhaustion {
    Fail,
    Block { timeout_ms: u64 },
}

impl Default for PoolExhaustion {
    fn default() -> Self {
        Self::Fail
    }
}

/// Границы пула: до `min` свободных экземпляров удерживается для повторного
/// использования, не более `max` живых одновременно
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min: usize,
    pub max: usize,
    /// `None`: политика из `KernelConfig::pool`
    pub exhaustion: Option<PoolExhaustion>,
}

impl PoolSettings {
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            exhaustion: None,
        }
    }

    pub fn with_exhaustion(mut self, exhaustion: PoolExhaustion) -> Self {
        self.exhaustion = Some(exhaustion);
        self
    }
}

#[derive(Default)]
struct PoolState {
    free: Vec<Arc<Burden>>,
    in_use: HashMap<u64, Arc<Burden>>,
    creating: usize,
    disposed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.free.len() + self.in_use.len() + self.creating
    }
}

/// Ограниченный пул переиспользуемых экземпляров
pub struct PooledLifestyle {
    settings: PoolSettings,
    exhaustion: PoolExhaustion,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PooledLifestyle {
    pub fn new(settings: PoolSettings, exhaustion: PoolExhaustion) -> Self {
        Self {
            settings,
            exhaustion,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        }
    }

    pub fn idle(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use.len()
    }

    fn exhausted(&self, handler: &Handler) -> KernelError {
        KernelError::PoolExhausted {
            component: handler.name().to_string(),
            max: self.settings.max,
        }
    }

    /// Взять свободный экземпляр или зарезервировать место под новый
    fn acquire_slot(&self, handler: &Handler) -> KernelResult<Option<Arc<Burden>>> {
        let deadline = match self.exhaustion {
            PoolExhaustion::Fail => None,
            PoolExhaustion::Block { timeout_ms } => Some(Instant::now() + Duration::from_millis(timeout_ms)),
        };

        let mut state = self.state.lock();
        loop {
            if state.disposed {
                return Err(KernelError::Disposed);
            }
            if let Some(burden) = state.free.pop() {
                state.in_use.insert(burden.id(), burden.clone());
                trace!(component = handler.name(), "pooled instance reused");
                return Ok(Some(burden));
            }
            if state.live() < self.settings.max {
                state.creating += 1;
                return Ok(None);
            }

            let Some(deadline) = deadline else {
                return Err(self.exhausted(handler));
            };
            if self.available.wait_until(&mut state, deadline).timed_out()
                && state.free.is_empty()
                && state.live() >= self.settings.max
            {
                return Err(self.exhausted(handler));
            }
        }
    }

    fn hand_out(&self, burden: Arc<Burden>, context: &CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        if context.is_root_request() {
            if let Err(error) = context.policy().track(&burden) {
                self.state.lock().in_use.remove(&burden.id());
                self.available.notify_one();
                burden.teardown();
                return Err(error);
            }
        }
        Ok(burden)
    }
}

impl LifestyleManager for PooledLifestyle {
    fn name(&self) -> &str {
        "pooled"
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        if let Some(reused) = self.acquire_slot(handler)? {
            return self.hand_out(reused, context);
        }

        let created = handler.activator().create(handler, context);
        let mut state = self.state.lock();
        state.creating -= 1;
        match created {
            Ok(burden) => {
                state.in_use.insert(burden.id(), burden.clone());
                let live = state.live();
                drop(state);
                debug!(component = handler.name(), live, max = self.settings.max, "pooled instance created");
                self.hand_out(burden, context)
            }
            Err(error) => {
                drop(state);
                self.available.notify_one();
                Err(error)
            }
        }
    }

    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool {
        let mut state = self.state.lock();
        let Some(owned) = state.in_use.remove(&burden.id()) else {
            // Уже в free list: уничтожается только при disposal
            let destroy = reason == ReleaseReason::Disposal || state.disposed;
            if destroy {
                state.free.retain(|idle| idle.id() != burden.id());
            }
            drop(state);
            return destroy && burden.teardown();
        };

        if reason != ReleaseReason::Disposal && !state.disposed && state.free.len() < self.settings.min {
            state.free.push(owned);
            drop(state);
            self.available.notify_one();
            trace!(component = burden.component(), "pooled instance returned");
            return false;
        }

        drop(state);
        self.available.notify_one();
        burden.teardown()
    }

    fn dispose(&self) {
        let (free, in_use) = {
            let mut state = self.state.lock();
            state.disposed = true;
            (
                std::mem::take(&mut state.free),
                std::mem::take(&mut state.in_use),
            )
        };
        self.available.notify_all();
        for burden in free.into_iter().chain(in_use.into_values()) {
            burden.teardown();
        }
    }
}
