use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::debug;

use super::{track_instance, LifestyleManager, ReleaseReason};
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::description::ComponentDescription;
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::release_policy::ReleasePolicy;

/// Экземпляр на поток ОС; живёт до disposal kernel
pub struct PerThreadLifestyle {
    instances: Mutex<HashMap<ThreadId, Arc<Burden>>>,
    container: OnceCell<Weak<ReleasePolicy>>,
}

impl PerThreadLifestyle {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            container: OnceCell::new(),
        }
    }
}

impl Default for PerThreadLifestyle {
    fn default() -> Self {
        Self::new()
    }
}

impl LifestyleManager for PerThreadLifestyle {
    fn name(&self) -> &str {
        "per-thread"
    }

    fn init(&self, _description: &ComponentDescription, container_policy: &Arc<ReleasePolicy>) {
        let _ = self.container.set(Arc::downgrade(container_policy));
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        let thread = thread::current().id();
        if let Some(existing) = self
            .instances
            .lock()
            .get(&thread)
            .filter(|burden| !burden.is_destroyed())
        {
            return Ok(existing.clone());
        }

        // Запись для потока создаёт только сам поток, гонки нет
        let policy = self
            .container
            .get()
            .and_then(Weak::upgrade)
            .ok_or(KernelError::Disposed)?;
        let burden = handler.activator().create(handler, context)?;
        burden.mark_retained();
        track_instance(&policy, &burden)?;
        self.instances.lock().insert(thread, burden.clone());
        debug!(component = handler.name(), thread = ?thread, "per-thread instance created");
        Ok(burden)
    }

    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool {
        if reason != ReleaseReason::Disposal {
            return false;
        }
        self.instances.lock().retain(|_, cached| cached.id() != burden.id());
        burden.teardown()
    }

    fn dispose(&self) {
        let instances: Vec<_> = self.instances.lock().drain().map(|(_, burden)| burden).collect();
        for burden in instances {
            burden.teardown();
        }
    }
}
