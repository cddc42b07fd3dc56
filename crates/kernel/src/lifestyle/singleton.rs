use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

use super::{track_instance, LifestyleManager, ReleaseReason};
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::description::ComponentDescription;
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::release_policy::ReleasePolicy;

/// Один экземпляр на kernel.
///
/// Экземпляр строится вне mutex. Проигравший гонку экземпляр уничтожается,
/// все вызывающие получают сохранённый первым.
pub struct SingletonLifestyle {
    instance: Mutex<Option<Arc<Burden>>>,
    container: OnceCell<Weak<ReleasePolicy>>,
}

impl SingletonLifestyle {
    pub fn new() -> Self {
        Self {
            instance: Mutex::new(None),
            container: OnceCell::new(),
        }
    }

    fn container_policy(&self) -> KernelResult<Arc<ReleasePolicy>> {
        self.container
            .get()
            .and_then(Weak::upgrade)
            .ok_or(KernelError::Disposed)
    }

    fn cached(&self) -> Option<Arc<Burden>> {
        self.instance
            .lock()
            .as_ref()
            .filter(|burden| !burden.is_destroyed())
            .cloned()
    }
}

impl Default for SingletonLifestyle {
    fn default() -> Self {
        Self::new()
    }
}

impl LifestyleManager for SingletonLifestyle {
    fn name(&self) -> &str {
        "singleton"
    }

    fn init(&self, _description: &ComponentDescription, container_policy: &Arc<ReleasePolicy>) {
        let _ = self.container.set(Arc::downgrade(container_policy));
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        if let Some(existing) = self.cached() {
            debug!(component = handler.name(), "singleton cache hit");
            return Ok(existing);
        }

        let policy = self.container_policy()?;
        let burden = handler.activator().create(handler, context)?;

        let mut slot = self.instance.lock();
        if let Some(existing) = slot.as_ref().filter(|cached| !cached.is_destroyed()).cloned() {
            drop(slot);
            debug!(component = handler.name(), "singleton race lost, discarding duplicate");
            burden.teardown();
            return Ok(existing);
        }
        burden.mark_retained();
        if let Err(error) = track_instance(&policy, &burden) {
            drop(slot);
            burden.teardown();
            return Err(error);
        }
        *slot = Some(burden.clone());
        drop(slot);

        debug!(component = handler.name(), "singleton created");
        Ok(burden)
    }

    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool {
        if reason != ReleaseReason::Disposal {
            return false;
        }
        let mut slot = self.instance.lock();
        if slot.as_ref().is_some_and(|cached| cached.id() == burden.id()) {
            *slot = None;
        }
        drop(slot);
        burden.teardown()
    }

    fn dispose(&self) {
        let cached = self.instance.lock().take();
        if let Some(burden) = cached {
            burden.teardown();
        }
    }
}
