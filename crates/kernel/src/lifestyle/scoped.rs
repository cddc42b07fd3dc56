use std::sync::Arc;
use tracing::debug;

use super::{LifestyleManager, ReleaseReason, ScopeKind};
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::scope::LifetimeScope;

/// Один экземпляр на scope; экземпляры учитываются в ledger scope и
/// уничтожаются при его завершении
pub struct ScopedLifestyle {
    kind: ScopeKind,
}

impl ScopedLifestyle {
    pub fn new(kind: ScopeKind) -> Self {
        Self { kind }
    }

    fn current_scope(&self, context: &CreationContext<'_>) -> Option<Arc<LifetimeScope>> {
        match &self.kind {
            ScopeKind::Ambient => context.scope().cloned(),
            ScopeKind::Accessor(accessor) => accessor.current_scope(context),
        }
        .filter(|scope| !scope.is_disposed())
    }
}

impl LifestyleManager for ScopedLifestyle {
    fn name(&self) -> &str {
        "scoped"
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        let scope = self.current_scope(context).ok_or_else(|| KernelError::NoActiveScope {
            component: handler.name().to_string(),
        })?;

        if let Some(cached) = scope.cached(handler.id()) {
            debug!(component = handler.name(), scope = %scope.id(), "scoped cache hit");
            return Ok(cached);
        }

        // Создание вне блокировки кэша: зависимости могут быть scoped в том же scope
        let burden = handler.activator().create(handler, context)?;
        burden.mark_retained();
        if let Err(existing) = scope.insert_if_absent(handler.id(), burden.clone()) {
            burden.teardown();
            return Ok(existing);
        }
        if let Err(error) = scope.policy().track(&burden) {
            scope.evict(handler.id());
            burden.teardown();
            return Err(error);
        }
        debug!(component = handler.name(), scope = %scope.id(), "scoped instance created");
        Ok(burden)
    }

    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool {
        match reason {
            ReleaseReason::ScopeEnded | ReleaseReason::Disposal => burden.teardown(),
            ReleaseReason::Explicit | ReleaseReason::OwnerReleased => false,
        }
    }

    fn dispose(&self) {}
}
