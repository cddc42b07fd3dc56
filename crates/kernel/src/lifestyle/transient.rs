use std::sync::Arc;
use tracing::trace;

use super::{track_instance, LifestyleManager, ReleaseReason};
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::errors::KernelResult;
use crate::handler::Handler;

/// Новый экземпляр на каждый запрос
pub struct TransientLifestyle;

impl LifestyleManager for TransientLifestyle {
    fn name(&self) -> &str {
        "transient"
    }

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        let burden = handler.activator().create(handler, context)?;
        if context.is_root_request() {
            track_instance(context.policy(), &burden)?;
        }
        trace!(component = handler.name(), root = context.is_root_request(), "transient instance created");
        Ok(burden)
    }

    fn release(&self, burden: &Burden, _reason: ReleaseReason) -> bool {
        burden.teardown()
    }

    fn dispose(&self) {}
}
