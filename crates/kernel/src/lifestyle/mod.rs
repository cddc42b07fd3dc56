//! Lifestyle managers: когда создавать экземпляр, сколько ему жить и что
//! делать при release.
//!
//! Каждый handler получает собственный manager. Manager создаёт экземпляры
//! через activator handler'а и сам решает, в какой ledger их учесть:
//!
//! - `Transient` / `Pooled` учитывают только корневой экземпляр запроса
//!   (зависимостями владеет родительский burden);
//! - `Singleton` / `PerThread` учитывают в ledger контейнера;
//! - `Scoped` учитывает в ledger scope.

use std::fmt;
use std::sync::Arc;

use crate::burden::Burden;
use crate::config::KernelConfig;
use crate::context::CreationContext;
use crate::description::ComponentDescription;
use crate::errors::KernelResult;
use crate::handler::Handler;
use crate::release_policy::ReleasePolicy;
use crate::scope::ScopeAccessor;

mod per_thread;
mod pooled;
mod scoped;
mod singleton;
mod transient;

pub use per_thread::PerThreadLifestyle;
pub use pooled::{PoolExhaustion, PoolSettings, PooledLifestyle};
pub use scoped::ScopedLifestyle;
pub use singleton::SingletonLifestyle;
pub use transient::TransientLifestyle;

/// Почему burden отпускается
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseReason {
    /// `Kernel::release` от вызывающего кода
    Explicit,
    /// Владелец-родитель уничтожен
    OwnerReleased,
    /// Scope, в котором экземпляр учтён, завершился
    ScopeEnded,
    /// Disposal kernel
    Disposal,
}

impl ReleaseReason {
    /// Форсированные причины доходят до lifestyle независимо от числа владельцев
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::ScopeEnded | Self::Disposal)
    }
}

/// Политика времени жизни одного компонента
pub trait LifestyleManager: Send + Sync {
    fn name(&self) -> &str;

    /// Вызывается один раз при регистрации handler
    fn init(&self, _description: &ComponentDescription, _container_policy: &Arc<ReleasePolicy>) {}

    fn resolve(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>>;

    /// true, если этот вызов уничтожил экземпляр
    fn release(&self, burden: &Burden, reason: ReleaseReason) -> bool;

    /// Уничтожить всё, чем manager ещё владеет
    fn dispose(&self);
}

/// Фабрика пользовательских lifestyle: по manager на handler
pub trait LifestyleFactory: Send + Sync {
    fn create(&self, description: &ComponentDescription) -> Arc<dyn LifestyleManager>;
}

impl<F> LifestyleFactory for F
where
    F: Fn(&ComponentDescription) -> Arc<dyn LifestyleManager> + Send + Sync,
{
    fn create(&self, description: &ComponentDescription) -> Arc<dyn LifestyleManager> {
        self(description)
    }
}

/// Откуда scoped lifestyle берёт текущий scope
#[derive(Clone)]
pub enum ScopeKind {
    /// Явный scope запроса, иначе thread-ambient scope этого kernel
    Ambient,
    Accessor(Arc<dyn ScopeAccessor>),
}

impl fmt::Debug for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambient => f.write_str("Ambient"),
            Self::Accessor(_) => f.write_str("Accessor(..)"),
        }
    }
}

#[derive(Clone, Default)]
pub enum LifestyleKind {
    #[default]
    Singleton,
    Transient,
    Scoped(ScopeKind),
    Pooled(PoolSettings),
    PerThread,
    Custom(Arc<dyn LifestyleFactory>),
}

impl LifestyleKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::Transient => "transient",
            Self::Scoped(_) => "scoped",
            Self::Pooled(_) => "pooled",
            Self::PerThread => "per-thread",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for LifestyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => f.write_str("Singleton"),
            Self::Transient => f.write_str("Transient"),
            Self::Scoped(kind) => f.debug_tuple("Scoped").field(kind).finish(),
            Self::Pooled(settings) => f.debug_tuple("Pooled").field(settings).finish(),
            Self::PerThread => f.write_str("PerThread"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub(crate) fn build_manager(
    kind: &LifestyleKind,
    description: &ComponentDescription,
    config: &KernelConfig,
) -> Arc<dyn LifestyleManager> {
    match kind {
        LifestyleKind::Singleton => Arc::new(SingletonLifestyle::new()),
        LifestyleKind::Transient => Arc::new(TransientLifestyle),
        LifestyleKind::Scoped(scope) => Arc::new(ScopedLifestyle::new(scope.clone())),
        LifestyleKind::Pooled(settings) => Arc::new(PooledLifestyle::new(
            settings.clone(),
            settings.exhaustion.unwrap_or(config.pool.exhaustion),
        )),
        LifestyleKind::PerThread => Arc::new(PerThreadLifestyle::new()),
        LifestyleKind::Custom(factory) => factory.create(description),
    }
}

/// Учесть экземпляр в ledger; при отказе экземпляр уничтожается
pub fn track_instance(policy: &ReleasePolicy, burden: &Arc<Burden>) -> KernelResult<()> {
    if let Err(error) = policy.track(burden) {
        burden.teardown();
        return Err(error);
    }
    Ok(())
}
