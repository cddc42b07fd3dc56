use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::burden::Burden;
use crate::context::CreationContext;
use crate::description::{Cardinality, ComponentDescription, DependencySlot};
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::types::{service_value, ServiceValue};

/// Значение, которым resolver удовлетворил слот, и burden'ы экземпляров,
/// созданных для него (их принимает во владение создаваемый компонент)
pub struct ResolvedDependency {
    pub value: ServiceValue,
    pub burdens: Vec<Arc<Burden>>,
}

impl ResolvedDependency {
    /// Значение без ownership record (аргумент, конфигурация)
    pub fn value(value: ServiceValue) -> Self {
        Self {
            value,
            burdens: Vec::new(),
        }
    }

    /// Типизированное значение для слота с целевым типом `S`
    pub fn of<S: ?Sized + Send + Sync + 'static>(value: Arc<S>) -> Self {
        Self::value(service_value(value))
    }

    pub fn owned(value: ServiceValue, burden: Arc<Burden>) -> Self {
        Self {
            value,
            burdens: vec![burden],
        }
    }
}

/// Стратегия разрешения одного слота.
///
/// `can_resolve` вызывается и в статической проверке handler (контекст в
/// режиме probe), поэтому не должна иметь побочных эффектов.
pub trait DependencyResolver: Send + Sync {
    fn name(&self) -> &str;

    fn can_resolve(&self, context: &CreationContext<'_>, owner: &ComponentDescription, slot: &DependencySlot) -> bool;

    fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency>;
}

/// Позиция новой стратегии в цепочке
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPriority {
    First,
    Last,
    At(usize),
}

/// Упорядоченная цепочка стратегий; первая, ответившая `can_resolve`, разрешает
pub struct ResolverChain {
    resolvers: RwLock<Vec<Arc<dyn DependencyResolver>>>,
}

impl ResolverChain {
    pub fn empty() -> Self {
        Self {
            resolvers: RwLock::new(Vec::new()),
        }
    }

    /// Inline аргументы → конфигурация → коллекции → компоненты
    pub fn with_defaults() -> Self {
        let chain = Self::empty();
        chain.add(Arc::new(InlineArgumentResolver), ResolverPriority::Last);
        chain.add(Arc::new(ConfigurationValueResolver), ResolverPriority::Last);
        chain.add(Arc::new(CollectionResolver), ResolverPriority::Last);
        chain.add(Arc::new(ComponentResolver), ResolverPriority::Last);
        chain
    }

    pub fn add(&self, resolver: Arc<dyn DependencyResolver>, priority: ResolverPriority) {
        let mut resolvers = self.resolvers.write();
        let index = match priority {
            ResolverPriority::First => 0,
            ResolverPriority::Last => resolvers.len(),
            ResolverPriority::At(index) => index.min(resolvers.len()),
        };
        debug!(resolver = resolver.name(), index, "resolver added to chain");
        resolvers.insert(index, resolver);
    }

    pub fn names(&self) -> Vec<String> {
        self.resolvers.read().iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.read().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn DependencyResolver>> {
        self.resolvers.read().clone()
    }

    /// Цепочка меняется только под write-блокировкой kernel, поэтому
    /// рекурсивное чтение здесь не ждёт писателя
    pub fn can_resolve(&self, context: &CreationContext<'_>, owner: &ComponentDescription, slot: &DependencySlot) -> bool {
        self.resolvers
            .read_recursive()
            .iter()
            .any(|resolver| resolver.can_resolve(context, owner, slot))
    }

    fn select(
        &self,
        context: &CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> Option<Arc<dyn DependencyResolver>> {
        self.resolvers
            .read_recursive()
            .iter()
            .find(|resolver| resolver.can_resolve(context, owner, slot))
            .cloned()
    }

    /// `Ok(None)`, если ни одна стратегия не взялась за слот
    pub fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<Option<ResolvedDependency>> {
        match self.select(context, owner, slot) {
            Some(resolver) => {
                trace!(component = owner.name(), slot = slot.key(), resolver = resolver.name(), "resolving slot");
                resolver.resolve(context, owner, slot).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Inline аргументы текущего вызова resolve
pub struct InlineArgumentResolver;

impl DependencyResolver for InlineArgumentResolver {
    fn name(&self) -> &str {
        "inline-arguments"
    }

    fn can_resolve(&self, context: &CreationContext<'_>, _owner: &ComponentDescription, slot: &DependencySlot) -> bool {
        slot.cardinality() == Cardinality::Single
            && context
                .arguments()
                .is_some_and(|arguments| arguments.lookup(slot.key(), &slot.target()).is_some())
    }

    fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency> {
        context
            .arguments()
            .and_then(|arguments| arguments.lookup(slot.key(), &slot.target()))
            .cloned()
            .map(ResolvedDependency::value)
            .ok_or_else(|| KernelError::resolution(owner.name(), slot.key(), "inline argument disappeared"))
    }
}

/// Параметры компонента, затем параметры kernel; значение приводится к типу
/// слота через serde
pub struct ConfigurationValueResolver;

impl ConfigurationValueResolver {
    fn lookup(context: &CreationContext<'_>, owner: &ComponentDescription, slot: &DependencySlot) -> Option<serde_json::Value> {
        owner
            .parameter(slot.key())
            .cloned()
            .or_else(|| context.parameter(slot.key()))
    }
}

impl DependencyResolver for ConfigurationValueResolver {
    fn name(&self) -> &str {
        "configuration"
    }

    fn can_resolve(&self, context: &CreationContext<'_>, owner: &ComponentDescription, slot: &DependencySlot) -> bool {
        slot.accepts_configuration() && Self::lookup(context, owner, slot).is_some()
    }

    fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency> {
        let raw = Self::lookup(context, owner, slot)
            .ok_or_else(|| KernelError::resolution(owner.name(), slot.key(), "configuration value is missing"))?;
        match slot.convert(&raw) {
            Some(Ok(value)) => Ok(ResolvedDependency::value(value)),
            Some(Err(error)) => Err(KernelError::resolution(
                owner.name(),
                slot.key(),
                format!("cannot convert {} to {}: {}", raw, slot.target(), error),
            )),
            None => Err(KernelError::resolution(owner.name(), slot.key(), "slot does not accept configuration")),
        }
    }
}

/// Все валидные компоненты сервиса для слотов `DependencySlot::many`
pub struct CollectionResolver;

impl DependencyResolver for CollectionResolver {
    fn name(&self) -> &str {
        "collection"
    }

    fn can_resolve(&self, _context: &CreationContext<'_>, _owner: &ComponentDescription, slot: &DependencySlot) -> bool {
        slot.cardinality() == Cardinality::Many
    }

    fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency> {
        let target = slot.target();
        let handlers: Vec<Arc<Handler>> = context
            .handlers_for(&target)
            .into_iter()
            .filter(|handler| handler.is_valid() && !context.is_resolving(handler.name()))
            .collect();

        let mut values = Vec::with_capacity(handlers.len());
        let mut burdens = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let burden = match context.resolve_handler(&handler) {
                Ok(burden) => burden,
                Err(error) => {
                    // Уже созданные элементы коллекции не должны утечь
                    Burden::release_dependents(burdens);
                    return Err(error);
                }
            };
            match burden.view(&target) {
                Some(value) => values.push(value),
                None => {
                    Burden::release_dependents(burdens);
                    return Err(KernelError::TypeMismatch {
                        component: handler.name().to_string(),
                        requested: target.name().to_string(),
                    });
                }
            }
            burden.acquire();
            burdens.push(burden);
        }

        let count = values.len();
        let value = slot
            .collect(values)
            .ok_or_else(|| KernelError::resolution(owner.name(), slot.key(), "slot is not a collection"))?;
        debug!(component = owner.name(), slot = slot.key(), count, "collection resolved");
        Ok(ResolvedDependency { value, burdens })
    }
}

/// Другой зарегистрированный компонент: по имени из подсказки слота или по типу
pub struct ComponentResolver;

impl ComponentResolver {
    /// Handler для слота по типу: валидный и не находящийся на пути создания;
    /// если подходят только компоненты с пути, берём первый, чтобы защита от
    /// циклов сообщила о цикле
    fn select(context: &CreationContext<'_>, slot: &DependencySlot) -> Option<Arc<Handler>> {
        if let Some(name) = slot.name_hint() {
            return context
                .handler_named(name)
                .filter(|handler| handler.description().provides(&slot.target()));
        }

        let candidates = context.handlers_for(&slot.target());
        candidates
            .iter()
            .find(|handler| handler.is_valid() && !context.is_resolving(handler.name()))
            .or_else(|| candidates.iter().find(|handler| handler.is_valid()))
            .or_else(|| candidates.first())
            .cloned()
    }
}

impl DependencyResolver for ComponentResolver {
    fn name(&self) -> &str {
        "component"
    }

    fn can_resolve(&self, context: &CreationContext<'_>, _owner: &ComponentDescription, slot: &DependencySlot) -> bool {
        slot.cardinality() == Cardinality::Single && Self::select(context, slot).is_some()
    }

    fn resolve(
        &self,
        context: &mut CreationContext<'_>,
        owner: &ComponentDescription,
        slot: &DependencySlot,
    ) -> KernelResult<ResolvedDependency> {
        let target = slot.target();
        let handler = Self::select(context, slot)
            .ok_or_else(|| KernelError::not_found(target.name(), slot.name_hint()))?;

        let burden = context.resolve_handler(&handler)?;
        let value = burden.view(&target).ok_or_else(|| KernelError::TypeMismatch {
            component: handler.name().to_string(),
            requested: target.name().to_string(),
        })?;
        burden.acquire();
        trace!(component = owner.name(), slot = slot.key(), dependency = handler.name(), "slot bound to component");
        Ok(ResolvedDependency::owned(value, burden))
    }
}
