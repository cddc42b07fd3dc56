use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::activator::ComponentActivator;
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::description::{ComponentDescription, DependencySlot};
use crate::errors::{KernelError, KernelResult};
use crate::lifestyle::LifestyleManager;
use crate::resolver::ResolverChain;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Состояние готовности компонента
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
    Initializing,
    WaitingForDependencies,
    Valid,
}

/// Обязательный слот, который сейчас не может удовлетворить ни один resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub slot: String,
    pub service: String,
    pub name_hint: Option<String>,
}

impl MissingDependency {
    fn from_slot(slot: &DependencySlot) -> Self {
        Self {
            slot: slot.key().to_string(),
            service: slot.target().name().to_string(),
            name_hint: slot.name_hint().map(str::to_string),
        }
    }
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.slot, self.service)?;
        if let Some(name) = &self.name_hint {
            write!(f, " (named '{}')", name)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HandlerStatus {
    state: HandlerState,
    missing: Vec<MissingDependency>,
}

/// Per-component state machine: хранит описание, решает, удовлетворим ли
/// компонент, и передаёт запросы resolve своему lifestyle manager.
pub struct Handler {
    id: u64,
    description: Arc<ComponentDescription>,
    lifestyle: Arc<dyn LifestyleManager>,
    activator: Arc<dyn ComponentActivator>,
    status: RwLock<HandlerStatus>,
    retired: AtomicBool,
}

impl Handler {
    pub(crate) fn new(
        description: Arc<ComponentDescription>,
        lifestyle: Arc<dyn LifestyleManager>,
        activator: Arc<dyn ComponentActivator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed),
            description,
            lifestyle,
            activator,
            status: RwLock::new(HandlerStatus {
                state: HandlerState::Initializing,
                missing: Vec::new(),
            }),
            retired: AtomicBool::new(false),
        })
    }

    /// Уникальный в процессе идентификатор (используется как ключ кэшей scope)
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.description.name()
    }

    pub fn description(&self) -> &Arc<ComponentDescription> {
        &self.description
    }

    pub fn lifestyle(&self) -> &Arc<dyn LifestyleManager> {
        &self.lifestyle
    }

    pub fn activator(&self) -> &Arc<dyn ComponentActivator> {
        &self.activator
    }

    pub fn state(&self) -> HandlerState {
        self.status.read().state
    }

    pub fn is_valid(&self) -> bool {
        self.state() == HandlerState::Valid
    }

    pub fn missing_dependencies(&self) -> Vec<MissingDependency> {
        self.status.read().missing.clone()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Обязательные слоты, не удовлетворимые в `context`: слоты лучшего
    /// конструктора (с наименьшим числом пропусков) и обязательные свойства
    fn unsatisfied(&self, context: &CreationContext<'_>, chain: &ResolverChain) -> Vec<MissingDependency> {
        let description = &self.description;
        let unsatisfied = |slots: &[DependencySlot]| -> Vec<MissingDependency> {
            slots
                .iter()
                .filter(|slot| !slot.is_optional() && !chain.can_resolve(context, description, slot))
                .map(MissingDependency::from_slot)
                .collect()
        };

        let mut best: Option<Vec<MissingDependency>> = None;
        for constructor in description.constructors() {
            let missing = unsatisfied(constructor.slots());
            let satisfied = missing.is_empty();
            if best.as_ref().map_or(true, |current| missing.len() < current.len()) {
                best = Some(missing);
            }
            if satisfied {
                break;
            }
        }

        let mut missing = best.unwrap_or_default();
        missing.extend(unsatisfied(description.properties()));
        missing
    }

    /// Статическая проверка удовлетворимости (probe без побочных эффектов).
    ///
    /// Компонент валиден, если хотя бы один конструктор и все обязательные
    /// свойства удовлетворимы. Возвращает переход состояния, если он был.
    pub(crate) fn evaluate(
        &self,
        probe: &CreationContext<'_>,
        chain: &ResolverChain,
    ) -> Option<(HandlerState, HandlerState)> {
        let missing = self.unsatisfied(probe, chain);
        let next = if missing.is_empty() {
            HandlerState::Valid
        } else {
            HandlerState::WaitingForDependencies
        };

        let mut status = self.status.write();
        let previous = status.state;
        status.state = next;
        status.missing = missing;
        drop(status);

        if previous == next {
            return None;
        }
        match next {
            HandlerState::Valid => info!(component = self.name(), from = ?previous, "component is ready"),
            _ => debug!(
                component = self.name(),
                from = ?previous,
                missing = ?self.missing_dependencies(),
                "component is waiting for dependencies"
            ),
        }
        Some((previous, next))
    }

    /// Невалидный handler всё же можно разрешить, если недостающие слоты
    /// закрывают inline аргументы именно этого вызова
    fn ensure_resolvable(&self, context: &CreationContext<'_>) -> KernelResult<()> {
        let missing = {
            let status = self.status.read();
            if status.state == HandlerState::Valid {
                return Ok(());
            }
            status.missing.clone()
        };

        if context.arguments().is_some() && self.unsatisfied(context, context.resolvers()).is_empty() {
            debug!(component = self.name(), "inline arguments satisfy missing dependencies");
            return Ok(());
        }

        Err(KernelError::HandlerNotValid {
            component: self.name().to_string(),
            missing,
        })
    }

    /// Разрешить экземпляр через lifestyle manager
    pub fn resolve(self: &Arc<Self>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        context.enter(self.name())?;
        let result = self
            .ensure_resolvable(context)
            .and_then(|()| self.lifestyle.resolve(self, context));
        context.leave();
        result
    }

    /// Вывести handler из обращения (unregister/replace): lifestyle
    /// уничтожает всё, чем ещё владеет
    pub(crate) fn retire(&self) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lifestyle.dispose();
        debug!(component = self.name(), "handler retired");
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .field("retired", &self.is_retired())
            .finish()
    }
}
