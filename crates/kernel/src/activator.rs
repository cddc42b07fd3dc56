use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::arguments::ConstructionArguments;
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::description::{ComponentDescription, Constructor, DependencySlot};
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::types::{Instance, InstanceId, ServiceType, ServiceValue};

/// Создание и уничтожение экземпляров одного компонента
pub trait ComponentActivator: Send + Sync {
    /// Построить экземпляр со всеми зависимостями; зависимости уже приняты
    /// во владение возвращённым burden
    fn create(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>>;

    /// Decommission hooks. Ошибки логируются и не поднимаются.
    fn destroy(&self, burden: &Burden);
}

/// Activator по описанию компонента: выбор конструктора, разрешение слотов
/// через цепочку resolver'ов, commission hooks, декораторы
pub struct DefaultActivator {
    description: Arc<ComponentDescription>,
}

impl DefaultActivator {
    pub fn new(description: Arc<ComponentDescription>) -> Self {
        Self { description }
    }

    /// Самый "жадный" конструктор, все обязательные слоты которого разрешимы
    /// сейчас; при равенстве побеждает объявленный раньше. Описание уже хранит
    /// конструкторы в этом порядке.
    fn select_constructor(&self, context: &CreationContext<'_>) -> KernelResult<&Constructor> {
        let chain = context.resolvers();
        self.description
            .constructors()
            .iter()
            .find(|constructor| {
                constructor
                    .slots()
                    .iter()
                    .all(|slot| slot.is_optional() || chain.can_resolve(context, &self.description, slot))
            })
            .ok_or_else(|| {
                KernelError::resolution(
                    self.description.name(),
                    "<constructor>",
                    "no constructor has all required dependencies available",
                )
            })
    }

    fn resolve_slot(
        &self,
        context: &mut CreationContext<'_>,
        slot: &DependencySlot,
        pending: &mut Vec<Arc<Burden>>,
    ) -> KernelResult<Option<ServiceValue>> {
        let name = self.description.name();
        match context.resolvers().resolve(context, &self.description, slot) {
            Ok(Some(resolved)) => {
                pending.extend(resolved.burdens);
                Ok(Some(resolved.value))
            }
            Ok(None) if slot.is_optional() => Ok(None),
            Ok(None) => Err(KernelError::resolution(
                name,
                slot.key(),
                format!("no resolver can provide {}", slot.target()),
            )),
            Err(error @ KernelError::CircularDependency { .. }) => Err(error),
            Err(error) if slot.is_optional() => {
                trace!(component = name, slot = slot.key(), error = %error, "optional slot skipped");
                Ok(None)
            }
            Err(error) if error.is_wrapped_by_slot() => Err(KernelError::slot_failed(name, slot.key(), error)),
            Err(error) => Err(error),
        }
    }

    fn build(
        &self,
        handler: &Arc<Handler>,
        context: &mut CreationContext<'_>,
        pending: &mut Vec<Arc<Burden>>,
    ) -> KernelResult<Arc<Burden>> {
        let name = self.description.name();
        let constructor = self.select_constructor(context)?;

        let mut values = HashMap::new();
        for slot in constructor.slots().iter().chain(self.description.properties()) {
            if let Some(value) = self.resolve_slot(context, slot, pending)? {
                values.insert(slot.key().to_string(), value);
            }
        }

        let arguments = ConstructionArguments::new(name, values);
        let raw = constructor
            .activate(&arguments)
            .map_err(|error| KernelError::activation(name, error))?;

        for (index, hook) in self.description.commission_hooks().iter().enumerate() {
            if let Err(error) = hook(&raw) {
                // Уже отработавшие commission hooks получают парный decommission
                if index > 0 {
                    self.decommission(&raw);
                }
                return Err(KernelError::activation(name, error.context("commission hook failed")));
            }
        }

        let views = match self.views(&raw) {
            Ok(views) => views,
            Err(error) => {
                self.decommission(&raw);
                return Err(error);
            }
        };

        let dependents = std::mem::take(pending);
        let count = dependents.len();
        let burden = Burden::new(handler.clone(), raw, views, dependents);
        debug!(component = name, dependencies = count, "instance activated");
        Ok(burden)
    }

    /// Views экземпляра для каждого сервиса (с декораторами)
    fn views(&self, raw: &Instance) -> KernelResult<Vec<(ServiceType, ServiceValue, InstanceId)>> {
        let name = self.description.name();
        let mut views = Vec::with_capacity(self.description.services().len());
        for binding in self.description.services() {
            let service = binding.service();
            match binding.view(name, raw) {
                Ok(Some((value, id))) => views.push((service, value, id)),
                Ok(None) => {
                    return Err(KernelError::TypeMismatch {
                        component: name.to_string(),
                        requested: service.name().to_string(),
                    })
                }
                Err(error) => return Err(KernelError::activation(name, error.context("decorator failed"))),
            }
        }
        Ok(views)
    }

    fn decommission(&self, instance: &Instance) {
        for hook in self.description.decommission_hooks() {
            if let Err(error) = hook(instance) {
                warn!(component = self.description.name(), error = %error, "decommission hook failed");
            }
        }
    }
}

impl ComponentActivator for DefaultActivator {
    fn create(&self, handler: &Arc<Handler>, context: &mut CreationContext<'_>) -> KernelResult<Arc<Burden>> {
        let mut pending = Vec::new();
        let result = self.build(handler, context, &mut pending);
        if result.is_err() {
            // Частично построенный граф не должен утечь
            Burden::release_dependents(pending);
        }
        result
    }

    fn destroy(&self, burden: &Burden) {
        self.decommission(burden.instance());
    }
}
