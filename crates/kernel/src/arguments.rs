use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{downcast_service, service_value, ServiceType, ServiceValue};

/// Inline аргументы одного вызова `resolve`: по ключу слота или по типу
#[derive(Clone, Default)]
pub struct Arguments {
    named: HashMap<String, (ServiceType, ServiceValue)>,
    typed: HashMap<ServiceType, ServiceValue>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Значение для слота с ключом `key`
    pub fn with<S: ?Sized + Send + Sync + 'static>(mut self, key: impl Into<String>, value: Arc<S>) -> Self {
        self.named
            .insert(key.into(), (ServiceType::of::<S>(), service_value(value)));
        self
    }

    /// Удобная форма `with` для владеющих значений
    pub fn with_value<T: Send + Sync + 'static>(self, key: impl Into<String>, value: T) -> Self {
        self.with(key, Arc::new(value))
    }

    /// Значение для любого слота с целевым типом `S`
    pub fn with_typed<S: ?Sized + Send + Sync + 'static>(mut self, value: Arc<S>) -> Self {
        self.typed.insert(ServiceType::of::<S>(), service_value(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.typed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.typed.len()
    }

    /// Значение для слота: сначала по ключу (при совпадении типа), затем по типу
    pub(crate) fn lookup(&self, key: &str, target: &ServiceType) -> Option<&ServiceValue> {
        match self.named.get(key) {
            Some((service, value)) if service == target => Some(value),
            _ => self.typed.get(target),
        }
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arguments")
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .field("typed", &self.typed.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Разрешённые значения слотов, передаваемые фабрике компонента
pub struct ConstructionArguments {
    component: String,
    values: HashMap<String, ServiceValue>,
}

impl ConstructionArguments {
    pub(crate) fn new(component: impl Into<String>, values: HashMap<String, ServiceValue>) -> Self {
        Self {
            component: component.into(),
            values,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Обязательное значение слота
    pub fn get<S: ?Sized + Send + Sync + 'static>(&self, key: &str) -> anyhow::Result<Arc<S>> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| anyhow!("slot '{}' of component '{}' was not resolved", key, self.component))?;
        downcast_service::<S>(value).ok_or_else(|| {
            anyhow!(
                "slot '{}' of component '{}' does not hold {}",
                key,
                self.component,
                std::any::type_name::<S>()
            )
        })
    }

    /// Значение необязательного слота или свойства
    pub fn optional<S: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Option<Arc<S>> {
        self.values.get(key).and_then(downcast_service::<S>)
    }

    /// Коллекция из слота `DependencySlot::many`
    pub fn many<S: ?Sized + Send + Sync + 'static>(&self, key: &str) -> anyhow::Result<Vec<Arc<S>>> {
        Ok(self.get::<Vec<Arc<S>>>(key)?.as_ref().clone())
    }

    /// Клон значения конфигурационного параметра
    pub fn value<T: Clone + Send + Sync + 'static>(&self, key: &str) -> anyhow::Result<T> {
        Ok(self.get::<T>(key)?.as_ref().clone())
    }
}
