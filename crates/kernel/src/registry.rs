//! Component registry: handlers по имени и по сервису.
//!
//! Registry хранит только индексы. Изменения регистрации публикуются в
//! очередь событий, которую kernel разбирает после снятия блокировки и
//! пересчитывает состояние handler'ов.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::types::ServiceType;

/// Конфигурация registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Максимальное количество зарегистрированных компонентов
    pub max_registrations: usize,
    /// Подробное логирование регистраций
    pub verbose_logging: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_registrations: 10_000,
            verbose_logging: cfg!(debug_assertions),
        }
    }
}

impl RegistryConfig {
    pub fn production() -> Self {
        Self {
            max_registrations: 50_000,
            verbose_logging: false,
        }
    }

    pub fn development() -> Self {
        Self {
            max_registrations: 5_000,
            verbose_logging: true,
        }
    }

    pub fn minimal() -> Self {
        Self {
            max_registrations: 100,
            verbose_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { name: String },
    Unregistered { name: String },
}

#[derive(Default)]
struct RegistryState {
    handlers: Vec<Arc<Handler>>,
    by_name: HashMap<String, Arc<Handler>>,
    by_service: HashMap<ServiceType, Vec<Arc<Handler>>>,
}

impl RegistryState {
    fn insert(&mut self, handler: Arc<Handler>) {
        for binding in handler.description().services() {
            self.by_service
                .entry(binding.service())
                .or_default()
                .push(handler.clone());
        }
        self.by_name.insert(handler.name().to_string(), handler.clone());
        self.handlers.push(handler);
    }

    fn remove(&mut self, name: &str) -> Option<Arc<Handler>> {
        let handler = self.by_name.remove(name)?;
        self.handlers.retain(|candidate| !Arc::ptr_eq(candidate, &handler));
        self.by_service.retain(|_, handlers| {
            handlers.retain(|candidate| !Arc::ptr_eq(candidate, &handler));
            !handlers.is_empty()
        });
        Some(handler)
    }
}

pub struct ComponentRegistry {
    state: RwLock<RegistryState>,
    events: Mutex<VecDeque<RegistryEvent>>,
    config: RegistryConfig,
}

impl ComponentRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn register(&self, handler: Arc<Handler>) -> KernelResult<()> {
        let name = handler.name().to_string();
        {
            let mut state = self.state.write();
            if state.by_name.contains_key(&name) {
                return Err(KernelError::DuplicateName { name });
            }
            if state.handlers.len() >= self.config.max_registrations {
                return Err(KernelError::RegistryFull {
                    limit: self.config.max_registrations,
                });
            }
            state.insert(handler.clone());
        }

        if self.config.verbose_logging {
            info!(
                component = %name,
                implementation = handler.description().implementation(),
                lifestyle = handler.description().lifestyle().name(),
                "component registered"
            );
        } else {
            debug!(component = %name, "component registered");
        }
        self.events.lock().push_back(RegistryEvent::Registered { name });
        Ok(())
    }

    /// Удалить компонент; неизвестное имя не ошибка
    pub fn unregister(&self, name: &str) -> Option<Arc<Handler>> {
        let removed = self.state.write().remove(name);
        if removed.is_some() {
            debug!(component = name, "component unregistered");
            self.events.lock().push_back(RegistryEvent::Unregistered {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Атомарно заменить handler с тем же именем; возвращает прежний
    pub fn replace(&self, handler: Arc<Handler>) -> KernelResult<Option<Arc<Handler>>> {
        let name = handler.name().to_string();
        let previous = {
            let mut state = self.state.write();
            let previous = state.remove(&name);
            if previous.is_none() && state.handlers.len() >= self.config.max_registrations {
                return Err(KernelError::RegistryFull {
                    limit: self.config.max_registrations,
                });
            }
            state.insert(handler);
            previous
        };

        let mut events = self.events.lock();
        if previous.is_some() {
            events.push_back(RegistryEvent::Unregistered { name: name.clone() });
        }
        events.push_back(RegistryEvent::Registered { name: name.clone() });
        drop(events);

        debug!(component = %name, replaced = previous.is_some(), "component replaced");
        Ok(previous)
    }

    /// Handlers сервиса в порядке регистрации
    pub fn find_by_service(&self, service: &ServiceType) -> Vec<Arc<Handler>> {
        self.state
            .read()
            .by_service
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Handler>> {
        self.state.read().by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().by_name.contains_key(name)
    }

    /// Все handlers в порядке регистрации
    pub fn handlers(&self) -> Vec<Arc<Handler>> {
        self.state.read().handlers.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().handlers.is_empty()
    }

    pub fn drain_events(&self) -> Vec<RegistryEvent> {
        self.events.lock().drain(..).collect()
    }

    /// Снять все handlers (disposal kernel)
    pub(crate) fn clear(&self) -> Vec<Arc<Handler>> {
        let state = std::mem::take(&mut *self.state.write());
        self.events.lock().clear();
        state.handlers
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
