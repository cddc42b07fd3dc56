//! Ошибки kernel.
//!
//! Все операции регистрации и разрешения возвращают `KernelResult<T>`.
//! Ошибки release никогда не поднимаются к вызывающему: они логируются
//! (`tracing::warn!`) и teardown продолжается.
//!
//! # Категории
//!
//! - **registry**: `DuplicateName`, `RegistryFull`, `InvalidDescription`
//! - **resolution**: `ComponentNotFound`, `HandlerNotValid`, `DependencyResolution`,
//!   `CircularDependency`, `DepthExceeded`, `TypeMismatch`
//! - **lifestyle**: `NoActiveScope`, `PoolExhausted`, `Activation`
//! - **ownership**: `AlreadyTracked` (ошибка программиста в lifestyle manager)
//! - **configuration** / **lifecycle**: `Configuration`, `Disposed`
//!
//! `KernelError` реализует `std::error::Error`, поэтому `?` конвертирует его в
//! `anyhow::Error` без дополнительного кода.

use thiserror::Error;

use crate::handler::MissingDependency;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("component name '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("no component found for service {service}{}", describe_name(.name))]
    ComponentNotFound { service: String, name: Option<String> },

    #[error("component '{component}' is waiting for dependencies: {}", describe_missing(.missing))]
    HandlerNotValid {
        component: String,
        missing: Vec<MissingDependency>,
    },

    #[error("could not resolve dependency '{slot}' of component '{component}': {reason}")]
    DependencyResolution {
        component: String,
        slot: String,
        reason: String,
        /// Ошибка вложенного разрешения, если слот упал на ней
        #[source]
        cause: Option<Box<KernelError>>,
    },

    #[error("circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("resolution depth limit {limit} exceeded while resolving '{component}'")]
    DepthExceeded { component: String, limit: usize },

    #[error("component '{component}' does not provide service {requested}")]
    TypeMismatch { component: String, requested: String },

    #[error("component '{component}' is scoped but no scope is active")]
    NoActiveScope { component: String },

    #[error("instance {instance} of component '{component}' is already tracked")]
    AlreadyTracked { component: String, instance: String },

    #[error("pool of component '{component}' is exhausted ({max} instances in use)")]
    PoolExhausted { component: String, max: usize },

    #[error("component '{component}' failed to activate")]
    Activation {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("registry limit of {limit} components reached")]
    RegistryFull { limit: usize },

    #[error("invalid component description '{component}': {reason}")]
    InvalidDescription { component: String, reason: String },

    #[error("configuration error in '{field}': {message}")]
    Configuration { field: String, message: String },

    #[error("kernel has been disposed")]
    Disposed,
}

fn describe_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" named '{}'", name),
        None => String::new(),
    }
}

fn describe_missing(missing: &[MissingDependency]) -> String {
    if missing.is_empty() {
        return "none recorded".to_string();
    }
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl KernelError {
    pub fn not_found(service: impl Into<String>, name: Option<&str>) -> Self {
        Self::ComponentNotFound {
            service: service.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn resolution(component: impl Into<String>, slot: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyResolution {
            component: component.into(),
            slot: slot.into(),
            reason: reason.into(),
            cause: None,
        }
    }

    /// Обязательный слот не разрешился из-за вложенной ошибки `cause`
    pub fn slot_failed(component: impl Into<String>, slot: impl Into<String>, cause: KernelError) -> Self {
        Self::DependencyResolution {
            component: component.into(),
            slot: slot.into(),
            reason: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Вложенная ошибка, на которой упал слот (`None` для прочих вариантов)
    pub fn slot_cause(&self) -> Option<&KernelError> {
        match self {
            Self::DependencyResolution { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    pub fn activation(component: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Activation {
            component: component.into(),
            source,
        }
    }

    pub fn invalid_description(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescription {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Категория ошибки для логов и метрик
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } | Self::RegistryFull { .. } | Self::InvalidDescription { .. } => "registry",
            Self::ComponentNotFound { .. }
            | Self::HandlerNotValid { .. }
            | Self::DependencyResolution { .. }
            | Self::CircularDependency { .. }
            | Self::DepthExceeded { .. }
            | Self::TypeMismatch { .. } => "resolution",
            Self::NoActiveScope { .. } | Self::PoolExhausted { .. } | Self::Activation { .. } => "lifestyle",
            Self::AlreadyTracked { .. } => "ownership",
            Self::Configuration { .. } => "configuration",
            Self::Disposed => "lifecycle",
        }
    }

    /// Может ли повторный вызов той же операции завершиться успешно без
    /// изменения конфигурации kernel
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::NoActiveScope { .. } | Self::Activation { .. }
        )
    }

    /// Ошибки, которые activator заворачивает в `DependencyResolution`
    /// при разрешении обязательного слота. Остальные пробрасываются как есть.
    pub(crate) fn is_wrapped_by_slot(&self) -> bool {
        matches!(
            self,
            Self::ComponentNotFound { .. }
                | Self::HandlerNotValid { .. }
                | Self::TypeMismatch { .. }
                | Self::DependencyResolution { .. }
        )
    }
}
