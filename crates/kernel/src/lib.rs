//! Inversion-of-control kernel.
//!
//! Компоненты описываются через `Component<I>` (сервисы, конструкторы со
//! слотами зависимостей, lifestyle, hooks) и регистрируются в `Kernel`.
//! Kernel разрешает сервисы по типу или имени, ведёт учёт созданных
//! экземпляров и уничтожает их при release, завершении scope или disposal.
//!
//! ```ignore
//! let kernel = Kernel::new();
//! kernel.register(
//!     Component::<ConsoleLogger>::named("logger")
//!         .service::<dyn Logger>(|logger| logger)
//!         .factory(|| Ok(ConsoleLogger::default()))
//!         .build(),
//! )?;
//! let logger = kernel.resolve::<dyn Logger>()?;
//! ```

pub mod activator;
pub mod arguments;
pub mod burden;
pub mod config;
pub mod context;
pub mod description;
pub mod diagnostics;
pub mod errors;
pub mod handler;
pub mod kernel;
pub mod lifestyle;
pub mod metrics;
pub mod registry;
pub mod release_policy;
pub mod resolver;
pub mod scope;
pub mod types;

pub use activator::{ComponentActivator, DefaultActivator};
pub use arguments::{Arguments, ConstructionArguments};
pub use burden::Burden;
pub use config::{ConfigLoader, KernelConfig, PoolConfig, ResolutionConfig, ValidationReport};
pub use context::CreationContext;
pub use description::{
    Cardinality, Component, ComponentDescription, DependencySlot, ServiceDecorator, SlotKind,
};
pub use diagnostics::{DependencyGraph, DiagnosticsReport, WaitingComponent};
pub use errors::{KernelError, KernelResult};
pub use handler::{Handler, HandlerState, MissingDependency};
pub use kernel::Kernel;
pub use lifestyle::{
    track_instance, LifestyleFactory, LifestyleKind, LifestyleManager, PoolExhaustion, PoolSettings,
    ReleaseReason, ScopeKind,
};
pub use metrics::{ComponentMetrics, KernelStats};
pub use registry::{RegistryConfig, RegistryEvent};
pub use release_policy::ReleasePolicy;
pub use resolver::{DependencyResolver, ResolvedDependency, ResolverPriority};
pub use scope::{LifetimeScope, ScopeAccessor, ScopeGuard, ScopeHandle, ThreadScopeAccessor};
pub use types::{Instance, InstanceId, ServiceType, ServiceValue};
