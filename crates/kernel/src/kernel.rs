//! Kernel facade: регистрация, разрешение, release, scopes и disposal.
//!
//! Registry и ledger защищены собственными блокировками; `gate` разделяет
//! операции на "читающие" (resolve, release, scopes) и "пишущие"
//! (регистрация, смена resolver'ов и параметров, disposal). Читатели
//! берут `read_recursive`, поэтому вложенный resolve из фабрики на том же
//! потоке не блокируется ожидающим писателем.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::activator::DefaultActivator;
use crate::arguments::Arguments;
use crate::config::KernelConfig;
use crate::context::CreationContext;
use crate::description::ComponentDescription;
use crate::diagnostics::DiagnosticsReport;
use crate::errors::{KernelError, KernelResult};
use crate::handler::{Handler, HandlerState};
use crate::lifestyle::{build_manager, ReleaseReason};
use crate::metrics::{ComponentMetrics, KernelMetrics, KernelStats};
use crate::registry::{ComponentRegistry, RegistryEvent};
use crate::release_policy::ReleasePolicy;
use crate::resolver::{DependencyResolver, ResolverChain, ResolverPriority};
use crate::scope::{self, LifetimeScope, ScopeGuard, ScopeHandle};
use crate::types::{downcast_service, InstanceId, ServiceType};

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct KernelCore {
    id: u64,
    config: KernelConfig,
    registry: ComponentRegistry,
    resolvers: ResolverChain,
    policy: Arc<ReleasePolicy>,
    parameters: RwLock<HashMap<String, Value>>,
    gate: RwLock<()>,
    parent: Option<Arc<KernelCore>>,
    children: Mutex<Vec<Weak<KernelCore>>>,
    scopes: Mutex<Vec<Weak<LifetimeScope>>>,
    metrics: KernelMetrics,
    disposed: AtomicBool,
}

impl KernelCore {
    fn new(config: KernelConfig, resolvers: ResolverChain, parent: Option<Arc<KernelCore>>) -> Self {
        let id = NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed);
        let label = format!("kernel-{}", id);
        let policy = match &parent {
            Some(parent) => ReleasePolicy::child(label, parent.policy.clone()),
            None => ReleasePolicy::new(label),
        };
        Self {
            id,
            registry: ComponentRegistry::new(config.registry.clone()),
            parameters: RwLock::new(config.parameters.clone()),
            config,
            resolvers,
            policy: Arc::new(policy),
            gate: RwLock::new(()),
            parent,
            children: Mutex::new(Vec::new()),
            scopes: Mutex::new(Vec::new()),
            metrics: KernelMetrics::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub(crate) fn policy(&self) -> &Arc<ReleasePolicy> {
        &self.policy
    }

    pub(crate) fn resolvers(&self) -> &ResolverChain {
        &self.resolvers
    }

    pub(crate) fn lineage_contains(&self, kernel_id: u64) -> bool {
        self.id == kernel_id || self.parent.as_ref().is_some_and(|parent| parent.lineage_contains(kernel_id))
    }

    /// Handlers сервиса; если локально нет ни одного, спрашивается родитель
    pub(crate) fn handlers_for(&self, service: &ServiceType) -> Vec<Arc<Handler>> {
        let local = self.registry.find_by_service(service);
        match &self.parent {
            Some(parent) if local.is_empty() => parent.handlers_for(service),
            _ => local,
        }
    }

    pub(crate) fn handler_named(&self, name: &str) -> Option<Arc<Handler>> {
        self.registry
            .find_by_name(name)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.handler_named(name)))
    }

    pub(crate) fn parameter(&self, key: &str) -> Option<Value> {
        self.parameters
            .read()
            .get(key)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.parameter(key)))
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> KernelResult<()> {
        if self.is_disposed() {
            return Err(KernelError::Disposed);
        }
        Ok(())
    }

    fn build_handler(&self, description: ComponentDescription) -> KernelResult<Arc<Handler>> {
        description.validate()?;
        let description = Arc::new(description);
        let lifestyle = build_manager(description.lifestyle(), &description, &self.config);
        lifestyle.init(&description, &self.policy);
        let activator = Arc::new(DefaultActivator::new(description.clone()));
        Ok(Handler::new(description, lifestyle, activator))
    }

    /// Разобрать события registry и пересчитать затронутые handlers
    fn process_events(&self) {
        let events = self.registry.drain_events();
        if events.is_empty() {
            return;
        }

        let registered = events.iter().any(|event| matches!(event, RegistryEvent::Registered { .. }));
        let unregistered = events.iter().any(|event| matches!(event, RegistryEvent::Unregistered { .. }));
        for event in &events {
            trace!(kernel = self.id, event = ?event, "registry event");
        }

        let probe = CreationContext::probe(self);
        for handler in self.registry.handlers() {
            let affected = if handler.is_valid() { unregistered } else { registered };
            if affected {
                handler.evaluate(&probe, &self.resolvers);
            }
        }
    }

    /// Пересчитать все handlers (сменились resolver'ы или параметры)
    fn reevaluate_all(&self) {
        let probe = CreationContext::probe(self);
        for handler in self.registry.handlers() {
            handler.evaluate(&probe, &self.resolvers);
        }
    }

    fn revalidate_children(&self) {
        let children: Vec<Arc<KernelCore>> = {
            let mut children = self.children.lock();
            children.retain(|child| child.strong_count() > 0);
            children.iter().filter_map(Weak::upgrade).collect()
        };
        for child in children {
            if child.is_disposed() {
                continue;
            }
            let _gate = child.gate.write();
            child.reevaluate_all();
            child.revalidate_children();
        }
    }

    fn select_handler(&self, service: &ServiceType, name: Option<&str>) -> KernelResult<Arc<Handler>> {
        if let Some(name) = name {
            return self
                .handler_named(name)
                .filter(|handler| handler.description().provides(service))
                .ok_or_else(|| KernelError::not_found(service.name(), Some(name)));
        }

        let candidates = self.handlers_for(service);
        candidates
            .iter()
            .find(|handler| handler.is_valid())
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| KernelError::not_found(service.name(), None))
    }

    fn ambient_scope(&self) -> Option<Arc<LifetimeScope>> {
        scope::ambient_scope(|scope| self.lineage_contains(scope.kernel_id()))
    }

    fn open_scope(&self, parent: Option<Arc<LifetimeScope>>) -> KernelResult<Arc<LifetimeScope>> {
        self.ensure_active()?;
        let scope = LifetimeScope::new(self.id, parent, &self.policy);
        let mut scopes = self.scopes.lock();
        scopes.retain(|scope| scope.upgrade().is_some_and(|scope| !scope.is_disposed()));
        scopes.push(Arc::downgrade(&scope));
        debug!(kernel = self.id, scope = %scope.id(), depth = scope.depth(), "scope opened");
        Ok(scope)
    }

    fn resolve_handler<S: ?Sized + Send + Sync + 'static>(
        &self,
        handler: &Arc<Handler>,
        service: &ServiceType,
        arguments: Arguments,
        scope: Option<Arc<LifetimeScope>>,
    ) -> KernelResult<Arc<S>> {
        let policy = scope
            .as_ref()
            .map_or_else(|| self.policy.clone(), |scope| scope.policy().clone());
        let mut context = CreationContext::new(self, arguments, scope, policy);

        let burden = handler.resolve(&mut context)?;
        burden
            .view(service)
            .as_ref()
            .and_then(downcast_service::<S>)
            .ok_or_else(|| KernelError::TypeMismatch {
                component: handler.name().to_string(),
                requested: service.name().to_string(),
            })
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _gate = self.gate.write();

        let scopes: Vec<_> = self.scopes.lock().drain(..).collect();
        for scope in scopes.iter().rev().filter_map(Weak::upgrade) {
            scope.dispose();
        }

        let children: Vec<_> = self.children.lock().drain(..).collect();
        for child in children.iter().rev().filter_map(Weak::upgrade) {
            child.dispose();
        }

        let released = self.policy.dispose_all(ReleaseReason::Disposal);
        let handlers = self.registry.clear();
        for handler in handlers.iter().rev() {
            handler.retire();
        }
        info!(kernel = self.id, released, components = handlers.len(), "kernel disposed");
    }
}

impl Drop for KernelCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Inversion-of-control kernel.
///
/// Дешёвый `Clone`: все копии разделяют одно состояние. Disposal выполняется
/// явным `dispose` или при drop последней копии.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelCore>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self::from_core(KernelCore::new(KernelConfig::default(), ResolverChain::with_defaults(), None))
    }

    pub fn with_config(config: KernelConfig) -> KernelResult<Self> {
        config.ensure_valid()?;
        Ok(Self::from_core(KernelCore::new(config, ResolverChain::with_defaults(), None)))
    }

    fn from_core(core: KernelCore) -> Self {
        debug!(kernel = core.id, "kernel created");
        Self { inner: Arc::new(core) }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Установить глобальный tracing subscriber по `config().logging`
    pub fn init_logging(&self) -> anyhow::Result<()> {
        common::init_structured_logging(&self.inner.config.logging)
    }

    // ---- registration ----

    pub fn register(&self, description: ComponentDescription) -> KernelResult<()> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.write();

        let handler = core.build_handler(description)?;
        core.registry.register(handler.clone())?;
        core.metrics.record_registration();
        core.process_events();
        core.revalidate_children();

        info!(
            kernel = core.id,
            component = handler.name(),
            lifestyle = handler.description().lifestyle().name(),
            state = ?handler.state(),
            "component registered"
        );
        Ok(())
    }

    /// Зарегистрировать пачку описаний; первая ошибка прерывает регистрацию
    pub fn register_all<I>(&self, descriptions: I) -> KernelResult<usize>
    where
        I: IntoIterator<Item = ComponentDescription>,
    {
        let mut count = 0;
        for description in descriptions {
            self.register(description)?;
            count += 1;
        }
        Ok(count)
    }

    /// Заменить компонент с тем же именем (или зарегистрировать, если его нет)
    pub fn replace(&self, description: ComponentDescription) -> KernelResult<()> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.write();

        let handler = core.build_handler(description)?;
        let previous = core.registry.replace(handler.clone())?;
        if let Some(previous) = &previous {
            previous.retire();
            core.policy.purge_destroyed();
            core.metrics.record_unregistration();
        }
        core.metrics.record_registration();
        core.process_events();
        core.revalidate_children();

        info!(kernel = core.id, component = handler.name(), replaced = previous.is_some(), "component replaced");
        Ok(())
    }

    /// Удалить компонент; неизвестные имена игнорируются
    pub fn unregister(&self, name: &str) -> KernelResult<bool> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.write();

        let Some(handler) = core.registry.unregister(name) else {
            return Ok(false);
        };
        handler.retire();
        core.policy.purge_destroyed();
        core.metrics.record_unregistration();
        core.process_events();
        core.revalidate_children();

        info!(kernel = core.id, component = name, "component unregistered");
        Ok(true)
    }

    pub fn add_resolver(&self, resolver: Arc<dyn DependencyResolver>) -> KernelResult<()> {
        self.insert_resolver(resolver, ResolverPriority::Last)
    }

    pub fn insert_resolver(&self, resolver: Arc<dyn DependencyResolver>, priority: ResolverPriority) -> KernelResult<()> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.write();

        core.resolvers.add(resolver, priority);
        core.reevaluate_all();
        core.revalidate_children();
        Ok(())
    }

    /// Значение конфигурации уровня kernel
    pub fn set_parameter(&self, key: impl Into<String>, value: Value) -> KernelResult<()> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.write();

        core.parameters.write().insert(key.into(), value);
        core.reevaluate_all();
        core.revalidate_children();
        Ok(())
    }

    pub fn resolver_names(&self) -> Vec<String> {
        self.inner.resolvers.names()
    }

    // ---- resolution ----

    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> KernelResult<Arc<S>> {
        self.resolve_in(None, Arguments::new(), None)
    }

    pub fn resolve_named<S: ?Sized + Send + Sync + 'static>(&self, name: &str) -> KernelResult<Arc<S>> {
        self.resolve_in(Some(name), Arguments::new(), None)
    }

    pub fn resolve_with<S: ?Sized + Send + Sync + 'static>(&self, arguments: Arguments) -> KernelResult<Arc<S>> {
        self.resolve_in(None, arguments, None)
    }

    pub fn resolve_named_with<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> KernelResult<Arc<S>> {
        self.resolve_in(Some(name), arguments, None)
    }

    pub(crate) fn resolve_in<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: Option<&str>,
        arguments: Arguments,
        scope: Option<Arc<LifetimeScope>>,
    ) -> KernelResult<Arc<S>> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.read_recursive();
        let started = Instant::now();
        let service = ServiceType::of::<S>();

        if scope.as_ref().is_some_and(|scope| scope.is_disposed()) {
            return Err(KernelError::Disposed);
        }
        let scope = scope.or_else(|| core.ambient_scope());

        let handler = match core.select_handler(&service, name) {
            Ok(handler) => handler,
            Err(error) => {
                core.metrics.record_resolution(None, started.elapsed(), false);
                warn!(kernel = core.id, service = %service, error = %error, "resolution failed");
                return Err(error);
            }
        };

        let result = core.resolve_handler::<S>(&handler, &service, arguments, scope);
        core.metrics
            .record_resolution(Some(handler.name()), started.elapsed(), result.is_ok());
        match &result {
            Ok(_) => trace!(kernel = core.id, component = handler.name(), service = %service, "resolved"),
            Err(error) => warn!(
                kernel = core.id,
                component = handler.name(),
                category = error.category(),
                error = %error,
                "resolution failed"
            ),
        }
        result
    }

    /// Экземпляры всех валидных компонентов сервиса, в порядке регистрации
    pub fn resolve_all<S: ?Sized + Send + Sync + 'static>(&self) -> KernelResult<Vec<Arc<S>>> {
        let core = &self.inner;
        core.ensure_active()?;
        let _gate = core.gate.read_recursive();
        let service = ServiceType::of::<S>();
        let scope = core.ambient_scope();

        let mut resolved = Vec::new();
        for handler in core.handlers_for(&service).iter().filter(|handler| handler.is_valid()) {
            let started = Instant::now();
            let result = core.resolve_handler::<S>(handler, &service, Arguments::new(), scope.clone());
            core.metrics
                .record_resolution(Some(handler.name()), started.elapsed(), result.is_ok());
            match result {
                Ok(instance) => resolved.push(instance),
                Err(error) => {
                    // Уже выданные экземпляры возвращаются в ledger
                    for instance in &resolved {
                        self.release(instance);
                    }
                    return Err(error);
                }
            }
        }
        Ok(resolved)
    }

    // ---- release ----

    /// Отпустить экземпляр, полученный из resolve. Возвращает true, если
    /// экземпляр был учтён ledger'ом (scope, kernel или родитель). Повторный
    /// release и release неучтённых экземпляров ничего не делают.
    pub fn release<S: ?Sized>(&self, instance: &Arc<S>) -> bool {
        self.release_in(instance, None)
    }

    pub(crate) fn release_in<S: ?Sized>(&self, instance: &Arc<S>, scope: Option<&Arc<LifetimeScope>>) -> bool {
        let core = &self.inner;
        if core.is_disposed() {
            return false;
        }
        let _gate = core.gate.read_recursive();
        let id = InstanceId::of(instance);

        let scope = scope.cloned().or_else(|| core.ambient_scope());
        let tracked = scope.is_some_and(|scope| scope.policy().release(id)) || core.policy.release(id);
        core.metrics.record_release(tracked);
        if !tracked {
            trace!(kernel = core.id, instance = %id, "release of untracked instance ignored");
        }
        tracked
    }

    /// Учтён ли экземпляр ledger'ом kernel (или его родителей)
    pub fn is_tracked<S: ?Sized>(&self, instance: &Arc<S>) -> bool {
        self.inner.policy.owns(InstanceId::of(instance))
    }

    // ---- scopes ----

    /// Thread-ambient scope; вложенный, если у потока уже есть scope этого kernel
    pub fn begin_scope(&self) -> KernelResult<ScopeGuard> {
        let parent = self.inner.ambient_scope();
        let scope = self.open_scope(parent)?;
        Ok(ScopeGuard::enter(ScopeHandle::new(self.clone(), scope)))
    }

    /// Явный scope, передаваемый вручную (в том числе в другие потоки)
    pub fn create_scope(&self) -> KernelResult<ScopeHandle> {
        let scope = self.open_scope(None)?;
        Ok(ScopeHandle::new(self.clone(), scope))
    }

    pub(crate) fn open_scope(&self, parent: Option<Arc<LifetimeScope>>) -> KernelResult<Arc<LifetimeScope>> {
        let _gate = self.inner.gate.read_recursive();
        self.inner.open_scope(parent)
    }

    // ---- hierarchy ----

    /// Дочерний kernel: свой registry и ledger, поиск и release откатываются
    /// к родителю. Resolver'ы копируются из родителя на момент создания.
    pub fn create_child(&self) -> KernelResult<Kernel> {
        let core = &self.inner;
        core.ensure_active()?;
        let resolvers = ResolverChain::empty();
        for resolver in core.resolvers.snapshot() {
            resolvers.add(resolver, ResolverPriority::Last);
        }

        let child = Self::from_core(KernelCore::new(core.config.clone(), resolvers, Some(core.clone())));
        core.children.lock().push(Arc::downgrade(&child.inner));
        info!(kernel = core.id, child = child.id(), "child kernel created");
        Ok(child)
    }

    // ---- introspection ----

    pub fn handler(&self, name: &str) -> Option<Arc<Handler>> {
        self.inner.handler_named(name)
    }

    pub fn handler_state(&self, name: &str) -> Option<HandlerState> {
        self.handler(name).map(|handler| handler.state())
    }

    /// Зарегистрирован ли компонент именно в этом kernel
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    pub fn has_service<S: ?Sized + 'static>(&self) -> bool {
        !self.inner.handlers_for(&ServiceType::of::<S>()).is_empty()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.inner
            .registry
            .handlers()
            .iter()
            .map(|handler| handler.name().to_string())
            .collect()
    }

    pub fn diagnose(&self) -> DiagnosticsReport {
        let handlers = self.inner.registry.handlers();
        let report = DiagnosticsReport::collect(&handlers);
        if !report.is_healthy() {
            warn!(
                kernel = self.inner.id,
                waiting = report.waiting.len(),
                cycles = report.cycles.len(),
                "kernel diagnostics found problems"
            );
        }
        report
    }

    pub fn stats(&self) -> KernelStats {
        let core = &self.inner;
        let handlers = core.registry.handlers();
        let valid = handlers.iter().filter(|handler| handler.is_valid()).count();
        let live_scopes = core
            .scopes
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|scope| !scope.is_disposed())
            .count();

        KernelStats {
            tracked_instances: core.policy.tracked_count(),
            registered_components: handlers.len(),
            valid_handlers: valid,
            waiting_handlers: handlers.len() - valid,
            live_scopes,
            ..core.metrics.snapshot()
        }
    }

    pub fn component_metrics(&self, name: &str) -> Option<ComponentMetrics> {
        self.inner.metrics.component(name)
    }

    // ---- lifecycle ----

    /// Уничтожить scopes, дочерние kernel, всё учтённое в ledger и всё, чем
    /// владеют lifestyle managers. Повторный вызов ничего не делает.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.inner.id)
            .field("components", &self.inner.registry.len())
            .field("tracked", &self.inner.policy.tracked_count())
            .field("has_parent", &self.inner.parent.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
