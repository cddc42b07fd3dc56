use serde_json::Value;
use std::sync::Arc;

use crate::arguments::Arguments;
use crate::burden::Burden;
use crate::errors::{KernelError, KernelResult};
use crate::handler::Handler;
use crate::kernel::KernelCore;
use crate::release_policy::ReleasePolicy;
use crate::resolver::ResolverChain;
use crate::scope::LifetimeScope;
use crate::types::ServiceType;

/// Контекст одного top-level вызова resolve.
///
/// Живёт на стеке вызывающего потока и никогда не разделяется, поэтому
/// блокировок не требует. Хранит путь создаваемых компонентов (защита от
/// циклов), inline аргументы, текущий scope и ledger, в который lifestyle
/// учитывают корневые экземпляры.
pub struct CreationContext<'a> {
    kernel: &'a KernelCore,
    arguments: Arguments,
    path: Vec<String>,
    scope: Option<Arc<LifetimeScope>>,
    policy: Arc<ReleasePolicy>,
    probe: bool,
    max_depth: usize,
    propagate_arguments: bool,
}

impl<'a> CreationContext<'a> {
    pub(crate) fn new(
        kernel: &'a KernelCore,
        arguments: Arguments,
        scope: Option<Arc<LifetimeScope>>,
        policy: Arc<ReleasePolicy>,
    ) -> Self {
        let resolution = &kernel.config().resolution;
        Self {
            kernel,
            arguments,
            path: Vec::new(),
            scope,
            policy,
            probe: false,
            max_depth: resolution.max_depth,
            propagate_arguments: resolution.propagate_inline_arguments,
        }
    }

    /// Контекст статической проверки: без аргументов, без scope
    pub(crate) fn probe(kernel: &'a KernelCore) -> Self {
        let mut context = Self::new(kernel, Arguments::new(), None, kernel.policy().clone());
        context.probe = true;
        context
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Имена компонентов, создаваемых в данный момент (корень первым)
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Текущий создаваемый компонент является корнем запроса
    pub fn is_root_request(&self) -> bool {
        self.path.len() == 1
    }

    pub fn is_resolving(&self, component: &str) -> bool {
        self.path.iter().any(|name| name == component)
    }

    pub fn current_component(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Inline аргументы, видимые на текущей глубине
    pub fn arguments(&self) -> Option<&Arguments> {
        if self.probe || self.arguments.is_empty() {
            return None;
        }
        (self.path.len() <= 1 || self.propagate_arguments).then_some(&self.arguments)
    }

    pub fn scope(&self) -> Option<&Arc<LifetimeScope>> {
        self.scope.as_ref()
    }

    /// Ledger для корневых экземпляров этого запроса
    pub fn policy(&self) -> &Arc<ReleasePolicy> {
        &self.policy
    }

    pub fn kernel_id(&self) -> u64 {
        self.kernel.id()
    }

    /// Принадлежит ли scope этому kernel или одному из его родителей
    pub fn accepts_scope(&self, scope: &LifetimeScope) -> bool {
        self.kernel.lineage_contains(scope.kernel_id())
    }

    pub fn handlers_for(&self, service: &ServiceType) -> Vec<Arc<Handler>> {
        self.kernel.handlers_for(service)
    }

    pub fn handler_named(&self, name: &str) -> Option<Arc<Handler>> {
        self.kernel.handler_named(name)
    }

    /// Значение конфигурации уровня kernel (с учётом родителей)
    pub fn parameter(&self, key: &str) -> Option<Value> {
        self.kernel.parameter(key)
    }

    pub(crate) fn resolvers(&self) -> &'a ResolverChain {
        self.kernel.resolvers()
    }

    /// Разрешить зависимость через другой handler в рамках этого контекста
    pub fn resolve_handler(&mut self, handler: &Arc<Handler>) -> KernelResult<Arc<Burden>> {
        handler.resolve(self)
    }

    pub(crate) fn enter(&mut self, component: &str) -> KernelResult<()> {
        if self.is_resolving(component) {
            let mut chain = self.path.clone();
            chain.push(component.to_string());
            return Err(KernelError::CircularDependency { chain });
        }
        if self.path.len() >= self.max_depth {
            return Err(KernelError::DepthExceeded {
                component: component.to_string(),
                limit: self.max_depth,
            });
        }
        self.path.push(component.to_string());
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }
}

impl std::fmt::Debug for CreationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationContext")
            .field("path", &self.path)
            .field("arguments", &self.arguments)
            .field("scope", &self.scope.as_ref().map(|scope| scope.id()))
            .field("probe", &self.probe)
            .finish()
    }
}
