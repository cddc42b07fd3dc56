//! Lifetime scopes.
//!
//! Scope владеет кэшем scoped экземпляров и собственным ledger, который
//! цепляется к ledger родительского scope, затем к ledger kernel. Два способа
//! работы с scope:
//!
//! - `ScopeGuard` (`Kernel::begin_scope`): thread-ambient, кладётся на
//!   thread-local стек и снимается при drop. Не `Send`.
//! - `ScopeHandle` (`Kernel::create_scope`): явный handle, который можно
//!   передавать между потоками; resolve идёт через сам handle.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::arguments::Arguments;
use crate::burden::Burden;
use crate::context::CreationContext;
use crate::errors::KernelResult;
use crate::kernel::Kernel;
use crate::lifestyle::ReleaseReason;
use crate::release_policy::ReleasePolicy;

thread_local! {
    static AMBIENT_SCOPES: RefCell<Vec<Arc<LifetimeScope>>> = const { RefCell::new(Vec::new()) };
}

/// Источник текущего scope для `ScopeKind::Accessor`
pub trait ScopeAccessor: Send + Sync {
    fn current_scope(&self, context: &CreationContext<'_>) -> Option<Arc<LifetimeScope>>;
}

/// Верхний thread-ambient scope, принадлежащий kernel запроса или его родителю
pub struct ThreadScopeAccessor;

impl ScopeAccessor for ThreadScopeAccessor {
    fn current_scope(&self, context: &CreationContext<'_>) -> Option<Arc<LifetimeScope>> {
        ambient_scope(|scope| context.accepts_scope(scope))
    }
}

pub(crate) fn ambient_scope(accepts: impl Fn(&LifetimeScope) -> bool) -> Option<Arc<LifetimeScope>> {
    AMBIENT_SCOPES.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|scope| !scope.is_disposed() && accepts(scope))
            .cloned()
    })
}

fn push_ambient(scope: Arc<LifetimeScope>) {
    AMBIENT_SCOPES.with(|stack| stack.borrow_mut().push(scope));
}

fn pop_ambient(scope: &LifetimeScope) {
    AMBIENT_SCOPES.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(position) = stack.iter().rposition(|candidate| candidate.id() == scope.id()) {
            stack.remove(position);
        }
    });
}

/// Время жизни группы scoped экземпляров
pub struct LifetimeScope {
    id: Uuid,
    kernel_id: u64,
    parent: Option<Arc<LifetimeScope>>,
    cache: Mutex<HashMap<u64, Arc<Burden>>>,
    policy: Arc<ReleasePolicy>,
    disposed: AtomicBool,
}

impl LifetimeScope {
    pub(crate) fn new(kernel_id: u64, parent: Option<Arc<LifetimeScope>>, kernel_policy: &Arc<ReleasePolicy>) -> Arc<Self> {
        let id = Uuid::new_v4();
        let parent_policy = parent
            .as_ref()
            .map_or_else(|| kernel_policy.clone(), |scope| scope.policy.clone());
        Arc::new(Self {
            id,
            kernel_id,
            parent,
            cache: Mutex::new(HashMap::new()),
            policy: Arc::new(ReleasePolicy::child(format!("scope-{}", id), parent_policy)),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kernel_id(&self) -> u64 {
        self.kernel_id
    }

    pub fn parent(&self) -> Option<&Arc<LifetimeScope>> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |parent| parent.depth() + 1)
    }

    pub fn policy(&self) -> &Arc<ReleasePolicy> {
        &self.policy
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Число закэшированных scoped экземпляров
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    pub(crate) fn cached(&self, handler_id: u64) -> Option<Arc<Burden>> {
        self.cache
            .lock()
            .get(&handler_id)
            .filter(|burden| !burden.is_destroyed())
            .cloned()
    }

    /// Вставить экземпляр, если другой поток не успел раньше; иначе вернуть его
    pub(crate) fn insert_if_absent(&self, handler_id: u64, burden: Arc<Burden>) -> Result<(), Arc<Burden>> {
        let mut cache = self.cache.lock();
        match cache.get(&handler_id) {
            Some(existing) if !existing.is_destroyed() => Err(existing.clone()),
            _ => {
                cache.insert(handler_id, burden);
                Ok(())
            }
        }
    }

    pub(crate) fn evict(&self, handler_id: u64) {
        self.cache.lock().remove(&handler_id);
    }

    /// Завершить scope: всё учтённое в его ledger отпускается (новые первыми)
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let released = self.policy.dispose_all(ReleaseReason::ScopeEnded);
        self.cache.lock().clear();
        debug!(scope = %self.id, depth = self.depth(), released, "scope disposed");
    }
}

impl Drop for LifetimeScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LifetimeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeScope")
            .field("id", &self.id)
            .field("kernel_id", &self.kernel_id)
            .field("depth", &self.depth())
            .field("cached", &self.cached_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Явный scope. Уничтожается при drop или вызовом `dispose`.
pub struct ScopeHandle {
    kernel: Kernel,
    scope: Arc<LifetimeScope>,
}

impl ScopeHandle {
    pub(crate) fn new(kernel: Kernel, scope: Arc<LifetimeScope>) -> Self {
        Self { kernel, scope }
    }

    pub fn id(&self) -> Uuid {
        self.scope.id()
    }

    pub fn scope(&self) -> &Arc<LifetimeScope> {
        &self.scope
    }

    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> KernelResult<Arc<S>> {
        self.kernel.resolve_in(None, Arguments::new(), Some(self.scope.clone()))
    }

    pub fn resolve_named<S: ?Sized + Send + Sync + 'static>(&self, name: &str) -> KernelResult<Arc<S>> {
        self.kernel.resolve_in(Some(name), Arguments::new(), Some(self.scope.clone()))
    }

    pub fn resolve_with<S: ?Sized + Send + Sync + 'static>(&self, arguments: Arguments) -> KernelResult<Arc<S>> {
        self.kernel.resolve_in(None, arguments, Some(self.scope.clone()))
    }

    /// Release через ledger этого scope (с откатом на ledger kernel)
    pub fn release<S: ?Sized>(&self, instance: &Arc<S>) -> bool {
        self.kernel.release_in(instance, Some(&self.scope))
    }

    /// Вложенный явный scope с собственным кэшем
    pub fn create_child(&self) -> KernelResult<ScopeHandle> {
        self.kernel.open_scope(Some(self.scope.clone()))
            .map(|scope| ScopeHandle::new(self.kernel.clone(), scope))
    }

    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        self.scope.dispose();
    }
}

/// Thread-ambient scope, активный до drop guard'а
pub struct ScopeGuard {
    handle: ScopeHandle,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub(crate) fn enter(handle: ScopeHandle) -> Self {
        push_ambient(handle.scope.clone());
        debug!(scope = %handle.id(), "ambient scope entered");
        Self {
            handle,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn scope(&self) -> &Arc<LifetimeScope> {
        self.handle.scope()
    }

    /// Явный handle этого же scope
    pub fn handle(&self) -> &ScopeHandle {
        &self.handle
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        pop_ambient(&self.handle.scope);
    }
}
