use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::handler::Handler;
use crate::lifestyle::ReleaseReason;
use crate::types::{Instance, InstanceId, ServiceType, ServiceValue};

static NEXT_BURDEN_ID: AtomicU64 = AtomicU64::new(1);

/// Ownership record ("burden") одного живого экземпляра.
///
/// Связывает экземпляр с handler, который его создал, и с зависимостями,
/// которыми он владеет. Счётчик владельцев: +1 за учёт в ledger и +1 за
/// каждого родителя, принявшего экземпляр как зависимость.
pub struct Burden {
    id: u64,
    handler: Arc<Handler>,
    raw: Instance,
    views: Vec<(ServiceType, ServiceValue, InstanceId)>,
    dependents: Mutex<Vec<Arc<Burden>>>,
    owners: AtomicUsize,
    retained: AtomicBool,
    destroyed: AtomicBool,
}

impl Burden {
    pub(crate) fn new(
        handler: Arc<Handler>,
        raw: Instance,
        views: Vec<(ServiceType, ServiceValue, InstanceId)>,
        dependents: Vec<Arc<Burden>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BURDEN_ID.fetch_add(1, Ordering::Relaxed),
            handler,
            raw,
            views,
            dependents: Mutex::new(dependents),
            owners: AtomicUsize::new(0),
            retained: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub fn component(&self) -> &str {
        self.handler.name()
    }

    /// Экземпляр до применения декораторов
    pub fn instance(&self) -> &Instance {
        &self.raw
    }

    /// View экземпляра под сервис `service`
    pub fn view(&self, service: &ServiceType) -> Option<ServiceValue> {
        self.views
            .iter()
            .find(|(candidate, _, _)| candidate == service)
            .map(|(_, value, _)| value.clone())
    }

    /// Все идентичности, под которыми экземпляр мог быть выдан наружу
    pub fn identities(&self) -> Vec<InstanceId> {
        let mut ids = vec![InstanceId::of(&self.raw)];
        for (_, _, id) in &self.views {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }

    pub fn owner_count(&self) -> usize {
        self.owners.load(Ordering::SeqCst)
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents.lock().len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Экземпляр живёт до конца scope / disposal, явный release его не трогает
    pub fn is_retained(&self) -> bool {
        self.retained.load(Ordering::SeqCst)
    }

    pub fn mark_retained(&self) {
        self.retained.store(true, Ordering::SeqCst);
    }

    pub(crate) fn acquire(&self) {
        self.owners.fetch_add(1, Ordering::SeqCst);
    }

    /// Принять `dependent` во владение
    pub(crate) fn add_dependent(&self, dependent: Arc<Burden>) {
        self.dependents.lock().push(dependent);
    }

    /// Отпустить одну ссылку владения.
    ///
    /// Для нефорсированных причин lifestyle спрашивается только когда владельцев
    /// не осталось; `ScopeEnded` и `Disposal` доходят до lifestyle всегда.
    /// Возвращает true, если экземпляр был уничтожен этим вызовом.
    pub fn release(&self, reason: ReleaseReason) -> bool {
        if self.is_destroyed() {
            return false;
        }

        let previous = self
            .owners
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owners| Some(owners.saturating_sub(1)))
            .unwrap_or_else(|owners| owners);
        let remaining = previous.saturating_sub(1);

        if remaining > 0 && !reason.is_forced() {
            trace!(component = self.component(), remaining, "burden still owned");
            return false;
        }

        self.handler.lifestyle().release(self, reason)
    }

    /// Уничтожить экземпляр: decommission hooks, затем каскад на зависимости
    /// (новые первыми). Выполняется не более одного раза.
    pub fn teardown(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.handler.activator().destroy(self);

        let dependents = std::mem::take(&mut *self.dependents.lock());
        let count = dependents.len();
        for dependent in dependents.into_iter().rev() {
            dependent.release(ReleaseReason::OwnerReleased);
        }

        debug!(component = self.component(), burden = self.id, dependents = count, "instance destroyed");
        true
    }

    /// Отпустить зависимости без teardown самого экземпляра (частично
    /// построенный граф или пул, разбирающий неиспользованный экземпляр)
    pub(crate) fn release_dependents(dependents: Vec<Arc<Burden>>) {
        for dependent in dependents.into_iter().rev() {
            dependent.release(ReleaseReason::OwnerReleased);
        }
    }
}

impl std::fmt::Debug for Burden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Burden")
            .field("id", &self.id)
            .field("component", &self.component())
            .field("owners", &self.owner_count())
            .field("dependents", &self.dependent_count())
            .field("retained", &self.is_retained())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
