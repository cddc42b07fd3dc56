use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::burden::Burden;
use crate::errors::{KernelError, KernelResult};
use crate::lifestyle::ReleaseReason;
use crate::types::InstanceId;

#[derive(Default)]
struct Ledger {
    identities: HashMap<InstanceId, u64>,
    records: BTreeMap<u64, Arc<Burden>>,
}

impl Ledger {
    fn remove(&mut self, seq: u64) -> Option<Arc<Burden>> {
        let burden = self.records.remove(&seq)?;
        for identity in burden.identities() {
            if self.identities.get(&identity) == Some(&seq) {
                self.identities.remove(&identity);
            }
        }
        Some(burden)
    }
}

/// Ownership ledger: экземпляры, которые kernel или scope обязан уничтожить.
///
/// Запись ищется по любой из идентичностей экземпляра (сырой объект и каждый
/// view сервиса). Внешний код вызывается только вне блокировки.
pub struct ReleasePolicy {
    label: String,
    parent: Option<Arc<ReleasePolicy>>,
    ledger: RwLock<Ledger>,
    next_seq: AtomicU64,
}

impl ReleasePolicy {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            parent: None,
            ledger: RwLock::new(Ledger::default()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Ledger, который при промахе release спрашивает `parent`
    pub fn child(label: impl Into<String>, parent: Arc<ReleasePolicy>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(label)
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> Option<&Arc<ReleasePolicy>> {
        self.parent.as_ref()
    }

    /// Принять экземпляр во владение (+1 к счётчику владельцев burden)
    pub fn track(&self, burden: &Arc<Burden>) -> KernelResult<()> {
        let identities = burden.identities();
        let mut ledger = self.ledger.write();

        let stale: Vec<u64> = identities
            .iter()
            .filter_map(|identity| ledger.identities.get(identity).copied())
            .collect();
        for seq in stale {
            match ledger.records.get(&seq) {
                Some(existing) if !existing.is_destroyed() => {
                    return Err(KernelError::AlreadyTracked {
                        component: burden.component().to_string(),
                        instance: identities[0].to_string(),
                    });
                }
                _ => {
                    ledger.remove(seq);
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        for identity in identities {
            ledger.identities.insert(identity, seq);
        }
        ledger.records.insert(seq, burden.clone());
        drop(ledger);

        burden.acquire();
        trace!(policy = %self.label, component = burden.component(), seq, "instance tracked");
        Ok(())
    }

    /// Учтён ли экземпляр именно этим ledger
    pub fn is_tracked(&self, instance: InstanceId) -> bool {
        let ledger = self.ledger.read();
        ledger
            .identities
            .get(&instance)
            .and_then(|seq| ledger.records.get(seq))
            .is_some_and(|burden| !burden.is_destroyed())
    }

    /// Учтён ли экземпляр этим ledger или одним из родителей
    pub fn owns(&self, instance: InstanceId) -> bool {
        self.is_tracked(instance) || self.parent.as_ref().is_some_and(|parent| parent.owns(instance))
    }

    pub fn tracked_count(&self) -> usize {
        self.ledger
            .read()
            .records
            .values()
            .filter(|burden| !burden.is_destroyed())
            .count()
    }

    /// Явный release. Возвращает true, если экземпляр найден в цепочке ledger.
    ///
    /// Retained экземпляры (singleton, scoped, per-thread) остаются учтёнными и
    /// живыми. Повторный release того же экземпляра ничего не делает.
    pub fn release(&self, instance: InstanceId) -> bool {
        let released = {
            let mut ledger = self.ledger.write();
            match ledger.identities.get(&instance).copied() {
                None => None,
                Some(seq) => match ledger.records.get(&seq) {
                    Some(burden) if burden.is_retained() && !burden.is_destroyed() => {
                        trace!(policy = %self.label, component = burden.component(), "retained instance kept");
                        return true;
                    }
                    _ => Some(ledger.remove(seq)),
                },
            }
        };

        match released {
            Some(Some(burden)) => {
                if !burden.is_destroyed() {
                    burden.release(ReleaseReason::Explicit);
                }
                true
            }
            Some(None) => true,
            None => self.parent.as_ref().is_some_and(|parent| parent.release(instance)),
        }
    }

    /// Забыть записи уже уничтоженных экземпляров (например, singleton
    /// удалённого компонента), чтобы ledger не удерживал их память
    pub(crate) fn purge_destroyed(&self) -> usize {
        let purged: Vec<Arc<Burden>> = {
            let mut ledger = self.ledger.write();
            let stale: Vec<u64> = ledger
                .records
                .iter()
                .filter(|(_, burden)| burden.is_destroyed())
                .map(|(seq, _)| *seq)
                .collect();
            stale.into_iter().filter_map(|seq| ledger.remove(seq)).collect()
        };
        if !purged.is_empty() {
            trace!(policy = %self.label, purged = purged.len(), "destroyed records purged");
        }
        purged.len()
    }

    /// Отпустить все записи, новые первыми
    pub fn dispose_all(&self, reason: ReleaseReason) -> usize {
        let records = {
            let mut ledger = self.ledger.write();
            ledger.identities.clear();
            std::mem::take(&mut ledger.records)
        };

        let mut released = 0;
        for (_, burden) in records.into_iter().rev() {
            if burden.is_destroyed() {
                continue;
            }
            released += 1;
            if !burden.release(reason) && reason == ReleaseReason::Disposal && !burden.is_destroyed() {
                warn!(policy = %self.label, component = burden.component(), "instance survived disposal");
            }
        }
        debug!(policy = %self.label, released, ?reason, "ledger disposed");
        released
    }
}

impl std::fmt::Debug for ReleasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasePolicy")
            .field("label", &self.label)
            .field("tracked", &self.tracked_count())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
