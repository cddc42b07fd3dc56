use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Созданный экземпляр компонента со стёртым типом
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Значение, отданное под конкретный сервис: внутри всегда лежит `Arc<S>`,
/// что позволяет одинаково работать с конкретными типами и `dyn Trait`.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

/// Тип сервиса, по которому ищутся компоненты
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Ссылочная идентичность экземпляра: адрес разделяемой аллокации.
///
/// Для `Arc<dyn Trait>` и `Arc<Concrete>` одного объекта значения совпадают.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn of<S: ?Sized>(instance: &Arc<S>) -> Self {
        Self(Arc::as_ptr(instance).cast::<()>() as usize)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub(crate) fn service_value<S: ?Sized + Send + Sync + 'static>(value: Arc<S>) -> ServiceValue {
    Arc::new(value)
}

pub(crate) fn downcast_service<S: ?Sized + Send + Sync + 'static>(value: &ServiceValue) -> Option<Arc<S>> {
    (**value).downcast_ref::<Arc<S>>().cloned()
}
