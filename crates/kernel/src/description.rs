use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::arguments::ConstructionArguments;
use crate::errors::{KernelError, KernelResult};
use crate::lifestyle::{LifestyleKind, PoolSettings, ScopeKind};
use crate::types::{downcast_service, service_value, Instance, InstanceId, ServiceType, ServiceValue};

pub(crate) type ActivationFn = Arc<dyn Fn(&ConstructionArguments) -> anyhow::Result<Instance> + Send + Sync>;
pub(crate) type ServiceCaster = Arc<dyn Fn(&Instance) -> Option<(ServiceValue, InstanceId)> + Send + Sync>;
pub(crate) type ErasedDecorator =
    Arc<dyn Fn(&str, ServiceValue) -> anyhow::Result<(ServiceValue, InstanceId)> + Send + Sync>;
pub(crate) type InstanceHook = Arc<dyn Fn(&Instance) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type ValueConverter = Arc<dyn Fn(&Value) -> anyhow::Result<ServiceValue> + Send + Sync>;
pub(crate) type CollectionBuilder = Arc<dyn Fn(Vec<ServiceValue>) -> ServiceValue + Send + Sync>;

/// Обёртка над результатом фабрики для одного сервиса ("wrap this instance").
///
/// Реализуется внешними коллабораторами (interception, метрики и т.п.),
/// для замыканий есть blanket impl.
pub trait ServiceDecorator<S: ?Sized>: Send + Sync {
    fn decorate(&self, component: &str, inner: Arc<S>) -> anyhow::Result<Arc<S>>;
}

impl<S, F> ServiceDecorator<S> for F
where
    S: ?Sized,
    F: Fn(Arc<S>) -> anyhow::Result<Arc<S>> + Send + Sync,
{
    fn decorate(&self, _component: &str, inner: Arc<S>) -> anyhow::Result<Arc<S>> {
        self(inner)
    }
}

/// Сервис, который предоставляет компонент, вместе со способом получить
/// его view из созданного экземпляра
#[derive(Clone)]
pub struct ServiceBinding {
    service: ServiceType,
    caster: ServiceCaster,
    decorators: Vec<ErasedDecorator>,
}

impl ServiceBinding {
    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn decorator_count(&self) -> usize {
        self.decorators.len()
    }

    /// View экземпляра под этот сервис; `None`, если caster не подошёл к типу
    pub(crate) fn view(&self, component: &str, instance: &Instance) -> anyhow::Result<Option<(ServiceValue, InstanceId)>> {
        let Some((mut value, mut id)) = (self.caster)(instance) else {
            return Ok(None);
        };
        for decorator in &self.decorators {
            (value, id) = decorator(component, value)?;
        }
        Ok(Some((value, id)))
    }
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("service", &self.service)
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

/// Вид слота: аргумент конструктора или устанавливаемое свойство
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Constructor,
    Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    /// Все валидные компоненты сервиса
    Many,
}

/// Одна зависимость компонента
#[derive(Clone)]
pub struct DependencySlot {
    key: String,
    target: ServiceType,
    name_hint: Option<String>,
    optional: bool,
    kind: SlotKind,
    cardinality: Cardinality,
    converter: Option<ValueConverter>,
    collector: Option<CollectionBuilder>,
}

impl DependencySlot {
    fn with_target(key: impl Into<String>, target: ServiceType) -> Self {
        Self {
            key: key.into(),
            target,
            name_hint: None,
            optional: false,
            kind: SlotKind::Constructor,
            cardinality: Cardinality::Single,
            converter: None,
            collector: None,
        }
    }

    /// Зависимость от компонента, предоставляющего сервис `S`
    pub fn service<S: ?Sized + Send + Sync + 'static>(key: impl Into<String>) -> Self {
        Self::with_target(key, ServiceType::of::<S>())
    }

    /// Значение конфигурации: параметр компонента или kernel, десериализуемый
    /// через serde. Может быть удовлетворён и компонентом типа `T`.
    pub fn parameter<T>(key: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let mut slot = Self::with_target(key, ServiceType::of::<T>());
        slot.converter = Some(Arc::new(|value: &Value| -> anyhow::Result<ServiceValue> {
            let parsed: T = serde_json::from_value(value.clone())?;
            Ok(service_value(Arc::new(parsed)))
        }));
        slot
    }

    /// Коллекция всех валидных компонентов сервиса `S` (`Vec<Arc<S>>`)
    pub fn many<S: ?Sized + Send + Sync + 'static>(key: impl Into<String>) -> Self {
        let mut slot = Self::with_target(key, ServiceType::of::<S>());
        slot.cardinality = Cardinality::Many;
        slot.collector = Some(Arc::new(|values: Vec<ServiceValue>| {
            let items: Vec<Arc<S>> = values.iter().filter_map(downcast_service::<S>).collect();
            service_value(Arc::new(items))
        }));
        slot
    }

    /// Необязательное свойство, устанавливаемое после выбора конструктора
    pub fn property<S: ?Sized + Send + Sync + 'static>(key: impl Into<String>) -> Self {
        let mut slot = Self::service::<S>(key);
        slot.kind = SlotKind::Property;
        slot.optional = true;
        slot
    }

    pub fn named(mut self, component: impl Into<String>) -> Self {
        self.name_hint = Some(component.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> ServiceType {
        self.target
    }

    pub fn name_hint(&self) -> Option<&str> {
        self.name_hint.as_deref()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn accepts_configuration(&self) -> bool {
        self.converter.is_some()
    }

    pub(crate) fn convert(&self, value: &Value) -> Option<anyhow::Result<ServiceValue>> {
        self.converter.as_ref().map(|convert| convert(value))
    }

    pub(crate) fn collect(&self, values: Vec<ServiceValue>) -> Option<ServiceValue> {
        self.collector.as_ref().map(|collect| collect(values))
    }
}

impl fmt::Debug for DependencySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencySlot")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("name_hint", &self.name_hint)
            .field("optional", &self.optional)
            .field("kind", &self.kind)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// Кандидат конструктора: упорядоченные слоты и фабрика
#[derive(Clone)]
pub struct Constructor {
    slots: Vec<DependencySlot>,
    activate: ActivationFn,
}

impl Constructor {
    pub fn slots(&self) -> &[DependencySlot] {
        &self.slots
    }

    pub(crate) fn activate(&self, arguments: &ConstructionArguments) -> anyhow::Result<Instance> {
        (self.activate)(arguments)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor").field("slots", &self.slots).finish()
    }
}

/// Неизменяемое описание зарегистрированного компонента
#[derive(Clone)]
pub struct ComponentDescription {
    name: String,
    implementation: &'static str,
    services: Vec<ServiceBinding>,
    constructors: Vec<Constructor>,
    properties: Vec<DependencySlot>,
    lifestyle: LifestyleKind,
    parameters: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    on_create: Vec<InstanceHook>,
    on_destroy: Vec<InstanceHook>,
    orphan_decorators: Vec<ServiceType>,
}

impl ComponentDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    pub fn services(&self) -> &[ServiceBinding] {
        &self.services
    }

    pub fn provides(&self, service: &ServiceType) -> bool {
        self.services.iter().any(|binding| binding.service == *service)
    }

    /// Конструкторы от большего числа слотов к меньшему; равные идут в
    /// порядке объявления
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn properties(&self) -> &[DependencySlot] {
        &self.properties
    }

    /// Все слоты: сначала конструкторов (в порядке `constructors`), затем свойства
    pub fn dependencies(&self) -> impl Iterator<Item = &DependencySlot> {
        self.constructors
            .iter()
            .flat_map(|constructor| constructor.slots.iter())
            .chain(self.properties.iter())
    }

    pub fn lifestyle(&self) -> &LifestyleKind {
        &self.lifestyle
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub(crate) fn commission_hooks(&self) -> &[InstanceHook] {
        &self.on_create
    }

    pub(crate) fn decommission_hooks(&self) -> &[InstanceHook] {
        &self.on_destroy
    }

    pub fn has_decommission(&self) -> bool {
        !self.on_destroy.is_empty()
    }

    /// Проверка структуры описания перед регистрацией
    pub fn validate(&self) -> KernelResult<()> {
        let invalid = |reason: String| Err(KernelError::invalid_description(&self.name, reason));

        if self.name.trim().is_empty() {
            return invalid("component name must not be empty".into());
        }
        if self.services.is_empty() {
            return invalid("component must expose at least one service".into());
        }
        if self.constructors.is_empty() {
            return invalid("component has no constructor".into());
        }
        if let Some(service) = self.orphan_decorators.first() {
            return invalid(format!("decorator targets service {} which is not exposed", service));
        }
        if let LifestyleKind::Pooled(PoolSettings { min, max, .. }) = &self.lifestyle {
            if *max == 0 || min > max {
                return invalid(format!("pool bounds min={} max={} are inconsistent", min, max));
            }
        }
        for constructor in &self.constructors {
            let mut keys = HashSet::new();
            for slot in constructor.slots.iter().chain(self.properties.iter()) {
                if !keys.insert(slot.key.as_str()) {
                    return invalid(format!("slot key '{}' is declared twice", slot.key));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ComponentDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescription")
            .field("name", &self.name)
            .field("implementation", &self.implementation)
            .field("services", &self.services)
            .field("constructors", &self.constructors)
            .field("properties", &self.properties)
            .field("lifestyle", &self.lifestyle)
            .field("parameters", &self.parameters)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Fluent builder описания компонента с реализацией `I`.
///
/// ```ignore
/// let description = Component::<FileLogger>::named("logger")
///     .service::<dyn Logger>(|logger| logger)
///     .constructor(vec![DependencySlot::parameter::<String>("path")], |args| {
///         Ok(FileLogger::new(args.value::<String>("path")?))
///     })
///     .singleton()
///     .build();
/// ```
pub struct Component<I> {
    name: String,
    services: Vec<ServiceBinding>,
    pending_decorators: Vec<(ServiceType, ErasedDecorator)>,
    constructors: Vec<Constructor>,
    properties: Vec<DependencySlot>,
    lifestyle: LifestyleKind,
    parameters: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    on_create: Vec<InstanceHook>,
    on_destroy: Vec<InstanceHook>,
    _implementation: PhantomData<fn() -> I>,
}

impl<I: Send + Sync + 'static> Component<I> {
    /// Компонент с именем по умолчанию (полное имя типа реализации)
    pub fn new() -> Self {
        Self::named(std::any::type_name::<I>())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
            pending_decorators: Vec::new(),
            constructors: Vec::new(),
            properties: Vec::new(),
            lifestyle: LifestyleKind::default(),
            parameters: HashMap::new(),
            metadata: HashMap::new(),
            on_create: Vec::new(),
            on_destroy: Vec::new(),
            _implementation: PhantomData,
        }
    }

    /// Уже созданный экземпляр; всегда Singleton
    pub fn instance(name: impl Into<String>, instance: Arc<I>) -> Self {
        let mut component = Self::named(name).singleton();
        let erased: Instance = instance;
        component.constructors.push(Constructor {
            slots: Vec::new(),
            activate: Arc::new(move |_: &ConstructionArguments| -> anyhow::Result<Instance> { Ok(erased.clone()) }),
        });
        component
    }

    /// Сервис `S`, получаемый из `Arc<I>` приведением (обычно unsize к `dyn Trait`)
    pub fn service<S: ?Sized + Send + Sync + 'static>(mut self, cast: fn(Arc<I>) -> Arc<S>) -> Self {
        let caster: ServiceCaster = Arc::new(move |instance: &Instance| {
            let concrete = instance.clone().downcast::<I>().ok()?;
            let view = cast(concrete);
            let id = InstanceId::of(&view);
            Some((service_value(view), id))
        });
        self.services.push(ServiceBinding {
            service: ServiceType::of::<S>(),
            caster,
            decorators: Vec::new(),
        });
        self
    }

    /// Сервисом выступает сам тип реализации
    pub fn self_service(self) -> Self {
        self.service::<I>(|instance| instance)
    }

    pub fn constructor<F>(mut self, slots: Vec<DependencySlot>, factory: F) -> Self
    where
        F: Fn(&ConstructionArguments) -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.constructors.push(Constructor {
            slots,
            activate: Arc::new(move |arguments: &ConstructionArguments| -> anyhow::Result<Instance> {
                let instance: Instance = Arc::new(factory(arguments)?);
                Ok(instance)
            }),
        });
        self
    }

    /// Конструктор без зависимостей
    pub fn factory<F>(self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<I> + Send + Sync + 'static,
    {
        self.constructor(Vec::new(), move |_| factory())
    }

    pub fn property(mut self, slot: DependencySlot) -> Self {
        let mut slot = slot;
        slot.kind = SlotKind::Property;
        self.properties.push(slot);
        self
    }

    pub fn lifestyle(mut self, lifestyle: LifestyleKind) -> Self {
        self.lifestyle = lifestyle;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifestyle(LifestyleKind::Singleton)
    }

    pub fn transient(self) -> Self {
        self.lifestyle(LifestyleKind::Transient)
    }

    pub fn scoped(self) -> Self {
        self.lifestyle(LifestyleKind::Scoped(ScopeKind::Ambient))
    }

    pub fn pooled(self, min: usize, max: usize) -> Self {
        self.lifestyle(LifestyleKind::Pooled(PoolSettings::new(min, max)))
    }

    pub fn per_thread(self) -> Self {
        self.lifestyle(LifestyleKind::PerThread)
    }

    pub fn parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Hook после создания, до применения декораторов
    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_create.push(typed_hook(hook));
        self
    }

    /// Hook при teardown экземпляра
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_destroy.push(typed_hook(hook));
        self
    }

    /// Обернуть view сервиса `S`; декораторы применяются в порядке добавления
    pub fn decorate<S, D>(mut self, decorator: D) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        D: ServiceDecorator<S> + 'static,
    {
        let erased: ErasedDecorator = Arc::new(move |component: &str, value: ServiceValue| -> anyhow::Result<(ServiceValue, InstanceId)> {
            let inner = downcast_service::<S>(&value)
                .ok_or_else(|| anyhow::anyhow!("decorated value is not {}", std::any::type_name::<S>()))?;
            let wrapped = decorator.decorate(component, inner)?;
            let id = InstanceId::of(&wrapped);
            Ok((service_value(wrapped), id))
        });
        self.pending_decorators.push((ServiceType::of::<S>(), erased));
        self
    }

    pub fn build(mut self) -> ComponentDescription {
        if self.services.is_empty() {
            self = self.self_service();
        }

        let mut orphan_decorators = Vec::new();
        for (service, decorator) in self.pending_decorators {
            match self.services.iter_mut().find(|binding| binding.service == service) {
                Some(binding) => binding.decorators.push(decorator),
                None => orphan_decorators.push(service),
            }
        }

        // Стабильная сортировка: при равном числе слотов сохраняется порядок объявления
        self.constructors
            .sort_by_key(|constructor| std::cmp::Reverse(constructor.slots.len()));

        ComponentDescription {
            name: self.name,
            implementation: std::any::type_name::<I>(),
            services: self.services,
            constructors: self.constructors,
            properties: self.properties,
            lifestyle: self.lifestyle,
            parameters: self.parameters,
            metadata: self.metadata,
            on_create: self.on_create,
            on_destroy: self.on_destroy,
            orphan_decorators,
        }
    }
}

impl<I: Send + Sync + 'static> Default for Component<I> {
    fn default() -> Self {
        Self::new()
    }
}

fn typed_hook<I, F>(hook: F) -> InstanceHook
where
    I: Send + Sync + 'static,
    F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |instance: &Instance| match (**instance).downcast_ref::<I>() {
        Some(typed) => hook(typed),
        None => Ok(()),
    })
}
