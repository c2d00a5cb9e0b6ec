use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::{SCOPE_PROTOTYPE, SCOPE_SINGLETON};
use crate::strategy::Instantiation;
use crate::value::{merge_constructor_args, BeanValue, PropertyValues, ResolvedValue};
use crate::{ContainerError, ContainerResult};

/// Bean 实例 - 容器中共享的不透明对象
///
/// 身份即指针身份：两个 `BeanInstance` 指向同一分配时才视为同一个 Bean。
/// 实现了 [`FactoryBean`] 的对象额外携带工厂能力。
#[derive(Clone)]
pub struct BeanInstance {
    object: Arc<dyn Any + Send + Sync>,
    factory: Option<Arc<dyn FactoryBean>>,
    type_name: &'static str,
}

impl BeanInstance {
    /// 包装一个普通对象
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self::from_arc(Arc::new(object))
    }

    /// 包装已有的共享对象（不会重新分配，保持身份）
    pub fn from_arc<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self {
            object,
            factory: None,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// 包装一个 FactoryBean，对象本身和工厂能力指向同一分配
    pub fn factory_bean<F: FactoryBean>(factory: F) -> Self {
        let shared = Arc::new(factory);
        Self {
            object: shared.clone(),
            factory: Some(shared),
            type_name: std::any::type_name::<F>(),
        }
    }

    /// 向下转型为具体类型
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.object.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        (*self.object).downcast_ref::<T>()
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        (*self.object).is::<T>()
    }

    /// 是否与另一个实例为同一对象
    pub fn ptr_eq(&self, other: &BeanInstance) -> bool {
        Arc::as_ptr(&self.object) as *const () == Arc::as_ptr(&other.object) as *const ()
    }

    pub fn is_factory_bean(&self) -> bool {
        self.factory.is_some()
    }

    pub fn as_factory_bean(&self) -> Option<&Arc<dyn FactoryBean>> {
        self.factory.as_ref()
    }

    /// 创建时的具体类型名称
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn as_any(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.object
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("type_name", &self.type_name)
            .field("ptr", &(Arc::as_ptr(&self.object) as *const ()))
            .field("factory_bean", &self.factory.is_some())
            .finish()
    }
}

/// FactoryBean - 自身是 Bean，但对外暴露它生产的对象
///
/// 通过 `name` 获取得到产品，通过 `&name` 获取得到工厂本身。
/// `is_singleton` 为 true 时，单例工厂的产品只生产一次并被缓存。
pub trait FactoryBean: Send + Sync + 'static {
    /// 生产对象
    fn get_object(&self) -> anyhow::Result<BeanInstance>;

    /// 产品类型名称（未知时返回 None）
    fn object_type(&self) -> Option<&str> {
        None
    }

    /// 产品是否为共享实例
    fn is_singleton(&self) -> bool {
        true
    }
}

/// 生命周期回调（init / destroy）
#[derive(Clone)]
pub struct LifecycleCallback(Arc<dyn Fn(&BeanInstance) -> anyhow::Result<()> + Send + Sync>);

impl LifecycleCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&BeanInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn invoke(&self, bean: &BeanInstance) -> anyhow::Result<()> {
        (self.0)(bean)
    }
}

impl PartialEq for LifecycleCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl fmt::Debug for LifecycleCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LifecycleCallback")
    }
}

/// 实例提供者 - 定义自带的构造能力
///
/// 由 [`SupplierConstructionStrategy`](crate::strategy::SupplierConstructionStrategy) 调用，
/// 容器只决定何时调用，不关心如何构造。
pub trait InstanceSupplier: Send + Sync {
    /// 创建原始实例
    fn instantiate(&self, ctx: &Instantiation<'_>) -> anyhow::Result<BeanInstance>;

    /// 设置属性
    fn set_property(
        &self,
        bean: &BeanInstance,
        property: &str,
        _value: ResolvedValue,
    ) -> anyhow::Result<()> {
        anyhow::bail!(
            "type '{}' does not accept property '{}'",
            bean.type_name(),
            property
        )
    }

    /// 产出的类型名称
    fn type_name(&self) -> &str;
}

/// 定义中的实现引用：类型描述或构造能力
#[derive(Clone)]
pub enum ImplementationRef {
    /// 按类型名称在构造策略中查找提供者
    TypeName(String),
    /// 定义直接携带的提供者
    Supplier(Arc<dyn InstanceSupplier>),
}

impl ImplementationRef {
    pub fn type_name(&self) -> &str {
        match self {
            ImplementationRef::TypeName(name) => name.as_str(),
            ImplementationRef::Supplier(supplier) => supplier.type_name(),
        }
    }
}

impl PartialEq for ImplementationRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ImplementationRef::TypeName(a), ImplementationRef::TypeName(b)) => a == b,
            (ImplementationRef::Supplier(a), ImplementationRef::Supplier(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ImplementationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplementationRef::TypeName(name) => f.debug_tuple("TypeName").field(name).finish(),
            ImplementationRef::Supplier(supplier) => {
                f.debug_tuple("Supplier").field(&supplier.type_name()).finish()
            }
        }
    }
}

type FactoryFn<T> = dyn Fn(&Instantiation<'_>) -> anyhow::Result<T> + Send + Sync;
type SetterFn<T> = dyn Fn(&T, &str, ResolvedValue) -> anyhow::Result<()> + Send + Sync;

/// 简单的函数工厂实现
///
/// ```rust,ignore
/// let factory = FunctionFactory::new(|ctx| Ok(Car::new(ctx.arg_str(0)?)))
///     .with_setter(|car: &Car, name, value| car.set(name, value));
/// ```
pub struct FunctionFactory<T> {
    factory_fn: Box<FactoryFn<T>>,
    setter: Option<Box<SetterFn<T>>>,
    wrap: fn(T) -> BeanInstance,
}

impl<T: Any + Send + Sync> FunctionFactory<T> {
    pub fn new<F>(factory_fn: F) -> Self
    where
        F: Fn(&Instantiation<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            factory_fn: Box::new(factory_fn),
            setter: None,
            wrap: BeanInstance::new::<T>,
        }
    }

    /// 设置属性注入函数
    pub fn with_setter<S>(mut self, setter: S) -> Self
    where
        S: Fn(&T, &str, ResolvedValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Box::new(setter));
        self
    }
}

impl<T: FactoryBean> FunctionFactory<T> {
    /// 产出 FactoryBean 的函数工厂
    pub fn for_factory_bean<F>(factory_fn: F) -> Self
    where
        F: Fn(&Instantiation<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            factory_fn: Box::new(factory_fn),
            setter: None,
            wrap: BeanInstance::factory_bean::<T>,
        }
    }
}

impl<T: Any + Send + Sync> InstanceSupplier for FunctionFactory<T> {
    fn instantiate(&self, ctx: &Instantiation<'_>) -> anyhow::Result<BeanInstance> {
        let instance = (self.factory_fn)(ctx)?;
        Ok((self.wrap)(instance))
    }

    fn set_property(
        &self,
        bean: &BeanInstance,
        property: &str,
        value: ResolvedValue,
    ) -> anyhow::Result<()> {
        let setter = self.setter.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "type '{}' does not accept property '{}'",
                std::any::type_name::<T>(),
                property
            )
        })?;
        let target = bean.downcast_ref::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "expected instance of '{}', got '{}'",
                std::any::type_name::<T>(),
                bean.type_name()
            )
        })?;
        setter(target, property, value)
    }

    fn type_name(&self) -> &str {
        std::any::type_name::<T>()
    }
}

/// Bean 定义 - 描述如何创建和管理 Bean
///
/// 原始定义可以声明父定义，未设置的字段从父定义继承；
/// 合并后的结果见 [`RootBeanDefinition`]。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeanDefinition {
    /// Bean 的名称
    pub name: String,

    /// 父定义名称
    pub parent_name: Option<String>,

    /// 实现引用
    pub implementation: Option<ImplementationRef>,

    /// 构造参数（按位置）
    pub constructor_args: Vec<BeanValue>,

    /// 属性赋值（保持声明顺序）
    pub properties: PropertyValues,

    /// 作用域名称，未设置时继承父定义或默认为单例
    pub scope: Option<String>,

    /// 是否延迟初始化（仅对单例有效）
    pub lazy_init: Option<bool>,

    pub primary: bool,

    /// 抽象定义只作为模板，不能被实例化
    pub abstract_definition: bool,

    /// 必须先于本 Bean 初始化的 Bean
    pub depends_on: Vec<String>,

    /// 工厂 Bean 名称（配合 factory_method_name 使用）
    pub factory_bean_name: Option<String>,

    /// 工厂方法名称
    pub factory_method_name: Option<String>,

    /// 初始化回调（@PostConstruct）
    pub init_callback: Option<LifecycleCallback>,

    /// 销毁回调（@PreDestroy）
    pub destroy_callback: Option<LifecycleCallback>,

    pub description: Option<String>,
}

impl BeanDefinition {
    /// 创建新的 Bean 定义
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 使用提供者创建 Bean 定义
    pub fn with_supplier_of<S>(name: impl Into<String>, supplier: S) -> Self
    where
        S: InstanceSupplier + 'static,
    {
        Self::new(name).with_supplier(supplier)
    }

    /// 设置实现引用
    pub fn with_implementation(mut self, implementation: ImplementationRef) -> Self {
        self.implementation = Some(implementation);
        self
    }

    /// 设置实现类型名称
    pub fn with_type_name(self, type_name: impl Into<String>) -> Self {
        self.with_implementation(ImplementationRef::TypeName(type_name.into()))
    }

    /// 设置实例提供者
    pub fn with_supplier<S>(self, supplier: S) -> Self
    where
        S: InstanceSupplier + 'static,
    {
        self.with_implementation(ImplementationRef::Supplier(Arc::new(supplier)))
    }

    /// 设置父定义
    pub fn with_parent(mut self, parent_name: impl Into<String>) -> Self {
        self.parent_name = Some(parent_name.into());
        self
    }

    /// 追加构造参数
    pub fn with_constructor_arg(mut self, value: impl Into<BeanValue>) -> Self {
        self.constructor_args.push(value.into());
        self
    }

    /// 添加属性
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<BeanValue>) -> Self {
        self.properties.add(name, value);
        self
    }

    /// 添加 Bean 引用属性
    pub fn with_reference(self, property: impl Into<String>, bean_name: impl Into<String>) -> Self {
        self.with_property(property, BeanValue::Ref(bean_name.into()))
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// 设置延迟初始化
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy_init = Some(lazy);
        self
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_abstract(mut self, abstract_definition: bool) -> Self {
        self.abstract_definition = abstract_definition;
        self
    }

    /// 设置依赖列表
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// 追加单个依赖
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// 通过另一个 Bean 的工厂方法创建
    pub fn with_factory_bean(
        mut self,
        factory_bean_name: impl Into<String>,
        factory_method_name: impl Into<String>,
    ) -> Self {
        self.factory_bean_name = Some(factory_bean_name.into());
        self.factory_method_name = Some(factory_method_name.into());
        self
    }

    /// 通过实现类型上的静态工厂方法创建
    pub fn with_factory_method(mut self, factory_method_name: impl Into<String>) -> Self {
        self.factory_method_name = Some(factory_method_name.into());
        self
    }

    /// 设置初始化回调
    pub fn with_init<F>(mut self, init_fn: F) -> Self
    where
        F: Fn(&BeanInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init_callback = Some(LifecycleCallback::new(init_fn));
        self
    }

    /// 设置销毁回调
    pub fn with_destroy<F>(mut self, destroy_fn: F) -> Self
    where
        F: Fn(&BeanInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.destroy_callback = Some(LifecycleCallback::new(destroy_fn));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 注册前的结构校验
    pub fn validate(&self) -> ContainerResult<()> {
        let invalid = |reason: &str| ContainerError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("bean name must not be empty"));
        }
        if matches!(&self.scope, Some(scope) if scope.trim().is_empty()) {
            return Err(invalid("scope name must not be empty"));
        }
        if self.depends_on.iter().any(|dep| dep == &self.name) {
            return Err(invalid("bean cannot depend on itself"));
        }
        if self.factory_bean_name.is_some() && self.factory_method_name.is_none() {
            return Err(invalid("factory bean reference requires a factory method"));
        }
        Ok(())
    }

    /// 以父定义（已合并）为基础覆盖当前定义，得到无父定义的结果
    pub fn merged_over(&self, parent: &BeanDefinition) -> BeanDefinition {
        BeanDefinition {
            name: self.name.clone(),
            parent_name: None,
            implementation: self
                .implementation
                .clone()
                .or_else(|| parent.implementation.clone()),
            constructor_args: merge_constructor_args(&self.constructor_args, &parent.constructor_args),
            properties: self.properties.merged_over(&parent.properties),
            scope: self.scope.clone().or_else(|| parent.scope.clone()),
            lazy_init: self.lazy_init.or(parent.lazy_init),
            primary: self.primary,
            abstract_definition: self.abstract_definition,
            depends_on: if self.depends_on.is_empty() {
                parent.depends_on.clone()
            } else {
                self.depends_on.clone()
            },
            factory_bean_name: self
                .factory_bean_name
                .clone()
                .or_else(|| parent.factory_bean_name.clone()),
            factory_method_name: self
                .factory_method_name
                .clone()
                .or_else(|| parent.factory_method_name.clone()),
            init_callback: self
                .init_callback
                .clone()
                .or_else(|| parent.init_callback.clone()),
            destroy_callback: self
                .destroy_callback
                .clone()
                .or_else(|| parent.destroy_callback.clone()),
            description: self
                .description
                .clone()
                .or_else(|| parent.description.clone()),
        }
    }

    /// 填充合并后的默认值（单例、非延迟）
    fn with_defaults(mut self) -> Self {
        self.parent_name = None;
        self.scope.get_or_insert_with(|| SCOPE_SINGLETON.to_string());
        self.lazy_init.get_or_insert(false);
        self
    }
}

/// 合并定义上缓存的解析元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMetadata {
    pub resolved_type: Option<String>,
    pub resolved_constructor: Option<String>,
    pub is_factory_bean: Option<bool>,
}

/// 合并后的 Bean 定义
///
/// 不再有父定义；祖先链记录在 `parent_chain` 中。祖先被修改时 `stale`
/// 被置位，下一次访问会重新合并。父合并定义（可能来自父存储）失效时本定义
/// 同样视为失效。解析元数据在首次创建时填充。
#[derive(Debug)]
pub struct RootBeanDefinition {
    definition: BeanDefinition,
    parent_chain: Vec<String>,
    parent_root: Option<Arc<RootBeanDefinition>>,
    stale: AtomicBool,
    resolved: Mutex<ResolvedMetadata>,
}

impl RootBeanDefinition {
    /// 由合并结果和参与合并的祖先名称创建
    pub fn new(definition: BeanDefinition, parent_chain: Vec<String>) -> Self {
        Self {
            definition: definition.with_defaults(),
            parent_chain,
            parent_root: None,
            stale: AtomicBool::new(false),
            resolved: Mutex::new(ResolvedMetadata::default()),
        }
    }

    /// 记录直接父定义的合并结果
    pub fn with_parent_root(mut self, parent_root: Arc<RootBeanDefinition>) -> Self {
        self.parent_root = Some(parent_root);
        self
    }

    pub fn definition(&self) -> &BeanDefinition {
        &self.definition
    }

    /// 参与合并的祖先定义名称，由近到远
    pub fn parent_chain(&self) -> &[String] {
        &self.parent_chain
    }

    /// 是否由给定名称的定义（自身或祖先）合并而来
    pub fn is_derived_from(&self, name: &str) -> bool {
        self.definition.name == name || self.parent_chain.iter().any(|p| p == name)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire) || self.parent_root.as_ref().is_some_and(|p| p.is_stale())
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn scope_name(&self) -> &str {
        self.definition.scope.as_deref().unwrap_or(SCOPE_SINGLETON)
    }

    pub fn is_singleton(&self) -> bool {
        self.scope_name() == SCOPE_SINGLETON
    }

    pub fn is_prototype(&self) -> bool {
        self.scope_name() == SCOPE_PROTOTYPE
    }

    pub fn is_lazy_init(&self) -> bool {
        self.definition.lazy_init.unwrap_or(false)
    }

    pub fn is_abstract(&self) -> bool {
        self.definition.abstract_definition
    }

    /// 缓存的解析元数据快照
    pub fn resolved_metadata(&self) -> ResolvedMetadata {
        self.resolved.lock().clone()
    }

    /// 更新缓存的解析元数据
    pub fn update_metadata(&self, update: impl FnOnce(&mut ResolvedMetadata)) {
        update(&mut self.resolved.lock());
    }

    /// 非抽象定义必须能够被实例化
    pub fn check_instantiable(&self) -> ContainerResult<()> {
        if self.is_abstract() {
            return Err(ContainerError::AbstractDefinition(self.definition.name.clone()));
        }
        if self.definition.implementation.is_none() && self.definition.factory_bean_name.is_none() {
            return Err(ContainerError::InvalidDefinition {
                name: self.definition.name.clone(),
                reason: "neither an implementation nor a factory bean is declared".to_string(),
            });
        }
        Ok(())
    }
}

impl Deref for RootBeanDefinition {
    type Target = BeanDefinition;

    fn deref(&self) -> &Self::Target {
        &self.definition
    }
}
