//! Bean Factory - 核心容器接口
//!
//! 参考 Spring 的 BeanFactory 架构设计：`BeanFactory` 提供最基础的访问，
//! `ListableBeanFactory` 提供列举能力，`ConfigurableBeanFactory` 提供作用域、
//! 后置处理器、别名和销毁等配置能力，`DefaultListableBeanFactory` 是默认实现。

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::bean::{BeanDefinition, BeanInstance, FactoryBean, RootBeanDefinition};
use crate::config::ContainerConfig;
use crate::constants::{is_factory_dereference, strip_factory_prefix, FACTORY_BEAN_PREFIX};
use crate::dependency::CreationTracker;
use crate::lifecycle::{
    apply_after_initialization, apply_before_initialization, apply_early_reference,
    run_destruction_callback, BeanPostProcessor, DestructionReport, DisposableBeanAdapter,
};
use crate::registry::DefinitionRegistry;
use crate::scope::{Scope, ScopeRegistry};
use crate::singleton::DefaultSingletonRegistry;
use crate::strategy::{
    ConfigSource, ConstructionStrategy, DefaultReferenceResolver, Instantiation, ReferenceResolver,
    ResolutionContext, SupplierConstructionStrategy,
};
use crate::value::ResolvedValue;
use crate::{ContainerError, ContainerResult};

/// BeanFactory - 最基础的容器接口
///
/// 提供基本的 Bean 访问功能，类似 Spring 的 BeanFactory
///
/// 注意：此 trait 不包含泛型方法，因此可以作为 trait object 使用
pub trait BeanFactory: Send + Sync {
    /// 通过名称获取 Bean（名称可以是别名；`&name` 返回 FactoryBean 本身）
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance>;

    /// 检查是否包含指定名称的 Bean（定义或已注册的单例）
    fn contains_bean(&self, name: &str) -> bool;

    /// 是否为共享实例
    fn is_singleton(&self, name: &str) -> ContainerResult<bool>;

    /// 是否每次获取都返回新实例
    fn is_prototype(&self, name: &str) -> ContainerResult<bool>;

    /// Bean 的类型名称（无法确定时返回 None）
    fn get_type(&self, name: &str) -> ContainerResult<Option<String>>;

    /// 名称的所有别名
    fn get_aliases(&self, name: &str) -> Vec<String>;
}

/// BeanFactoryExt - BeanFactory 的扩展 trait
///
/// 提供泛型方法，不能作为 trait object 使用
pub trait BeanFactoryExt: BeanFactory {
    /// 获取 Bean 并转换为具体类型
    fn get_bean_typed<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        self.get_bean(name)?
            .downcast::<T>()
            .ok_or_else(|| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

impl<F: BeanFactory + ?Sized> BeanFactoryExt for F {}

/// ListableBeanFactory - 可列举的 Bean 工厂
///
/// 扩展 BeanFactory，提供列举所有 Bean 的能力
pub trait ListableBeanFactory: BeanFactory {
    /// 检查是否包含指定的 Bean 定义（不含父工厂）
    fn contains_bean_definition(&self, name: &str) -> bool;

    /// 获取 Bean 定义的数量
    fn get_bean_definition_count(&self) -> usize;

    /// 获取所有 Bean 定义的名称（注册顺序）
    fn get_bean_definition_names(&self) -> Vec<String>;

    /// 获取指定类型的所有 Bean 名称
    fn get_bean_names_for_type(&self, type_name: &str) -> Vec<String>;

    /// 是否被标记为首选 Bean
    fn is_primary(&self, name: &str) -> bool;
}

/// ListableBeanFactory 的泛型扩展
pub trait ListableBeanFactoryExt: ListableBeanFactory {
    /// 通过类型获取 Bean，多个候选时选择唯一的首选 Bean
    fn get_bean_by_type<T: Any + Send + Sync>(&self) -> ContainerResult<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        let candidates = self.get_bean_names_for_type(type_name);
        let name = match candidates.as_slice() {
            [] => return Err(ContainerError::NoSuchDefinition(type_name.to_string())),
            [only] => only.clone(),
            _ => {
                let primaries: Vec<_> = candidates.iter().filter(|n| self.is_primary(n)).collect();
                match primaries.as_slice() {
                    [primary] => (*primary).clone(),
                    _ => {
                        return Err(ContainerError::NoUniqueBean {
                            type_name: type_name.to_string(),
                            candidates,
                        })
                    }
                }
            }
        };
        self.get_bean_typed::<T>(&name)
    }
}

impl<F: ListableBeanFactory + ?Sized> ListableBeanFactoryExt for F {}

/// ConfigurableBeanFactory - 可配置的 Bean 工厂
///
/// 提供作用域、后置处理器、别名、依赖关系和销毁等配置能力
pub trait ConfigurableBeanFactory: BeanFactory {
    /// 注册自定义作用域
    fn register_scope(&self, scope_name: &str, scope: Arc<dyn Scope>) -> ContainerResult<()>;

    /// 已注册的自定义作用域名称（不含 singleton / prototype）
    fn get_registered_scope_names(&self) -> Vec<String>;

    fn get_registered_scope(&self, scope_name: &str) -> ContainerResult<Arc<dyn Scope>>;

    /// 添加 BeanPostProcessor（按注册顺序调用；重复添加会移到末尾）
    fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>);

    fn get_bean_post_processor_count(&self) -> usize;

    /// 注册别名
    fn register_alias(&self, alias: &str, target: &str) -> ContainerResult<()>;

    /// 用名称改写函数改写所有别名
    fn resolve_aliases(&self, resolver: &dyn Fn(&str) -> Option<String>) -> ContainerResult<()>;

    /// 获取合并后的 Bean 定义
    fn get_merged_bean_definition(&self, name: &str) -> ContainerResult<Arc<RootBeanDefinition>>;

    /// 是否为 FactoryBean
    fn is_factory_bean(&self, name: &str) -> ContainerResult<bool>;

    /// 注册外部创建的单例
    fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()>;

    /// 显式控制名称是否参与"正在创建"检查
    fn set_currently_in_creation(&self, name: &str, in_creation: bool);

    fn is_currently_in_creation(&self, name: &str) -> bool;

    /// 记录 `dependent` 依赖于 `bean`
    fn register_dependent_bean(&self, bean: &str, dependent: &str);

    /// 依赖于 `bean` 的 Bean
    fn get_dependent_beans(&self, bean: &str) -> Vec<String>;

    /// `bean` 依赖的 Bean
    fn get_dependencies_for_bean(&self, bean: &str) -> Vec<String>;

    /// 销毁给定实例（通常是原型实例）
    fn destroy_bean(&self, name: &str, instance: &BeanInstance) -> DestructionReport;

    /// 从自定义作用域中移除并销毁 Bean
    fn destroy_scoped_bean(&self, name: &str) -> ContainerResult<DestructionReport>;

    /// 销毁所有单例 Bean（从不失败）
    fn destroy_singletons(&self) -> DestructionReport;
}

/// ConfigurableListableBeanFactory - 可配置且可列举的 Bean 工厂
///
/// 结合了 ListableBeanFactory 和 ConfigurableBeanFactory 的功能
pub trait ConfigurableListableBeanFactory: ListableBeanFactory + ConfigurableBeanFactory {
    /// 注册 Bean 定义
    fn register_bean_definition(&self, definition: BeanDefinition) -> ContainerResult<()>;

    /// 移除 Bean 定义
    fn remove_bean_definition(&self, name: &str) -> ContainerResult<()>;

    /// 获取原始 Bean 定义
    fn get_bean_definition(&self, name: &str) -> ContainerResult<Arc<BeanDefinition>>;

    /// 从定义来源加载定义和别名，返回加载的定义数量
    fn load_definitions(&self, source: &dyn ConfigSource) -> ContainerResult<usize>;

    /// 预实例化所有非延迟单例 Bean
    fn preinstantiate_singletons(&self) -> ContainerResult<()>;

    /// 冻结配置（不再允许修改 Bean 定义）
    fn freeze_configuration(&self);

    /// 检查配置是否已冻结
    fn is_configuration_frozen(&self) -> bool;
}

/// 单例 FactoryBean 的产品槽位，同名产品的创建在槽位锁下进行
type ProductSlot = Arc<ReentrantMutex<RefCell<Option<BeanInstance>>>>;

/// DefaultListableBeanFactory 的构建器
pub struct BeanFactoryBuilder {
    config: ContainerConfig,
    parent: Option<Arc<DefaultListableBeanFactory>>,
    construction: Option<Arc<dyn ConstructionStrategy>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
}

impl BeanFactoryBuilder {
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            parent: None,
            construction: None,
            resolver: None,
        }
    }

    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置父工厂，未在本地定义的名称委托给父工厂
    pub fn with_parent(mut self, parent: Arc<DefaultListableBeanFactory>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_construction_strategy(mut self, strategy: Arc<dyn ConstructionStrategy>) -> Self {
        self.construction = Some(strategy);
        self
    }

    pub fn with_reference_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> DefaultListableBeanFactory {
        let registry = DefinitionRegistry::new(
            &self.config,
            self.parent.as_ref().map(|p| p.registry.clone()),
        );
        let singletons = Arc::new(DefaultSingletonRegistry::new());
        DefaultListableBeanFactory {
            registry: Arc::new(registry),
            scopes: ScopeRegistry::new(singletons.clone()),
            singletons,
            bean_post_processors: RwLock::new(Vec::new()),
            construction: self
                .construction
                .unwrap_or_else(|| Arc::new(SupplierConstructionStrategy::new())),
            resolver: self.resolver.unwrap_or_else(|| Arc::new(DefaultReferenceResolver)),
            prototypes_in_creation: CreationTracker::with_max_depth(self.config.max_creation_depth),
            creation_path: CreationTracker::with_max_depth(self.config.max_creation_depth),
            factory_bean_objects: Mutex::new(HashMap::new()),
            parent: self.parent,
            configuration_frozen: RwLock::new(false),
            config: self.config,
        }
    }
}

impl Default for BeanFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// DefaultListableBeanFactory - ConfigurableListableBeanFactory 的默认实现
///
/// 这是实际的 Bean 容器实现，类似 Spring 的 DefaultListableBeanFactory
pub struct DefaultListableBeanFactory {
    config: ContainerConfig,

    /// Bean 定义存储（含合并缓存与别名）
    registry: Arc<DefinitionRegistry>,

    /// 单例缓存与依赖关系
    singletons: Arc<DefaultSingletonRegistry>,

    scopes: ScopeRegistry,

    /// Bean 后置处理器列表（按注册顺序）
    bean_post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,

    construction: Arc<dyn ConstructionStrategy>,

    resolver: Arc<dyn ReferenceResolver>,

    /// 当前线程正在创建的非单例 Bean
    prototypes_in_creation: CreationTracker,

    /// 当前线程的创建路径（用于错误信息和深度限制）
    creation_path: CreationTracker,

    /// 单例 FactoryBean 的产品缓存
    factory_bean_objects: Mutex<HashMap<String, ProductSlot>>,

    parent: Option<Arc<DefaultListableBeanFactory>>,

    /// 配置是否已冻结
    configuration_frozen: RwLock<bool>,
}

impl Default for DefaultListableBeanFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultListableBeanFactory {
    /// 使用默认配置创建新的 Bean 工厂
    pub fn new() -> Self {
        BeanFactoryBuilder::new().build()
    }

    pub fn builder() -> BeanFactoryBuilder {
        BeanFactoryBuilder::new()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn parent_bean_factory(&self) -> Option<&Arc<DefaultListableBeanFactory>> {
        self.parent.as_ref()
    }

    pub fn singleton_registry(&self) -> &Arc<DefaultSingletonRegistry> {
        &self.singletons
    }

    /// 去掉 `&` 前缀并解析别名
    pub fn transformed_bean_name(&self, name: &str) -> ContainerResult<String> {
        self.registry.canonical_name(strip_factory_prefix(name))
    }

    /// 当前单例数量
    pub fn singleton_count(&self) -> usize {
        self.singletons.singleton_count()
    }

    /// 销毁单个单例（以及依赖它的 Bean）
    pub fn destroy_singleton(&self, name: &str) -> DestructionReport {
        let report = self.singletons.destroy_singleton(name);
        let mut products = self.factory_bean_objects.lock();
        for destroyed in &report.destroyed {
            products.remove(destroyed);
        }
        report
    }

    fn processors_snapshot(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.bean_post_processors.read().clone()
    }

    fn check_frozen(&self, action: &str) -> ContainerResult<()> {
        if *self.configuration_frozen.read() {
            return Err(ContainerError::ConfigurationFrozen(action.to_string()));
        }
        Ok(())
    }

    /// 用当前线程的创建路径补全循环引用错误
    fn with_creation_chain(&self, err: ContainerError) -> ContainerError {
        match err {
            ContainerError::UnresolvableCircularReference { name, chain } if chain.is_empty() => {
                ContainerError::UnresolvableCircularReference {
                    name,
                    chain: self.creation_path.current_creating(),
                }
            }
            other => other,
        }
    }

    fn do_get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        let bean_name = self.transformed_bean_name(name)?;
        let (instance, _) = self.get_bean_instance(name, &bean_name)?;
        self.get_object_for_bean_instance(instance, name, &bean_name)
    }

    /// 获取 Bean 实例本身（FactoryBean 不会被解引用）
    ///
    /// 1. 检查单例缓存（只有创建线程能拿到早期引用）
    /// 2. 检查原型重入
    /// 3. 本地没有定义时委托父工厂
    /// 4. 合并定义并拒绝抽象定义
    /// 5. 进入创建路径（深度限制）
    /// 6. 先初始化 depends-on
    /// 7. 交给作用域创建
    fn get_bean_instance(
        &self,
        name: &str,
        bean_name: &str,
    ) -> ContainerResult<(BeanInstance, Option<Arc<RootBeanDefinition>>)> {
        if let Some(shared) = self.singletons.get_singleton(bean_name, true)? {
            if self.singletons.is_singleton_currently_in_creation(bean_name) {
                tracing::trace!(
                    "Returning eagerly cached instance of singleton bean '{}' that is not fully initialized yet - a consequence of a circular reference",
                    bean_name
                );
            } else {
                tracing::trace!("Returning cached instance of singleton bean '{}'", bean_name);
            }
            return Ok((shared, None));
        }

        if self.prototypes_in_creation.is_creating(bean_name) {
            let mut chain = self.creation_path.current_creating();
            chain.push(bean_name.to_string());
            return Err(ContainerError::CurrentlyInCreation {
                name: bean_name.to_string(),
                chain,
            });
        }

        if let Some(parent) = &self.parent {
            if !self.registry.contains_local(bean_name) {
                let original = if is_factory_dereference(name) {
                    format!("{}{}", FACTORY_BEAN_PREFIX, bean_name)
                } else {
                    bean_name.to_string()
                };
                tracing::trace!("Delegating lookup of bean '{}' to parent factory", bean_name);
                let instance = parent.get_bean(&original)?;
                return Ok((instance, None));
            }
        }

        let mbd = self.registry.get_merged(bean_name)?;
        mbd.check_instantiable()?;

        let _path = self.creation_path.enter_path(bean_name)?;

        for dep in &mbd.depends_on {
            let dep_name = self.registry.canonical_name(dep)?;
            if self.singletons.is_dependent(bean_name, &dep_name) {
                return Err(ContainerError::CyclicDependency {
                    chain: vec![bean_name.to_string(), dep_name.clone(), bean_name.to_string()],
                });
            }
            // 依赖自身图中更深处的缺失名称原样向上传递
            if !self.contains_bean(&dep_name) {
                return Err(ContainerError::MissingDependency {
                    bean: bean_name.to_string(),
                    dependency: dep.clone(),
                });
            }
            self.singletons.register_dependent_bean(&dep_name, bean_name);
            self.get_bean(dep)?;
        }

        let instance = if mbd.is_singleton() {
            self.singletons
                .get_or_create(bean_name, || {
                    tracing::debug!("Creating shared instance of singleton bean '{}'", bean_name);
                    self.create_bean(bean_name, &mbd)
                })
                .map_err(|e| self.with_creation_chain(e))?
        } else if mbd.is_prototype() {
            let _guard = self.prototypes_in_creation.enter(bean_name)?;
            tracing::trace!("Creating new instance of prototype bean '{}'", bean_name);
            self.create_bean(bean_name, &mbd)?
        } else {
            let scope_name = mbd.scope_name();
            let scope = self.scopes.get(scope_name)?;
            scope.get(bean_name, &|| -> ContainerResult<BeanInstance> {
                let _guard = self.prototypes_in_creation.enter(bean_name)?;
                tracing::trace!("Creating instance of bean '{}' in scope '{}'", bean_name, scope_name);
                self.create_bean(bean_name, &mbd)
            })?
        };
        Ok((instance, Some(mbd)))
    }

    /// FactoryBean 解引用：`&name` 返回工厂本身，`name` 返回产品
    fn get_object_for_bean_instance(
        &self,
        instance: BeanInstance,
        name: &str,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        if is_factory_dereference(name) {
            if !instance.is_factory_bean() {
                return Err(ContainerError::NotAFactoryBean(bean_name.to_string()));
            }
            return Ok(instance);
        }

        let Some(factory) = instance.as_factory_bean() else {
            return Ok(instance);
        };

        if !(factory.is_singleton() && self.singletons.contains_singleton(bean_name)) {
            return self.get_object_from_factory_bean(factory, bean_name);
        }

        let slot = self
            .factory_bean_objects
            .lock()
            .entry(bean_name.to_string())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(RefCell::new(None))))
            .clone();
        let guard = slot.lock();
        if let Some(product) = guard.borrow().clone() {
            return Ok(product);
        }

        let product = self.get_object_from_factory_bean(factory, bean_name)?;
        // 同一线程的嵌套调用可能已经放入产品
        let mut cached = guard.borrow_mut();
        Ok(cached.get_or_insert(product).clone())
    }

    fn get_object_from_factory_bean(
        &self,
        factory: &Arc<dyn FactoryBean>,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        let product = factory
            .get_object()
            .map_err(|source| ContainerError::Instantiation {
                name: bean_name.to_string(),
                source,
            })?;
        apply_after_initialization(&self.processors_snapshot(), product, bean_name)
    }

    /// 创建 Bean 实例并调用生命周期回调
    ///
    /// # Bean 生命周期顺序
    /// 1. 实例化前处理器（可以直接返回实例）
    /// 2. 实例化（构造参数解析 + 构造策略）
    /// 3. 早期暴露（允许循环引用的单例）
    /// 4. 依赖注入（属性填充）
    /// 5. BeanPostProcessor.post_process_before_initialization
    /// 6. init 回调
    /// 7. BeanPostProcessor.post_process_after_initialization
    /// 8. 早期引用一致性检查
    /// 9. 注册销毁回调
    fn create_bean(&self, bean_name: &str, mbd: &RootBeanDefinition) -> ContainerResult<BeanInstance> {
        tracing::trace!("Creating instance of bean '{}'", bean_name);
        let processors = self.processors_snapshot();

        for processor in &processors {
            if let Some(bean) = processor.post_process_before_instantiation(bean_name, mbd)? {
                tracing::debug!(
                    "Bean '{}' short-circuited by post processor '{}'",
                    bean_name,
                    processor.name()
                );
                return apply_after_initialization(&processors, bean, bean_name);
            }
        }

        self.do_create_bean(bean_name, mbd, &processors)
    }

    fn do_create_bean(
        &self,
        bean_name: &str,
        mbd: &RootBeanDefinition,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<BeanInstance> {
        let raw = self.create_bean_instance(bean_name, mbd)?;

        let early_exposure = mbd.is_singleton()
            && self.config.allow_circular_references
            && self.singletons.is_singleton_currently_in_creation(bean_name);
        if early_exposure {
            tracing::trace!(
                "Eagerly caching bean '{}' to allow for resolving potential circular references",
                bean_name
            );
            let early_raw = raw.clone();
            let early_processors = processors.to_vec();
            let early_name = bean_name.to_string();
            self.singletons.add_singleton_factory(
                bean_name,
                Box::new(move || apply_early_reference(&early_processors, early_raw, &early_name)),
            );
        }

        self.populate_bean(bean_name, mbd, &raw, processors)?;
        let mut exposed = self.initialize_bean(bean_name, mbd, raw.clone(), processors)?;

        if early_exposure {
            if let Some(early) = self.singletons.get_singleton(bean_name, false)? {
                if exposed.ptr_eq(&raw) {
                    exposed = early;
                } else if !self.config.allow_raw_injection_despite_wrapping {
                    let dependents = self.singletons.dependent_beans(bean_name);
                    if !dependents.is_empty() {
                        return Err(ContainerError::CycleIdentity {
                            name: bean_name.to_string(),
                            dependents,
                        });
                    }
                }
            }
        }

        self.register_disposable_bean_if_necessary(bean_name, mbd, &raw, processors)?;
        Ok(exposed)
    }

    /// 解析工厂 Bean 和构造参数，然后交给构造策略
    fn create_bean_instance(&self, bean_name: &str, mbd: &RootBeanDefinition) -> ContainerResult<BeanInstance> {
        let ctx = ResolutionContext::new(self, bean_name);

        let factory_instance = match &mbd.factory_bean_name {
            Some(factory_bean) if factory_bean == bean_name => {
                return Err(ContainerError::InvalidDefinition {
                    name: bean_name.to_string(),
                    reason: "factory bean reference points back to the same bean definition".to_string(),
                })
            }
            Some(factory_bean) => Some(ctx.get_bean(factory_bean)?),
            None => None,
        };

        let args = mbd
            .constructor_args
            .iter()
            .map(|value| self.resolver.resolve(value, &ctx))
            .collect::<ContainerResult<Vec<ResolvedValue>>>()?;

        let mut instantiation = Instantiation::new(bean_name, mbd);
        instantiation.args = args;
        instantiation.factory_instance = factory_instance;
        let raw = self.construction.instantiate(&instantiation)?;

        if mbd.resolved_metadata().resolved_type.is_none() {
            let resolved_type = self
                .construction
                .predict_type(mbd)
                .unwrap_or_else(|| raw.type_name().to_string());
            let resolved_constructor = self.construction.resolve_constructor(mbd);
            mbd.update_metadata(|metadata| {
                metadata.resolved_type = Some(resolved_type);
                metadata.resolved_constructor = resolved_constructor;
                metadata.is_factory_bean = Some(raw.is_factory_bean());
            });
        }
        Ok(raw)
    }

    /// 属性注入，按声明顺序
    fn populate_bean(
        &self,
        bean_name: &str,
        mbd: &RootBeanDefinition,
        raw: &BeanInstance,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<()> {
        for processor in processors {
            if !processor.post_process_after_instantiation(raw, bean_name)? {
                tracing::trace!(
                    "Property population of bean '{}' skipped by post processor '{}'",
                    bean_name,
                    processor.name()
                );
                return Ok(());
            }
        }
        if mbd.properties.is_empty() {
            return Ok(());
        }

        let ctx = ResolutionContext::new(self, bean_name);
        for property in mbd.properties.iter() {
            let value = self.resolver.resolve(&property.value, &ctx)?;
            self.construction
                .apply_property(bean_name, mbd, raw, &property.name, value)?;
        }
        Ok(())
    }

    fn initialize_bean(
        &self,
        bean_name: &str,
        mbd: &RootBeanDefinition,
        raw: BeanInstance,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<BeanInstance> {
        let wrapped = apply_before_initialization(processors, raw, bean_name)?;

        if let Some(init) = &mbd.init_callback {
            tracing::trace!("Invoking init callback on bean '{}'", bean_name);
            init.invoke(&wrapped)
                .map_err(|source| ContainerError::Initialization {
                    name: bean_name.to_string(),
                    source,
                })?;
        }

        apply_after_initialization(processors, wrapped, bean_name)
    }

    fn register_disposable_bean_if_necessary(
        &self,
        bean_name: &str,
        mbd: &RootBeanDefinition,
        raw: &BeanInstance,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> ContainerResult<()> {
        if mbd.is_prototype() {
            return Ok(());
        }
        let Some(adapter) =
            DisposableBeanAdapter::new(raw.clone(), bean_name, mbd.destroy_callback.clone(), processors)
        else {
            return Ok(());
        };

        if mbd.is_singleton() {
            self.singletons
                .register_disposable_bean(bean_name, adapter.into_callback());
        } else {
            self.scopes
                .get(mbd.scope_name())?
                .register_destruction_callback(bean_name, adapter.into_callback());
        }
        Ok(())
    }

    /// 定义被替换或移除后清理相关单例
    fn reset_bean_definition(&self, bean_name: &str) {
        let report = self.destroy_singleton(bean_name);
        if !report.is_clean() {
            tracing::warn!(
                "Destroying singleton '{}' during definition reset reported failures: {:?}",
                bean_name,
                report.failures
            );
        }
    }
}

impl BeanFactory for DefaultListableBeanFactory {
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        tracing::trace!("Requesting bean: '{}'", name);
        self.do_get_bean(name)
    }

    fn contains_bean(&self, name: &str) -> bool {
        let Ok(bean_name) = self.transformed_bean_name(name) else {
            return false;
        };
        if self.singletons.contains_singleton(&bean_name) || self.registry.contains_local(&bean_name) {
            return !is_factory_dereference(name) || self.is_factory_bean(name).unwrap_or(false);
        }
        self.parent.as_ref().is_some_and(|p| p.contains_bean(name))
    }

    fn is_singleton(&self, name: &str) -> ContainerResult<bool> {
        let bean_name = self.transformed_bean_name(name)?;
        let dereference = is_factory_dereference(name);

        if let Some(instance) = self.singletons.get_singleton(&bean_name, false)? {
            return Ok(match instance.as_factory_bean() {
                Some(factory) => dereference || factory.is_singleton(),
                None => !dereference,
            });
        }

        if !self.registry.contains_local(&bean_name) {
            if let Some(parent) = &self.parent {
                return parent.is_singleton(name);
            }
        }

        let mbd = self.registry.get_merged(&bean_name)?;
        if !mbd.is_singleton() {
            return Ok(false);
        }
        if !dereference && self.is_factory_bean(&bean_name)? {
            let factory = self.get_bean(&format!("{}{}", FACTORY_BEAN_PREFIX, bean_name))?;
            return Ok(factory.as_factory_bean().is_some_and(|f| f.is_singleton()));
        }
        Ok(true)
    }

    fn is_prototype(&self, name: &str) -> ContainerResult<bool> {
        let bean_name = self.transformed_bean_name(name)?;
        let dereference = is_factory_dereference(name);

        if !self.registry.contains_local(&bean_name) {
            if let Some(parent) = &self.parent {
                return parent.is_prototype(name);
            }
            if self.singletons.contains_singleton(&bean_name) {
                return Ok(false);
            }
        }

        let mbd = self.registry.get_merged(&bean_name)?;
        if mbd.is_prototype() {
            return Ok(!dereference || mbd.resolved_metadata().is_factory_bean == Some(true));
        }
        if dereference {
            return Ok(false);
        }
        if mbd.is_singleton() && self.is_factory_bean(&bean_name)? {
            let factory = self.get_bean(&format!("{}{}", FACTORY_BEAN_PREFIX, bean_name))?;
            return Ok(factory.as_factory_bean().is_some_and(|f| !f.is_singleton()));
        }
        Ok(false)
    }

    fn get_type(&self, name: &str) -> ContainerResult<Option<String>> {
        let bean_name = self.transformed_bean_name(name)?;
        let dereference = is_factory_dereference(name);

        if let Some(instance) = self.singletons.get_singleton(&bean_name, false)? {
            return Ok(match instance.as_factory_bean() {
                Some(factory) if !dereference => factory.object_type().map(str::to_string),
                _ => Some(instance.type_name().to_string()),
            });
        }

        if !self.registry.contains_local(&bean_name) {
            if let Some(parent) = &self.parent {
                return parent.get_type(name);
            }
        }

        let mbd = self.registry.get_merged(&bean_name)?;
        let metadata = mbd.resolved_metadata();
        if metadata.is_factory_bean == Some(true) && !dereference {
            return Ok(None);
        }
        Ok(metadata
            .resolved_type
            .or_else(|| self.construction.predict_type(&mbd)))
    }

    fn get_aliases(&self, name: &str) -> Vec<String> {
        let stripped = strip_factory_prefix(name);
        let canonical = self
            .registry
            .canonical_name(stripped)
            .unwrap_or_else(|_| stripped.to_string());

        let mut aliases = self.registry.aliases().aliases_for(&canonical);
        if canonical != stripped {
            aliases.insert(0, canonical);
            aliases.retain(|alias| alias != stripped);
        }
        if is_factory_dereference(name) {
            aliases = aliases
                .into_iter()
                .map(|alias| format!("{}{}", FACTORY_BEAN_PREFIX, alias))
                .collect();
        }
        aliases
    }
}

impl ListableBeanFactory for DefaultListableBeanFactory {
    fn contains_bean_definition(&self, name: &str) -> bool {
        self.registry.contains_local(name)
    }

    fn get_bean_definition_count(&self) -> usize {
        self.registry.len()
    }

    fn get_bean_definition_names(&self) -> Vec<String> {
        self.registry.names()
    }

    fn get_bean_names_for_type(&self, type_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| {
                self.registry
                    .get_merged(name)
                    .is_ok_and(|mbd| !mbd.is_abstract())
                    && self.get_type(name).ok().flatten().as_deref() == Some(type_name)
            })
            .collect();

        for name in self.singletons.singleton_names() {
            if !names.contains(&name)
                && !self.registry.contains_local(&name)
                && self.get_type(&name).ok().flatten().as_deref() == Some(type_name)
            {
                names.push(name);
            }
        }
        names
    }

    fn is_primary(&self, name: &str) -> bool {
        self.registry
            .get_merged(name)
            .map(|mbd| mbd.primary)
            .unwrap_or(false)
    }
}

impl ConfigurableBeanFactory for DefaultListableBeanFactory {
    fn register_scope(&self, scope_name: &str, scope: Arc<dyn Scope>) -> ContainerResult<()> {
        self.scopes.register(scope_name, scope)
    }

    fn get_registered_scope_names(&self) -> Vec<String> {
        self.scopes.names()
    }

    fn get_registered_scope(&self, scope_name: &str) -> ContainerResult<Arc<dyn Scope>> {
        self.scopes.get(scope_name)
    }

    fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        let mut processors = self.bean_post_processors.write();
        processors.retain(|existing| !Arc::ptr_eq(existing, &processor));
        tracing::debug!("Adding bean post processor '{}'", processor.name());
        processors.push(processor);
    }

    fn get_bean_post_processor_count(&self) -> usize {
        self.bean_post_processors.read().len()
    }

    fn register_alias(&self, alias: &str, target: &str) -> ContainerResult<()> {
        self.registry.register_alias(alias, target)
    }

    fn resolve_aliases(&self, resolver: &dyn Fn(&str) -> Option<String>) -> ContainerResult<()> {
        self.registry.aliases().resolve_aliases(resolver)
    }

    fn get_merged_bean_definition(&self, name: &str) -> ContainerResult<Arc<RootBeanDefinition>> {
        let bean_name = self.transformed_bean_name(name)?;
        self.registry.get_merged(&bean_name)
    }

    fn is_factory_bean(&self, name: &str) -> ContainerResult<bool> {
        let bean_name = self.transformed_bean_name(name)?;
        if let Some(instance) = self.singletons.get_singleton(&bean_name, false)? {
            return Ok(instance.is_factory_bean());
        }
        if !self.registry.contains_local(&bean_name) {
            if let Some(parent) = &self.parent {
                return parent.is_factory_bean(name);
            }
        }
        let mbd = self.registry.get_merged(&bean_name)?;
        Ok(mbd.resolved_metadata().is_factory_bean.unwrap_or(false))
    }

    fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()> {
        self.singletons.register_singleton(name, instance)
    }

    fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        self.singletons.set_currently_in_creation(name, in_creation);
    }

    fn is_currently_in_creation(&self, name: &str) -> bool {
        self.singletons.is_currently_in_creation(name) || self.prototypes_in_creation.is_creating(name)
    }

    fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        let canonical = self
            .registry
            .canonical_name(bean)
            .unwrap_or_else(|_| bean.to_string());
        self.singletons.register_dependent_bean(&canonical, dependent);
    }

    fn get_dependent_beans(&self, bean: &str) -> Vec<String> {
        self.singletons.dependent_beans(bean)
    }

    fn get_dependencies_for_bean(&self, bean: &str) -> Vec<String> {
        self.singletons.dependencies_for_bean(bean)
    }

    fn destroy_bean(&self, name: &str, instance: &BeanInstance) -> DestructionReport {
        let mut report = DestructionReport::new();
        let destroy_callback = self
            .get_merged_bean_definition(name)
            .ok()
            .and_then(|mbd| mbd.destroy_callback.clone());
        if let Some(adapter) =
            DisposableBeanAdapter::new(instance.clone(), name, destroy_callback, &self.processors_snapshot())
        {
            run_destruction_callback(name, adapter.into_callback(), &mut report);
        }
        report.destroyed.push(name.to_string());
        report
    }

    fn destroy_scoped_bean(&self, name: &str) -> ContainerResult<DestructionReport> {
        let bean_name = self.transformed_bean_name(name)?;
        let mbd = self.registry.get_merged(&bean_name)?;
        if mbd.is_singleton() || mbd.is_prototype() {
            return Err(ContainerError::InvalidScopeOperation(format!(
                "cannot destroy bean '{}' in built-in scope '{}'",
                bean_name,
                mbd.scope_name()
            )));
        }

        let scope = self.scopes.get(mbd.scope_name())?;
        Ok(match scope.remove(&bean_name) {
            Some(instance) => self.destroy_bean(&bean_name, &instance),
            None => DestructionReport::new(),
        })
    }

    fn destroy_singletons(&self) -> DestructionReport {
        tracing::info!("Destroying singleton beans");
        let report = self.singletons.destroy_singletons();
        self.factory_bean_objects.lock().clear();
        tracing::info!(
            "Singleton beans destruction completed ({} destroyed, {} failed)",
            report.destroyed.len(),
            report.failures.len()
        );
        report
    }
}

impl ConfigurableListableBeanFactory for DefaultListableBeanFactory {
    fn register_bean_definition(&self, definition: BeanDefinition) -> ContainerResult<()> {
        // 检查配置是否已冻结
        self.check_frozen("cannot register bean definition")?;

        let name = definition.name.clone();
        tracing::trace!(
            "Attempting to register bean: name='{}', scope={:?}",
            name,
            definition.scope
        );

        let replaced = self.registry.register(definition)?;
        if replaced || self.singletons.contains_singleton(&name) {
            self.reset_bean_definition(&name);
        }
        Ok(())
    }

    fn remove_bean_definition(&self, name: &str) -> ContainerResult<()> {
        self.check_frozen("cannot remove bean definition")?;
        self.registry.remove(name)?;
        self.reset_bean_definition(name);
        Ok(())
    }

    fn get_bean_definition(&self, name: &str) -> ContainerResult<Arc<BeanDefinition>> {
        self.registry
            .get_raw(name)
            .ok_or_else(|| ContainerError::NoSuchDefinition(name.to_string()))
    }

    fn load_definitions(&self, source: &dyn ConfigSource) -> ContainerResult<usize> {
        let definitions = source.load()?;
        let count = definitions.len();
        for definition in definitions {
            self.register_bean_definition(definition)?;
        }
        for (alias, target) in source.aliases() {
            self.register_alias(&alias, &target)?;
        }
        tracing::debug!("Loaded {} bean definitions from '{}'", count, source.name());
        Ok(count)
    }

    fn preinstantiate_singletons(&self) -> ContainerResult<()> {
        let bean_names = self.registry.names();
        tracing::debug!("Pre-instantiating singletons in {} bean definitions", bean_names.len());

        for name in bean_names {
            let mbd = self.registry.get_merged(&name)?;
            if mbd.is_abstract() || !mbd.is_singleton() || mbd.is_lazy_init() {
                continue;
            }
            // FactoryBean 只实例化工厂本身，产品按需创建
            self.get_bean_instance(&name, &name)?;
        }
        Ok(())
    }

    fn freeze_configuration(&self) {
        let mut frozen = self.configuration_frozen.write();
        *frozen = true;
        tracing::debug!("Bean factory configuration frozen");
    }

    fn is_configuration_frozen(&self) -> bool {
        *self.configuration_frozen.read()
    }
}

impl std::fmt::Debug for DefaultListableBeanFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultListableBeanFactory")
            .field("definitions", &self.registry.names())
            .field("singletons", &self.singletons.singleton_names())
            .field("scopes", &self.scopes.names())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
