//! 容器调用的可插拔协作者
//!
//! 容器只决定"何时"构造、注入和解析引用；"如何"做由这里的 trait 决定：
//! - [`ConstructionStrategy`]：创建原始实例、设置属性
//! - [`ReferenceResolver`]：把定义中的值解析为注入值
//! - [`ConfigSource`]：提供 Bean 定义

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bean::{BeanDefinition, BeanInstance, ImplementationRef, InstanceSupplier, RootBeanDefinition};
use crate::bean_factory::DefaultListableBeanFactory;
use crate::value::{BeanValue, ResolvedValue};
use crate::{BeanFactory, ConfigurableBeanFactory, ContainerError, ContainerResult};

/// 一次实例化请求
pub struct Instantiation<'a> {
    pub bean_name: &'a str,
    pub definition: &'a RootBeanDefinition,
    /// 已解析的构造参数
    pub args: Vec<ResolvedValue>,
    /// 通过工厂 Bean 创建时的工厂实例
    pub factory_instance: Option<BeanInstance>,
}

impl<'a> Instantiation<'a> {
    pub fn new(bean_name: &'a str, definition: &'a RootBeanDefinition) -> Self {
        Self {
            bean_name,
            definition,
            args: Vec::new(),
            factory_instance: None,
        }
    }

    pub fn arg(&self, index: usize) -> anyhow::Result<&ResolvedValue> {
        self.args.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "bean '{}' expects constructor argument #{} but only {} were given",
                self.bean_name,
                index,
                self.args.len()
            )
        })
    }

    pub fn arg_str(&self, index: usize) -> anyhow::Result<&str> {
        self.arg(index)?
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("constructor argument #{} is not a string", index))
    }

    pub fn arg_i64(&self, index: usize) -> anyhow::Result<i64> {
        self.arg(index)?
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("constructor argument #{} is not an integer", index))
    }

    /// 构造参数中的 Bean 引用
    pub fn arg_bean<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        self.arg(index)?.as_bean::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "constructor argument #{} is not a bean of type '{}'",
                index,
                std::any::type_name::<T>()
            )
        })
    }

    /// 工厂 Bean 实例
    pub fn factory<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.factory_instance
            .as_ref()
            .and_then(|f| f.downcast::<T>())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "bean '{}' requires a factory bean of type '{}'",
                    self.bean_name,
                    std::any::type_name::<T>()
                )
            })
    }
}

/// 构造策略
pub trait ConstructionStrategy: Send + Sync {
    /// 创建原始实例
    fn instantiate(&self, ctx: &Instantiation<'_>) -> ContainerResult<BeanInstance>;

    /// 把解析后的值设置到实例的属性上
    fn apply_property(
        &self,
        bean_name: &str,
        definition: &RootBeanDefinition,
        bean: &BeanInstance,
        property: &str,
        value: ResolvedValue,
    ) -> ContainerResult<()>;

    /// 预测定义产出的类型名称
    fn predict_type(&self, _definition: &RootBeanDefinition) -> Option<String> {
        None
    }

    /// 解析将要使用的构造器或工厂方法的描述
    fn resolve_constructor(&self, _definition: &RootBeanDefinition) -> Option<String> {
        None
    }
}

/// 基于 [`InstanceSupplier`] 的默认构造策略
///
/// 查找顺序：定义自带的提供者，然后是 `类型::工厂方法` 注册的提供者，最后是按
/// 类型名称注册的提供者。
#[derive(Default)]
pub struct SupplierConstructionStrategy {
    suppliers: RwLock<HashMap<String, Arc<dyn InstanceSupplier>>>,
}

impl SupplierConstructionStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按类型名称注册提供者
    pub fn register<S>(&self, type_name: impl Into<String>, supplier: S)
    where
        S: InstanceSupplier + 'static,
    {
        let type_name = type_name.into();
        tracing::debug!("Registering instance supplier for type '{}'", type_name);
        self.suppliers.write().insert(type_name, Arc::new(supplier));
    }

    /// 注册工厂方法，`owner` 是实现类型名称或工厂 Bean 名称
    pub fn register_factory_method<S>(&self, owner: &str, method: &str, supplier: S)
    where
        S: InstanceSupplier + 'static,
    {
        self.register(factory_method_key(owner, method), supplier);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.suppliers.read().contains_key(key)
    }

    fn lookup_key(definition: &BeanDefinition) -> Option<String> {
        match (&definition.factory_method_name, &definition.implementation) {
            (_, Some(ImplementationRef::Supplier(_))) => None,
            (Some(method), implementation) => {
                let owner = definition
                    .factory_bean_name
                    .as_deref()
                    .or_else(|| implementation.as_ref().map(ImplementationRef::type_name))?;
                Some(factory_method_key(owner, method))
            }
            (None, Some(ImplementationRef::TypeName(type_name))) => Some(type_name.clone()),
            (None, None) => None,
        }
    }

    fn supplier_for(&self, definition: &BeanDefinition) -> anyhow::Result<Arc<dyn InstanceSupplier>> {
        if let Some(ImplementationRef::Supplier(supplier)) = &definition.implementation {
            return Ok(supplier.clone());
        }
        let key = Self::lookup_key(definition)
            .ok_or_else(|| anyhow::anyhow!("definition declares no implementation"))?;
        self.suppliers
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no instance supplier registered for '{}'", key))
    }
}

fn factory_method_key(owner: &str, method: &str) -> String {
    format!("{}::{}", owner, method)
}

impl ConstructionStrategy for SupplierConstructionStrategy {
    fn instantiate(&self, ctx: &Instantiation<'_>) -> ContainerResult<BeanInstance> {
        let wrap = |source: anyhow::Error| ContainerError::Instantiation {
            name: ctx.bean_name.to_string(),
            source,
        };
        let supplier = self.supplier_for(ctx.definition).map_err(wrap)?;
        supplier.instantiate(ctx).map_err(wrap)
    }

    fn apply_property(
        &self,
        bean_name: &str,
        definition: &RootBeanDefinition,
        bean: &BeanInstance,
        property: &str,
        value: ResolvedValue,
    ) -> ContainerResult<()> {
        let wrap = |source: anyhow::Error| ContainerError::PropertyAssignment {
            name: bean_name.to_string(),
            property: property.to_string(),
            source,
        };
        let supplier = self.supplier_for(definition).map_err(wrap)?;
        supplier.set_property(bean, property, value).map_err(wrap)
    }

    fn predict_type(&self, definition: &RootBeanDefinition) -> Option<String> {
        self.supplier_for(definition)
            .ok()
            .map(|supplier| supplier.type_name().to_string())
    }

    fn resolve_constructor(&self, definition: &RootBeanDefinition) -> Option<String> {
        Self::lookup_key(definition).or_else(|| match &definition.implementation {
            Some(ImplementationRef::Supplier(supplier)) => Some(supplier.type_name().to_string()),
            _ => None,
        })
    }
}

impl std::fmt::Debug for SupplierConstructionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.suppliers.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("SupplierConstructionStrategy")
            .field("suppliers", &keys)
            .finish()
    }
}

/// 引用解析时的上下文
///
/// 通过它获取的 Bean 会被记录为当前 Bean 的依赖
pub struct ResolutionContext<'a> {
    factory: &'a DefaultListableBeanFactory,
    bean_name: &'a str,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(factory: &'a DefaultListableBeanFactory, bean_name: &'a str) -> Self {
        Self { factory, bean_name }
    }

    /// 正在解析其依赖的 Bean
    pub fn bean_name(&self) -> &str {
        self.bean_name
    }

    pub fn factory(&self) -> &DefaultListableBeanFactory {
        self.factory
    }

    /// 获取依赖的 Bean，并记录依赖关系
    pub fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        let instance = self.factory.get_bean(name)?;
        let canonical = self.factory.transformed_bean_name(name)?;
        self.factory.register_dependent_bean(&canonical, self.bean_name);
        Ok(instance)
    }
}

/// 引用解析器
pub trait ReferenceResolver: Send + Sync {
    fn resolve(&self, value: &BeanValue, ctx: &ResolutionContext<'_>) -> ContainerResult<ResolvedValue>;
}

/// 默认解析器：字面量原样传递，引用解析为 Bean，集合递归解析
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReferenceResolver;

impl ReferenceResolver for DefaultReferenceResolver {
    fn resolve(&self, value: &BeanValue, ctx: &ResolutionContext<'_>) -> ContainerResult<ResolvedValue> {
        Ok(match value {
            BeanValue::Null => ResolvedValue::Null,
            BeanValue::Bool(b) => ResolvedValue::Bool(*b),
            BeanValue::Int(i) => ResolvedValue::Int(*i),
            BeanValue::Float(f) => ResolvedValue::Float(*f),
            BeanValue::String(s) => ResolvedValue::String(s.clone()),
            BeanValue::Ref(name) => ResolvedValue::Bean(ctx.get_bean(name)?),
            BeanValue::List(items) | BeanValue::Set(items) => ResolvedValue::List(
                items
                    .iter()
                    .map(|item| self.resolve(item, ctx))
                    .collect::<ContainerResult<_>>()?,
            ),
            BeanValue::Map(entries) => ResolvedValue::Map(
                entries
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.resolve(item, ctx)?)))
                    .collect::<ContainerResult<_>>()?,
            ),
        })
    }
}

/// Bean 定义来源
pub trait ConfigSource: Send + Sync {
    /// 加载定义
    fn load(&self) -> ContainerResult<Vec<BeanDefinition>>;

    /// 需要注册的别名（alias, target）
    fn aliases(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "ConfigSource"
    }
}

/// 代码中直接给出的定义
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    name: String,
    definitions: Vec<BeanDefinition>,
    aliases: Vec<(String, String)>,
}

impl StaticConfigSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_definition(mut self, definition: BeanDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), target.into()));
        self
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> ContainerResult<Vec<BeanDefinition>> {
        Ok(self.definitions.clone())
    }

    fn aliases(&self) -> Vec<(String, String)> {
        self.aliases.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
