// sprig-core: 类似 Spring BeanFactory 的组件注册与生命周期引擎
//
// 提供：
// - Bean 定义注册、父定义合并与别名
// - 单例 / 原型 / 自定义作用域
// - 通过早期引用解决属性级循环引用，构造期循环快速失败
// - 后置处理器与 FactoryBean
// - 按依赖顺序销毁

pub mod alias;
pub mod bean;
pub mod bean_factory;
pub mod config;
pub mod constants;
pub mod context;
pub mod dependency;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod scope;
pub mod singleton;
pub mod strategy;
pub mod value;

// 重新导出常用类型
pub use bean::{
    BeanDefinition, BeanInstance, FactoryBean, FunctionFactory, ImplementationRef, InstanceSupplier,
    LifecycleCallback, RootBeanDefinition,
};
pub use bean_factory::{
    BeanFactory, BeanFactoryBuilder, BeanFactoryExt, ConfigurableBeanFactory,
    ConfigurableListableBeanFactory, DefaultListableBeanFactory, ListableBeanFactory,
    ListableBeanFactoryExt,
};
pub use config::{ApplicationSettings, ContainerConfig};
pub use constants::*;
pub use context::{ApplicationContext, ApplicationContextBuilder, ShutdownHook};
pub use error::{ContainerError, ContainerResult, Result};
pub use lifecycle::{BeanPostProcessor, DestructionCallback, DestructionFailure, DestructionReport};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use scope::{MapScope, ObjectFactory, PrototypeScope, Scope, ThreadScope};
pub use singleton::{DefaultSingletonRegistry, SingletonStatus};
pub use strategy::{
    ConfigSource, ConstructionStrategy, DefaultReferenceResolver, Instantiation, ReferenceResolver,
    ResolutionContext, StaticConfigSource, SupplierConstructionStrategy,
};
pub use value::{BeanValue, PropertyValues, ResolvedValue};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::{BeanDefinition, BeanInstance, FactoryBean, FunctionFactory};
    pub use crate::bean_factory::{
        BeanFactory, BeanFactoryExt, ConfigurableBeanFactory, ConfigurableListableBeanFactory,
        DefaultListableBeanFactory, ListableBeanFactory, ListableBeanFactoryExt,
    };
    pub use crate::context::ApplicationContext;
    pub use crate::error::{ContainerError, ContainerResult};
    pub use crate::lifecycle::{BeanPostProcessor, DestructionReport};
    pub use crate::scope::Scope;
    pub use crate::strategy::{ConfigSource, StaticConfigSource};
    pub use crate::value::{BeanValue, ResolvedValue};
}
