//! 统一的错误处理类型
//!
//! 容器自身的错误使用 [`ContainerError`]（thiserror），用户提供的代码（工厂函数、
//! init/destroy 回调、FactoryBean、shutdown hook）返回 `anyhow::Result`，
//! 由容器在边界处附加 Bean 名称后包装进 `ContainerError`。
//!
//! # 示例
//!
//! ```rust,ignore
//! use sprig_core::{ContainerError, ContainerResult};
//!
//! fn lookup(factory: &DefaultListableBeanFactory) -> ContainerResult<()> {
//!     match factory.get_bean("missing") {
//!         Err(ContainerError::NoSuchDefinition(name)) => tracing::warn!("no bean {}", name),
//!         other => { other?; }
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub use anyhow::Result;

/// 容器错误
///
/// 创建期错误会一直传播到最外层的 `get_bean` 调用；销毁期错误不会出现在这里，
/// 它们被捕获并记录到 [`DestructionReport`](crate::lifecycle::DestructionReport)。
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No bean named '{0}' is defined")]
    NoSuchDefinition(String),

    #[error("Cannot register bean definition '{name}': there is already a definition bound and overriding is disabled")]
    DuplicateDefinition { name: String },

    #[error("Cannot register singleton '{0}': there is already an instance bound")]
    DuplicateSingleton(String),

    #[error("Invalid bean definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Cyclic parent definition chain: {}", .chain.join(" -> "))]
    CyclicParent { chain: Vec<String> },

    #[error("Cannot register alias '{alias}' for name '{requested}': it is already registered for name '{existing}'")]
    AliasInUse {
        alias: String,
        existing: String,
        requested: String,
    },

    #[error("Alias '{alias}' cannot be resolved, alias chain is cyclic or too long: {}", .chain.join(" -> "))]
    AliasCycle { alias: String, chain: Vec<String> },

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Requested bean '{name}' is currently in creation: is there an unresolvable circular reference? ({})", .chain.join(" -> "))]
    UnresolvableCircularReference { name: String, chain: Vec<String> },

    #[error("Bean '{name}' is currently in creation on this thread ({})", .chain.join(" -> "))]
    CurrentlyInCreation { name: String, chain: Vec<String> },

    #[error("Failed to instantiate bean '{name}': {source}")]
    Instantiation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to assign property '{property}' of bean '{name}': {source}")]
    PropertyAssignment {
        name: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Initialization of bean '{name}' failed: {source}")]
    Initialization {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bean '{bean}' depends on missing bean '{dependency}'")]
    MissingDependency { bean: String, dependency: String },

    #[error("Bean '{name}' has been injected into {dependents:?} in its raw version as part of a circular reference, but has eventually been wrapped")]
    CycleIdentity {
        name: String,
        dependents: Vec<String>,
    },

    #[error("Scope name '{0}' is reserved and cannot be replaced")]
    ReservedScopeName(String),

    #[error("No scope registered for scope name '{0}'")]
    NoSuchScope(String),

    #[error("Invalid scope operation: {0}")]
    InvalidScopeOperation(String),

    #[error("Bean definition '{0}' is abstract and cannot be instantiated")]
    AbstractDefinition(String),

    #[error("Bean '{0}' is not a factory bean")]
    NotAFactoryBean(String),

    #[error("No qualifying bean of type '{type_name}': expected single matching bean but found {}: {}", .candidates.len(), .candidates.join(", "))]
    NoUniqueBean {
        type_name: String,
        candidates: Vec<String>,
    },

    #[error("Bean '{name}' is not of the required type '{expected}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    #[error("Singleton bean creation not allowed while singletons are in destruction (requested '{0}')")]
    CreationNotAllowed(String),

    #[error("Bean factory configuration is frozen: {0}")]
    ConfigurationFrozen(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ContainerError {
    /// 是否为循环引用类错误（构造期循环、深度超限、原型重入）
    pub fn is_circular(&self) -> bool {
        matches!(
            self,
            ContainerError::CyclicDependency { .. }
                | ContainerError::UnresolvableCircularReference { .. }
                | ContainerError::CurrentlyInCreation { .. }
        )
    }
}

/// 容器操作的结果类型
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;
