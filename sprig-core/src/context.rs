//! 应用上下文
//!
//! ApplicationContext 持有 Bean 工厂，负责启动（加载定义、预实例化单例）和关闭
//! （执行 shutdown hooks、按依赖顺序销毁单例）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bean::{BeanDefinition, BeanInstance};
use crate::bean_factory::{
    BeanFactory, BeanFactoryBuilder, ConfigurableBeanFactory, ConfigurableListableBeanFactory,
    DefaultListableBeanFactory, ListableBeanFactory,
};
use crate::config::{ApplicationSettings, ContainerConfig};
use crate::lifecycle::{run_destruction_callback, BeanPostProcessor, DestructionReport};
use crate::scope::Scope;
use crate::strategy::{ConfigSource, ConstructionStrategy, ReferenceResolver};
use crate::{ContainerError, ContainerResult};

/// Shutdown hook 类型，在销毁单例之前按注册顺序执行
pub type ShutdownHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// 应用上下文
pub struct ApplicationContext {
    /// Bean 工厂 - 负责 Bean 的创建和管理
    bean_factory: Arc<DefaultListableBeanFactory>,

    shutdown_hooks: RwLock<Vec<ShutdownHook>>,

    /// 应用名称（用于日志）
    app_name: String,

    active: AtomicBool,

    closed: AtomicBool,
}

impl ApplicationContext {
    /// 构建器模式创建上下文
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::new()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// 获取内部的 BeanFactory
    pub fn bean_factory(&self) -> &Arc<DefaultListableBeanFactory> {
        &self.bean_factory
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 注册 shutdown hook
    pub fn register_shutdown_hook<F>(&self, hook: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut hooks = self.shutdown_hooks.write();
        hooks.push(Box::new(hook));
        tracing::debug!("Registered shutdown hook, total: {}", hooks.len());
    }

    /// 启动上下文：冻结配置并预实例化所有非延迟单例
    ///
    /// 预实例化失败时已创建的单例会被销毁，然后返回错误
    pub fn refresh(&self) -> ContainerResult<()> {
        if self.is_closed() {
            return Err(ContainerError::CreationNotAllowed(self.app_name.clone()));
        }
        tracing::info!(
            "Refreshing application context '{}' with {} bean definition(s)",
            self.app_name,
            self.bean_factory.get_bean_definition_count()
        );

        self.bean_factory.freeze_configuration();
        if let Err(e) = self.bean_factory.preinstantiate_singletons() {
            tracing::error!("Context refresh of '{}' failed: {}", self.app_name, e);
            let report = self.bean_factory.destroy_singletons();
            if !report.is_clean() {
                tracing::warn!(
                    "Destroying singletons after failed refresh reported failures: {:?}",
                    report.failed_beans()
                );
            }
            return Err(e);
        }

        self.active.store(true, Ordering::SeqCst);
        tracing::info!(
            "Application context '{}' started with {} singleton(s)",
            self.app_name,
            self.bean_factory.singleton_count()
        );
        Ok(())
    }

    /// 关闭上下文
    ///
    /// 先执行 shutdown hooks，再按依赖顺序销毁所有单例。重复调用返回空报告。
    pub fn close(&self) -> DestructionReport {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Application context '{}' already closed", self.app_name);
            return DestructionReport::new();
        }
        tracing::info!("Closing application context '{}'", self.app_name);

        let mut report = DestructionReport::new();
        let hooks = std::mem::take(&mut *self.shutdown_hooks.write());
        tracing::debug!("Executing {} shutdown hook(s)", hooks.len());
        for (idx, hook) in hooks.into_iter().enumerate() {
            let label = format!("shutdown-hook-{}", idx + 1);
            run_destruction_callback(&label, Box::new(move || hook()), &mut report);
        }

        report.merge(self.bean_factory.destroy_singletons());
        self.active.store(false, Ordering::SeqCst);

        tracing::info!(
            "Application context '{}' closed ({} destroyed, {} failed)",
            self.app_name,
            report.destroyed.len(),
            report.failures.len()
        );
        report
    }
}

impl BeanFactory for ApplicationContext {
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        self.bean_factory.get_bean(name)
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.bean_factory.contains_bean(name)
    }

    fn is_singleton(&self, name: &str) -> ContainerResult<bool> {
        self.bean_factory.is_singleton(name)
    }

    fn is_prototype(&self, name: &str) -> ContainerResult<bool> {
        self.bean_factory.is_prototype(name)
    }

    fn get_type(&self, name: &str) -> ContainerResult<Option<String>> {
        self.bean_factory.get_type(name)
    }

    fn get_aliases(&self, name: &str) -> Vec<String> {
        self.bean_factory.get_aliases(name)
    }
}

impl ListableBeanFactory for ApplicationContext {
    fn contains_bean_definition(&self, name: &str) -> bool {
        self.bean_factory.contains_bean_definition(name)
    }

    fn get_bean_definition_count(&self) -> usize {
        self.bean_factory.get_bean_definition_count()
    }

    fn get_bean_definition_names(&self) -> Vec<String> {
        self.bean_factory.get_bean_definition_names()
    }

    fn get_bean_names_for_type(&self, type_name: &str) -> Vec<String> {
        self.bean_factory.get_bean_names_for_type(type_name)
    }

    fn is_primary(&self, name: &str) -> bool {
        self.bean_factory.is_primary(name)
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("app_name", &self.app_name)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .field("bean_factory", &self.bean_factory)
            .finish()
    }
}

/// 应用上下文构建器
pub struct ApplicationContextBuilder {
    app_name: String,
    settings: ApplicationSettings,
    init_logging: bool,
    sources: Vec<Box<dyn ConfigSource>>,
    definitions: Vec<BeanDefinition>,
    aliases: Vec<(String, String)>,
    scopes: Vec<(String, Arc<dyn Scope>)>,
    processors: Vec<Arc<dyn BeanPostProcessor>>,
    construction: Option<Arc<dyn ConstructionStrategy>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    parent: Option<Arc<ApplicationContext>>,
}

impl ApplicationContextBuilder {
    pub fn new() -> Self {
        Self {
            app_name: "application".to_string(),
            settings: ApplicationSettings::default(),
            init_logging: false,
            sources: Vec::new(),
            definitions: Vec::new(),
            aliases: Vec::new(),
            scopes: Vec::new(),
            processors: Vec::new(),
            construction: None,
            resolver: None,
            parent: None,
        }
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// 使用完整的应用配置（容器 + 日志）
    pub fn settings(mut self, settings: ApplicationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn container_config(mut self, config: ContainerConfig) -> Self {
        self.settings.container = config;
        self
    }

    /// 构建时按 settings 中的日志配置初始化日志系统
    pub fn init_logging(mut self, init: bool) -> Self {
        self.init_logging = init;
        self
    }

    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn definition(mut self, definition: BeanDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.push((alias.into(), target.into()));
        self
    }

    pub fn scope(mut self, name: impl Into<String>, scope: Arc<dyn Scope>) -> Self {
        self.scopes.push((name.into(), scope));
        self
    }

    pub fn post_processor(mut self, processor: Arc<dyn BeanPostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn construction_strategy(mut self, strategy: Arc<dyn ConstructionStrategy>) -> Self {
        self.construction = Some(strategy);
        self
    }

    pub fn reference_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 设置父上下文，本地未定义的 Bean 从父上下文获取
    pub fn parent(mut self, parent: Arc<ApplicationContext>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// 构建上下文（不启动）
    ///
    /// 注册顺序：作用域、后置处理器、配置来源、单独的定义、别名
    pub fn build(self) -> ContainerResult<Arc<ApplicationContext>> {
        if self.init_logging {
            if let Err(e) = self.settings.logging.init() {
                tracing::debug!("Logging already initialized: {}", e);
            }
        }
        self.settings.container.validate()?;

        let mut factory_builder = BeanFactoryBuilder::new().with_config(self.settings.container.clone());
        if let Some(parent) = &self.parent {
            factory_builder = factory_builder.with_parent(parent.bean_factory.clone());
        }
        if let Some(strategy) = self.construction {
            factory_builder = factory_builder.with_construction_strategy(strategy);
        }
        if let Some(resolver) = self.resolver {
            factory_builder = factory_builder.with_reference_resolver(resolver);
        }
        let factory = factory_builder.build();

        for (name, scope) in self.scopes {
            factory.register_scope(&name, scope)?;
        }
        for processor in self.processors {
            factory.add_bean_post_processor(processor);
        }
        for source in &self.sources {
            factory.load_definitions(source.as_ref())?;
        }
        for definition in self.definitions {
            factory.register_bean_definition(definition)?;
        }
        for (alias, target) in &self.aliases {
            factory.register_alias(alias, target)?;
        }

        tracing::debug!(
            "Built application context '{}' with {} bean definition(s)",
            self.app_name,
            factory.get_bean_definition_count()
        );

        Ok(Arc::new(ApplicationContext {
            bean_factory: Arc::new(factory),
            shutdown_hooks: RwLock::new(Vec::new()),
            app_name: self.app_name,
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// 构建并启动上下文
    pub fn run(self) -> ContainerResult<Arc<ApplicationContext>> {
        let context = self.build()?;
        context.refresh()?;
        Ok(context)
    }
}

impl Default for ApplicationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
