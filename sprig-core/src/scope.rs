//! Bean 作用域
//!
//! 内置 `singleton` 与 `prototype` 两个作用域，名称保留且不可替换。
//! 自定义作用域通过 [`ScopeRegistry::register`] 注册。

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::bean::BeanInstance;
use crate::constants::{is_reserved_scope_name, SCOPE_PROTOTYPE, SCOPE_SINGLETON};
use crate::lifecycle::{run_destruction_callback, DestructionCallback, DestructionReport};
use crate::singleton::DefaultSingletonRegistry;
use crate::{ContainerError, ContainerResult};

/// 作用域创建实例时调用的工厂
pub type ObjectFactory<'a> = dyn Fn() -> ContainerResult<BeanInstance> + 'a;

/// 作用域策略
pub trait Scope: Send + Sync {
    /// 返回作用域中的实例，不存在时通过 `object_factory` 创建
    fn get(&self, name: &str, object_factory: &ObjectFactory<'_>) -> ContainerResult<BeanInstance>;

    /// 从作用域中移除实例（不执行销毁回调）
    fn remove(&self, name: &str) -> Option<BeanInstance>;

    /// 注册实例被销毁时执行的回调
    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback);

    /// 作用域的标识（如会话 ID），没有时返回 None
    fn conversation_id(&self) -> Option<String> {
        None
    }
}

/// 单例作用域，实例缓存在 [`DefaultSingletonRegistry`] 中
#[derive(Debug)]
pub struct SingletonScope {
    registry: Arc<DefaultSingletonRegistry>,
}

impl SingletonScope {
    pub fn new(registry: Arc<DefaultSingletonRegistry>) -> Self {
        Self { registry }
    }
}

impl Scope for SingletonScope {
    fn get(&self, name: &str, object_factory: &ObjectFactory<'_>) -> ContainerResult<BeanInstance> {
        self.registry.get_or_create(name, object_factory)
    }

    fn remove(&self, name: &str) -> Option<BeanInstance> {
        self.registry.remove_singleton(name)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) {
        self.registry.register_disposable_bean(name, callback);
    }
}

/// 原型作用域：从不缓存，丢弃销毁回调
#[derive(Debug, Default)]
pub struct PrototypeScope;

impl Scope for PrototypeScope {
    fn get(&self, _name: &str, object_factory: &ObjectFactory<'_>) -> ContainerResult<BeanInstance> {
        object_factory()
    }

    fn remove(&self, _name: &str) -> Option<BeanInstance> {
        None
    }

    fn register_destruction_callback(&self, name: &str, _callback: DestructionCallback) {
        tracing::trace!("Ignoring destruction callback for prototype bean '{}'", name);
    }
}

#[derive(Default)]
struct MapScopeState {
    objects: HashMap<String, BeanInstance>,
    order: Vec<String>,
    callbacks: Vec<(String, DestructionCallback)>,
}

/// 基于映射的自定义作用域
///
/// 作用域内的创建由可重入锁串行化：同一线程可以在创建过程中请求同一作用域中的
/// 其他 Bean。[`end`](Self::end) 结束作用域并按注册顺序执行销毁回调。
pub struct MapScope {
    name: String,
    creation_lock: ReentrantMutex<()>,
    state: Mutex<MapScopeState>,
}

impl MapScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creation_lock: ReentrantMutex::new(()),
            state: Mutex::new(MapScopeState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 结束作用域：清空实例并执行所有销毁回调
    pub fn end(&self) -> DestructionReport {
        let _creation = self.creation_lock.lock();
        let (order, callbacks) = {
            let mut state = self.state.lock();
            state.objects.clear();
            (std::mem::take(&mut state.order), std::mem::take(&mut state.callbacks))
        };

        let mut report = DestructionReport::new();
        for (bean, callback) in callbacks {
            run_destruction_callback(&bean, callback, &mut report);
        }
        report.destroyed = order;
        tracing::debug!("Scope '{}' ended, {} beans destroyed", self.name, report.destroyed.len());
        report
    }
}

impl Scope for MapScope {
    fn get(&self, name: &str, object_factory: &ObjectFactory<'_>) -> ContainerResult<BeanInstance> {
        let _creation = self.creation_lock.lock();
        if let Some(instance) = self.state.lock().objects.get(name) {
            return Ok(instance.clone());
        }

        let instance = object_factory()?;
        let mut state = self.state.lock();
        if state.objects.insert(name.to_string(), instance.clone()).is_none() {
            state.order.push(name.to_string());
        }
        Ok(instance)
    }

    fn remove(&self, name: &str) -> Option<BeanInstance> {
        let mut state = self.state.lock();
        state.callbacks.retain(|(bean, _)| bean != name);
        state.order.retain(|n| n != name);
        state.objects.remove(name)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) {
        self.state.lock().callbacks.push((name.to_string(), callback));
    }

    fn conversation_id(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl std::fmt::Debug for MapScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapScope")
            .field("name", &self.name)
            .field("beans", &self.state.lock().order)
            .finish()
    }
}

/// 线程作用域：每个线程一个实例
///
/// 不支持销毁回调，注册的回调会被记录并丢弃。
#[derive(Debug, Default)]
pub struct ThreadScope {
    objects: Mutex<HashMap<ThreadId, HashMap<String, BeanInstance>>>,
}

impl ThreadScope {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scope for ThreadScope {
    fn get(&self, name: &str, object_factory: &ObjectFactory<'_>) -> ContainerResult<BeanInstance> {
        let id = thread::current().id();
        if let Some(instance) = self.objects.lock().get(&id).and_then(|m| m.get(name)) {
            return Ok(instance.clone());
        }

        let instance = object_factory()?;
        self.objects
            .lock()
            .entry(id)
            .or_default()
            .insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    fn remove(&self, name: &str) -> Option<BeanInstance> {
        let id = thread::current().id();
        let mut objects = self.objects.lock();
        let per_thread = objects.get_mut(&id)?;
        let removed = per_thread.remove(name);
        if per_thread.is_empty() {
            objects.remove(&id);
        }
        removed
    }

    fn register_destruction_callback(&self, name: &str, _callback: DestructionCallback) {
        tracing::warn!(
            "ThreadScope does not support destruction callbacks, ignoring callback for bean '{}'",
            name
        );
    }

    fn conversation_id(&self) -> Option<String> {
        Some(format!("{:?}", thread::current().id()))
    }
}

/// 作用域注册表
pub struct ScopeRegistry {
    singleton: Arc<dyn Scope>,
    prototype: Arc<dyn Scope>,
    custom: RwLock<Vec<(String, Arc<dyn Scope>)>>,
}

impl ScopeRegistry {
    pub fn new(singletons: Arc<DefaultSingletonRegistry>) -> Self {
        Self {
            singleton: Arc::new(SingletonScope::new(singletons)),
            prototype: Arc::new(PrototypeScope),
            custom: RwLock::new(Vec::new()),
        }
    }

    /// 注册自定义作用域
    ///
    /// 重新绑定已有名称只影响之后的查找，已缓存的实例不会迁移。
    pub fn register(&self, scope_name: &str, scope: Arc<dyn Scope>) -> ContainerResult<()> {
        if is_reserved_scope_name(scope_name) {
            return Err(ContainerError::ReservedScopeName(scope_name.to_string()));
        }
        if scope_name.trim().is_empty() {
            return Err(ContainerError::InvalidScopeOperation(
                "scope name must not be empty".to_string(),
            ));
        }

        let mut custom = self.custom.write();
        match custom.iter_mut().find(|(name, _)| name == scope_name) {
            Some(entry) => {
                tracing::debug!("Replacing scope '{}'", scope_name);
                entry.1 = scope;
            }
            None => {
                tracing::debug!("Registering scope '{}'", scope_name);
                custom.push((scope_name.to_string(), scope));
            }
        }
        Ok(())
    }

    /// 按名称获取作用域
    pub fn get(&self, scope_name: &str) -> ContainerResult<Arc<dyn Scope>> {
        match scope_name {
            SCOPE_SINGLETON => Ok(self.singleton.clone()),
            SCOPE_PROTOTYPE => Ok(self.prototype.clone()),
            _ => self
                .custom
                .read()
                .iter()
                .find(|(name, _)| name == scope_name)
                .map(|(_, scope)| scope.clone())
                .ok_or_else(|| ContainerError::NoSuchScope(scope_name.to_string())),
        }
    }

    /// 已注册的自定义作用域名称（注册顺序，不含内置作用域）
    pub fn names(&self) -> Vec<String> {
        self.custom.read().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn contains(&self, scope_name: &str) -> bool {
        is_reserved_scope_name(scope_name)
            || self.custom.read().iter().any(|(name, _)| name == scope_name)
    }
}

impl std::fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeRegistry").field("custom", &self.names()).finish()
    }
}
