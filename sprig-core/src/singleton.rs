//! 单例缓存
//!
//! 每个名称的状态：`ABSENT -> IN_CREATION -> READY`，创建失败时回到 `ABSENT`
//! 并清除所有痕迹（包括早期引用）。
//!
//! 一个互斥锁保护全部簿记状态，但从不在调用创建函数或早期引用工厂时持有。
//! 请求另一个线程正在创建的名称时，在条件变量上等待；等待前检查等待图，
//! 若等待会形成环则改为获取早期引用或直接失败，因此不会永久阻塞。

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::bean::BeanInstance;
use crate::dependency::{destroy_order, DependencyGraph};
use crate::lifecycle::{panic_message, run_destruction_callback, DestructionCallback, DestructionReport};
use crate::{ContainerError, ContainerResult};

/// 早期引用工厂
pub type EarlyReferenceFactory = Box<dyn FnOnce() -> ContainerResult<BeanInstance> + Send>;

/// 单例在缓存中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingletonStatus {
    Absent,
    InCreation,
    Ready,
}

#[derive(Default)]
struct SingletonState {
    singleton_objects: HashMap<String, BeanInstance>,
    early_singleton_objects: HashMap<String, BeanInstance>,
    singleton_factories: HashMap<String, EarlyReferenceFactory>,
    /// 正在物化早期引用的名称及执行线程
    materializing: HashMap<String, ThreadId>,
    registered_singletons: Vec<String>,
    /// 正在创建的名称及所属线程
    in_creation: HashMap<String, ThreadId>,
    /// 等待图：线程 -> 它在等待的名称
    waiting: HashMap<ThreadId, String>,
    in_creation_check_exclusions: HashSet<String>,
    in_destruction: bool,
}

impl SingletonState {
    fn purge(&mut self, name: &str) {
        self.singleton_factories.remove(name);
        self.early_singleton_objects.remove(name);
        self.in_creation.remove(name);
    }

    fn remove(&mut self, name: &str) -> Option<BeanInstance> {
        self.purge(name);
        self.registered_singletons.retain(|n| n != name);
        self.singleton_objects.remove(name)
    }

    /// 等待 `name` 是否会让 `me` 陷入环形等待
    fn would_deadlock(&self, me: ThreadId, name: &str) -> bool {
        let mut visited = HashSet::new();
        let mut current = name;
        while let Some(owner) = self.in_creation.get(current) {
            if *owner == me {
                return true;
            }
            if !visited.insert(*owner) {
                return false;
            }
            match self.waiting.get(owner) {
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }
}

#[derive(Default)]
struct DisposableBeans {
    order: Vec<String>,
    callbacks: HashMap<String, Vec<DestructionCallback>>,
}

/// 单例注册表
///
/// 保证每个名称至多创建一个实例；不同名称互不阻塞。
#[derive(Default)]
pub struct DefaultSingletonRegistry {
    state: Mutex<SingletonState>,
    state_changed: Condvar,
    disposable_beans: Mutex<DisposableBeans>,
    dependencies: DependencyGraph,
}

impl DefaultSingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已注册的单例
    ///
    /// 只有正在创建该单例的线程才能拿到早期引用；`allow_early_reference` 为 true
    /// 时，必要时会物化早期引用。
    pub fn get_singleton(
        &self,
        name: &str,
        allow_early_reference: bool,
    ) -> ContainerResult<Option<BeanInstance>> {
        let mut state = self.state.lock();
        if let Some(instance) = state.singleton_objects.get(name) {
            return Ok(Some(instance.clone()));
        }

        let me = thread::current().id();
        if state.in_creation.get(name) != Some(&me) {
            return Ok(None);
        }
        if let Some(early) = state.early_singleton_objects.get(name) {
            return Ok(Some(early.clone()));
        }
        if !allow_early_reference {
            return Ok(None);
        }
        self.early_reference_locked(&mut state, name)
    }

    /// 物化（或返回已物化的）早期引用，调用时持有状态锁
    fn early_reference_locked(
        &self,
        state: &mut MutexGuard<'_, SingletonState>,
        name: &str,
    ) -> ContainerResult<Option<BeanInstance>> {
        let me = thread::current().id();
        loop {
            if let Some(instance) = state.singleton_objects.get(name) {
                return Ok(Some(instance.clone()));
            }
            if !state.in_creation.contains_key(name) {
                return Ok(None);
            }
            if let Some(early) = state.early_singleton_objects.get(name) {
                return Ok(Some(early.clone()));
            }
            match state.materializing.get(name).copied() {
                Some(owner) if owner == me => {
                    return Err(ContainerError::CurrentlyInCreation {
                        name: name.to_string(),
                        chain: vec![name.to_string(), name.to_string()],
                    });
                }
                Some(_) => {
                    self.state_changed.wait(state);
                    continue;
                }
                None => {}
            }

            let Some(factory) = state.singleton_factories.remove(name) else {
                return Ok(None);
            };
            state.materializing.insert(name.to_string(), me);
            let outcome = MutexGuard::unlocked(state, || catch_unwind(AssertUnwindSafe(factory)));
            state.materializing.remove(name);
            self.state_changed.notify_all();

            return match outcome {
                Ok(Ok(early)) => {
                    // 创建已失败并被清理时不再缓存
                    if state.in_creation.contains_key(name) {
                        state
                            .early_singleton_objects
                            .insert(name.to_string(), early.clone());
                    }
                    tracing::trace!("Exposed early reference for singleton bean '{}'", name);
                    Ok(Some(early))
                }
                Ok(Err(e)) => Err(e),
                Err(payload) => Err(ContainerError::Other(anyhow::anyhow!(
                    "early reference factory of bean '{}' panicked: {}",
                    name,
                    panic_message(payload.as_ref())
                ))),
            };
        }
    }

    /// 获取单例，不存在时调用 `creator` 创建
    ///
    /// 另一个线程正在创建同名单例时等待其完成；创建失败（含 panic）时清除该名称的
    /// 全部状态，等待者会重新尝试创建。
    ///
    /// 同一线程重入时返回 [`ContainerError::UnresolvableCircularReference`]，链由
    /// 调用方补全。
    pub fn get_or_create<F>(&self, name: &str, creator: F) -> ContainerResult<BeanInstance>
    where
        F: FnOnce() -> ContainerResult<BeanInstance>,
    {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if let Some(instance) = state.singleton_objects.get(name) {
                return Ok(instance.clone());
            }
            if state.in_destruction {
                return Err(ContainerError::CreationNotAllowed(name.to_string()));
            }
            match state.in_creation.get(name).copied() {
                None => break,
                Some(owner) if owner == me => {
                    return Err(ContainerError::UnresolvableCircularReference {
                        name: name.to_string(),
                        chain: Vec::new(),
                    });
                }
                Some(_) => {
                    if state.would_deadlock(me, name) {
                        tracing::debug!(
                            "Waiting for singleton bean '{}' would deadlock, trying early reference",
                            name
                        );
                        return match self.early_reference_locked(&mut state, name)? {
                            Some(early) => Ok(early),
                            None => Err(ContainerError::UnresolvableCircularReference {
                                name: name.to_string(),
                                chain: Vec::new(),
                            }),
                        };
                    }
                    state.waiting.insert(me, name.to_string());
                    tracing::trace!("Waiting for singleton bean '{}' created by another thread", name);
                    self.state_changed.wait(&mut state);
                    state.waiting.remove(&me);
                }
            }
        }

        state.in_creation.insert(name.to_string(), me);
        drop(state);

        let guard = InCreationGuard {
            registry: self,
            name,
            completed: false,
        };
        let instance = creator()?;
        guard.complete(instance.clone());
        Ok(instance)
    }

    /// 注册早期引用工厂
    pub fn add_singleton_factory(&self, name: &str, factory: EarlyReferenceFactory) {
        let mut state = self.state.lock();
        if !state.singleton_objects.contains_key(name) {
            state.singleton_factories.insert(name.to_string(), factory);
            state.early_singleton_objects.remove(name);
        }
    }

    /// 注册外部创建的单例
    pub fn register_singleton(&self, name: &str, instance: BeanInstance) -> ContainerResult<()> {
        let mut state = self.state.lock();
        if state.singleton_objects.contains_key(name) || state.in_creation.contains_key(name) {
            return Err(ContainerError::DuplicateSingleton(name.to_string()));
        }
        state.singleton_objects.insert(name.to_string(), instance);
        state.registered_singletons.push(name.to_string());
        state.purge(name);
        self.state_changed.notify_all();
        tracing::debug!("Registered singleton bean '{}'", name);
        Ok(())
    }

    /// 从缓存中移除单例（不执行销毁回调）
    pub fn remove_singleton(&self, name: &str) -> Option<BeanInstance> {
        let removed = self.state.lock().remove(name);
        self.state_changed.notify_all();
        removed
    }

    pub fn contains_singleton(&self, name: &str) -> bool {
        self.state.lock().singleton_objects.contains_key(name)
    }

    /// 已就绪的单例名称（注册顺序）
    pub fn singleton_names(&self) -> Vec<String> {
        self.state.lock().registered_singletons.clone()
    }

    pub fn singleton_count(&self) -> usize {
        self.state.lock().registered_singletons.len()
    }

    pub fn status(&self, name: &str) -> SingletonStatus {
        let state = self.state.lock();
        if state.singleton_objects.contains_key(name) {
            SingletonStatus::Ready
        } else if state.in_creation.contains_key(name) {
            SingletonStatus::InCreation
        } else {
            SingletonStatus::Absent
        }
    }

    /// 是否有线程正在创建该单例
    pub fn is_singleton_currently_in_creation(&self, name: &str) -> bool {
        self.state.lock().in_creation.contains_key(name)
    }

    /// 同上，但排除被 [`set_currently_in_creation`](Self::set_currently_in_creation) 标记的名称
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        let state = self.state.lock();
        !state.in_creation_check_exclusions.contains(name) && state.in_creation.contains_key(name)
    }

    /// 设置名称是否参与"正在创建"检查
    pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        let mut state = self.state.lock();
        if in_creation {
            state.in_creation_check_exclusions.remove(name);
        } else {
            state.in_creation_check_exclusions.insert(name.to_string());
        }
    }

    /// 本次创建中是否已经交出过早期引用
    pub fn has_early_reference(&self, name: &str) -> bool {
        self.state.lock().early_singleton_objects.contains_key(name)
    }

    /// 注册销毁回调（同一 Bean 可注册多个，按注册顺序执行）
    pub fn register_disposable_bean(&self, name: &str, callback: DestructionCallback) {
        let mut disposable = self.disposable_beans.lock();
        if !disposable.callbacks.contains_key(name) {
            disposable.order.push(name.to_string());
        }
        disposable
            .callbacks
            .entry(name.to_string())
            .or_default()
            .push(callback);
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// 记录 `dependent` 依赖于 `bean`
    pub fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        self.dependencies.register_dependent(bean, dependent);
    }

    pub fn dependent_beans(&self, bean: &str) -> Vec<String> {
        self.dependencies.dependents_of(bean)
    }

    pub fn dependencies_for_bean(&self, bean: &str) -> Vec<String> {
        self.dependencies.dependencies_of(bean)
    }

    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        self.dependencies.is_dependent(bean, dependent)
    }

    /// 按依赖安全的顺序销毁所有单例
    ///
    /// 从不失败；回调的错误和 panic 记录在返回的报告中。销毁期间拒绝创建新单例。
    pub fn destroy_singletons(&self) -> DestructionReport {
        let mut names = {
            let mut state = self.state.lock();
            state.in_destruction = true;
            state.registered_singletons.clone()
        };
        tracing::debug!("Destroying singletons in {:p}", self);

        {
            let disposable = self.disposable_beans.lock();
            for name in &disposable.order {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let plan = destroy_order(&names, &self.dependencies.dependents_snapshot());
        if let Some(cycle) = &plan.cycle {
            tracing::warn!(
                "Circular dependency between singleton beans {:?}, destroying them in reverse registration order",
                cycle
            );
        }

        let mut report = DestructionReport::new();
        for name in &plan.order {
            self.destroy_one(name, &mut report);
        }

        {
            let mut state = self.state.lock();
            state.singleton_objects.clear();
            state.early_singleton_objects.clear();
            state.singleton_factories.clear();
            state.registered_singletons.clear();
            state.in_destruction = false;
        }
        {
            let mut disposable = self.disposable_beans.lock();
            disposable.order.clear();
            disposable.callbacks.clear();
        }
        self.dependencies.clear();
        self.state_changed.notify_all();
        report
    }

    /// 销毁单个单例，先递归销毁依赖它的 Bean
    pub fn destroy_singleton(&self, name: &str) -> DestructionReport {
        let mut report = DestructionReport::new();
        let mut visited = HashSet::new();
        self.destroy_with_dependents(name, &mut visited, &mut report);
        report
    }

    fn destroy_with_dependents(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        report: &mut DestructionReport,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }
        for dependent in self.dependencies.dependents_of(name) {
            self.destroy_with_dependents(&dependent, visited, report);
        }
        self.destroy_one(name, report);
        self.dependencies.remove_bean(name);
    }

    /// 先执行销毁回调，再从缓存中移除
    fn destroy_one(&self, name: &str, report: &mut DestructionReport) {
        let callbacks = {
            let mut disposable = self.disposable_beans.lock();
            disposable.order.retain(|n| n != name);
            disposable.callbacks.remove(name).unwrap_or_default()
        };
        let had_callbacks = !callbacks.is_empty();
        if had_callbacks {
            tracing::debug!("Invoking destroy method on bean '{}'", name);
        }
        for callback in callbacks {
            run_destruction_callback(name, callback, report);
        }

        let removed = self.remove_singleton(name);
        if removed.is_some() || had_callbacks {
            report.destroyed.push(name.to_string());
        }
    }
}

impl std::fmt::Debug for DefaultSingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DefaultSingletonRegistry")
            .field("singletons", &state.registered_singletons)
            .field("in_creation", &state.in_creation.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 创建期间的 RAII 守卫：未完成即被丢弃（错误或 panic）时清除该名称的状态
struct InCreationGuard<'a> {
    registry: &'a DefaultSingletonRegistry,
    name: &'a str,
    completed: bool,
}

impl InCreationGuard<'_> {
    fn complete(mut self, instance: BeanInstance) {
        let mut state = self.registry.state.lock();
        state.singleton_objects.insert(self.name.to_string(), instance);
        state.purge(self.name);
        if !state.registered_singletons.iter().any(|n| n == self.name) {
            state.registered_singletons.push(self.name.to_string());
        }
        self.completed = true;
        drop(state);
        self.registry.state_changed.notify_all();
    }
}

impl Drop for InCreationGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut state = self.registry.state.lock();
        state.purge(self.name);
        drop(state);
        self.registry.state_changed.notify_all();
        tracing::debug!("Creation of singleton bean '{}' failed, state purged", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_get_or_create_caches_instance() {
        let registry = DefaultSingletonRegistry::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .get_or_create("a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(BeanInstance::new(1_u32))
            })
            .unwrap();
        let second = registry
            .get_or_create("a", || unreachable!("already cached"))
            .unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status("a"), SingletonStatus::Ready);
        assert_eq!(registry.singleton_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_failed_creation_purges_state() {
        let registry = DefaultSingletonRegistry::new();
        let result = registry.get_or_create("a", || {
            registry.add_singleton_factory("a", Box::new(|| Ok(BeanInstance::new(0_u8))));
            registry.get_singleton("a", true).unwrap().unwrap();
            Err(ContainerError::Other(anyhow::anyhow!("boom")))
        });

        assert!(result.is_err());
        assert_eq!(registry.status("a"), SingletonStatus::Absent);
        assert!(!registry.has_early_reference("a"));

        // 容器仍然可用
        registry.get_or_create("a", || Ok(BeanInstance::new(1_u8))).unwrap();
    }

    #[test]
    fn test_panicking_creator_is_cleaned_up() {
        let registry = DefaultSingletonRegistry::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            registry.get_or_create("a", || panic!("creator exploded"))
        }));
        assert!(result.is_err());
        assert_eq!(registry.status("a"), SingletonStatus::Absent);
    }

    #[test]
    fn test_same_thread_reentry_without_early_reference() {
        let registry = DefaultSingletonRegistry::new();
        let err = registry
            .get_or_create("a", || registry.get_or_create("a", || Ok(BeanInstance::new(()))))
            .unwrap_err();
        assert!(matches!(err, ContainerError::UnresolvableCircularReference { .. }));
    }

    #[test]
    fn test_early_reference_only_visible_to_owner() {
        let registry = Arc::new(DefaultSingletonRegistry::new());
        let raw = BeanInstance::new(String::from("raw"));

        let inner = registry.clone();
        let raw_for_factory = raw.clone();
        registry
            .get_or_create("a", || {
                inner.add_singleton_factory("a", Box::new(move || Ok(raw_for_factory)));
                let early = inner.get_singleton("a", true)?.expect("early reference");
                // 第二次返回同一个早期引用
                let again = inner.get_singleton("a", true)?.expect("early reference");
                assert!(early.ptr_eq(&again));

                let other = inner.clone();
                let seen = thread::spawn(move || other.get_singleton("a", true).unwrap())
                    .join()
                    .unwrap();
                assert!(seen.is_none());
                Ok(early)
            })
            .unwrap();
    }

    #[test]
    fn test_concurrent_get_or_create_constructs_once() {
        let registry = Arc::new(DefaultSingletonRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_create("shared", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(BeanInstance::new(42_u64))
                        })
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| i.ptr_eq(&instances[0])));
    }

    #[test]
    fn test_destroy_singletons_runs_dependents_first() {
        let registry = DefaultSingletonRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["b", "a"] {
            registry.register_singleton(name, BeanInstance::new(name.to_string())).unwrap();
            let log = log.clone();
            registry.register_disposable_bean(
                name,
                Box::new(move || {
                    log.lock().push(name);
                    Ok(())
                }),
            );
        }
        // a 依赖 b
        registry.register_dependent_bean("b", "a");

        let report = registry.destroy_singletons();
        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(report.destroyed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.singleton_count(), 0);
        assert!(registry.dependent_beans("b").is_empty());
    }

    #[test]
    fn test_destroy_singleton_destroys_dependents() {
        let registry = DefaultSingletonRegistry::new();
        for name in ["db", "repo", "other"] {
            registry.register_singleton(name, BeanInstance::new(())).unwrap();
        }
        registry.register_dependent_bean("db", "repo");

        let report = registry.destroy_singleton("db");
        assert_eq!(report.destroyed, vec!["repo".to_string(), "db".to_string()]);
        assert!(registry.contains_singleton("other"));
        assert!(!registry.contains_singleton("repo"));
    }

    #[test]
    fn test_register_singleton_rejects_duplicates() {
        let registry = DefaultSingletonRegistry::new();
        registry.register_singleton("a", BeanInstance::new(())).unwrap();
        assert!(matches!(
            registry.register_singleton("a", BeanInstance::new(())),
            Err(ContainerError::DuplicateSingleton(_))
        ));
    }

    #[test]
    fn test_in_creation_exclusions() {
        let registry = DefaultSingletonRegistry::new();
        registry
            .get_or_create("a", || {
                assert!(registry.is_currently_in_creation("a"));
                registry.set_currently_in_creation("a", false);
                assert!(!registry.is_currently_in_creation("a"));
                assert!(registry.is_singleton_currently_in_creation("a"));
                Ok(BeanInstance::new(()))
            })
            .unwrap();
    }
}
