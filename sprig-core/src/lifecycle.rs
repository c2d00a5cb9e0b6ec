//! BeanPostProcessor 与销毁回调
//!
//! 提供在 Bean 实例化、初始化和销毁的各个阶段进行自定义处理的钩子，类似 Spring 的
//! BeanPostProcessor。处理器严格按注册顺序调用。

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::bean::{BeanInstance, LifecycleCallback, RootBeanDefinition};
use crate::ContainerResult;

/// BeanPostProcessor trait
///
/// 在 Bean 生命周期的不同阶段提供钩子，允许替换或包装 Bean 实例
///
/// 使用场景：
/// - 代理创建（包括循环引用时的早期代理）
/// - Bean 包装
/// - 跳过属性注入
/// - 销毁前清理
///
/// # 示例
///
/// ```ignore
/// use sprig_core::prelude::*;
///
/// struct LoggingPostProcessor;
///
/// impl BeanPostProcessor for LoggingPostProcessor {
///     fn post_process_after_initialization(
///         &self,
///         bean: BeanInstance,
///         bean_name: &str,
///     ) -> ContainerResult<BeanInstance> {
///         tracing::info!("After initialization: {}", bean_name);
///         Ok(bean)
///     }
/// }
/// ```
pub trait BeanPostProcessor: Send + Sync {
    /// 在实例化之前调用，返回 Some 时跳过默认的创建流程
    ///
    /// 返回的实例只会再经过 after-initialization 钩子
    fn post_process_before_instantiation(
        &self,
        _bean_name: &str,
        _definition: &RootBeanDefinition,
    ) -> ContainerResult<Option<BeanInstance>> {
        Ok(None)
    }

    /// 在实例化之后、属性注入之前调用，返回 false 跳过属性注入
    fn post_process_after_instantiation(
        &self,
        _bean: &BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<bool> {
        Ok(true)
    }

    /// 为循环引用提供早期引用（例如早期代理）
    ///
    /// 同一个 Bean 的早期引用与最终引用应当一致，否则容器会在创建结束时报告
    /// `CycleIdentity`
    fn get_early_bean_reference(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        Ok(bean)
    }

    /// 在 Bean 初始化回调（init）之前调用
    fn post_process_before_initialization(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        // 默认实现：直接返回原始 Bean
        Ok(bean)
    }

    /// 在 Bean 初始化回调（init）之后调用
    ///
    /// # 典型用途
    /// - 创建代理
    /// - 包装 Bean
    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        Ok(bean)
    }

    /// 该处理器是否需要参与给定 Bean 的销毁
    fn requires_destruction(&self, _bean: &BeanInstance, _bean_name: &str) -> bool {
        false
    }

    /// 在 Bean 销毁回调之前调用
    fn post_process_before_destruction(
        &self,
        _bean: &BeanInstance,
        _bean_name: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// 获取处理器的名称（用于日志和调试）
    fn name(&self) -> &str {
        "BeanPostProcessor"
    }
}

/// 依次应用 before-initialization 钩子
pub fn apply_before_initialization(
    processors: &[Arc<dyn BeanPostProcessor>],
    bean: BeanInstance,
    bean_name: &str,
) -> ContainerResult<BeanInstance> {
    processors
        .iter()
        .try_fold(bean, |current, p| p.post_process_before_initialization(current, bean_name))
}

/// 依次应用 after-initialization 钩子
pub fn apply_after_initialization(
    processors: &[Arc<dyn BeanPostProcessor>],
    bean: BeanInstance,
    bean_name: &str,
) -> ContainerResult<BeanInstance> {
    processors
        .iter()
        .try_fold(bean, |current, p| p.post_process_after_initialization(current, bean_name))
}

/// 依次应用早期引用钩子
pub fn apply_early_reference(
    processors: &[Arc<dyn BeanPostProcessor>],
    bean: BeanInstance,
    bean_name: &str,
) -> ContainerResult<BeanInstance> {
    processors
        .iter()
        .try_fold(bean, |current, p| p.get_early_bean_reference(current, bean_name))
}

/// 销毁回调
pub type DestructionCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// 单个 Bean 的销毁失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructionFailure {
    pub bean: String,
    pub message: String,
}

/// 销毁结果
///
/// 销毁从不失败：回调错误和 panic 会被记录在这里，然后继续销毁其余的 Bean
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestructionReport {
    /// 按销毁顺序排列的 Bean 名称
    pub destroyed: Vec<String>,
    pub failures: Vec<DestructionFailure>,
}

impl DestructionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 没有任何失败
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, bean: impl Into<String>, message: impl Into<String>) {
        self.failures.push(DestructionFailure {
            bean: bean.into(),
            message: message.into(),
        });
    }

    /// 追加另一个报告
    pub fn merge(&mut self, other: DestructionReport) {
        self.destroyed.extend(other.destroyed);
        self.failures.extend(other.failures);
    }

    pub fn failed_beans(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.bean.as_str()).collect()
    }
}

/// 执行一个销毁回调，捕获错误和 panic 并记录到报告中
pub fn run_destruction_callback(
    bean_name: &str,
    callback: DestructionCallback,
    report: &mut DestructionReport,
) {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!("Destruction callback of bean '{}' failed: {:#}", bean_name, e);
            report.record_failure(bean_name, format!("{:#}", e));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!("Destruction callback of bean '{}' panicked: {}", bean_name, message);
            report.record_failure(bean_name, format!("panicked: {}", message));
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 把 Bean 的销毁逻辑（处理器 + destroy 回调）打包成一个销毁回调
pub struct DisposableBeanAdapter {
    bean: BeanInstance,
    bean_name: String,
    destroy_callback: Option<LifecycleCallback>,
    processors: Vec<Arc<dyn BeanPostProcessor>>,
}

impl DisposableBeanAdapter {
    /// 没有任何销毁逻辑时返回 None
    pub fn new(
        bean: BeanInstance,
        bean_name: &str,
        destroy_callback: Option<LifecycleCallback>,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> Option<Self> {
        let processors: Vec<_> = processors
            .iter()
            .filter(|p| p.requires_destruction(&bean, bean_name))
            .cloned()
            .collect();
        if destroy_callback.is_none() && processors.is_empty() {
            return None;
        }
        Some(Self {
            bean,
            bean_name: bean_name.to_string(),
            destroy_callback,
            processors,
        })
    }

    /// 先执行处理器的销毁钩子，再执行 destroy 回调
    pub fn destroy(&self) -> anyhow::Result<()> {
        for processor in &self.processors {
            processor.post_process_before_destruction(&self.bean, &self.bean_name)?;
        }
        if let Some(callback) = &self.destroy_callback {
            tracing::trace!("Invoking destroy callback on bean '{}'", self.bean_name);
            callback.invoke(&self.bean)?;
        }
        Ok(())
    }

    pub fn into_callback(self) -> DestructionCallback {
        Box::new(move || self.destroy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl BeanPostProcessor for Recording {
        fn post_process_before_initialization(
            &self,
            bean: BeanInstance,
            bean_name: &str,
        ) -> ContainerResult<BeanInstance> {
            self.log.lock().push(format!("{}:before:{}", self.label, bean_name));
            Ok(bean)
        }

        fn post_process_after_initialization(
            &self,
            bean: BeanInstance,
            bean_name: &str,
        ) -> ContainerResult<BeanInstance> {
            self.log.lock().push(format!("{}:after:{}", self.label, bean_name));
            Ok(bean)
        }

        fn requires_destruction(&self, _bean: &BeanInstance, _bean_name: &str) -> bool {
            true
        }

        fn post_process_before_destruction(
            &self,
            _bean: &BeanInstance,
            bean_name: &str,
        ) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:destroy:{}", self.label, bean_name));
            Ok(())
        }
    }

    #[test]
    fn test_processors_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let processors: Vec<Arc<dyn BeanPostProcessor>> = vec![
            Arc::new(Recording { label: "p1", log: log.clone() }),
            Arc::new(Recording { label: "p2", log: log.clone() }),
        ];

        let bean = BeanInstance::new(1_u32);
        let bean = apply_before_initialization(&processors, bean, "x").unwrap();
        apply_after_initialization(&processors, bean, "x").unwrap();

        assert_eq!(
            *log.lock(),
            vec!["p1:before:x", "p2:before:x", "p1:after:x", "p2:after:x"]
        );
    }

    #[test]
    fn test_disposable_adapter_runs_processors_then_callback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let processors: Vec<Arc<dyn BeanPostProcessor>> =
            vec![Arc::new(Recording { label: "p", log: log.clone() })];
        let callback_log = log.clone();
        let callback = LifecycleCallback::new(move |_| {
            callback_log.lock().push("callback".to_string());
            Ok(())
        });

        let adapter =
            DisposableBeanAdapter::new(BeanInstance::new(()), "x", Some(callback), &processors).unwrap();
        let mut report = DestructionReport::new();
        run_destruction_callback("x", adapter.into_callback(), &mut report);

        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["p:destroy:x", "callback"]);
        assert!(DisposableBeanAdapter::new(BeanInstance::new(()), "y", None, &[]).is_none());
    }

    #[test]
    fn test_destruction_errors_and_panics_are_recorded() {
        let mut report = DestructionReport::new();
        let failing: DestructionCallback = Box::new(|| -> anyhow::Result<()> { anyhow::bail!("disk full") });
        let panicking: DestructionCallback = Box::new(|| -> anyhow::Result<()> { panic!("boom") });
        let clean: DestructionCallback = Box::new(|| -> anyhow::Result<()> { Ok(()) });
        run_destruction_callback("a", failing, &mut report);
        run_destruction_callback("b", panicking, &mut report);
        run_destruction_callback("c", clean, &mut report);

        assert_eq!(report.failed_beans(), vec!["a", "b"]);
        assert!(report.failures[0].message.contains("disk full"));
        assert!(report.failures[1].message.contains("boom"));
    }
}
