//! Post-processor pipeline
//!
//! Hooks run in registration order. When a bean in a reference cycle is
//! replaced after its early reference was handed out, the container must either
//! reject the graph or keep early and final references identical.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sprig_core::prelude::*;
use sprig_core::{ContainerConfig, RootBeanDefinition};

#[derive(Default)]
struct Node {
    peer: OnceLock<BeanInstance>,
}

/// Wrapper standing in for a proxy around another bean
struct Proxy {
    target: BeanInstance,
}

fn node(name: &str, peer: &str) -> BeanDefinition {
    BeanDefinition::with_supplier_of(
        name,
        FunctionFactory::new(|_| Ok(Node::default())).with_setter(|node: &Node, _property, value| {
            let peer = value
                .as_instance()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("peer must be a bean"))?;
            let _ = node.peer.set(peer);
            Ok(())
        }),
    )
    .with_reference("peer", peer)
}

/// Wraps the target bean after initialization, ignoring early references
struct LateWrapper {
    target: &'static str,
}

impl BeanPostProcessor for LateWrapper {
    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        if bean_name == self.target {
            return Ok(BeanInstance::new(Proxy { target: bean }));
        }
        Ok(bean)
    }
}

/// Creates the proxy early when a cycle needs it and reuses it afterwards
#[derive(Default)]
struct EarlyAwareWrapper {
    early_proxies: Mutex<HashMap<String, BeanInstance>>,
}

impl EarlyAwareWrapper {
    fn wrap(bean: BeanInstance) -> BeanInstance {
        BeanInstance::new(Proxy { target: bean })
    }
}

impl BeanPostProcessor for EarlyAwareWrapper {
    fn get_early_bean_reference(
        &self,
        bean: BeanInstance,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        let proxy = Self::wrap(bean);
        self.early_proxies
            .lock()
            .insert(bean_name.to_string(), proxy.clone());
        Ok(proxy)
    }

    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        if self.early_proxies.lock().contains_key(bean_name) {
            // 早期代理已经交出去了，容器会改用早期引用
            return Ok(bean);
        }
        Ok(Self::wrap(bean))
    }
}

fn cycle(factory: &DefaultListableBeanFactory) {
    factory.register_bean_definition(node("a", "b")).unwrap();
    factory.register_bean_definition(node("b", "a")).unwrap();
}

#[test]
fn test_wrapping_after_early_exposure_is_cycle_identity_error() {
    let factory = DefaultListableBeanFactory::new();
    factory.add_bean_post_processor(Arc::new(LateWrapper { target: "a" }));
    cycle(&factory);

    let err = factory.get_bean("a").unwrap_err();
    match err {
        ContainerError::CycleIdentity { name, dependents } => {
            assert_eq!(name, "a");
            assert_eq!(dependents, vec!["b".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!factory.singleton_registry().contains_singleton("a"));
}

#[test]
fn test_raw_injection_can_be_allowed() {
    let factory = DefaultListableBeanFactory::builder()
        .with_config(ContainerConfig::default().with_allow_raw_injection_despite_wrapping(true))
        .build();
    factory.add_bean_post_processor(Arc::new(LateWrapper { target: "a" }));
    cycle(&factory);

    let a = factory.get_bean("a").unwrap();
    let proxy = a.downcast::<Proxy>().unwrap();
    let b = factory.get_bean_typed::<Node>("b").unwrap();
    // b 持有的是原始实例而不是代理
    assert!(b.peer.get().unwrap().ptr_eq(&proxy.target));
    assert!(!b.peer.get().unwrap().ptr_eq(&a));
}

#[test]
fn test_early_proxy_is_the_final_reference() {
    let factory = DefaultListableBeanFactory::new();
    factory.add_bean_post_processor(Arc::new(EarlyAwareWrapper::default()));
    cycle(&factory);

    let a = factory.get_bean("a").unwrap();
    let b = factory.get_bean("b").unwrap();
    assert!(a.is::<Proxy>());
    assert!(b.is::<Proxy>());

    let b_target = b.downcast::<Proxy>().unwrap().target.downcast::<Node>().unwrap();
    assert!(b_target.peer.get().unwrap().ptr_eq(&a));
}

/// Records every hook invocation
struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl BeanPostProcessor for Recorder {
    fn post_process_after_instantiation(&self, _bean: &BeanInstance, bean_name: &str) -> ContainerResult<bool> {
        self.log.lock().push(format!("{}:after-instantiation:{}", self.label, bean_name));
        Ok(true)
    }

    fn post_process_before_initialization(
        &self,
        bean: BeanInstance,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        self.log.lock().push(format!("{}:before-init:{}", self.label, bean_name));
        Ok(bean)
    }

    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        self.log.lock().push(format!("{}:after-init:{}", self.label, bean_name));
        Ok(bean)
    }

    fn requires_destruction(&self, _bean: &BeanInstance, _bean_name: &str) -> bool {
        true
    }

    fn post_process_before_destruction(&self, _bean: &BeanInstance, bean_name: &str) -> anyhow::Result<()> {
        self.log.lock().push(format!("{}:destroy:{}", self.label, bean_name));
        Ok(())
    }
}

#[test]
fn test_full_lifecycle_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = DefaultListableBeanFactory::new();
    factory.add_bean_post_processor(Arc::new(Recorder { label: "p1", log: log.clone() }));
    factory.add_bean_post_processor(Arc::new(Recorder { label: "p2", log: log.clone() }));

    let init_log = log.clone();
    let destroy_log = log.clone();
    factory
        .register_bean_definition(
            BeanDefinition::with_supplier_of("x", FunctionFactory::new(|_| Ok(Node::default())))
                .with_init(move |_| {
                    init_log.lock().push("init:x".to_string());
                    Ok(())
                })
                .with_destroy(move |_| {
                    destroy_log.lock().push("destroy:x".to_string());
                    Ok(())
                }),
        )
        .unwrap();

    factory.get_bean("x").unwrap();
    let report = factory.destroy_singletons();
    assert!(report.is_clean());
    assert_eq!(
        *log.lock(),
        vec![
            "p1:after-instantiation:x",
            "p2:after-instantiation:x",
            "p1:before-init:x",
            "p2:before-init:x",
            "init:x",
            "p1:after-init:x",
            "p2:after-init:x",
            "p1:destroy:x",
            "p2:destroy:x",
            "destroy:x",
        ]
    );
}

/// Returns a ready-made instance for one bean, bypassing construction
struct ShortCircuit;

impl BeanPostProcessor for ShortCircuit {
    fn post_process_before_instantiation(
        &self,
        bean_name: &str,
        _definition: &RootBeanDefinition,
    ) -> ContainerResult<Option<BeanInstance>> {
        Ok((bean_name == "stub").then(|| BeanInstance::new(String::from("stubbed"))))
    }
}

/// Vetoes property population
struct SkipPopulation;

impl BeanPostProcessor for SkipPopulation {
    fn post_process_after_instantiation(&self, _bean: &BeanInstance, bean_name: &str) -> ContainerResult<bool> {
        Ok(bean_name != "lonely")
    }
}

#[test]
fn test_before_instantiation_short_circuit_and_population_veto() {
    let factory = DefaultListableBeanFactory::new();
    factory.add_bean_post_processor(Arc::new(ShortCircuit));
    factory.add_bean_post_processor(Arc::new(SkipPopulation));
    factory
        .register_bean_definition(BeanDefinition::new("stub").with_type_name("NeverConstructed"))
        .unwrap();
    factory.register_bean_definition(node("lonely", "missing")).unwrap();

    assert_eq!(factory.get_bean_typed::<String>("stub").unwrap().as_str(), "stubbed");
    let lonely = factory.get_bean_typed::<Node>("lonely").unwrap();
    assert!(lonely.peer.get().is_none());
}

#[test]
fn test_failing_hook_fails_creation() {
    struct Rejecting;
    impl BeanPostProcessor for Rejecting {
        fn post_process_before_initialization(
            &self,
            _bean: BeanInstance,
            bean_name: &str,
        ) -> ContainerResult<BeanInstance> {
            Err(ContainerError::Initialization {
                name: bean_name.to_string(),
                source: anyhow::anyhow!("rejected by policy"),
            })
        }
    }

    let factory = DefaultListableBeanFactory::new();
    factory.add_bean_post_processor(Arc::new(Rejecting));
    factory
        .register_bean_definition(BeanDefinition::with_supplier_of(
            "x",
            FunctionFactory::new(|_| Ok(Node::default())),
        ))
        .unwrap();

    assert!(matches!(
        factory.get_bean("x"),
        Err(ContainerError::Initialization { ref name, .. }) if name == "x"
    ));
    assert_eq!(factory.singleton_count(), 0);
}
