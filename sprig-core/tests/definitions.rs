//! Definition merging, aliases and parent stores

use std::sync::{Arc, OnceLock};

use sprig_core::prelude::*;
use sprig_core::{ContainerConfig, StaticConfigSource};

#[derive(Default)]
struct Pool {
    url: OnceLock<String>,
    size: OnceLock<i64>,
}

fn pool_supplier() -> FunctionFactory<Pool> {
    FunctionFactory::new(|_| Ok(Pool::default())).with_setter(|pool: &Pool, property, value| {
        match property {
            "url" => {
                let url = value.as_str().ok_or_else(|| anyhow::anyhow!("url must be a string"))?;
                let _ = pool.url.set(url.to_string());
            }
            "size" => {
                let size = value.as_i64().ok_or_else(|| anyhow::anyhow!("size must be an integer"))?;
                let _ = pool.size.set(size);
            }
            other => anyhow::bail!("unknown property '{}'", other),
        }
        Ok(())
    })
}

#[test]
fn test_child_overrides_one_property_and_inherits_the_other() {
    let factory = DefaultListableBeanFactory::new();
    factory
        .register_bean_definition(
            BeanDefinition::with_supplier_of("basePool", pool_supplier())
                .with_abstract(true)
                .with_property("url", "db://primary")
                .with_property("size", 4_i64),
        )
        .unwrap();
    factory
        .register_bean_definition(
            BeanDefinition::new("reportingPool")
                .with_parent("basePool")
                .with_property("size", 16_i64),
        )
        .unwrap();

    let merged = factory.get_merged_bean_definition("reportingPool").unwrap();
    assert_eq!(merged.properties.get("url"), Some(&BeanValue::from("db://primary")));
    assert_eq!(merged.properties.get("size"), Some(&BeanValue::Int(16)));
    assert!(!merged.is_abstract());
    assert!(merged.is_derived_from("basePool"));

    // 父定义不受影响
    let parent = factory.get_merged_bean_definition("basePool").unwrap();
    assert_eq!(parent.properties.get("size"), Some(&BeanValue::Int(4)));

    let pool = factory.get_bean_typed::<Pool>("reportingPool").unwrap();
    assert_eq!(pool.url.get().map(String::as_str), Some("db://primary"));
    assert_eq!(pool.size.get(), Some(&16));
}

#[test]
fn test_merging_is_idempotent() {
    let parent = BeanDefinition::new("parent")
        .with_type_name("Pool")
        .with_property("url", "db://a")
        .with_scope("prototype");
    let child = BeanDefinition::new("child")
        .with_parent("parent")
        .with_property("size", 2_i64);

    let once = child.merged_over(&parent);
    let twice = once.merged_over(&parent);
    assert_eq!(once, twice);
    assert_eq!(once.scope.as_deref(), Some("prototype"));
}

#[test]
fn test_parent_change_invalidates_merged_child() {
    let config = ContainerConfig::default().with_allow_definition_overriding(true);
    let factory = DefaultListableBeanFactory::builder().with_config(config).build();
    factory
        .register_bean_definition(BeanDefinition::new("parent").with_type_name("Pool").with_property("size", 1_i64))
        .unwrap();
    factory
        .register_bean_definition(BeanDefinition::new("child").with_parent("parent"))
        .unwrap();
    let before = factory.get_merged_bean_definition("child").unwrap();
    assert_eq!(before.properties.get("size"), Some(&BeanValue::Int(1)));

    factory
        .register_bean_definition(BeanDefinition::new("parent").with_type_name("Pool").with_property("size", 9_i64))
        .unwrap();
    let after = factory.get_merged_bean_definition("child").unwrap();
    assert_eq!(after.properties.get("size"), Some(&BeanValue::Int(9)));
    assert!(before.is_stale());
}

#[test]
fn test_cyclic_parent_chain_is_rejected() {
    let factory = DefaultListableBeanFactory::new();
    factory
        .register_bean_definition(BeanDefinition::new("a").with_parent("b"))
        .unwrap();
    factory
        .register_bean_definition(BeanDefinition::new("b").with_parent("a"))
        .unwrap();

    assert!(matches!(
        factory.get_bean("a"),
        Err(ContainerError::CyclicParent { .. })
    ));
}

#[test]
fn test_alias_chain_resolves_and_rejects_repointing() {
    let factory = DefaultListableBeanFactory::new();
    factory
        .register_bean_definition(BeanDefinition::with_supplier_of("x", pool_supplier()))
        .unwrap();
    factory
        .register_bean_definition(BeanDefinition::with_supplier_of("y", pool_supplier()))
        .unwrap();

    factory.register_alias("a", "x").unwrap();
    factory.register_alias("b", "a").unwrap();
    assert!(Arc::ptr_eq(
        &factory.get_merged_bean_definition("b").unwrap(),
        &factory.get_merged_bean_definition("x").unwrap()
    ));
    assert!(factory.get_bean("b").unwrap().ptr_eq(&factory.get_bean("x").unwrap()));

    match factory.register_alias("a", "y") {
        Err(ContainerError::AliasInUse { alias, existing, requested }) => {
            assert_eq!(alias, "a");
            assert_eq!(existing, "x");
            assert_eq!(requested, "y");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // 定义名称不能再用作别名
    assert!(matches!(
        factory.register_alias("y", "x"),
        Err(ContainerError::AliasInUse { .. })
    ));
}

#[test]
fn test_alias_cycle_is_rejected() {
    let factory = DefaultListableBeanFactory::new();
    factory.register_alias("a", "b").unwrap();
    factory.register_alias("b", "c").unwrap();
    assert!(matches!(
        factory.register_alias("c", "a"),
        Err(ContainerError::AliasCycle { .. })
    ));
}

#[test]
fn test_resolve_aliases_rewrites_names() {
    let factory = DefaultListableBeanFactory::new();
    factory
        .register_bean_definition(BeanDefinition::with_supplier_of("pool-v2", pool_supplier()))
        .unwrap();
    factory.register_alias("${pool}", "pool-v2").unwrap();

    factory
        .resolve_aliases(&|name: &str| Some(name.replace("${pool}", "pool")))
        .unwrap();
    assert!(factory.get_bean("pool").is_ok());
    assert!(factory.get_bean("${pool}").is_err());
}

#[test]
fn test_parent_factory_definitions_are_visible_to_child() {
    let parent = Arc::new(DefaultListableBeanFactory::new());
    parent
        .load_definitions(
            &StaticConfigSource::new("parent-beans")
                .with_definition(
                    BeanDefinition::with_supplier_of("template", pool_supplier())
                        .with_property("url", "db://shared"),
                )
                .with_alias("sharedPool", "template"),
        )
        .unwrap();

    let child = DefaultListableBeanFactory::builder().with_parent(parent.clone()).build();
    child
        .register_bean_definition(
            BeanDefinition::new("local")
                .with_parent("template")
                .with_property("size", 3_i64),
        )
        .unwrap();

    let local = child.get_bean_typed::<Pool>("local").unwrap();
    assert_eq!(local.url.get().map(String::as_str), Some("db://shared"));
    assert_eq!(local.size.get(), Some(&3));

    // 父工厂的单例共享给子工厂
    assert!(child
        .get_bean("template")
        .unwrap()
        .ptr_eq(&parent.get_bean("sharedPool").unwrap()));
}

#[test]
fn test_parent_factory_redefinition_reaches_child_merge() {
    let config = ContainerConfig::default().with_allow_definition_overriding(true);
    let parent = Arc::new(DefaultListableBeanFactory::builder().with_config(config).build());
    parent
        .register_bean_definition(BeanDefinition::with_supplier_of("p", pool_supplier()).with_property("size", 1_i64))
        .unwrap();

    let child = DefaultListableBeanFactory::builder().with_parent(parent.clone()).build();
    child
        .register_bean_definition(BeanDefinition::new("c").with_parent("p"))
        .unwrap();
    let before = child.get_merged_bean_definition("c").unwrap();
    assert_eq!(before.properties.get("size"), Some(&BeanValue::Int(1)));

    parent
        .register_bean_definition(BeanDefinition::with_supplier_of("p", pool_supplier()).with_property("size", 2_i64))
        .unwrap();
    assert!(before.is_stale());

    let after = child.get_merged_bean_definition("c").unwrap();
    assert_eq!(after.properties.get("size"), Some(&BeanValue::Int(2)));
    let pool = child.get_bean_typed::<Pool>("c").unwrap();
    assert_eq!(pool.size.get(), Some(&2));
}

#[test]
fn test_duplicate_definition_rejected_without_overriding() {
    let factory = DefaultListableBeanFactory::new();
    factory
        .register_bean_definition(BeanDefinition::new("x").with_type_name("Pool"))
        .unwrap();
    assert!(matches!(
        factory.register_bean_definition(BeanDefinition::new("x").with_type_name("Pool")),
        Err(ContainerError::DuplicateDefinition { .. })
    ));
    assert!(matches!(
        factory.register_bean_definition(BeanDefinition::new("").with_type_name("Pool")),
        Err(ContainerError::InvalidDefinition { .. })
    ));
}
