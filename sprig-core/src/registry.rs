//! Bean 定义存储
//!
//! 保存原始定义（按注册顺序）、合并定义缓存以及别名表。未知名称委托给父存储。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::alias::AliasRegistry;
use crate::bean::{BeanDefinition, RootBeanDefinition};
use crate::config::ContainerConfig;
use crate::{ContainerError, ContainerResult};

#[derive(Debug, Default)]
struct Definitions {
    by_name: HashMap<String, Arc<BeanDefinition>>,
    names: Vec<String>,
}

/// Bean 定义注册表
#[derive(Debug)]
pub struct DefinitionRegistry {
    definitions: RwLock<Definitions>,
    merged: RwLock<HashMap<String, Arc<RootBeanDefinition>>>,
    /// 每次定义变更递增；合并期间发生变更的结果不进入缓存
    generation: AtomicU64,
    aliases: AliasRegistry,
    parent: Option<Arc<DefinitionRegistry>>,
    allow_overriding: bool,
    max_parent_depth: usize,
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new(&ContainerConfig::default(), None)
    }
}

impl DefinitionRegistry {
    /// 创建注册表
    pub fn new(config: &ContainerConfig, parent: Option<Arc<DefinitionRegistry>>) -> Self {
        Self {
            definitions: RwLock::new(Definitions::default()),
            merged: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            aliases: AliasRegistry::new(config.allow_alias_overriding, config.max_alias_chain),
            parent,
            allow_overriding: config.allow_definition_overriding,
            max_parent_depth: config.max_parent_depth.max(1),
        }
    }

    pub fn parent(&self) -> Option<&Arc<DefinitionRegistry>> {
        self.parent.as_ref()
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    /// 注册 Bean 定义
    ///
    /// 返回是否替换了已有定义。替换时以该名称为自身或祖先的合并定义全部失效。
    pub fn register(&self, definition: BeanDefinition) -> ContainerResult<bool> {
        definition.validate()?;
        let name = definition.name.clone();

        if self.aliases.is_alias(&name) {
            return Err(ContainerError::InvalidDefinition {
                name: name.clone(),
                reason: "name is already registered as an alias".to_string(),
            });
        }

        let replaced = {
            let mut defs = self.definitions.write();
            let replaced = match defs.by_name.get(&name) {
                Some(_) if !self.allow_overriding => {
                    return Err(ContainerError::DuplicateDefinition { name });
                }
                Some(_) => {
                    tracing::debug!("Overriding bean definition for bean '{}'", name);
                    true
                }
                None => {
                    defs.names.push(name.clone());
                    false
                }
            };
            defs.by_name.insert(name.clone(), Arc::new(definition));
            replaced
        };

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.invalidate(&name);
        tracing::debug!("Registered bean definition '{}'", name);
        Ok(replaced)
    }

    /// 移除 Bean 定义
    pub fn remove(&self, name: &str) -> ContainerResult<Arc<BeanDefinition>> {
        let removed = {
            let mut defs = self.definitions.write();
            let removed = defs
                .by_name
                .remove(name)
                .ok_or_else(|| ContainerError::NoSuchDefinition(name.to_string()))?;
            defs.names.retain(|n| n != name);
            removed
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.invalidate(name);
        tracing::debug!("Removed bean definition '{}'", name);
        Ok(removed)
    }

    /// 使以 `name` 为自身或祖先的合并定义失效
    pub fn invalidate(&self, name: &str) {
        let mut merged = self.merged.write();
        merged.retain(|_, root| {
            if root.is_derived_from(name) {
                root.mark_stale();
                false
            } else {
                true
            }
        });
    }

    /// 使所有合并定义失效
    pub fn clear_merged(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut merged = self.merged.write();
        for root in merged.values() {
            root.mark_stale();
        }
        merged.clear();
    }

    /// 本地是否有该名称的原始定义
    pub fn contains_local(&self, name: &str) -> bool {
        self.definitions.read().by_name.contains_key(name)
    }

    /// 本地或祖先存储中是否有该名称
    pub fn contains(&self, name: &str) -> bool {
        self.contains_local(name) || self.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// 获取原始定义
    pub fn get_raw(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.definitions.read().by_name.get(name).cloned()
    }

    /// 所有本地定义名称（注册顺序）
    pub fn names(&self) -> Vec<String> {
        self.definitions.read().names.clone()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 解析别名得到规范名称
    pub fn canonical_name(&self, name: &str) -> ContainerResult<String> {
        self.aliases.canonical_name(name)
    }

    /// 注册别名
    pub fn register_alias(&self, alias: &str, target: &str) -> ContainerResult<()> {
        if alias != target && self.contains_local(alias) {
            return Err(ContainerError::AliasInUse {
                alias: alias.to_string(),
                existing: alias.to_string(),
                requested: target.to_string(),
            });
        }
        self.aliases.register_alias(alias, target)
    }

    /// 获取合并定义（名称可以是别名）
    ///
    /// 缓存中未失效的结果直接返回；否则沿父定义链合并并缓存。
    pub fn get_merged(&self, name: &str) -> ContainerResult<Arc<RootBeanDefinition>> {
        let canonical = self.canonical_name(name)?;
        if let Some(root) = self.merged.read().get(&canonical) {
            if !root.is_stale() {
                return Ok(root.clone());
            }
        }

        if !self.contains_local(&canonical) {
            return match &self.parent {
                Some(parent) => parent.get_merged(&canonical),
                None => Err(ContainerError::NoSuchDefinition(canonical)),
            };
        }

        let mut chain = Vec::new();
        self.merge_local(&canonical, &mut chain)
    }

    fn merge_local(&self, name: &str, chain: &mut Vec<String>) -> ContainerResult<Arc<RootBeanDefinition>> {
        if let Some(root) = self.merged.read().get(name) {
            if !root.is_stale() {
                return Ok(root.clone());
            }
        }

        if chain.iter().any(|seen| seen == name) || chain.len() >= self.max_parent_depth {
            chain.push(name.to_string());
            return Err(ContainerError::CyclicParent { chain: chain.clone() });
        }
        chain.push(name.to_string());

        let generation = self.generation.load(Ordering::SeqCst);
        let raw = self
            .get_raw(name)
            .ok_or_else(|| ContainerError::NoSuchDefinition(name.to_string()))?;

        let root = match raw.parent_name.as_deref() {
            None => RootBeanDefinition::new((*raw).clone(), Vec::new()),
            Some(parent_name) => {
                let parent_canonical = self.canonical_name(parent_name)?;
                let parent_root = if parent_canonical != name && self.contains_local(&parent_canonical) {
                    self.merge_local(&parent_canonical, chain)?
                } else {
                    // 父名称与自身相同时只能在父存储中查找
                    match &self.parent {
                        Some(parent) => parent.get_merged(&parent_canonical)?,
                        None => {
                            return Err(ContainerError::InvalidDefinition {
                                name: name.to_string(),
                                reason: format!(
                                    "parent definition '{}' not found",
                                    parent_canonical
                                ),
                            })
                        }
                    }
                };

                let mut parent_chain = vec![parent_canonical];
                parent_chain.extend(parent_root.parent_chain().iter().cloned());
                let merged = raw.merged_over(parent_root.definition());
                RootBeanDefinition::new(merged, parent_chain).with_parent_root(parent_root)
            }
        };

        chain.pop();
        let root = Arc::new(root);
        {
            let mut merged = self.merged.write();
            if self.generation.load(Ordering::SeqCst) == generation {
                merged.insert(name.to_string(), root.clone());
            } else {
                // 合并期间定义被修改，结果可能已过期
                root.mark_stale();
            }
        }
        tracing::trace!("Merged bean definition '{}' (ancestors: {:?})", name, root.parent_chain());
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::BeanValue;

    fn registry() -> DefinitionRegistry {
        DefinitionRegistry::default()
    }

    #[test]
    fn test_duplicate_definition_rejected_by_default() {
        let reg = registry();
        assert!(!reg.register(BeanDefinition::new("a").with_type_name("A")).unwrap());
        let err = reg.register(BeanDefinition::new("a").with_type_name("B")).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateDefinition { .. }));

        let config = ContainerConfig::default().with_allow_definition_overriding(true);
        let reg = DefinitionRegistry::new(&config, None);
        reg.register(BeanDefinition::new("a").with_type_name("A")).unwrap();
        assert!(reg.register(BeanDefinition::new("a").with_type_name("B")).unwrap());
        assert_eq!(reg.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_child_merge_keeps_parent_values() {
        let reg = registry();
        reg.register(
            BeanDefinition::new("parent")
                .with_type_name("Car")
                .with_property("w", "W")
                .with_property("z", "parent-z"),
        )
        .unwrap();
        reg.register(BeanDefinition::new("child").with_parent("parent").with_property("z", "child-z"))
            .unwrap();

        let merged = reg.get_merged("child").unwrap();
        assert_eq!(merged.properties.get("w"), Some(&BeanValue::from("W")));
        assert_eq!(merged.properties.get("z"), Some(&BeanValue::from("child-z")));
        assert_eq!(merged.parent_chain(), &["parent".to_string()]);

        // 缓存命中返回同一个 Arc
        assert!(Arc::ptr_eq(&merged, &reg.get_merged("child").unwrap()));
    }

    #[test]
    fn test_multi_level_chain_and_invalidation() {
        let config = ContainerConfig::default().with_allow_definition_overriding(true);
        let reg = DefinitionRegistry::new(&config, None);
        reg.register(BeanDefinition::new("root").with_type_name("T").with_scope("prototype"))
            .unwrap();
        reg.register(BeanDefinition::new("mid").with_parent("root")).unwrap();
        reg.register(BeanDefinition::new("leaf").with_parent("mid")).unwrap();

        let leaf = reg.get_merged("leaf").unwrap();
        assert!(leaf.is_prototype());
        assert_eq!(leaf.parent_chain(), &["mid".to_string(), "root".to_string()]);

        // 修改祖先使后代失效并重新合并
        reg.register(BeanDefinition::new("root").with_type_name("T").with_scope("singleton"))
            .unwrap();
        assert!(leaf.is_stale());
        assert!(reg.get_merged("leaf").unwrap().is_singleton());
    }

    #[test]
    fn test_cyclic_parent_chain() {
        let reg = registry();
        reg.register(BeanDefinition::new("a").with_parent("b")).unwrap();
        reg.register(BeanDefinition::new("b").with_parent("c")).unwrap();
        reg.register(BeanDefinition::new("c").with_parent("a")).unwrap();

        match reg.get_merged("a").unwrap_err() {
            ContainerError::CyclicParent { chain } => {
                assert_eq!(chain, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_alias_lookup_and_parent_store_delegation() {
        let parent = Arc::new(registry());
        parent
            .register(BeanDefinition::new("base").with_type_name("Base").with_property("k", "v"))
            .unwrap();

        let child = DefinitionRegistry::new(&ContainerConfig::default(), Some(parent.clone()));
        // 与父存储同名的定义继承父存储中的版本
        child
            .register(BeanDefinition::new("base").with_parent("base").with_property("extra", 1_i64))
            .unwrap();
        child.register_alias("x", "base").unwrap();
        child.register_alias("b", "x").unwrap();

        let merged = child.get_merged("b").unwrap();
        assert_eq!(merged.properties.get("k"), Some(&BeanValue::from("v")));
        assert_eq!(merged.properties.get("extra"), Some(&BeanValue::Int(1)));
        assert!(Arc::ptr_eq(&merged, &child.get_merged("x").unwrap()));

        assert!(matches!(
            child.get_merged("missing"),
            Err(ContainerError::NoSuchDefinition(_))
        ));
        assert!(matches!(
            child.register_alias("x", "other"),
            Err(ContainerError::AliasInUse { .. })
        ));
    }

    #[test]
    fn test_parent_store_change_invalidates_child_merge() {
        let config = ContainerConfig::default().with_allow_definition_overriding(true);
        let parent = Arc::new(DefinitionRegistry::new(&config, None));
        parent
            .register(BeanDefinition::new("p").with_type_name("P").with_property("w", 1_i64))
            .unwrap();
        let child = DefinitionRegistry::new(&config, Some(parent.clone()));
        child.register(BeanDefinition::new("c").with_parent("p")).unwrap();

        let before = child.get_merged("c").unwrap();
        assert_eq!(before.properties.get("w"), Some(&BeanValue::Int(1)));

        parent
            .register(BeanDefinition::new("p").with_type_name("P").with_property("w", 2_i64))
            .unwrap();
        assert!(before.is_stale());
        assert_eq!(child.get_merged("c").unwrap().properties.get("w"), Some(&BeanValue::Int(2)));

        parent.remove("p").unwrap();
        assert!(child.get_merged("c").is_err());
    }

    #[test]
    fn test_concurrent_overrides_never_leave_outdated_merge_cached() {
        let config = ContainerConfig::default().with_allow_definition_overriding(true);
        let reg = Arc::new(DefinitionRegistry::new(&config, None));
        reg.register(BeanDefinition::new("base").with_type_name("T").with_property("v", 0_i64))
            .unwrap();
        reg.register(BeanDefinition::new("leaf").with_parent("base")).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        reg.get_merged("leaf").unwrap();
                    }
                })
            })
            .collect();
        for v in 1..=200_i64 {
            reg.register(BeanDefinition::new("base").with_type_name("T").with_property("v", v))
                .unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        let merged = reg.get_merged("leaf").unwrap();
        assert_eq!(merged.properties.get("v"), Some(&BeanValue::Int(200)));
        assert!(!merged.is_stale());
    }

    #[test]
    fn test_remove_definition() {
        let reg = registry();
        reg.register(BeanDefinition::new("a").with_type_name("A")).unwrap();
        let merged = reg.get_merged("a").unwrap();
        reg.remove("a").unwrap();
        assert!(merged.is_stale());
        assert!(reg.is_empty());
        assert!(matches!(reg.remove("a"), Err(ContainerError::NoSuchDefinition(_))));
    }
}
