//! Alias table for bean names
//!
//! Aliases form chains (`b -> a -> x`) that resolve transitively to a canonical
//! name. Cycles and over-long chains are rejected both when an alias is
//! registered and when a name is resolved.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use crate::constants::DEFAULT_MAX_ALIAS_CHAIN;
use crate::{ContainerError, ContainerResult};

/// Alias to target mapping plus the order in which aliases were registered.
#[derive(Debug, Clone, Default)]
struct AliasTable {
    targets: HashMap<String, String>,
    order: Vec<String>,
}

impl AliasTable {
    fn insert(&mut self, alias: &str, target: &str) {
        if self.targets.insert(alias.to_string(), target.to_string()).is_none() {
            self.order.push(alias.to_string());
        }
    }

    fn remove(&mut self, alias: &str) -> Option<String> {
        let removed = self.targets.remove(alias)?;
        self.order.retain(|a| a != alias);
        Some(removed)
    }

    /// Follows the chain starting at `target` and fails if it leads back to
    /// `alias` or runs longer than `max_chain`.
    fn check_for_alias_circle(&self, alias: &str, target: &str, max_chain: usize) -> ContainerResult<()> {
        let mut chain = vec![alias.to_string(), target.to_string()];
        let mut current = target;
        loop {
            if current == alias || chain.len() > max_chain + 1 {
                return Err(ContainerError::AliasCycle {
                    alias: alias.to_string(),
                    chain,
                });
            }
            match self.targets.get(current) {
                Some(next) => {
                    chain.push(next.clone());
                    current = next;
                }
                None => return Ok(()),
            }
        }
    }
}

/// Thread-safe registry of name aliases.
///
/// Readers never observe a half-applied [`resolve_aliases`](Self::resolve_aliases):
/// the rewrite is built on a copy and swapped in under the write lock.
#[derive(Debug)]
pub struct AliasRegistry {
    table: RwLock<AliasTable>,
    // Serializes writers so a copy-based rewrite cannot lose a concurrent registration.
    write_lock: Mutex<()>,
    allow_overriding: bool,
    max_chain: usize,
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_ALIAS_CHAIN)
    }
}

impl AliasRegistry {
    /// Creates an empty registry.
    pub fn new(allow_overriding: bool, max_chain: usize) -> Self {
        Self {
            table: RwLock::new(AliasTable::default()),
            write_lock: Mutex::new(()),
            allow_overriding,
            max_chain: max_chain.max(1),
        }
    }

    /// Registers `alias` for `target`.
    ///
    /// An alias equal to its target removes the alias. Re-registering the same
    /// mapping is a no-op.
    ///
    /// # Errors
    ///
    /// * [`ContainerError::AliasInUse`] if the alias maps to another name and
    ///   overriding is disabled.
    /// * [`ContainerError::AliasCycle`] if the new mapping would close a cycle.
    pub fn register_alias(&self, alias: &str, target: &str) -> ContainerResult<()> {
        if alias.trim().is_empty() || target.trim().is_empty() {
            return Err(ContainerError::InvalidDefinition {
                name: alias.to_string(),
                reason: "alias and target name must not be empty".to_string(),
            });
        }

        let _writer = self.write_lock.lock();

        if alias == target {
            if self.table.write().remove(alias).is_some() {
                tracing::debug!("Alias definition '{}' ignored since it points to same name", alias);
            }
            return Ok(());
        }

        let current = self.table.read().targets.get(alias).cloned();
        if let Some(existing) = current {
            if existing == target {
                return Ok(());
            }
            if !self.allow_overriding {
                return Err(ContainerError::AliasInUse {
                    alias: alias.to_string(),
                    existing,
                    requested: target.to_string(),
                });
            }
            tracing::debug!(
                "Overriding alias '{}' definition for registered name '{}' with new target name '{}'",
                alias,
                existing,
                target
            );
        }

        let mut table = self.table.write();
        table.check_for_alias_circle(alias, target, self.max_chain)?;
        table.insert(alias, target);
        tracing::trace!("Alias definition '{}' registered for name '{}'", alias, target);
        Ok(())
    }

    /// Removes an alias. Returns `false` if it was not registered.
    pub fn remove_alias(&self, alias: &str) -> bool {
        let _writer = self.write_lock.lock();
        self.table.write().remove(alias).is_some()
    }

    /// Returns whether `name` is registered as an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.table.read().targets.contains_key(name)
    }

    /// Returns whether `alias` resolves, directly or transitively, to `name`.
    pub fn has_alias(&self, name: &str, alias: &str) -> bool {
        let table = self.table.read();
        let mut current = alias;
        for _ in 0..self.max_chain {
            match table.targets.get(current) {
                Some(next) if next == name => return true,
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    /// Returns every alias that resolves to `name`, in registration order
    /// within each level of the chain.
    pub fn aliases_for(&self, name: &str) -> Vec<String> {
        let table = self.table.read();
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        collect_aliases(&table, name, &mut result, &mut visited);
        result
    }

    /// Resolves `name` through the alias chain to its canonical name.
    ///
    /// Names that are not aliases are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::AliasCycle`] if the chain repeats a name or
    /// is longer than the configured maximum.
    pub fn canonical_name(&self, name: &str) -> ContainerResult<String> {
        let table = self.table.read();
        let mut chain = vec![name.to_string()];
        let mut current = name;
        while let Some(next) = table.targets.get(current) {
            if chain.iter().any(|seen| seen == next) || chain.len() > self.max_chain {
                chain.push(next.clone());
                return Err(ContainerError::AliasCycle {
                    alias: name.to_string(),
                    chain,
                });
            }
            chain.push(next.clone());
            current = next;
        }
        Ok(current.to_string())
    }

    /// Rewrites every alias and target through `resolver`.
    ///
    /// Pairs where either side resolves to nothing, or both sides resolve to
    /// the same name, are dropped. A rewritten alias that collides with an
    /// identical mapping is dropped as well.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::AliasInUse`] if a rewritten alias collides
    /// with a different mapping, or [`ContainerError::AliasCycle`] if the rewrite
    /// introduces a cycle. The table is left untouched on error.
    pub fn resolve_aliases(&self, resolver: &dyn Fn(&str) -> Option<String>) -> ContainerResult<()> {
        let _writer = self.write_lock.lock();
        let snapshot = self.table.read().clone();
        let mut working = snapshot.clone();

        for alias in &snapshot.order {
            let Some(registered_name) = snapshot.targets.get(alias) else {
                continue;
            };
            let resolved_alias = resolver(alias);
            let resolved_name = resolver(registered_name);

            let (resolved_alias, resolved_name) = match (resolved_alias, resolved_name) {
                (Some(a), Some(n)) if a != n => (a, n),
                _ => {
                    working.remove(alias);
                    continue;
                }
            };

            if &resolved_alias != alias {
                if let Some(existing) = working.targets.get(&resolved_alias) {
                    if existing == &resolved_name {
                        working.remove(alias);
                        continue;
                    }
                    return Err(ContainerError::AliasInUse {
                        alias: resolved_alias,
                        existing: existing.clone(),
                        requested: resolved_name,
                    });
                }
                working.check_for_alias_circle(&resolved_alias, &resolved_name, self.max_chain)?;
                working.remove(alias);
                working.insert(&resolved_alias, &resolved_name);
            } else if &resolved_name != registered_name {
                working.targets.insert(alias.clone(), resolved_name);
            }
        }

        *self.table.write() = working;
        Ok(())
    }

    /// Number of registered aliases.
    pub fn len(&self) -> usize {
        self.table.read().targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect_aliases(table: &AliasTable, name: &str, result: &mut Vec<String>, visited: &mut HashSet<String>) {
    for alias in &table.order {
        if table.targets.get(alias).map(String::as_str) == Some(name) && visited.insert(alias.clone()) {
            result.push(alias.clone());
            collect_aliases(table, alias, result, visited);
        }
    }
}
