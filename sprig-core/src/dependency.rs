//! Dependency tracking for bean creation and destruction
//!
//! [`CreationTracker`] records, per thread, which beans are being created.
//! [`DependencyGraph`] records "X depends on Y" edges, which drive destroy
//! ordering through [`destroy_order`].

use std::collections::{HashMap, HashSet};
use std::thread::{self, ThreadId};

use parking_lot::RwLock;

use crate::constants::DEFAULT_MAX_CREATION_DEPTH;
use crate::{ContainerError, ContainerResult};

/// Tracks beans currently being created, separately for each thread.
///
/// The chain of the current thread doubles as the creation path reported in
/// circular-reference errors.
#[derive(Debug)]
pub struct CreationTracker {
    creating: RwLock<HashMap<ThreadId, Vec<String>>>,
    max_depth: usize,
}

impl Default for CreationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CreationTracker {
    /// Creates a new empty creation tracker.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_CREATION_DEPTH)
    }

    /// Creates a tracker whose per-thread chain may not exceed `max_depth`.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            creating: RwLock::new(HashMap::new()),
            max_depth: max_depth.max(1),
        }
    }

    /// Checks if a bean is currently being created on this thread.
    pub fn is_creating(&self, name: &str) -> bool {
        self.creating
            .read()
            .get(&thread::current().id())
            .is_some_and(|chain| chain.iter().any(|n| n == name))
    }

    /// Marks a bean as being created on this thread.
    ///
    /// Returns `true` if the bean was not already being created,
    /// `false` if it was (circular reference detected).
    pub fn start_creating(&self, name: &str) -> bool {
        let mut creating = self.creating.write();
        let chain = creating.entry(thread::current().id()).or_default();
        if chain.iter().any(|n| n == name) {
            return false;
        }
        chain.push(name.to_string());
        true
    }

    /// Marks a bean as finished being created on this thread.
    pub fn finish_creating(&self, name: &str) {
        let id = thread::current().id();
        let mut creating = self.creating.write();
        if let Some(chain) = creating.get_mut(&id) {
            if let Some(pos) = chain.iter().rposition(|n| n == name) {
                chain.remove(pos);
            }
            if chain.is_empty() {
                creating.remove(&id);
            }
        }
    }

    /// Gets a snapshot of the beans being created on this thread, outermost first.
    pub fn current_creating(&self) -> Vec<String> {
        self.creating
            .read()
            .get(&thread::current().id())
            .cloned()
            .unwrap_or_default()
    }

    /// Number of nested creations on this thread.
    pub fn depth(&self) -> usize {
        self.creating
            .read()
            .get(&thread::current().id())
            .map_or(0, Vec::len)
    }

    /// Enters the creation of `name`, failing if it is already being created
    /// on this thread.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::CurrentlyInCreation`] carrying the chain.
    pub fn enter(&self, name: &str) -> ContainerResult<CreationGuard<'_>> {
        if !self.start_creating(name) {
            let mut chain = self.current_creating();
            chain.push(name.to_string());
            return Err(ContainerError::CurrentlyInCreation {
                name: name.to_string(),
                chain,
            });
        }
        Ok(CreationGuard { tracker: self, name: name.to_string() })
    }

    /// Appends `name` to this thread's creation path. Repeats are allowed; only
    /// the depth is bounded.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::CyclicDependency`] once the path is deeper
    /// than the configured maximum.
    pub fn enter_path(&self, name: &str) -> ContainerResult<CreationGuard<'_>> {
        let mut creating = self.creating.write();
        let chain = creating.entry(thread::current().id()).or_default();
        if chain.len() >= self.max_depth {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(ContainerError::CyclicDependency { chain: cycle });
        }
        chain.push(name.to_string());
        Ok(CreationGuard { tracker: self, name: name.to_string() })
    }
}

/// Removes its bean from the tracker when dropped, including on unwind.
#[derive(Debug)]
pub struct CreationGuard<'a> {
    tracker: &'a CreationTracker,
    name: String,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish_creating(&self.name);
    }
}

#[derive(Debug, Default)]
struct Edges {
    /// bean -> beans that depend on it (destroy those first)
    dependent_beans: HashMap<String, Vec<String>>,
    /// bean -> beans it depends on
    dependencies_for_bean: HashMap<String, Vec<String>>,
}

/// Records runtime dependency edges between beans.
///
/// Insertion is additive and idempotent; edges only disappear when a bean is
/// destroyed or the graph is cleared.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: RwLock<Edges>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` depends on `bean`.
    pub fn register_dependent(&self, bean: &str, dependent: &str) {
        let mut edges = self.edges.write();
        let dependents = edges.dependent_beans.entry(bean.to_string()).or_default();
        if dependents.iter().any(|d| d == dependent) {
            return;
        }
        dependents.push(dependent.to_string());
        edges
            .dependencies_for_bean
            .entry(dependent.to_string())
            .or_default()
            .push(bean.to_string());
    }

    /// Beans that depend on `bean`, in the order the edges were recorded.
    pub fn dependents_of(&self, bean: &str) -> Vec<String> {
        self.edges.read().dependent_beans.get(bean).cloned().unwrap_or_default()
    }

    /// Beans that `bean` depends on, in the order the edges were recorded.
    pub fn dependencies_of(&self, bean: &str) -> Vec<String> {
        self.edges
            .read()
            .dependencies_for_bean
            .get(bean)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_dependents(&self, bean: &str) -> bool {
        self.edges
            .read()
            .dependent_beans
            .get(bean)
            .is_some_and(|d| !d.is_empty())
    }

    /// Checks whether `dependent` depends on `bean`, directly or transitively.
    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        let edges = self.edges.read();
        let mut visited = HashSet::new();
        let mut stack = vec![bean.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(dependents) = edges.dependent_beans.get(&current) {
                if dependents.iter().any(|d| d == dependent) {
                    return true;
                }
                stack.extend(dependents.iter().cloned());
            }
        }
        false
    }

    /// Removes all edges touching `bean` and returns the beans that depended on it.
    pub fn remove_bean(&self, bean: &str) -> Vec<String> {
        let mut edges = self.edges.write();
        let dependents = edges.dependent_beans.remove(bean).unwrap_or_default();
        for list in edges.dependent_beans.values_mut() {
            list.retain(|d| d != bean);
        }
        edges.dependent_beans.retain(|_, list| !list.is_empty());

        edges.dependencies_for_bean.remove(bean);
        for list in edges.dependencies_for_bean.values_mut() {
            list.retain(|d| d != bean);
        }
        edges.dependencies_for_bean.retain(|_, list| !list.is_empty());
        dependents
    }

    /// Copy of the `bean -> dependents` map.
    pub fn dependents_snapshot(&self) -> HashMap<String, Vec<String>> {
        self.edges.read().dependent_beans.clone()
    }

    pub fn clear(&self) {
        let mut edges = self.edges.write();
        edges.dependent_beans.clear();
        edges.dependencies_for_bean.clear();
    }
}

/// Result of [`destroy_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyOrder {
    /// Beans in the order they should be destroyed
    pub order: Vec<String>,
    /// Beans left on a dependency cycle, in registration order
    pub cycle: Option<Vec<String>>,
}

/// Computes a destroy order for `registered` (registration order).
///
/// Repeatedly takes the most recently registered bean that has no remaining
/// dependents. Beans left on a cycle follow in reverse registration order.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use sprig_core::dependency::destroy_order;
///
/// let registered = vec!["db".to_string(), "repo".to_string()];
/// let mut dependents = HashMap::new();
/// dependents.insert("db".to_string(), vec!["repo".to_string()]);
///
/// let result = destroy_order(&registered, &dependents);
/// assert_eq!(result.order, vec!["repo", "db"]);
/// assert!(result.cycle.is_none());
/// ```
pub fn destroy_order(registered: &[String], dependents: &HashMap<String, Vec<String>>) -> DestroyOrder {
    let mut remaining: Vec<&String> = registered.iter().collect();
    let mut order = Vec::with_capacity(registered.len());

    loop {
        let pick = remaining.iter().rposition(|bean| {
            dependents
                .get(bean.as_str())
                .map_or(true, |deps| !deps.iter().any(|d| d != *bean && remaining.contains(&d)))
        });
        match pick {
            Some(idx) => order.push(remaining.remove(idx).clone()),
            None => break,
        }
    }

    let cycle = if remaining.is_empty() {
        None
    } else {
        let cycle: Vec<String> = remaining.iter().map(|s| (*s).clone()).collect();
        order.extend(cycle.iter().rev().cloned());
        Some(cycle)
    };

    DestroyOrder { order, cycle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_creation_tracker() {
        let tracker = CreationTracker::new();

        // Initially nothing is being created
        assert!(!tracker.is_creating("serviceA"));

        assert!(tracker.start_creating("serviceA"));
        assert!(tracker.is_creating("serviceA"));

        // Second start on the same thread is a circular reference
        assert!(!tracker.start_creating("serviceA"));

        tracker.finish_creating("serviceA");
        assert!(!tracker.is_creating("serviceA"));
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn test_creation_tracker_is_per_thread() {
        let tracker = Arc::new(CreationTracker::new());
        let _guard = tracker.enter("serviceA").unwrap();

        let other = tracker.clone();
        let seen_elsewhere = std::thread::spawn(move || other.is_creating("serviceA"))
            .join()
            .unwrap();
        assert!(!seen_elsewhere);
        assert!(tracker.is_creating("serviceA"));
    }

    #[test]
    fn test_guard_reports_chain_and_cleans_up() {
        let tracker = CreationTracker::new();
        {
            let _a = tracker.enter("a").unwrap();
            let _b = tracker.enter("b").unwrap();
            match tracker.enter("a").unwrap_err() {
                ContainerError::CurrentlyInCreation { name, chain } => {
                    assert_eq!(name, "a");
                    assert_eq!(chain, names(&["a", "b", "a"]));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(tracker.current_creating().is_empty());
    }

    #[test]
    fn test_path_depth_bound() {
        let tracker = CreationTracker::with_max_depth(2);
        let _a = tracker.enter_path("a").unwrap();
        let _b = tracker.enter_path("a").unwrap();
        match tracker.enter_path("a").unwrap_err() {
            ContainerError::CyclicDependency { chain } => assert_eq!(chain, names(&["a", "a", "a"])),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dependency_graph_edges() {
        let graph = DependencyGraph::new();
        graph.register_dependent("db", "repo");
        graph.register_dependent("db", "repo");
        graph.register_dependent("repo", "service");

        assert_eq!(graph.dependents_of("db"), names(&["repo"]));
        assert_eq!(graph.dependencies_of("repo"), names(&["db"]));
        assert!(graph.is_dependent("db", "service"));
        assert!(!graph.is_dependent("service", "db"));

        assert_eq!(graph.remove_bean("repo"), names(&["service"]));
        assert!(!graph.has_dependents("db"));
        assert!(graph.dependencies_of("service").is_empty());
    }

    #[test]
    fn test_destroy_order_respects_dependents() {
        let registered = names(&["b", "a", "c"]);
        let mut dependents = HashMap::new();
        // a depends on b, c depends on a
        dependents.insert("b".to_string(), names(&["a"]));
        dependents.insert("a".to_string(), names(&["c"]));

        let result = destroy_order(&registered, &dependents);
        assert_eq!(result.order, names(&["c", "a", "b"]));
        assert!(result.cycle.is_none());
    }

    #[test]
    fn test_destroy_order_with_cycle() {
        let registered = names(&["x", "a", "b"]);
        let mut dependents = HashMap::new();
        dependents.insert("a".to_string(), names(&["b"]));
        dependents.insert("b".to_string(), names(&["a"]));

        let result = destroy_order(&registered, &dependents);
        assert_eq!(result.order, names(&["x", "b", "a"]));
        assert_eq!(result.cycle, Some(names(&["a", "b"])));
    }

    #[test]
    fn test_destroy_order_ignores_unregistered_dependents() {
        let registered = names(&["a"]);
        let mut dependents = HashMap::new();
        dependents.insert("a".to_string(), names(&["prototypeBean"]));
        assert_eq!(destroy_order(&registered, &dependents).order, names(&["a"]));
    }
}
