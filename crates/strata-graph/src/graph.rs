//! The migration dependency graph.
//!
//! [`DependencyGraph`] stores migration nodes and their dependency edges and
//! answers ordering questions: which nodes must be applied before a given
//! node ([`forwards_plan`](DependencyGraph::forwards_plan)), which must be
//! unapplied first ([`backwards_plan`](DependencyGraph::backwards_plan)),
//! and what cumulative project state a set of migrations produces
//! ([`project_state`](DependencyGraph::project_state)).
//!
//! Plans are computed by a memoized depth-first search over the forward or
//! reverse edge map. An explicit in-progress path stack detects cycles and
//! reports the exact offending slice. Children are visited in sorted order
//! so plans are reproducible across runs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use strata_core::{StrataError, StrataResult};

use crate::node::{NodeKey, StateMutation};

/// Which edge relation a traversal follows. Used together with the start
/// node as the memo key, so forward and backward results never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Forwards,
    Backwards,
}

/// A directed acyclic graph of migration nodes.
///
/// Each node carries a [`StateMutation`] implementation over an opaque
/// state type `S`. Edges express "child depends on parent"; the graph
/// maintains the inverse index in lockstep so reverse traversal is O(1)
/// per edge.
///
/// Root and leaf queries special-case edges within a scope: a node whose
/// only dependents live in other scopes is still the most current node of
/// its own scope.
pub struct DependencyGraph<S> {
    /// All nodes and their state-mutation payloads.
    nodes: HashMap<NodeKey, Box<dyn StateMutation<S>>>,
    /// Forward edges: node -> the nodes it depends on.
    dependencies: HashMap<NodeKey, BTreeSet<NodeKey>>,
    /// Inverse edges: node -> the nodes that depend on it. Always the
    /// exact transpose of `dependencies`.
    dependents: HashMap<NodeKey, BTreeSet<NodeKey>>,
}

impl<S> DependencyGraph<S> {
    /// Creates a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Adds a node with its state-mutation payload.
    ///
    /// Overwriting an existing node is allowed; the loading layer relies on
    /// this for replacement and squash scenarios.
    pub fn add_node(&mut self, node: NodeKey, implementation: Box<dyn StateMutation<S>>) {
        self.nodes.insert(node.clone(), implementation);
        self.dependencies.entry(node.clone()).or_default();
        self.dependents.entry(node).or_default();
    }

    /// Adds a dependency edge: `child` depends on `parent`.
    ///
    /// Both endpoints must already exist. Duplicate edges are absorbed.
    pub fn add_dependency(&mut self, child: &NodeKey, parent: &NodeKey) -> StrataResult<()> {
        if !self.nodes.contains_key(child) {
            return Err(StrataError::MissingNode(format!("{child:?} (as child)")));
        }
        if !self.nodes.contains_key(parent) {
            return Err(StrataError::MissingNode(format!("{parent:?} (as parent)")));
        }
        self.dependencies
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.dependents
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        Ok(())
    }

    /// Returns the ordered list of nodes that must be applied to reach
    /// `node`, dependencies first, ending with `node` itself.
    pub fn forwards_plan(&self, node: &NodeKey) -> StrataResult<Vec<NodeKey>> {
        if !self.nodes.contains_key(node) {
            return Err(StrataError::InvalidNode(format!("{node:?}")));
        }
        tracing::debug!(node = ?node, "computing forwards plan");
        self.dfs(node, Direction::Forwards)
    }

    /// Returns the ordered list of nodes that must be unapplied to remove
    /// `node`, dependents first, ending with `node` itself.
    pub fn backwards_plan(&self, node: &NodeKey) -> StrataResult<Vec<NodeKey>> {
        if !self.nodes.contains_key(node) {
            return Err(StrataError::InvalidNode(format!("{node:?}")));
        }
        tracing::debug!(node = ?node, "computing backwards plan");
        self.dfs(node, Direction::Backwards)
    }

    /// Returns all root nodes: nodes with no dependency inside their own
    /// scope. Dependencies on other scopes do not disqualify a root.
    pub fn root_nodes(&self) -> Vec<NodeKey> {
        let mut roots: Vec<NodeKey> = self
            .nodes
            .keys()
            .filter(|node| {
                self.dependencies
                    .get(*node)
                    .map_or(true, |parents| !parents.iter().any(|parent| parent.0 == node.0))
            })
            .cloned()
            .collect();
        roots.sort();
        roots
    }

    /// Returns all leaf nodes: nodes with no dependent inside their own
    /// scope. These are the most current migration of each scope.
    pub fn leaf_nodes(&self) -> Vec<NodeKey> {
        let mut leaves: Vec<NodeKey> = self
            .nodes
            .keys()
            .filter(|node| {
                self.dependents
                    .get(*node)
                    .map_or(true, |children| !children.iter().any(|child| child.0 == node.0))
            })
            .cloned()
            .collect();
        leaves.sort();
        leaves
    }

    /// Dynamic-programming depth-first search shared by both plan
    /// directions.
    fn dfs(&self, start: &NodeKey, direction: Direction) -> StrataResult<Vec<NodeKey>> {
        let mut cache: HashMap<(NodeKey, Direction), Vec<NodeKey>> = HashMap::new();
        let mut path: Vec<NodeKey> = Vec::new();
        self.dfs_visit(start, direction, &mut cache, &mut path)
    }

    fn dfs_visit(
        &self,
        start: &NodeKey,
        direction: Direction,
        cache: &mut HashMap<(NodeKey, Direction), Vec<NodeKey>>,
        path: &mut Vec<NodeKey>,
    ) -> StrataResult<Vec<NodeKey>> {
        if let Some(cached) = cache.get(&(start.clone(), direction)) {
            return Ok(cached.clone());
        }
        // A node already on the in-progress path closes a cycle. Report the
        // slice from its first occurrence through the closing edge.
        if let Some(pos) = path.iter().position(|n| n == start) {
            let mut cycle: Vec<NodeKey> = path[pos..].to_vec();
            cycle.push(start.clone());
            return Err(StrataError::CircularDependency { cycle });
        }

        let mut results = vec![start.clone()];
        let edge_map = match direction {
            Direction::Forwards => &self.dependencies,
            Direction::Backwards => &self.dependents,
        };
        let children = edge_map.get(start).cloned().unwrap_or_default();

        path.push(start.clone());
        for child in &children {
            // Child results go first so that what a node needs always
            // precedes it in the final order.
            let mut merged = self.dfs_visit(child, direction, cache, path)?;
            merged.extend(results);
            results = merged;
        }
        path.pop();

        // Multiple paths to a shared ancestor leave duplicates behind;
        // keep the first occurrence of each node.
        let mut seen: HashSet<NodeKey> = HashSet::new();
        results.retain(|node| seen.insert(node.clone()));

        cache.insert((start.clone(), direction), results.clone());
        Ok(results)
    }

    /// Folds a cumulative project state from the given target nodes.
    ///
    /// When `nodes` is `None`, the current leaves of every scope are used,
    /// producing the overall most current state. The fold applies every
    /// plan node's `mutate_state` exactly once, in dependency order,
    /// deduplicated across all requested targets combined.
    ///
    /// When `at_end` is `false`, nodes present in the requested target set
    /// itself are excluded from the fold: the result is the state
    /// immediately before those migrations run.
    pub fn project_state(&self, nodes: Option<&[NodeKey]>, at_end: bool) -> StrataResult<S>
    where
        S: Default,
    {
        let targets: Vec<NodeKey> = match nodes {
            Some(nodes) => nodes.to_vec(),
            None => self.leaf_nodes(),
        };

        let mut plan: Vec<NodeKey> = Vec::new();
        for target in &targets {
            for node in self.forwards_plan(target)? {
                if plan.contains(&node) {
                    continue;
                }
                if !at_end && targets.contains(&node) {
                    continue;
                }
                plan.push(node);
            }
        }

        let mut state = S::default();
        for node in &plan {
            if let Some(implementation) = self.nodes.get(node) {
                state = implementation.mutate_state(state);
            }
        }
        Ok(state)
    }

    /// Checks the whole graph for cycles by planning every node.
    pub fn validate(&self) -> StrataResult<()> {
        for node in self.nodes.keys() {
            self.forwards_plan(node)?;
        }
        Ok(())
    }

    /// Returns whether the graph contains a given node.
    pub fn contains(&self, node: &NodeKey) -> bool {
        self.nodes.contains_key(node)
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns all node keys, sorted.
    pub fn node_keys(&self) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self.nodes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the direct dependencies of a node, sorted.
    pub fn dependencies_of(&self, node: &NodeKey) -> Vec<NodeKey> {
        self.dependencies
            .get(node)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a node, sorted.
    pub fn dependents_of(&self, node: &NodeKey) -> Vec<NodeKey> {
        self.dependents
            .get(node)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl<S> Default for DependencyGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Display for DependencyGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: usize = self.dependencies.values().map(BTreeSet::len).sum();
        write!(f, "Graph: {} nodes, {} edges", self.nodes.len(), edges)
    }
}
