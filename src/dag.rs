//! A directed acyclic graph over integer node ids.
//!
//! The store keeps the category hierarchy in one of these; the edges are
//! persisted separately in the `category_child` table. The graph itself has
//! no persistence dependency and can be used standalone.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, ShelfError};

/// An in-memory DAG. Nodes are `i64` ids; edges are parent -> child.
#[derive(Debug, Default, Clone)]
pub struct Dag {
    elements: HashSet<i64>,
    roots: HashSet<i64>,
    parents: HashMap<i64, HashSet<i64>>,
    children: HashMap<i64, HashSet<i64>>,
}

impl Dag {
    pub fn new() -> Self {
        Dag::default()
    }

    /// Build a graph from a node list. All nodes start out as roots.
    pub fn with_nodes<I: IntoIterator<Item = i64>>(nodes: I) -> Self {
        let mut dag = Dag::new();
        for node in nodes {
            dag.add(node);
        }
        dag
    }

    pub fn contains(&self, node: i64) -> bool {
        self.elements.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.elements.iter().copied()
    }

    /// Add a node without edges. Adding an existing node is a no-op.
    pub fn add(&mut self, node: i64) {
        if self.elements.insert(node) {
            self.roots.insert(node);
            self.parents.insert(node, HashSet::new());
            self.children.insert(node, HashSet::new());
        }
    }

    /// Insert a parent -> child edge.
    ///
    /// Fails with `WouldCreateLoop` if the parent is already reachable from
    /// the child; in that case the graph is left unchanged. The check runs
    /// before any mutation.
    pub fn connect(&mut self, parent: i64, child: i64) -> Result<()> {
        if self.reachable(child, parent) {
            return Err(ShelfError::WouldCreateLoop { parent, child });
        }
        self.parents.entry(child).or_default().insert(parent);
        self.children.entry(parent).or_default().insert(child);
        self.roots.remove(&child);
        Ok(())
    }

    /// Whether a direct parent -> child edge exists.
    pub fn connected(&self, parent: i64, child: i64) -> bool {
        self.children
            .get(&parent)
            .map_or(false, |ch| ch.contains(&child))
    }

    /// Remove a parent -> child edge. Removing a non-existent edge is a
    /// no-op.
    pub fn disconnect(&mut self, parent: i64, child: i64) {
        if let Some(parents) = self.parents.get_mut(&child) {
            parents.remove(&parent);
            if parents.is_empty() {
                self.roots.insert(child);
            }
        }
        if let Some(children) = self.children.get_mut(&parent) {
            children.remove(&child);
        }
    }

    /// Remove a node, detaching all its edges on both sides.
    pub fn remove(&mut self, node: i64) {
        if !self.elements.remove(&node) {
            return;
        }
        self.roots.remove(&node);
        for parent in self.parents.remove(&node).unwrap_or_default() {
            if let Some(children) = self.children.get_mut(&parent) {
                children.remove(&node);
            }
        }
        for child in self.children.remove(&node).unwrap_or_default() {
            if let Some(parents) = self.parents.get_mut(&child) {
                parents.remove(&node);
                if parents.is_empty() {
                    self.roots.insert(child);
                }
            }
        }
    }

    /// Immediate parents of a node (unordered).
    pub fn get_parents(&self, node: i64) -> Vec<i64> {
        self.parents
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Immediate children of a node (unordered).
    pub fn get_children(&self, node: i64) -> Vec<i64> {
        self.children
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Transitive closure upwards, including the node itself. Each node is
    /// visited exactly once even in diamond-shaped graphs.
    pub fn get_ancestors(&self, node: i64) -> Vec<i64> {
        self.traverse(node, &self.parents)
    }

    /// Transitive closure downwards, including the node itself.
    pub fn get_descendants(&self, node: i64) -> Vec<i64> {
        self.traverse(node, &self.children)
    }

    /// Nodes with no incoming edges.
    pub fn get_roots(&self) -> Vec<i64> {
        self.roots.iter().copied().collect()
    }

    /// Whether `to` can be reached from `from` by following edges downward.
    /// A node is always reachable from itself.
    pub fn reachable(&self, from: i64, to: i64) -> bool {
        if from == to {
            return self.elements.contains(&from);
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if node == to {
                return true;
            }
            if let Some(children) = self.children.get(&node) {
                stack.extend(children.iter().copied());
            }
        }
        false
    }

    /// Iterative depth-first walk with a visited set; safe on diamonds.
    fn traverse(&self, start: i64, edges: &HashMap<i64, HashSet<i64>>) -> Vec<i64> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if !self.elements.contains(&node) {
                continue;
            }
            order.push(node);
            if let Some(next) = edges.get(&node) {
                stack.extend(next.iter().copied());
            }
        }
        order
    }
}
