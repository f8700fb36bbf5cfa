//! Dependency graph for plugins
//!
//! Nodes are plugins requested in one resolution pass; an edge `a -> b`
//! means `a` must be included before `b`. Uses petgraph for storage and
//! strongly connected components.
//!
//! The topological order is computed here rather than with
//! `petgraph::algo::toposort`, which leaves the relative order of
//! independent nodes unspecified. Plugins not constrained by an edge must be
//! included in the order they were requested, so this is Kahn's algorithm
//! over a min-heap of node indices (node indices follow insertion order).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::protocol::Plugin;

/// Ordering constraints between the plugins of one resolution pass
#[derive(Debug, Default)]
pub struct DependencyTree {
    /// The underlying directed graph
    graph: DiGraph<Arc<dyn Plugin>, ()>,

    /// Map from plugin name to node index
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyTree {
    /// Creates an empty tree
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Adds a plugin node; adding the same name twice is a no-op
    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        if !self.node_map.contains_key(plugin.name()) {
            let name = plugin.name().to_string();
            let idx = self.graph.add_node(plugin);
            self.node_map.insert(name, idx);
        }
    }

    /// Records that `first` must be included before `then`
    ///
    /// Both plugins are added as nodes if missing.
    pub fn add_ordering(&mut self, first: Arc<dyn Plugin>, then: Arc<dyn Plugin>) {
        let first_name = first.name().to_string();
        let then_name = then.name().to_string();
        self.add(first);
        self.add(then);

        let first_idx = self.node_map[&first_name];
        let then_idx = self.node_map[&then_name];
        self.graph.update_edge(first_idx, then_idx, ());
    }

    /// Returns true if the tree contains a plugin with this name
    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    /// Returns the number of plugins in the tree
    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    /// Returns true if the tree is empty
    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    /// Plugins in inclusion order (earlier entries sit deeper in the chain)
    ///
    /// On a cycle, returns the names of the plugins taking part in it,
    /// sorted alphabetically.
    pub fn inclusion_order(&self) -> Result<Vec<Arc<dyn Plugin>>, Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            let node = NodeIndex::new(idx);
            order.push(self.graph[node].clone());

            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == self.graph.node_count() {
            Ok(order)
        } else {
            Err(self.cycle_participants())
        }
    }

    /// Names of plugins on a cycle, sorted alphabetically
    fn cycle_participants(&self) -> Vec<String> {
        let mut names: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.find_edge(component[0], component[0]).is_some()
            })
            .flatten()
            .map(|idx| self.graph[idx].name().to_string())
            .collect();

        names.sort();
        names.dedup();
        names
    }
}
