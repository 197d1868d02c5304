//! Directed acyclic graph used for endpoint dependency layering.
//!
//! **Note:** This module is internal to `matchday-flow` to preserve freedom
//! to change internals.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};

/// A directed acyclic graph that can be partitioned into dependency layers.
///
/// Layering uses Kahn's algorithm with earliest-stage assignment: layer `k`
/// holds every node whose dependencies are fully contained in layers
/// `0..k`. No node is deferred later than its earliest possible layer, so
/// intra-layer parallelism is maximal.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Ord + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Ord + Display,
{
    /// Creates a new empty DAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
        }
    }

    /// Adds a node to the DAG.
    ///
    /// If the node already exists, this is a no-op. Returns the node index.
    pub fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        idx
    }

    /// Adds a directed edge from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either node index is invalid.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.graph
            .node_weight(from)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: format!("index {}", from.index()),
            })?;
        self.graph
            .node_weight(to)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: format!("index {}", to.index()),
            })?;

        self.graph.add_edge(from, to, ());
        Ok(())
    }

    /// Returns the node index for a value, if it exists.
    pub fn get_index(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    /// Partitions the graph into earliest-stage dependency layers.
    ///
    /// Nodes within a layer are sorted by value so layering is deterministic
    /// regardless of insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] if the graph contains a cycle; the
    /// error lists the nodes still blocked when layering stalled.
    pub fn layers(&self) -> Result<Vec<Vec<T>>> {
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut frontier: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .collect();
        self.sort_by_value(&mut frontier);

        let mut layers = Vec::new();
        let mut visited = 0usize;

        while !frontier.is_empty() {
            let mut layer = Vec::with_capacity(frontier.len());
            let mut next = Vec::new();

            for &idx in &frontier {
                let node = self
                    .graph
                    .node_weight(idx)
                    .ok_or_else(|| Error::DagNodeNotFound {
                        node: format!("index {}", idx.index()),
                    })?
                    .clone();
                layer.push(node);
                visited += 1;

                for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    if let Some(deg) = in_degree.get_mut(&neighbor) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            next.push(neighbor);
                        }
                    }
                }
            }

            self.sort_by_value(&mut next);
            layers.push(layer);
            frontier = next;
        }

        if visited != node_count {
            // Nodes with residual in-degree are part of (or downstream of) a cycle.
            let mut blocked: Vec<String> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .filter_map(|(&idx, _)| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            blocked.sort();

            return Err(Error::CycleDetected { cycle: blocked });
        }

        Ok(layers)
    }

    fn sort_by_value(&self, indices: &mut Vec<NodeIndex>) {
        indices.sort_by_key(|&idx| self.graph.node_weight(idx).cloned());
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Ord + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
