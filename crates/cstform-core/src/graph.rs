//! DirectedGraph: a keyed directed graph used for both constituent reference
//! graphs and operation DAGs.
//!
//! [`DirectedGraph`] wraps a petgraph `StableGraph` with a key index so that
//! callers address nodes by their own ids (`ConstituentId`, `OperationId`)
//! rather than by petgraph indices. Node removal keeps indices of the
//! remaining nodes stable.
//!
//! Besides plain adjacency queries it provides the order-related utilities
//! the propagation core relies on: reachability expansion, topological
//! order, transitive closure and [`DirectedGraph::sort_stable`], a
//! minimal-disruption topological sort of an arbitrary node sequence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::DfsPostOrder;
use petgraph::{Directed, Direction};

use crate::error::CoreError;

/// Directed graph keyed by `T`.
///
/// Edges are unique: adding an existing edge is a no-op. Adding an edge
/// implicitly adds its endpoints.
#[derive(Debug, Clone)]
pub struct DirectedGraph<T> {
    graph: StableGraph<T, (), Directed, u32>,
    /// Key -> petgraph index, in node insertion order.
    index: IndexMap<T, NodeIndex<u32>>,
}

impl<T> Default for DirectedGraph<T>
where
    T: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DirectedGraph<T>
where
    T: Copy + Eq + Hash + Debug,
{
    /// Creates an empty graph.
    pub fn new() -> Self {
        DirectedGraph {
            graph: StableGraph::default(),
            index: IndexMap::new(),
        }
    }

    /// Builds a graph from an edge list.
    pub fn from_edges(edges: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut graph = Self::new();
        for (source, target) in edges {
            graph.add_edge(source, target);
        }
        graph
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Adds a node. Returns `false` if it was already present.
    pub fn add_node(&mut self, node: T) -> bool {
        if self.index.contains_key(&node) {
            return false;
        }
        let idx = self.graph.add_node(node);
        self.index.insert(node, idx);
        true
    }

    /// Adds the edge `source -> target`, adding missing endpoints.
    pub fn add_edge(&mut self, source: T, target: T) {
        self.add_node(source);
        self.add_node(target);
        let s = self.index[&source];
        let t = self.index[&target];
        if self.graph.find_edge(s, t).is_none() {
            self.graph.add_edge(s, t, ());
        }
    }

    /// Removes the edge `source -> target`. Returns `false` if absent.
    pub fn remove_edge(&mut self, source: T, target: T) -> bool {
        let (Some(&s), Some(&t)) = (self.index.get(&source), self.index.get(&target)) else {
            return false;
        };
        match self.graph.find_edge(s, t) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    /// Removes a node together with all incident edges.
    pub fn remove_node(&mut self, node: T) -> bool {
        match self.index.shift_remove(&node) {
            Some(idx) => {
                self.graph.remove_node(idx);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn contains(&self, node: T) -> bool {
        self.index.contains_key(&node)
    }

    pub fn has_edge(&self, source: T, target: T) -> bool {
        match (self.index.get(&source), self.index.get(&target)) {
            (Some(&s), Some(&t)) => self.graph.find_edge(s, t).is_some(),
            _ => false,
        }
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = T> + '_ {
        self.index.keys().copied()
    }

    /// Direct successors of `node` (targets of its outgoing edges).
    pub fn outputs(&self, node: T) -> Vec<T> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// Direct predecessors of `node` (sources of its incoming edges).
    pub fn inputs(&self, node: T) -> Vec<T> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Every node reachable from `seed` over outgoing edges, excluding the
    /// seed itself.
    pub fn expand_outputs(&self, seed: &[T]) -> Vec<T> {
        self.expand(seed, Direction::Outgoing)
    }

    /// Every node reaching `seed` over incoming edges, excluding the seed
    /// itself.
    pub fn expand_inputs(&self, seed: &[T]) -> Vec<T> {
        self.expand(seed, Direction::Incoming)
    }

    /// A topological order of all nodes (sources first).
    ///
    /// Disconnected components are all covered. No particular tie-break is
    /// guaranteed among independent nodes.
    pub fn topological_order(&self) -> Vec<T> {
        let mut emitted: HashSet<NodeIndex<u32>> = HashSet::with_capacity(self.index.len());
        let mut postorder = Vec::with_capacity(self.index.len());
        let mut dfs = DfsPostOrder::empty(&self.graph);
        for &start in self.index.values() {
            if emitted.contains(&start) {
                continue;
            }
            dfs.move_to(start);
            while let Some(idx) = dfs.next(&self.graph) {
                emitted.insert(idx);
                postorder.push(self.graph[idx]);
            }
        }
        postorder.reverse();
        postorder
    }

    /// For every node, the set of nodes reachable from it.
    ///
    /// Nodes are processed in reverse topological order so each node's
    /// closure is the union of its children and their closures.
    pub fn transitive_closure(&self) -> HashMap<T, HashSet<T>> {
        let order = self.topological_order();
        let mut result: HashMap<T, HashSet<T>> = HashMap::with_capacity(order.len());
        for &node in order.iter().rev() {
            let mut reach = HashSet::new();
            for child in self.outputs(node) {
                reach.insert(child);
                if let Some(sub) = result.get(&child) {
                    reach.extend(sub.iter().copied());
                }
            }
            result.insert(node, reach);
        }
        result
    }

    /// Reorders `target` so that it respects the graph's partial order while
    /// moving as few elements as possible.
    ///
    /// The sequence is walked from the back. An element that some already
    /// placed (later) element reaches is spliced in right after the last
    /// such element instead of being moved to the front. Input that is
    /// already topologically ordered is returned unchanged. Nodes unknown to
    /// the graph keep their relative position.
    pub fn sort_stable(&self, target: &[T]) -> Result<Vec<T>, CoreError> {
        if target.len() <= 1 {
            return Ok(target.to_vec());
        }
        let reachable = self.transitive_closure();
        let empty = HashSet::new();
        let reach = |node: &T| reachable.get(node).unwrap_or(&empty);

        let mut test_set: HashSet<T> = HashSet::new();
        let mut result: Vec<T> = Vec::with_capacity(target.len());
        for node in target.iter().rev() {
            let need_move = test_set.contains(node);
            test_set.extend(reach(node).iter().copied());
            if !need_move {
                result.push(*node);
                continue;
            }
            match result.iter().position(|parent| reach(parent).contains(node)) {
                Some(index) => {
                    if reach(node).contains(&result[index]) {
                        return Err(CoreError::GraphCycle {
                            node: format!("{:?}", node),
                        });
                    }
                    result.insert(index, *node);
                }
                None => result.push(*node),
            }
        }
        result.reverse();
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Neighbors in node insertion order.
    fn neighbors(&self, node: T, direction: Direction) -> Vec<T> {
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex<u32>> =
            self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.dedup();
        found.into_iter().map(|i| self.graph[i]).collect()
    }

    fn expand(&self, seed: &[T], direction: Direction) -> Vec<T> {
        let mut seen: HashSet<T> = seed.iter().copied().collect();
        let mut queue: VecDeque<T> = seed.iter().copied().collect();
        let mut result = Vec::new();
        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node, direction) {
                if seen.insert(next) {
                    result.push(next);
                    queue.push_back(next);
                }
            }
        }
        result
    }
}
