//! Execution DAG over resource dependencies.
//!
//! Edges run from a referenced node to the node referencing it. The order is
//! deterministic: among nodes whose dependencies are satisfied, the one
//! declared first comes first.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::{GraphError, ResourceGraph};
use crate::resource::NodeId;
use crate::state::StateSnapshot;

#[derive(Debug, Clone)]
pub struct ExecutionDag {
  graph: DiGraph<NodeId, ()>,
  indices: HashMap<NodeId, NodeIndex>,
  order: Vec<NodeIndex>,
}

impl ExecutionDag {
  /// Build a DAG from `(node, dependencies)` pairs given in declaration
  /// order. Dependencies naming nodes outside the set are ignored.
  pub fn new<I>(nodes: I) -> Result<Self, GraphError>
  where
    I: IntoIterator<Item = (NodeId, BTreeSet<NodeId>)>,
  {
    let nodes: Vec<(NodeId, BTreeSet<NodeId>)> = nodes.into_iter().collect();
    let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len());
    let mut indices = HashMap::with_capacity(nodes.len());

    for (id, _) in &nodes {
      if !indices.contains_key(id) {
        indices.insert(id.clone(), graph.add_node(id.clone()));
      }
    }

    for (id, deps) in &nodes {
      let dependent = indices[id];
      for dep in deps {
        if let Some(&dependency) = indices.get(dep) {
          graph.update_edge(dependency, dependent, ());
        }
      }
    }

    let mut dag = Self {
      graph,
      indices,
      order: Vec::new(),
    };
    dag.order = dag.sort()?;
    Ok(dag)
  }

  pub fn from_graph(graph: &ResourceGraph) -> Result<Self, GraphError> {
    Self::new(graph.nodes.iter().map(|node| (node.id.clone(), node.dependencies())))
  }

  /// Order the resources recorded in a snapshot by their recorded
  /// dependencies, for teardown and orphan removal.
  pub fn from_state(state: &StateSnapshot) -> Result<Self, GraphError> {
    Self::new(
      state
        .resources
        .iter()
        .map(|(id, resource)| (id.clone(), resource.dependencies.clone())),
    )
  }

  /// Kahn's algorithm with a min-heap on declaration index.
  fn sort(&self) -> Result<Vec<NodeIndex>, GraphError> {
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(i, _)| Reverse(i))
      .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(i)) = ready.pop() {
      let idx = NodeIndex::new(i);
      order.push(idx);
      for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let degree = &mut in_degree[next.index()];
        *degree -= 1;
        if *degree == 0 {
          ready.push(Reverse(next.index()));
        }
      }
    }

    if order.len() < self.graph.node_count() {
      return Err(GraphError::Cycle {
        members: self.cycle_members(),
      });
    }
    Ok(order)
  }

  /// Nodes on a cycle, in declaration order.
  fn cycle_members(&self) -> Vec<NodeId> {
    let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || scc.iter().any(|&idx| self.graph.contains_edge(idx, idx)))
      .flatten()
      .collect();
    members.sort();
    members.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }

  /// Dependencies before dependents, ties broken by declaration order.
  pub fn order(&self) -> Vec<NodeId> {
    self.order.iter().map(|&idx| self.graph[idx].clone()).collect()
  }

  /// Teardown order: dependents before their dependencies.
  pub fn reverse_order(&self) -> Vec<NodeId> {
    self.order.iter().rev().map(|&idx| self.graph[idx].clone()).collect()
  }

  /// Groups of mutually independent nodes. Every node's dependencies are in
  /// an earlier wave; each wave is in declaration order.
  pub fn waves(&self) -> Vec<Vec<NodeId>> {
    let mut level = vec![0usize; self.graph.node_count()];
    for &idx in &self.order {
      level[idx.index()] = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .map(|dep| level[dep.index()] + 1)
        .max()
        .unwrap_or(0);
    }

    let depth = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut waves: Vec<Vec<NodeIndex>> = vec![Vec::new(); depth];
    for idx in self.graph.node_indices() {
      waves[level[idx.index()]].push(idx);
    }

    waves
      .into_iter()
      .map(|wave| wave.into_iter().map(|idx| self.graph[idx].clone()).collect())
      .collect()
  }

  fn neighbors(&self, id: &str, direction: Direction) -> Vec<NodeId> {
    let Some(&idx) = self.indices.get(id) else {
      return Vec::new();
    };
    let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
    found.sort();
    found.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }

  /// Direct dependencies of `id`.
  pub fn dependencies(&self, id: &str) -> Vec<NodeId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Nodes that reference `id` directly.
  pub fn dependents(&self, id: &str) -> Vec<NodeId> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Every node reachable from `id` through dependents, excluding `id`.
  pub fn transitive_dependents(&self, id: &str) -> BTreeSet<NodeId> {
    let Some(&start) = self.indices.get(id) else {
      return BTreeSet::new();
    };
    let mut reached = BTreeSet::new();
    let mut dfs = Dfs::new(&self.graph, start);
    while let Some(idx) = dfs.next(&self.graph) {
      if idx != start {
        reached.insert(self.graph[idx].clone());
      }
    }
    reached
  }

  pub fn contains(&self, id: &str) -> bool {
    self.indices.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }
}
