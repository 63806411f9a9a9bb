#![forbid(unsafe_code, missing_docs)]

//! Directed-acyclic graph that maintains a topological order of its nodes while edges are being added.
//!
//! Adding nodes never changes the order. Adding an edge `from → to` demands that `from` is ordered before `to`; when
//! that is not the case yet, only the affected region between the two nodes is reordered (Pearce and Kelly's dynamic
//! topological sort). An edge that would close a cycle is rejected and the graph is left exactly as it was.
//!
//! In kiln an edge points from a task to a task it depends on, so dependents come *before* their dependencies in the
//! topological order, and execution order is the reverse.
//!
//! ## Examples
//!
//! ```
//! use kiln_graph::{Dag, Error};
//!
//! let mut dag = Dag::new();
//! let package = dag.add_node("package");
//! let compile = dag.add_node("compile");
//! let resolve = dag.add_node("resolve");
//!
//! dag.add_edge(package, compile).unwrap();
//! dag.add_edge(compile, resolve).unwrap();
//!
//! assert_eq!(dag.descendants(package), Ok(vec![compile, resolve]));
//! assert_eq!(dag.find_path(package, resolve), Some(vec![package, compile, resolve]));
//! assert_eq!(dag.add_edge(resolve, package), Err(Error::CycleDetected));
//!
//! let order: Vec<_> = dag.topo_sorted().map(|n| *dag.get(n).unwrap()).collect();
//! assert_eq!(order, vec!["package", "compile", "resolve"]);
//! ```
//!
//! ## Sources
//!
//! D. J. Pearce and P. H. J. Kelly, "A dynamic topological sort algorithm for directed acyclic graphs", JEA 2007.

use std::cmp::Ordering;
use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::BuildHasher;

use hashlink::LinkedHashSet;
use slotmap::{DefaultKey, SlotMap};

type TopoOrder = u32;

/// Directed-acyclic graph with node data `N`, keeping a topological order up to date on every edge insertion.
///
/// Iteration over the edges of a node follows insertion order.
///
/// Cloning a graph keeps node identifiers valid in the clone.
pub struct Dag<N, H = RandomState> {
  nodes: SlotMap<DefaultKey, NodeInfo<N, H>>,
  last_topo_order: TopoOrder,
}

/// Identifier of a node in a [`Dag`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(DefaultKey);

struct NodeInfo<N, H> {
  topo_order: TopoOrder,
  data: N,
  incoming: LinkedHashSet<NodeId, H>,
  outgoing: LinkedHashSet<NodeId, H>,
}

impl<N, H: BuildHasher + Default> NodeInfo<N, H> {
  fn new(topo_order: TopoOrder, data: N) -> Self {
    Self { topo_order, data, incoming: Default::default(), outgoing: Default::default() }
  }
}

impl<N: Clone, H: BuildHasher + Clone> Clone for NodeInfo<N, H> {
  fn clone(&self) -> Self {
    Self {
      topo_order: self.topo_order,
      data: self.data.clone(),
      incoming: self.incoming.clone(),
      outgoing: self.outgoing.clone(),
    }
  }
}

/// Failures when updating the graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
  /// A given node is not part of the graph.
  NodeMissing,
  /// The edge would form a cycle.
  CycleDetected,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::NodeMissing => write!(f, "node is not part of the graph"),
      Error::CycleDetected => write!(f, "edge would form a cycle"),
    }
  }
}

impl std::error::Error for Error {}

impl<N, H: BuildHasher + Default> Default for Dag<N, H> {
  #[inline]
  fn default() -> Self {
    Self { nodes: SlotMap::default(), last_topo_order: 0 }
  }
}

impl<N: Clone, H: BuildHasher + Clone> Clone for Dag<N, H> {
  #[inline]
  fn clone(&self) -> Self {
    Self { nodes: self.nodes.clone(), last_topo_order: self.last_topo_order }
  }
}

impl<N> Dag<N> {
  /// Creates an empty graph.
  #[inline]
  pub fn new() -> Self { Self::default() }
}

impl<N, H: BuildHasher + Default> Dag<N, H> {
  /// Adds a node carrying `data`, ordered after every existing node.
  #[inline]
  pub fn add_node(&mut self, data: N) -> NodeId {
    self.last_topo_order += 1;
    NodeId(self.nodes.insert(NodeInfo::new(self.last_topo_order, data)))
  }

  /// Returns `true` if `node` is part of the graph.
  #[inline]
  pub fn contains_node(&self, node: NodeId) -> bool { self.nodes.contains_key(node.0) }

  /// Gets the data of `node`.
  #[inline]
  pub fn get(&self, node: NodeId) -> Option<&N> { self.nodes.get(node.0).map(|i| &i.data) }

  /// Gets the mutable data of `node`.
  #[inline]
  pub fn get_mut(&mut self, node: NodeId) -> Option<&mut N> { self.nodes.get_mut(node.0).map(|i| &mut i.data) }

  /// Adds an edge `from → to`, after which `from` is always ordered before `to`.
  ///
  /// Returns `Ok(true)` if the edge is new, `Ok(false)` if it already existed.
  ///
  /// # Errors
  ///
  /// Returns [`Error::CycleDetected`] if the edge would form a cycle (including a self-loop), and
  /// [`Error::NodeMissing`] if either node is not part of the graph. The graph is unchanged on error.
  ///
  /// ```
  /// # use kiln_graph::{Dag, Error};
  /// let mut dag = Dag::new();
  /// let a = dag.add_node(());
  /// let b = dag.add_node(());
  /// let c = dag.add_node(());
  /// assert_eq!(dag.add_edge(a, a), Err(Error::CycleDetected));
  /// assert_eq!(dag.add_edge(a, b), Ok(true));
  /// assert_eq!(dag.add_edge(a, b), Ok(false));
  /// assert_eq!(dag.add_edge(b, c), Ok(true));
  /// assert_eq!(dag.add_edge(c, a), Err(Error::CycleDetected));
  /// assert_eq!(dag.outgoing(c).count(), 0);
  /// ```
  pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, Error> {
    if from == to {
      return Err(Error::CycleDetected);
    }
    if !self.contains_node(from) || !self.contains_node(to) {
      return Err(Error::NodeMissing);
    }
    if self.nodes[from.0].outgoing.contains(&to) {
      return Ok(false);
    }

    let upper_bound = self.nodes[from.0].topo_order;
    let lower_bound = self.nodes[to.0].topo_order;
    if lower_bound < upper_bound {
      // `to` is currently ordered before `from`: the region between them must be reordered. Walking forward from `to`
      // and reaching `from` means the new edge closes a cycle.
      let mut visited = HashSet::<_, H>::default();
      let forward = self.visit_forward(to, &mut visited, upper_bound)?;
      let backward = self.visit_backward(from, &mut visited, lower_bound);
      self.reorder(forward, backward);
    }

    self.nodes[from.0].outgoing.insert(to);
    self.nodes[to.0].incoming.insert(from);
    Ok(true)
  }

  /// Finds a shortest path `from → … → to` following edges, including both endpoints.
  pub fn find_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
    if !self.contains_node(from) || !self.contains_node(to) {
      return None;
    }
    let mut previous = HashMap::<NodeId, NodeId, H>::default();
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
      if node == to {
        let mut path = vec![to];
        let mut current = to;
        while let Some(prev) = previous.get(&current) {
          path.push(*prev);
          current = *prev;
        }
        path.reverse();
        return Some(path);
      }
      for next in self.outgoing(node) {
        if *next != from && !previous.contains_key(next) {
          previous.insert(*next, node);
          queue.push_back(*next);
        }
      }
    }
    None
  }

  /// Nodes that `node` has an edge to, in insertion order.
  #[inline]
  pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item=&NodeId> + '_ {
    self.nodes.get(node.0).into_iter().flat_map(|i| i.outgoing.iter())
  }

  /// All nodes in topological order: for every edge `from → to`, `from` is yielded before `to`.
  pub fn topo_sorted(&self) -> impl Iterator<Item=NodeId> {
    let mut nodes: Vec<_> = self.nodes.iter().map(|(k, i)| (i.topo_order, NodeId(k))).collect();
    nodes.sort_unstable_by_key(|(order, _)| *order);
    nodes.into_iter().map(|(_, node)| node)
  }

  /// All nodes reachable from `node` (excluding itself), in topological order.
  ///
  /// # Errors
  ///
  /// Returns [`Error::NodeMissing`] if `node` is not part of the graph.
  pub fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>, Error> {
    if !self.contains_node(node) {
      return Err(Error::NodeMissing);
    }
    let mut visited = HashSet::<_, H>::default();
    let mut stack: Vec<_> = self.outgoing(node).copied().collect();
    while let Some(next) = stack.pop() {
      if visited.insert(next) {
        stack.extend(self.outgoing(next));
      }
    }
    let mut descendants: Vec<_> = visited.into_iter().collect();
    descendants.sort_unstable_by(|a, b| self.topo_cmp(*a, *b));
    Ok(descendants)
  }

  /// Compares the topological position of two nodes of the graph.
  ///
  /// # Panics
  ///
  /// Panics if either node is not part of the graph.
  #[inline]
  pub fn topo_cmp(&self, a: NodeId, b: NodeId) -> Ordering {
    self.nodes[a.0].topo_order.cmp(&self.nodes[b.0].topo_order)
  }

  fn visit_forward(
    &self,
    start: NodeId,
    visited: &mut HashSet<NodeId, H>,
    upper_bound: TopoOrder,
  ) -> Result<Vec<NodeId>, Error> {
    let mut stack = vec![start];
    let mut region = Vec::new();
    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      region.push(node);
      for next in self.nodes[node.0].outgoing.iter() {
        let order = self.nodes[next.0].topo_order;
        if order == upper_bound {
          return Err(Error::CycleDetected);
        }
        if order < upper_bound && !visited.contains(next) {
          stack.push(*next);
        }
      }
    }
    Ok(region)
  }

  fn visit_backward(
    &self,
    start: NodeId,
    visited: &mut HashSet<NodeId, H>,
    lower_bound: TopoOrder,
  ) -> Vec<NodeId> {
    let mut stack = vec![start];
    let mut region = Vec::new();
    while let Some(node) = stack.pop() {
      if !visited.insert(node) {
        continue;
      }
      region.push(node);
      for prev in self.nodes[node.0].incoming.iter() {
        if lower_bound < self.nodes[prev.0].topo_order && !visited.contains(prev) {
          stack.push(*prev);
        }
      }
    }
    region
  }

  /// Reassigns the orders occupied by the affected region: the backward region first, then the forward region, each
  /// keeping its internal relative order.
  fn reorder(&mut self, mut forward: Vec<NodeId>, mut backward: Vec<NodeId>) {
    forward.sort_unstable_by_key(|n| self.nodes[n.0].topo_order);
    backward.sort_unstable_by_key(|n| self.nodes[n.0].topo_order);
    let mut orders: Vec<_> = backward.iter().chain(forward.iter()).map(|n| self.nodes[n.0].topo_order).collect();
    orders.sort_unstable();
    for (node, order) in backward.into_iter().chain(forward).zip(orders) {
      self.nodes[node.0].topo_order = order;
    }
  }
}

impl<N: fmt::Debug, H: BuildHasher + Default> fmt::Debug for Dag<N, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut list = f.debug_list();
    for node in self.topo_sorted() {
      let info = &self.nodes[node.0];
      list.entry(&(&info.data, info.outgoing.iter().filter_map(|n| self.get(*n)).collect::<Vec<_>>()));
    }
    list.finish()
  }
}
