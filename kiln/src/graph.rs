use std::collections::HashSet;

use hashlink::LinkedHashMap;
use kiln_graph::{Dag, NodeId};

use crate::error::{CyclicDependencyError, DuplicateTaskError, GraphError, UnknownTaskError};
use crate::task::{is_valid_name, Task};

/// All registered tasks plus the dependency relation between them.
///
/// Dependencies are declared by name and may refer to tasks that are registered later; they are resolved into edges
/// by [`validate`](Self::validate), which also rejects cycles. Edges point from a task to the tasks it depends on.
#[derive(Default, Debug)]
pub struct TaskGraph {
  dag: Dag<Task>,
  names: LinkedHashMap<String, NodeId>,
}

impl TaskGraph {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Registers `task`. Fails when the name is invalid or already taken; the graph is left unchanged in that case.
  pub fn register(&mut self, task: Task) -> Result<(), GraphError> {
    if !is_valid_name(task.name()) {
      return Err(GraphError::InvalidTaskName(task.name().to_string()));
    }
    if self.names.contains_key(task.name()) {
      return Err(DuplicateTaskError { name: task.name().to_string() }.into());
    }
    let name = task.name().to_string();
    let node = self.dag.add_node(task);
    self.names.insert(name, node);
    Ok(())
  }

  /// Adds dependencies from the task named `name` onto the tasks named `dependencies`. Only `name` must be registered
  /// already.
  pub fn depends_on<I: IntoIterator<Item=S>, S: Into<String>>(&mut self, name: &str, dependencies: I) -> Result<(), GraphError> {
    let node = self.node(name, None)?;
    if let Some(task) = self.dag.get_mut(node) {
      task.add_dependencies(dependencies);
    }
    Ok(())
  }

  /// Resolves all declared dependencies into edges. Fails on the first dependency onto an unregistered task, or on the
  /// first dependency that closes a cycle, reporting the cycle. The graph is unchanged on failure, so it can be
  /// validated again after registering what was missing.
  pub fn validate(&mut self) -> Result<(), GraphError> {
    let mut edges = Vec::new();
    for (name, node) in &self.names {
      for dependency in self.dag.get(*node).map(Task::dependencies).unwrap_or_default() {
        edges.push((*node, self.node(dependency, Some(name.as_str()))?));
      }
    }
    let mut dag = self.dag.clone();
    for (node, dependency) in edges {
      if dag.add_edge(node, dependency).is_err() {
        return Err(self.cycle_error(&dag, node, dependency).into());
      }
    }
    self.dag = dag;
    Ok(())
  }

  fn cycle_error(&self, dag: &Dag<Task>, from: NodeId, to: NodeId) -> CyclicDependencyError {
    // The rejected edge `from → to` closes a cycle with the existing path `to → … → from`.
    let mut cycle = vec![self.name_of(from).to_string()];
    if let Some(path) = dag.find_path(to, from) {
      cycle.extend(path.into_iter().map(|n| self.name_of(n).to_string()));
    }
    CyclicDependencyError { cycle }
  }

  /// Requested tasks plus everything they transitively depend on, ordered so that every task comes after all of its
  /// dependencies. Requires a successful [`validate`](Self::validate).
  pub(crate) fn closure(&self, requested: &[&str]) -> Result<Vec<NodeId>, GraphError> {
    let mut closure = HashSet::new();
    for name in requested {
      let node = self.node(name, None)?;
      closure.insert(node);
      closure.extend(self.dag.descendants(node).unwrap_or_default());
    }
    let mut closure: Vec<_> = closure.into_iter().collect();
    closure.sort_unstable_by(|a, b| self.dag.topo_cmp(*b, *a));
    Ok(closure)
  }

  fn node(&self, name: &str, required_by: Option<&str>) -> Result<NodeId, UnknownTaskError> {
    self.names.get(name).copied().ok_or_else(|| UnknownTaskError {
      name: name.to_string(),
      required_by: required_by.map(str::to_string),
    })
  }

  #[inline]
  pub(crate) fn task(&self, node: NodeId) -> Option<&Task> { self.dag.get(node) }

  #[inline]
  fn name_of(&self, node: NodeId) -> &str { self.dag.get(node).map(Task::name).unwrap_or("?") }

  /// Direct dependencies of `node` that are edges of the validated graph.
  #[inline]
  pub(crate) fn dependency_nodes(&self, node: NodeId) -> impl Iterator<Item=NodeId> + '_ {
    self.dag.outgoing(node).copied()
  }

  /// All tasks in registration order.
  #[inline]
  pub fn tasks(&self) -> impl Iterator<Item=&Task> + '_ {
    self.names.values().filter_map(|node| self.dag.get(*node))
  }
  #[inline]
  pub fn get(&self, name: &str) -> Option<&Task> {
    self.names.get(name).and_then(|node| self.dag.get(*node))
  }
  #[inline]
  pub fn contains(&self, name: &str) -> bool { self.names.contains_key(name) }
  #[inline]
  pub fn len(&self) -> usize { self.names.len() }
  #[inline]
  pub fn is_empty(&self) -> bool { self.names.is_empty() }

  /// Declared dependencies of the task named `name`.
  #[inline]
  pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
    self.get(name).map(Task::dependencies)
  }

  /// Names of the tasks that declare a dependency on the task named `name`, in registration order.
  pub fn dependents_of(&self, name: &str) -> Vec<&str> {
    self.tasks()
      .filter(|t| t.dependencies().iter().any(|d| d == name))
      .map(Task::name)
      .collect()
  }
}
