//! Level-batched execution order via Kahn's algorithm.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ValidationError;
use crate::types::Edge;

/// Safe execution order for one composite.
///
/// `parallelizable` holds the first wave when it has more than one member;
/// those nodes have no dependencies on anything and may run concurrently.
/// `sequential` holds the remaining levels in dependency order. A level with
/// multiple members contains mutually independent nodes; whether they run
/// concurrently is the orchestrator's call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOrder {
  pub parallelizable: Vec<String>,
  pub sequential: Vec<Vec<String>>,
}

impl ExecutionOrder {
  /// All batches in run order: the parallelizable wave (when present)
  /// followed by each sequential level.
  pub fn batches(&self) -> Vec<&[String]> {
    let mut out: Vec<&[String]> = vec![];
    if !self.parallelizable.is_empty() {
      out.push(&self.parallelizable);
    }
    for level in &self.sequential {
      out.push(level);
    }
    out
  }

  /// Total number of scheduled nodes across all batches.
  pub fn node_count(&self) -> usize {
    self.parallelizable.len() + self.sequential.iter().map(|l| l.len()).sum::<usize>()
  }

  /// 0-based batch index of a node, if scheduled.
  pub fn level_of(&self, node_id: &str) -> Option<usize> {
    self
      .batches()
      .iter()
      .position(|b| b.iter().any(|n| n == node_id))
  }
}

/// Computes the level-batched topological order of `node_ids` under `edges`.
///
/// An edge's target depends on its source. Nodes with no incoming edges form
/// the first wave: more than one of them is emitted as the `parallelizable`
/// set, exactly one becomes a single-element sequential level. Every later
/// pass collects the remaining nodes whose dependencies are all scheduled and
/// emits them as one sequential level. Ties within a level keep input order.
///
/// A pass that schedules nothing while nodes remain means the graph has a
/// cycle; the whole order is rejected, never partially emitted.
#[instrument(level = "trace", skip(node_ids, edges))]
pub fn compute_execution_order(
  node_ids: &[String],
  edges: &[Edge],
) -> Result<ExecutionOrder, ValidationError> {
  let known: HashSet<&str> = node_ids.iter().map(|s| s.as_str()).collect();
  let mut dependencies: HashMap<&str, HashSet<&str>> = HashMap::new();
  for id in node_ids {
    dependencies.insert(id.as_str(), HashSet::new());
  }
  for edge in edges {
    if known.contains(edge.source_node_id.as_str()) && known.contains(edge.target_node_id.as_str())
    {
      dependencies
        .entry(edge.target_node_id.as_str())
        .or_default()
        .insert(edge.source_node_id.as_str());
    }
  }

  let mut scheduled: HashSet<&str> = HashSet::new();
  let mut remaining: Vec<&str> = node_ids.iter().map(|s| s.as_str()).collect();
  let mut order = ExecutionOrder {
    parallelizable: vec![],
    sequential: vec![],
  };

  // First wave: in-degree zero.
  let first_wave: Vec<&str> = remaining
    .iter()
    .copied()
    .filter(|id| dependencies[id].is_empty())
    .collect();
  if first_wave.len() > 1 {
    order.parallelizable = first_wave.iter().map(|s| s.to_string()).collect();
  } else if let Some(single) = first_wave.first() {
    order.sequential.push(vec![single.to_string()]);
  }
  for id in &first_wave {
    scheduled.insert(id);
  }
  remaining.retain(|id| !scheduled.contains(id));

  while !remaining.is_empty() {
    let ready: Vec<&str> = remaining
      .iter()
      .copied()
      .filter(|id| dependencies[id].iter().all(|dep| scheduled.contains(dep)))
      .collect();
    if ready.is_empty() {
      debug!(remaining = remaining.len(), "no schedulable node left, graph has a cycle");
      return Err(ValidationError::CycleDetected);
    }
    for id in &ready {
      scheduled.insert(id);
    }
    remaining.retain(|id| !scheduled.contains(id));
    order
      .sequential
      .push(ready.iter().map(|s| s.to_string()).collect());
  }

  debug!(
    parallelizable = order.parallelizable.len(),
    levels = order.sequential.len(),
    "computed execution order"
  );
  Ok(order)
}
