//! Standalone circular-dependency check, run during composite validation so
//! cycles surface as structural errors instead of mid-run scheduling failures.

use std::collections::{HashMap, HashSet};

use tracing::instrument;

use crate::types::Edge;

/// DFS with a recursion stack over the dependency graph. Edges pointing at
/// ids outside `node_ids` are ignored here; dangling endpoints are reported
/// separately by composite validation.
#[instrument(level = "trace", skip(node_ids, edges))]
pub fn has_circular_dependencies(node_ids: &[String], edges: &[Edge]) -> bool {
  let known: HashSet<&str> = node_ids.iter().map(|s| s.as_str()).collect();
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for edge in edges {
    if known.contains(edge.source_node_id.as_str()) && known.contains(edge.target_node_id.as_str())
    {
      adjacency
        .entry(edge.source_node_id.as_str())
        .or_default()
        .push(edge.target_node_id.as_str());
    }
  }

  let mut visited: HashSet<&str> = HashSet::new();
  let mut in_stack: HashSet<&str> = HashSet::new();
  for id in node_ids {
    if !visited.contains(id.as_str())
      && visit(id.as_str(), &adjacency, &mut visited, &mut in_stack)
    {
      return true;
    }
  }
  false
}

fn visit<'a>(
  node: &'a str,
  adjacency: &HashMap<&'a str, Vec<&'a str>>,
  visited: &mut HashSet<&'a str>,
  in_stack: &mut HashSet<&'a str>,
) -> bool {
  visited.insert(node);
  in_stack.insert(node);
  if let Some(next) = adjacency.get(node) {
    for &n in next {
      if in_stack.contains(n) {
        return true;
      }
      if !visited.contains(n) && visit(n, adjacency, visited, in_stack) {
        return true;
      }
    }
  }
  in_stack.remove(node);
  false
}
