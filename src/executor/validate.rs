//! Structural composite validation, run before any node executes.

use tracing::instrument;

use crate::error::ValidationError;
use crate::scheduler::has_circular_dependencies;
use crate::types::Composite;

use super::ExecutableRegistry;

/// Checks a composite for emptiness, unknown node types, dangling edge
/// endpoints and circular dependencies. Any violation fails the whole run
/// before a single node is invoked; there is never a partial run.
#[instrument(level = "debug", skip(composite, registry), fields(composite_id = %composite.id))]
pub fn validate_composite(
  composite: &Composite,
  registry: &ExecutableRegistry,
) -> Result<(), ValidationError> {
  if composite.nodes.is_empty() {
    return Err(ValidationError::EmptyComposite);
  }

  for node in &composite.nodes {
    if !registry.contains(&node.node_type) {
      return Err(ValidationError::UnknownNodeType {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
      });
    }
  }

  for edge in &composite.edges {
    for endpoint in [&edge.source_node_id, &edge.target_node_id] {
      if composite.node(endpoint).is_none() {
        return Err(ValidationError::DanglingEdge {
          node_id: endpoint.clone(),
        });
      }
    }
  }

  let node_ids = composite.node_ids();
  if has_circular_dependencies(&node_ids, &composite.edges) {
    return Err(ValidationError::CycleDetected);
  }

  Ok(())
}
