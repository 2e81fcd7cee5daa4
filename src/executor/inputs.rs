//! Input gathering: map upstream outputs onto a node's input ports.

use std::collections::HashMap;

use tracing::instrument;

use crate::types::{Edge, PortValues};

/// Builds the input map for `node_id` by scanning `edges` whose target is
/// this node and copying each source node's recorded output for the source
/// port onto the edge's target port.
///
/// An upstream output that does not exist yet (source not run, or failed) is
/// simply absent from the result; nothing is defaulted or fabricated. The
/// scan is read-only, so calling it twice before new outputs arrive returns
/// the same map. When several edges target the same input port, the last
/// edge in composite edge order wins.
#[instrument(level = "trace", skip(edges, node_outputs))]
pub fn gather_node_inputs(
  node_id: &str,
  edges: &[Edge],
  node_outputs: &HashMap<String, PortValues>,
) -> PortValues {
  let mut inputs = PortValues::new();
  for edge in edges.iter().filter(|e| e.target_node_id == node_id) {
    if let Some(outputs) = node_outputs.get(&edge.source_node_id)
      && let Some(value) = outputs.get(&edge.source_port)
    {
      inputs.insert(edge.target_port.clone(), value.clone());
    }
  }
  inputs
}
