//! Composite definition: a saved workflow as a DAG of node specs and edges.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A saved workflow: nodes connected by directed data-dependency edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Composite {
  pub id: String,
  pub name: String,
  pub nodes: Vec<NodeSpec>,
  pub edges: Vec<Edge>,
}

impl Composite {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      nodes: vec![],
      edges: vec![],
    }
  }

  pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  pub fn node_ids(&self) -> Vec<String> {
    self.nodes.iter().map(|n| n.id.clone()).collect()
  }

  /// Edges whose target is `node_id`, in composite edge order.
  pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
    self
      .edges
      .iter()
      .filter(|e| e.target_node_id == node_id)
      .collect()
  }

  /// Edges whose source is `node_id`, in composite edge order.
  pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
    self
      .edges
      .iter()
      .filter(|e| e.source_node_id == node_id)
      .collect()
  }
}

/// One step in a composite. `position` is editor layout only; the engine
/// never reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub parameters: HashMap<String, serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<Position>,
}

impl NodeSpec {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      parameters: HashMap::new(),
      position: None,
    }
  }

  pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.parameters.insert(key.into(), value);
    self
  }
}

/// Editor canvas coordinates for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

/// Directed data dependency: `source_node_id.source_port` feeds
/// `target_node_id.target_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub source_node_id: String,
  pub source_port: String,
  pub target_node_id: String,
  pub target_port: String,
}

impl Edge {
  pub fn new(
    source_node_id: impl Into<String>,
    source_port: impl Into<String>,
    target_node_id: impl Into<String>,
    target_port: impl Into<String>,
  ) -> Self {
    Self {
      source_node_id: source_node_id.into(),
      source_port: source_port.into(),
      target_node_id: target_node_id.into(),
      target_port: target_port.into(),
    }
  }
}
