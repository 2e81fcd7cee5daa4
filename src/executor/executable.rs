//! External node-executable contract.
//!
//! The orchestrator never inspects a node's implementation; it only builds a
//! [NodeContext], invokes [NodeExecutable::execute] and records the returned
//! [NodeResult]. Executables are looked up by node type in an
//! [ExecutableRegistry], a capability-keyed strategy table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::PortValues;

/// Resource ceilings passed to every executable. Enforcement of the time
/// limit is cooperative: the waiting side times out, a non-cooperating
/// executable is not forcibly killed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceLimits {
  pub max_execution_time_ms: u64,
  pub max_memory_mb: u64,
}

impl Default for ResourceLimits {
  fn default() -> Self {
    Self {
      max_execution_time_ms: 30_000,
      max_memory_mb: 512,
    }
  }
}

/// Everything an executable sees about one node invocation. Logging is
/// ambient: executables emit through `tracing` inside the orchestrator's
/// node span instead of receiving a logger handle.
#[derive(Debug, Clone)]
pub struct NodeContext {
  pub node_id: String,
  /// Inputs gathered from upstream outputs, keyed by this node's input port.
  pub inputs: PortValues,
  /// The node spec's own parameter map.
  pub parameters: HashMap<String, serde_json::Value>,
  pub limits: ResourceLimits,
}

/// Outcome of one executable invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
  pub success: bool,
  #[serde(default)]
  pub outputs: PortValues,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub metadata: HashMap<String, serde_json::Value>,
}

impl NodeResult {
  pub fn success(outputs: PortValues) -> Self {
    Self {
      success: true,
      outputs,
      error: None,
      metadata: HashMap::new(),
    }
  }

  pub fn failure(error: impl Into<String>) -> Self {
    Self {
      success: false,
      outputs: PortValues::new(),
      error: Some(error.into()),
      metadata: HashMap::new(),
    }
  }
}

/// One node type's implementation: a pure async function from context to
/// result. Implementations must not panic; failures are reported through
/// `NodeResult::failure`.
#[async_trait]
pub trait NodeExecutable: Send + Sync {
  async fn execute(&self, context: NodeContext) -> NodeResult;
}

/// Strategy table mapping a node type tag to its executable.
#[derive(Default, Clone)]
pub struct ExecutableRegistry {
  table: HashMap<String, Arc<dyn NodeExecutable>>,
}

impl ExecutableRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `executable` for `node_type`, replacing any previous entry.
  pub fn register(&mut self, node_type: impl Into<String>, executable: Arc<dyn NodeExecutable>) {
    self.table.insert(node_type.into(), executable);
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutable>> {
    self.table.get(node_type).cloned()
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.table.contains_key(node_type)
  }

  /// Registered node type tags, sorted.
  pub fn node_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.table.keys().cloned().collect();
    types.sort();
    types
  }
}
