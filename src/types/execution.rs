//! Execution state: one runtime instance of a composite run.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Variables;

/// Lifecycle status shared by executions and individual nodes.
///
/// Legal transitions are monotonic along
/// `pending -> running -> {completed, failed, cancelled}` plus
/// `running <-> paused`. Everything else is rejected by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Paused,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  /// Completed, failed and cancelled executions never change again.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }

  /// Non-terminal: still owned by the scheduler (pending, running, paused).
  pub fn is_active(&self) -> bool {
    !self.is_terminal()
  }

  pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
    use ExecutionStatus::*;
    matches!(
      (self, next),
      (Pending, Running)
        | (Running, Paused)
        | (Running, Completed)
        | (Running, Failed)
        | (Running, Cancelled)
        | (Paused, Running)
    )
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ExecutionStatus::Pending => "pending",
      ExecutionStatus::Running => "running",
      ExecutionStatus::Paused => "paused",
      ExecutionStatus::Completed => "completed",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Cancelled => "cancelled",
    };
    write!(f, "{s}")
  }
}

/// One run of a composite. Owned exclusively by the
/// [ExecutionStore](crate::store::ExecutionStore); other components refer to
/// it by `execution_id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
  pub execution_id: String,
  pub composite_id: String,
  pub status: ExecutionStatus,
  pub start_time: DateTime<Utc>,
  pub end_time: Option<DateTime<Utc>>,
  /// Per-node state, created lazily on a node's first status update.
  pub node_states: HashMap<String, NodeState>,
  /// Key-value scratchpad visible to the whole execution.
  pub variables: Variables,
  /// Append-only variable snapshots for pause/resume.
  pub checkpoints: Vec<Checkpoint>,
}

impl Execution {
  pub fn new(execution_id: impl Into<String>, composite_id: impl Into<String>) -> Self {
    Self {
      execution_id: execution_id.into(),
      composite_id: composite_id.into(),
      status: ExecutionStatus::Pending,
      start_time: Utc::now(),
      end_time: None,
      node_states: HashMap::new(),
      variables: Variables::new(),
      checkpoints: vec![],
    }
  }
}

/// Status of one node within an execution. Updated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
  pub node_id: String,
  pub status: ExecutionStatus,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
  pub retry_count: u32,
  pub last_error: Option<String>,
}

impl NodeState {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      status: ExecutionStatus::Pending,
      start_time: None,
      end_time: None,
      retry_count: 0,
      last_error: None,
    }
  }
}

/// Point-in-time snapshot of an execution's variables, taken when `node_id`
/// completed. Restoring a checkpoint replaces the live variables mapping; it
/// does not replay execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
  pub timestamp: DateTime<Utc>,
  pub node_id: String,
  pub variables: Variables,
}
