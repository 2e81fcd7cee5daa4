//! Change notifications published by the execution store.
//!
//! Observers (UI, telemetry) subscribe through a broadcast channel; the store
//! never holds a direct reference to any observer.

use serde::Serialize;

use crate::types::ExecutionStatus;

/// One mutation of the store, published after the mutation commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreEvent {
  ExecutionUpdated {
    execution_id: String,
    status: ExecutionStatus,
  },
  NodeUpdated {
    execution_id: String,
    node_id: String,
    status: ExecutionStatus,
  },
  VariableSet {
    execution_id: String,
    key: String,
  },
  CheckpointCreated {
    execution_id: String,
    node_id: String,
    index: usize,
  },
  CheckpointRestored {
    execution_id: String,
    index: usize,
  },
  ExecutionRemoved {
    execution_id: String,
  },
}

impl StoreEvent {
  /// Wire name of the notification, stable across releases.
  pub fn label(&self) -> &'static str {
    match self {
      StoreEvent::ExecutionUpdated { .. } => "execution:updated",
      StoreEvent::NodeUpdated { .. } => "node:updated",
      StoreEvent::VariableSet { .. } => "variable:set",
      StoreEvent::CheckpointCreated { .. } => "checkpoint:created",
      StoreEvent::CheckpointRestored { .. } => "checkpoint:restored",
      StoreEvent::ExecutionRemoved { .. } => "execution:removed",
    }
  }

  /// Execution the event belongs to.
  pub fn execution_id(&self) -> &str {
    match self {
      StoreEvent::ExecutionUpdated { execution_id, .. }
      | StoreEvent::NodeUpdated { execution_id, .. }
      | StoreEvent::VariableSet { execution_id, .. }
      | StoreEvent::CheckpointCreated { execution_id, .. }
      | StoreEvent::CheckpointRestored { execution_id, .. }
      | StoreEvent::ExecutionRemoved { execution_id } => execution_id,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::StoreEvent;
  use crate::types::ExecutionStatus;

  #[test]
  fn labels_are_stable_wire_names() {
    let e = StoreEvent::ExecutionUpdated {
      execution_id: "e1".to_string(),
      status: ExecutionStatus::Running,
    };
    assert_eq!(e.label(), "execution:updated");
    let n = StoreEvent::NodeUpdated {
      execution_id: "e1".to_string(),
      node_id: "n1".to_string(),
      status: ExecutionStatus::Completed,
    };
    assert_eq!(n.label(), "node:updated");
    assert_eq!(n.execution_id(), "e1");
  }
}
