//! Single source of truth for execution state, keyed by execution id.
//!
//! All mutation goes through the named operations here; no other component
//! touches an [Execution]'s fields directly. Each operation is atomic with
//! respect to its execution and publishes a [StoreEvent] after committing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::types::{Checkpoint, Execution, ExecutionStatus, NodeState, Variables};

use super::StoreEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-memory arena of executions plus a broadcast channel of change events.
///
/// Operating on an unknown execution id fails with
/// [EngineError::UnknownExecution]; only the cleanup sweep is idempotent.
pub struct ExecutionStore {
  executions: Mutex<HashMap<String, Execution>>,
  events: broadcast::Sender<StoreEvent>,
}

impl Default for ExecutionStore {
  fn default() -> Self {
    Self::new()
  }
}

impl ExecutionStore {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    Self {
      executions: Mutex::new(HashMap::new()),
      events,
    }
  }

  /// Subscribe to change notifications. Slow receivers lag; they never block
  /// the store.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.events.subscribe()
  }

  fn emit(&self, event: StoreEvent) {
    // Send fails only when no receiver is subscribed.
    let _ = self.events.send(event);
  }

  /// Creates a pending execution. The id must be fresh.
  pub fn initialize_execution(
    &self,
    execution_id: impl Into<String>,
    composite_id: impl Into<String>,
  ) -> Result<()> {
    let execution_id = execution_id.into();
    let mut executions = self.lock();
    if executions.contains_key(&execution_id) {
      return Err(EngineError::DuplicateExecution { execution_id });
    }
    let execution = Execution::new(execution_id.clone(), composite_id);
    info!(execution_id = %execution_id, composite_id = %execution.composite_id, "execution initialized");
    executions.insert(execution_id.clone(), execution);
    drop(executions);
    self.emit(StoreEvent::ExecutionUpdated {
      execution_id,
      status: ExecutionStatus::Pending,
    });
    Ok(())
  }

  /// Transitions the execution's status. Rejects transitions outside the
  /// lifecycle; sets `end_time` when the new status is terminal.
  pub fn update_execution_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()> {
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      if !execution.status.can_transition_to(status) {
        return Err(EngineError::InvalidTransition {
          execution_id: execution_id.to_string(),
          from: execution.status,
          to: status,
        });
      }
      execution.status = status;
      if status.is_terminal() {
        execution.end_time = Some(Utc::now());
      }
    }
    debug!(execution_id = %execution_id, status = %status, "execution status updated");
    self.emit(StoreEvent::ExecutionUpdated {
      execution_id: execution_id.to_string(),
      status,
    });
    Ok(())
  }

  /// Updates one node's status, creating its state lazily on first touch.
  /// Stamps `start_time` on entering running and `end_time` on reaching a
  /// terminal status.
  pub fn update_node_state(
    &self,
    execution_id: &str,
    node_id: &str,
    status: ExecutionStatus,
  ) -> Result<()> {
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      let node = execution
        .node_states
        .entry(node_id.to_string())
        .or_insert_with(|| NodeState::new(node_id));
      node.status = status;
      if status == ExecutionStatus::Running && node.start_time.is_none() {
        node.start_time = Some(Utc::now());
      }
      if status.is_terminal() {
        node.end_time = Some(Utc::now());
      }
    }
    self.emit(StoreEvent::NodeUpdated {
      execution_id: execution_id.to_string(),
      node_id: node_id.to_string(),
      status,
    });
    Ok(())
  }

  /// Records a node failure: bumps `retry_count` and stores `last_error`.
  /// Does not change the node's status by itself.
  pub fn record_node_error(
    &self,
    execution_id: &str,
    node_id: &str,
    error: impl Into<String>,
  ) -> Result<()> {
    let status;
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      let node = execution
        .node_states
        .entry(node_id.to_string())
        .or_insert_with(|| NodeState::new(node_id));
      node.retry_count += 1;
      node.last_error = Some(error.into());
      status = node.status;
    }
    self.emit(StoreEvent::NodeUpdated {
      execution_id: execution_id.to_string(),
      node_id: node_id.to_string(),
      status,
    });
    Ok(())
  }

  pub fn set_variable(
    &self,
    execution_id: &str,
    key: impl Into<String>,
    value: serde_json::Value,
  ) -> Result<()> {
    let key = key.into();
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      execution.variables.insert(key.clone(), value);
    }
    self.emit(StoreEvent::VariableSet {
      execution_id: execution_id.to_string(),
      key,
    });
    Ok(())
  }

  pub fn get_variable(&self, execution_id: &str, key: &str) -> Result<Option<serde_json::Value>> {
    let mut executions = self.lock();
    let execution = entry(&mut executions, execution_id)?;
    Ok(execution.variables.get(key).cloned())
  }

  /// Seeds several variables at once, emitting one event per key.
  pub fn seed_variables(&self, execution_id: &str, variables: &Variables) -> Result<()> {
    for (key, value) in variables {
      self.set_variable(execution_id, key.clone(), value.clone())?;
    }
    Ok(())
  }

  /// Snapshots the execution's variables; returns the checkpoint index.
  pub fn create_checkpoint(&self, execution_id: &str, node_id: &str) -> Result<usize> {
    let index;
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      let checkpoint = Checkpoint {
        timestamp: Utc::now(),
        node_id: node_id.to_string(),
        variables: execution.variables.clone(),
      };
      execution.checkpoints.push(checkpoint);
      index = execution.checkpoints.len() - 1;
    }
    self.emit(StoreEvent::CheckpointCreated {
      execution_id: execution_id.to_string(),
      node_id: node_id.to_string(),
      index,
    });
    Ok(index)
  }

  /// Replaces the live variables mapping with the checkpoint's snapshot.
  /// Does not replay execution and does not drop later checkpoints.
  pub fn restore_checkpoint(&self, execution_id: &str, index: usize) -> Result<()> {
    {
      let mut executions = self.lock();
      let execution = entry(&mut executions, execution_id)?;
      let snapshot = execution.checkpoints.get(index).cloned().ok_or_else(|| {
        EngineError::UnknownCheckpoint {
          execution_id: execution_id.to_string(),
          index,
        }
      })?;
      execution.variables = snapshot.variables;
    }
    info!(execution_id = %execution_id, index, "checkpoint restored");
    self.emit(StoreEvent::CheckpointRestored {
      execution_id: execution_id.to_string(),
      index,
    });
    Ok(())
  }

  pub fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<Checkpoint>> {
    let mut executions = self.lock();
    let execution = entry(&mut executions, execution_id)?;
    Ok(execution.checkpoints.clone())
  }

  /// Snapshot of one execution.
  pub fn get_execution(&self, execution_id: &str) -> Result<Execution> {
    let mut executions = self.lock();
    let execution = entry(&mut executions, execution_id)?;
    Ok(execution.clone())
  }

  pub fn get_node_state(&self, execution_id: &str, node_id: &str) -> Result<Option<NodeState>> {
    let mut executions = self.lock();
    let execution = entry(&mut executions, execution_id)?;
    Ok(execution.node_states.get(node_id).cloned())
  }

  /// Executions whose status is non-terminal (pending, running or paused).
  pub fn get_active_executions(&self) -> Vec<Execution> {
    let executions = self.lock();
    executions
      .values()
      .filter(|e| e.status.is_active())
      .cloned()
      .collect()
  }

  /// Removes every execution with status completed or failed and returns the
  /// count removed. Idempotent: a second sweep with no new terminal
  /// executions removes nothing.
  pub fn clear_completed_executions(&self) -> usize {
    let removed: Vec<String> = {
      let mut executions = self.lock();
      let ids: Vec<String> = executions
        .iter()
        .filter(|(_, e)| {
          matches!(
            e.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
          )
        })
        .map(|(id, _)| id.clone())
        .collect();
      for id in &ids {
        executions.remove(id);
      }
      ids
    };
    for execution_id in &removed {
      self.emit(StoreEvent::ExecutionRemoved {
        execution_id: execution_id.clone(),
      });
    }
    if !removed.is_empty() {
      info!(count = removed.len(), "cleared completed executions");
    }
    removed.len()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Execution>> {
    // Held only across short synchronous sections, never across an await.
    self.executions.lock().unwrap_or_else(|p| p.into_inner())
  }
}

fn entry<'a>(
  executions: &'a mut HashMap<String, Execution>,
  execution_id: &str,
) -> Result<&'a mut Execution> {
  executions
    .get_mut(execution_id)
    .ok_or_else(|| EngineError::UnknownExecution {
      execution_id: execution_id.to_string(),
    })
}
