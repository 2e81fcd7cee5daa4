//! Tests for the execution state store.

use serde_json::json;

use super::{ExecutionStore, StoreEvent};
use crate::error::EngineError;
use crate::types::{ExecutionStatus, Variables};

fn store_with(execution_id: &str) -> ExecutionStore {
  let store = ExecutionStore::new();
  store.initialize_execution(execution_id, "composite-1").unwrap();
  store
}

#[test]
fn initialize_creates_pending_execution() {
  let store = store_with("e1");
  let e = store.get_execution("e1").unwrap();
  assert_eq!(e.status, ExecutionStatus::Pending);
  assert_eq!(e.composite_id, "composite-1");
  assert!(e.end_time.is_none());
}

#[test]
fn initialize_rejects_duplicate_ids() {
  let store = store_with("e1");
  let err = store.initialize_execution("e1", "composite-2").unwrap_err();
  assert!(matches!(err, EngineError::DuplicateExecution { .. }));
}

#[test]
fn unknown_execution_fails_loudly() {
  let store = ExecutionStore::new();
  assert!(matches!(
    store.update_execution_status("ghost", ExecutionStatus::Running),
    Err(EngineError::UnknownExecution { .. })
  ));
  assert!(matches!(
    store.get_variable("ghost", "k"),
    Err(EngineError::UnknownExecution { .. })
  ));
  assert!(matches!(
    store.create_checkpoint("ghost", "n"),
    Err(EngineError::UnknownExecution { .. })
  ));
}

#[test]
fn status_transitions_follow_the_lifecycle() {
  let store = store_with("e1");
  store.update_execution_status("e1", ExecutionStatus::Running).unwrap();
  store.update_execution_status("e1", ExecutionStatus::Paused).unwrap();
  store.update_execution_status("e1", ExecutionStatus::Running).unwrap();
  store.update_execution_status("e1", ExecutionStatus::Completed).unwrap();
  let e = store.get_execution("e1").unwrap();
  assert_eq!(e.status, ExecutionStatus::Completed);
  assert!(e.end_time.is_some());
}

#[test]
fn illegal_transition_is_rejected_and_state_unchanged() {
  let store = store_with("e1");
  let err = store
    .update_execution_status("e1", ExecutionStatus::Completed)
    .unwrap_err();
  assert!(matches!(err, EngineError::InvalidTransition { .. }));
  assert_eq!(store.get_execution("e1").unwrap().status, ExecutionStatus::Pending);
}

#[test]
fn node_state_is_created_lazily_and_timestamped() {
  let store = store_with("e1");
  assert!(store.get_node_state("e1", "n1").unwrap().is_none());
  store.update_node_state("e1", "n1", ExecutionStatus::Running).unwrap();
  let n = store.get_node_state("e1", "n1").unwrap().unwrap();
  assert_eq!(n.status, ExecutionStatus::Running);
  assert!(n.start_time.is_some());
  assert!(n.end_time.is_none());
  store.update_node_state("e1", "n1", ExecutionStatus::Completed).unwrap();
  let n = store.get_node_state("e1", "n1").unwrap().unwrap();
  assert!(n.end_time.is_some());
}

#[test]
fn record_node_error_increments_retry_count() {
  let store = store_with("e1");
  store.record_node_error("e1", "n1", "first failure").unwrap();
  store.record_node_error("e1", "n1", "second failure").unwrap();
  let n = store.get_node_state("e1", "n1").unwrap().unwrap();
  assert_eq!(n.retry_count, 2);
  assert_eq!(n.last_error.as_deref(), Some("second failure"));
}

#[test]
fn variables_round_trip() {
  let store = store_with("e1");
  store.set_variable("e1", "count", json!(42)).unwrap();
  assert_eq!(store.get_variable("e1", "count").unwrap(), Some(json!(42)));
  assert_eq!(store.get_variable("e1", "missing").unwrap(), None);
}

#[test]
fn seed_variables_writes_every_key() {
  let store = store_with("e1");
  let mut vars = Variables::new();
  vars.insert("a".to_string(), json!(1));
  vars.insert("b".to_string(), json!("two"));
  store.seed_variables("e1", &vars).unwrap();
  assert_eq!(store.get_variable("e1", "a").unwrap(), Some(json!(1)));
  assert_eq!(store.get_variable("e1", "b").unwrap(), Some(json!("two")));
}

#[test]
fn checkpoint_restores_earlier_variables() {
  let store = store_with("e1");
  store.set_variable("e1", "v", json!(1)).unwrap();
  let index = store.create_checkpoint("e1", "n1").unwrap();
  assert_eq!(index, 0);
  store.set_variable("e1", "v", json!(2)).unwrap();
  assert_eq!(store.get_variable("e1", "v").unwrap(), Some(json!(2)));
  store.restore_checkpoint("e1", 0).unwrap();
  assert_eq!(store.get_variable("e1", "v").unwrap(), Some(json!(1)));
}

#[test]
fn restore_unknown_checkpoint_index_fails() {
  let store = store_with("e1");
  let err = store.restore_checkpoint("e1", 3).unwrap_err();
  assert!(matches!(err, EngineError::UnknownCheckpoint { index: 3, .. }));
}

#[test]
fn restore_does_not_drop_later_checkpoints() {
  let store = store_with("e1");
  store.set_variable("e1", "v", json!(1)).unwrap();
  store.create_checkpoint("e1", "a").unwrap();
  store.set_variable("e1", "v", json!(2)).unwrap();
  store.create_checkpoint("e1", "b").unwrap();
  store.restore_checkpoint("e1", 0).unwrap();
  assert_eq!(store.list_checkpoints("e1").unwrap().len(), 2);
}

#[test]
fn active_executions_are_the_non_terminal_ones() {
  let store = ExecutionStore::new();
  store.initialize_execution("pending", "c").unwrap();
  store.initialize_execution("running", "c").unwrap();
  store.update_execution_status("running", ExecutionStatus::Running).unwrap();
  store.initialize_execution("paused", "c").unwrap();
  store.update_execution_status("paused", ExecutionStatus::Running).unwrap();
  store.update_execution_status("paused", ExecutionStatus::Paused).unwrap();
  store.initialize_execution("done", "c").unwrap();
  store.update_execution_status("done", ExecutionStatus::Running).unwrap();
  store.update_execution_status("done", ExecutionStatus::Completed).unwrap();

  let mut active: Vec<String> = store
    .get_active_executions()
    .into_iter()
    .map(|e| e.execution_id)
    .collect();
  active.sort();
  assert_eq!(active, vec!["paused", "pending", "running"]);
}

#[test]
fn clear_completed_removes_exactly_terminal_completed_and_failed() {
  let store = ExecutionStore::new();
  for (id, status) in [
    ("done", ExecutionStatus::Completed),
    ("broken", ExecutionStatus::Failed),
    ("stopped", ExecutionStatus::Cancelled),
  ] {
    store.initialize_execution(id, "c").unwrap();
    store.update_execution_status(id, ExecutionStatus::Running).unwrap();
    store.update_execution_status(id, status).unwrap();
  }
  store.initialize_execution("live", "c").unwrap();

  assert_eq!(store.clear_completed_executions(), 2);
  // Cancelled and active executions survive the sweep.
  assert!(store.get_execution("stopped").is_ok());
  assert!(store.get_execution("live").is_ok());
  assert!(store.get_execution("done").is_err());
  // Second sweep finds nothing new.
  assert_eq!(store.clear_completed_executions(), 0);
}

#[tokio::test]
async fn mutations_publish_events_in_order() {
  let store = store_with("e1");
  let mut rx = store.subscribe();
  store.update_execution_status("e1", ExecutionStatus::Running).unwrap();
  store.update_node_state("e1", "n1", ExecutionStatus::Running).unwrap();
  store.set_variable("e1", "k", json!(true)).unwrap();
  store.create_checkpoint("e1", "n1").unwrap();

  let first = rx.recv().await.unwrap();
  assert_eq!(first.label(), "execution:updated");
  assert!(matches!(
    first,
    StoreEvent::ExecutionUpdated { status: ExecutionStatus::Running, .. }
  ));
  assert_eq!(rx.recv().await.unwrap().label(), "node:updated");
  assert_eq!(rx.recv().await.unwrap().label(), "variable:set");
  assert_eq!(rx.recv().await.unwrap().label(), "checkpoint:created");
}

#[tokio::test]
async fn subscribers_joining_late_miss_earlier_events() {
  let store = store_with("e1");
  store.update_execution_status("e1", ExecutionStatus::Running).unwrap();
  let mut rx = store.subscribe();
  store.set_variable("e1", "k", json!(1)).unwrap();
  let event = rx.recv().await.unwrap();
  assert_eq!(event.label(), "variable:set");
}
