//! End-to-end scenarios: composites run through the orchestrator, jobs run
//! through the queue with an orchestrator-backed processor, and checkpoints
//! restore through the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;

use conductor::error::{EngineError, Result};
use conductor::executor::{
  ExecutableRegistry, ExecuteOptions, IdentityExecutable, NodeContext, NodeExecutable, NodeResult,
  Orchestrator,
};
use conductor::queue::{JobProcessor, JobQueue, QueueConfig, RateLimitConfig};
use conductor::store::ExecutionStore;
use conductor::types::{
  BackoffPolicy, Composite, Edge, ExecutionStatus, JobOptions, JobRequest, NodeSpec, Variables,
};

/// Emits `{"out": <value parameter>}`, renaming whatever single input port
/// arrives so chains stay observable.
struct EmitExecutable;

#[async_trait]
impl NodeExecutable for EmitExecutable {
  async fn execute(&self, context: NodeContext) -> NodeResult {
    let upstream: i64 = context
      .inputs
      .values()
      .filter_map(|v| v.as_i64())
      .sum();
    let own = context
      .parameters
      .get("value")
      .and_then(|v| v.as_i64())
      .unwrap_or(0);
    let mut outputs = HashMap::new();
    outputs.insert("out".to_string(), json!(upstream + own));
    NodeResult::success(outputs)
  }
}

struct FailingExecutable;

#[async_trait]
impl NodeExecutable for FailingExecutable {
  async fn execute(&self, _context: NodeContext) -> NodeResult {
    NodeResult::failure("deliberate failure")
  }
}

fn init_tracing() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn registry() -> Arc<ExecutableRegistry> {
  let mut registry = ExecutableRegistry::new();
  registry.register("emit", Arc::new(EmitExecutable));
  registry.register("fail", Arc::new(FailingExecutable));
  registry.register("identity", Arc::new(IdentityExecutable));
  Arc::new(registry)
}

fn orchestrator() -> Orchestrator {
  Orchestrator::new(Arc::new(ExecutionStore::new()), registry())
}

fn emit_node(id: &str, value: i64) -> NodeSpec {
  NodeSpec::new(id, "emit").with_parameter("value", json!(value))
}

#[tokio::test]
async fn linear_chain_accumulates_through_the_ports() {
  init_tracing();
  let mut composite = Composite::new("wf-chain", "chain");
  composite.nodes = vec![emit_node("a", 1), emit_node("b", 10), emit_node("c", 100)];
  composite.edges = vec![
    Edge::new("a", "out", "b", "in"),
    Edge::new("b", "out", "c", "in"),
  ];

  let engine = orchestrator();
  let report = engine
    .execute(&composite, ExecuteOptions::default())
    .await
    .unwrap();

  assert!(report.success);
  assert_eq!(report.outputs.get("a.out"), Some(&json!(1)));
  assert_eq!(report.outputs.get("b.out"), Some(&json!(11)));
  assert_eq!(report.outputs.get("c.out"), Some(&json!(111)));
  assert_eq!(report.metrics.nodes_executed, 3);
  assert_eq!(report.metrics.nodes_succeeded, 3);

  let execution = engine.store().get_execution(&report.execution_id).unwrap();
  assert_eq!(execution.status, ExecutionStatus::Completed);
  assert_eq!(execution.checkpoints.len(), 3);
}

#[tokio::test]
async fn fan_out_runs_the_level_concurrently() {
  // source feeds four independent branches that all join into sink.
  let mut composite = Composite::new("wf-fan", "fan-out");
  composite.nodes = vec![emit_node("source", 1)];
  composite.edges = vec![];
  for i in 0..4 {
    let id = format!("branch-{i}");
    composite.nodes.push(emit_node(&id, 0));
    composite
      .edges
      .push(Edge::new("source", "out", &id, "in"));
    composite
      .edges
      .push(Edge::new(&id, "out", "sink", &format!("in-{i}")));
  }
  composite.nodes.push(emit_node("sink", 0));

  let engine = orchestrator();
  let report = engine
    .execute(
      &composite,
      ExecuteOptions {
        enable_parallel_execution: true,
        ..ExecuteOptions::default()
      },
    )
    .await
    .unwrap();

  assert!(report.success);
  // Each branch passes 1 through; the sink sums its four input ports.
  assert_eq!(report.outputs.get("sink.out"), Some(&json!(4)));
  assert_eq!(report.metrics.nodes_executed, 6);
}

#[tokio::test]
async fn cyclic_composite_is_rejected_before_any_node_runs() {
  let mut composite = Composite::new("wf-cycle", "cycle");
  composite.nodes = vec![emit_node("a", 1), emit_node("b", 2)];
  composite.edges = vec![
    Edge::new("a", "out", "b", "in"),
    Edge::new("b", "out", "a", "in"),
  ];

  let engine = orchestrator();
  let err = engine
    .execute(&composite, ExecuteOptions::default())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));
  assert!(engine.store().is_empty());
}

#[tokio::test]
async fn sequential_failure_aborts_downstream_levels() {
  let mut composite = Composite::new("wf-fail", "failing chain");
  composite.nodes = vec![
    emit_node("a", 1),
    NodeSpec::new("b", "fail"),
    emit_node("c", 3),
  ];
  composite.edges = vec![
    Edge::new("a", "out", "b", "in"),
    Edge::new("b", "out", "c", "in"),
  ];

  let engine = orchestrator();
  let report = engine
    .execute(&composite, ExecuteOptions::default())
    .await
    .unwrap();

  assert!(!report.success);
  assert_eq!(report.metrics.nodes_executed, 2);
  assert_eq!(report.metrics.nodes_failed, 1);
  assert!(report.error.unwrap().contains("`b`"));
  // a's outputs survive the abort; c never ran.
  assert_eq!(report.outputs.get("a.out"), Some(&json!(1)));
  let execution = engine.store().get_execution(&report.execution_id).unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert!(!execution.node_states.contains_key("c"));
}

/// Orchestrator-backed processor: runs the named composite, mapping a failed
/// report to an error so the queue's retry policy applies.
struct EngineProcessor {
  engine: Orchestrator,
  composites: HashMap<String, Composite>,
}

#[async_trait]
impl JobProcessor for EngineProcessor {
  async fn process(&self, job: &JobRequest) -> Result<Variables> {
    let composite = self
      .composites
      .get(&job.composite_id)
      .ok_or_else(|| EngineError::NodeExecution {
        node_id: job.composite_id.clone(),
        message: "unknown composite".to_string(),
      })?;
    let report = self
      .engine
      .execute(
        composite,
        ExecuteOptions {
          execution_id: Some(job.execution_id.clone()),
          inputs: job.input.clone(),
          ..ExecuteOptions::default()
        },
      )
      .await?;
    if report.success {
      Ok(report.outputs)
    } else {
      Err(EngineError::NodeExecution {
        node_id: report.execution_id,
        message: report.error.unwrap_or_else(|| "execution failed".to_string()),
      })
    }
  }
}

fn engine_queue(composites: Vec<Composite>, config: QueueConfig) -> JobQueue {
  let composites = composites.into_iter().map(|c| (c.id.clone(), c)).collect();
  JobQueue::new(
    Arc::new(EngineProcessor {
      engine: orchestrator(),
      composites,
    }),
    config,
  )
}

#[tokio::test]
async fn queued_job_runs_a_composite_end_to_end() {
  init_tracing();
  let mut composite = Composite::new("wf", "single");
  composite.nodes = vec![emit_node("only", 7)];

  let queue = engine_queue(vec![composite], QueueConfig::default());
  let job_id = queue
    .add(JobRequest::new("wf", Variables::new()), JobOptions::default())
    .unwrap();
  let response = queue.wait_for(&job_id).await.unwrap();

  assert!(response.success);
  assert_eq!(response.outputs.get("only.out"), Some(&json!(7)));
  assert_eq!(queue.get_metrics().completed_jobs, 1);
}

#[tokio::test]
async fn failing_job_retries_three_times_with_exponential_backoff() {
  let mut composite = Composite::new("wf-bad", "always fails");
  composite.nodes = vec![NodeSpec::new("doom", "fail")];

  let queue = engine_queue(vec![composite], QueueConfig::default());
  let options = JobOptions {
    attempts: 3,
    backoff: BackoffPolicy::exponential(100),
    ..JobOptions::default()
  };
  let started = Instant::now();
  let job_id = queue
    .add(JobRequest::new("wf-bad", Variables::new()), options)
    .unwrap();
  let response = queue.wait_for(&job_id).await.unwrap();

  assert!(!response.success);
  assert_eq!(response.retry_count, 2);
  // Backoff between the three attempts: ~100ms then ~200ms.
  assert!(started.elapsed() >= Duration::from_millis(300));
  assert_eq!(queue.get_metrics().failed_jobs, 1);
}

#[tokio::test]
async fn sixth_job_in_the_window_is_rejected_until_it_expires() {
  let mut composite = Composite::new("wf", "single");
  composite.nodes = vec![emit_node("only", 1)];

  let config = QueueConfig {
    rate_limit: Some(RateLimitConfig {
      limit: 5,
      duration_ms: 200,
    }),
    ..QueueConfig::default()
  };
  let queue = engine_queue(vec![composite], config);

  for _ in 0..5 {
    queue
      .add(JobRequest::new("wf", Variables::new()), JobOptions::default())
      .unwrap();
  }
  let err = queue
    .add(JobRequest::new("wf", Variables::new()), JobOptions::default())
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::RateLimitExceeded {
      limit: 5,
      window_ms: 200,
    }
  ));

  sleep(Duration::from_millis(250)).await;
  assert!(
    queue
      .add(JobRequest::new("wf", Variables::new()), JobOptions::default())
      .is_ok()
  );
}

#[tokio::test]
async fn checkpoint_restore_rewinds_the_variables() {
  let store = ExecutionStore::new();
  store.initialize_execution("exec-1", "wf").unwrap();
  store
    .update_execution_status("exec-1", ExecutionStatus::Running)
    .unwrap();

  store.set_variable("exec-1", "v", json!(1)).unwrap();
  let index = store.create_checkpoint("exec-1", "a").unwrap();
  store.set_variable("exec-1", "v", json!(2)).unwrap();
  store.create_checkpoint("exec-1", "b").unwrap();
  store.set_variable("exec-1", "v", json!(3)).unwrap();

  store.restore_checkpoint("exec-1", index).unwrap();
  assert_eq!(store.get_variable("exec-1", "v").unwrap(), Some(json!(1)));

  // Unknown checkpoint indices fail loudly.
  let err = store.restore_checkpoint("exec-1", 99).unwrap_err();
  assert!(matches!(err, EngineError::UnknownCheckpoint { .. }));
}
