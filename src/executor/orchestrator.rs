//! Level-by-level execution of one composite run.
//!
//! The orchestrator validates the composite, asks the scheduler for level
//! order, runs each batch (concurrently within a batch when enabled, bounded
//! by a semaphore), and records every transition in the
//! [ExecutionStore](crate::store::ExecutionStore).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::scheduler::compute_execution_order;
use crate::store::ExecutionStore;
use crate::types::{Composite, ExecutionStatus, PortValues, Variables};

use super::executable::{ExecutableRegistry, NodeContext, NodeResult, ResourceLimits};
use super::inputs::gather_node_inputs;
use super::validate::validate_composite;

/// Caller configuration for one run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
  /// Fixed execution id; a fresh one is generated when absent.
  pub execution_id: Option<String>,
  /// Seed values written into the execution's variables before any node runs.
  pub inputs: Variables,
  /// Run a multi-member level's nodes concurrently.
  pub enable_parallel_execution: bool,
  /// Wall-clock budget for the whole run.
  pub timeout_ms: Option<u64>,
  /// Concurrency bound for nodes running within one level.
  pub max_concurrency: usize,
  /// Resource ceilings handed to every node executable.
  pub node_limits: ResourceLimits,
}

impl Default for ExecuteOptions {
  fn default() -> Self {
    Self {
      execution_id: None,
      inputs: Variables::new(),
      enable_parallel_execution: false,
      timeout_ms: None,
      max_concurrency: 4,
      node_limits: ResourceLimits::default(),
    }
  }
}

/// Aggregate timing and counts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
  pub duration_ms: u64,
  /// Per-node wall-clock execution time.
  pub node_durations_ms: HashMap<String, u64>,
  pub nodes_executed: u32,
  pub nodes_succeeded: u32,
  pub nodes_failed: u32,
}

/// Outcome of one composite run. Node failures and timeouts land here with
/// `success: false`; validation errors are returned as `Err` before any node
/// is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
  pub success: bool,
  pub execution_id: String,
  /// Every successful node's outputs flattened under `"<node_id>.<port_id>"`.
  pub outputs: Variables,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub metrics: ExecutionMetrics,
}

/// Run-local mutable state shared by the node futures of one execution.
#[derive(Default)]
struct RunState {
  outputs: HashMap<String, PortValues>,
  durations_ms: HashMap<String, u64>,
  executed: u32,
  succeeded: u32,
  failed: u32,
}

/// Executes composite runs against a shared store and executable registry.
pub struct Orchestrator {
  store: Arc<ExecutionStore>,
  registry: Arc<ExecutableRegistry>,
}

impl Orchestrator {
  pub fn new(store: Arc<ExecutionStore>, registry: Arc<ExecutableRegistry>) -> Self {
    Self { store, registry }
  }

  pub fn store(&self) -> &Arc<ExecutionStore> {
    &self.store
  }

  /// Requests cooperative cancellation: the run stops before its next level.
  /// A node executable already in flight is allowed to finish.
  pub fn cancel(&self, execution_id: &str) -> Result<()> {
    self
      .store
      .update_execution_status(execution_id, ExecutionStatus::Cancelled)
  }

  /// Runs one composite to completion.
  ///
  /// Validation problems return `Err` with no execution record and no node
  /// invoked. Node failures and timeouts mark the execution failed and
  /// return an [ExecutionReport] with `success: false` whose error names the
  /// failing node; outputs of nodes that succeeded earlier stay queryable
  /// through the store.
  pub async fn execute(
    &self,
    composite: &Composite,
    options: ExecuteOptions,
  ) -> Result<ExecutionReport> {
    validate_composite(composite, &self.registry)?;

    let execution_id = options
      .execution_id
      .clone()
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    let order = compute_execution_order(&composite.node_ids(), &composite.edges)?;

    self
      .store
      .initialize_execution(&execution_id, &composite.id)?;
    self.store.seed_variables(&execution_id, &options.inputs)?;
    self
      .store
      .update_execution_status(&execution_id, ExecutionStatus::Running)?;
    info!(
      execution_id = %execution_id,
      composite_id = %composite.id,
      nodes = order.node_count(),
      parallel = options.enable_parallel_execution,
      "execution started"
    );

    let started = Instant::now();
    let state = Mutex::new(RunState::default());
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));

    let batches = order.batches();
    let run = self.run_batches(composite, &execution_id, &batches, &options, &state, &semaphore);
    let outcome = match options.timeout_ms {
      Some(ms) => match timeout(Duration::from_millis(ms), run).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout { timeout_ms: ms }),
      },
      None => run.await,
    };

    let state = state.into_inner().unwrap_or_else(|p| p.into_inner());
    let metrics = ExecutionMetrics {
      duration_ms: started.elapsed().as_millis() as u64,
      node_durations_ms: state.durations_ms,
      nodes_executed: state.executed,
      nodes_succeeded: state.succeeded,
      nodes_failed: state.failed,
    };
    let mut outputs = Variables::new();
    for (node_id, ports) in &state.outputs {
      for (port_id, value) in ports {
        outputs.insert(format!("{node_id}.{port_id}"), value.clone());
      }
    }

    match outcome {
      Ok(()) => {
        self
          .store
          .update_execution_status(&execution_id, ExecutionStatus::Completed)?;
        info!(execution_id = %execution_id, duration_ms = metrics.duration_ms, "execution completed");
        Ok(ExecutionReport {
          success: true,
          execution_id,
          outputs,
          error: None,
          metrics,
        })
      }
      Err(EngineError::Cancelled { .. }) => {
        // Store status is already cancelled; just report it.
        warn!(execution_id = %execution_id, "execution cancelled");
        Ok(ExecutionReport {
          success: false,
          execution_id: execution_id.clone(),
          outputs,
          error: Some(format!("execution `{execution_id}` was cancelled")),
          metrics,
        })
      }
      Err(err) => {
        let message = err.to_string();
        self
          .store
          .update_execution_status(&execution_id, ExecutionStatus::Failed)?;
        warn!(execution_id = %execution_id, error = %message, "execution failed");
        Ok(ExecutionReport {
          success: false,
          execution_id,
          outputs,
          error: Some(message),
          metrics,
        })
      }
    }
  }

  /// Runs every batch in order. A failure inside a batch lets that batch's
  /// already-started members finish, then aborts before the next batch.
  async fn run_batches(
    &self,
    composite: &Composite,
    execution_id: &str,
    batches: &[&[String]],
    options: &ExecuteOptions,
    state: &Mutex<RunState>,
    semaphore: &Arc<Semaphore>,
  ) -> Result<()> {
    for batch in batches {
      if self.store.get_execution(execution_id)?.status == ExecutionStatus::Cancelled {
        return Err(EngineError::Cancelled {
          execution_id: execution_id.to_string(),
        });
      }

      if batch.len() > 1 && options.enable_parallel_execution {
        debug!(execution_id = %execution_id, nodes = batch.len(), "running level concurrently");
        let results = join_all(batch.iter().map(|node_id| {
          self.run_node(composite, execution_id, node_id, options, state, semaphore)
        }))
        .await;
        for result in results {
          result?;
        }
      } else {
        for node_id in batch.iter() {
          self
            .run_node(composite, execution_id, node_id, options, state, semaphore)
            .await?;
        }
      }
    }
    Ok(())
  }

  /// Runs one node: gather inputs, invoke the executable under its time
  /// limit, record state and outputs.
  async fn run_node(
    &self,
    composite: &Composite,
    execution_id: &str,
    node_id: &str,
    options: &ExecuteOptions,
    state: &Mutex<RunState>,
    semaphore: &Arc<Semaphore>,
  ) -> Result<()> {
    let _permit = semaphore
      .acquire()
      .await
      .map_err(|_| EngineError::Cancelled {
        execution_id: execution_id.to_string(),
      })?;

    let spec = composite.node(node_id).ok_or_else(|| EngineError::NodeExecution {
      node_id: node_id.to_string(),
      message: "node spec disappeared after validation".to_string(),
    })?;
    let executable =
      self
        .registry
        .get(&spec.node_type)
        .ok_or_else(|| EngineError::NodeExecution {
          node_id: node_id.to_string(),
          message: format!("no executable registered for type `{}`", spec.node_type),
        })?;

    self
      .store
      .update_node_state(execution_id, node_id, ExecutionStatus::Running)?;
    let inputs = {
      let run_state = lock(state);
      gather_node_inputs(node_id, &composite.edges, &run_state.outputs)
    };
    let context = NodeContext {
      node_id: node_id.to_string(),
      inputs,
      parameters: spec.parameters.clone(),
      limits: options.node_limits,
    };

    debug!(execution_id = %execution_id, node_id = %node_id, node_type = %spec.node_type, "node started");
    let node_started = Instant::now();
    let limit = Duration::from_millis(options.node_limits.max_execution_time_ms);
    let result = match timeout(limit, executable.execute(context)).await {
      Ok(result) => result,
      Err(_) => NodeResult::failure(format!(
        "node timed out after {}ms",
        options.node_limits.max_execution_time_ms
      )),
    };
    let elapsed_ms = node_started.elapsed().as_millis() as u64;

    {
      let mut run_state = lock(state);
      run_state.durations_ms.insert(node_id.to_string(), elapsed_ms);
      run_state.executed += 1;
    }

    if result.success {
      {
        let mut run_state = lock(state);
        run_state.outputs.insert(node_id.to_string(), result.outputs);
        run_state.succeeded += 1;
      }
      self
        .store
        .update_node_state(execution_id, node_id, ExecutionStatus::Completed)?;
      self.store.create_checkpoint(execution_id, node_id)?;
      debug!(execution_id = %execution_id, node_id = %node_id, elapsed_ms, "node completed");
      Ok(())
    } else {
      let message = result
        .error
        .unwrap_or_else(|| "node reported failure without detail".to_string());
      lock(state).failed += 1;
      // Record the failure locally before propagating, so post-mortem detail
      // survives even though the execution as a whole is marked failed.
      self.store.record_node_error(execution_id, node_id, &message)?;
      self
        .store
        .update_node_state(execution_id, node_id, ExecutionStatus::Failed)?;
      warn!(execution_id = %execution_id, node_id = %node_id, error = %message, "node failed");
      Err(EngineError::NodeExecution {
        node_id: node_id.to_string(),
        message,
      })
    }
  }
}

fn lock(state: &Mutex<RunState>) -> std::sync::MutexGuard<'_, RunState> {
  state.lock().unwrap_or_else(|p| p.into_inner())
}
