//! Error taxonomy for the engine.
//!
//! Validation errors are raised before any node executes and are always fatal
//! to that run. Node failures are recorded in the state store before being
//! propagated, so post-mortem detail survives the run.

use thiserror::Error;

use crate::types::ExecutionStatus;

/// Structural problems in a composite, found before execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("unknown node type `{node_type}` on node `{node_id}`")]
  UnknownNodeType { node_id: String, node_type: String },

  #[error("edge references unknown node `{node_id}`")]
  DanglingEdge { node_id: String },

  #[error("circular dependency detected among composite nodes")]
  CycleDetected,

  #[error("composite has no nodes")]
  EmptyComposite,
}

/// Runtime errors across the orchestrator, state store and queue.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("node `{node_id}` failed: {message}")]
  NodeExecution { node_id: String, message: String },

  #[error("execution timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("rate limit exceeded: {limit} requests per {window_ms}ms")]
  RateLimitExceeded { limit: usize, window_ms: u64 },

  #[error("job failed after {attempts} attempts: {last_error}")]
  RetryExhausted { attempts: u32, last_error: String },

  #[error("unknown execution `{execution_id}`")]
  UnknownExecution { execution_id: String },

  #[error("execution `{execution_id}` already exists")]
  DuplicateExecution { execution_id: String },

  #[error("illegal status transition {from} -> {to} for execution `{execution_id}`")]
  InvalidTransition {
    execution_id: String,
    from: ExecutionStatus,
    to: ExecutionStatus,
  },

  #[error("execution `{execution_id}` was cancelled")]
  Cancelled { execution_id: String },

  #[error("unknown checkpoint index {index} for execution `{execution_id}`")]
  UnknownCheckpoint { execution_id: String, index: usize },

  #[error("queue is shut down")]
  QueueClosed,
}

impl EngineError {
  /// True when retrying the same job could change the outcome.
  pub fn is_retryable(&self) -> bool {
    !matches!(
      self,
      EngineError::Validation(_)
        | EngineError::Cancelled { .. }
        | EngineError::QueueClosed
        | EngineError::RateLimitExceeded { .. }
    )
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
