//! # conductor
//!
//! Workflow-automation execution engine: composites (directed graphs of
//! nodes joined by edges) are scheduled into dependency levels and executed
//! with bounded concurrency, checkpointing and retry.
//!
//! ## Architecture
//!
//! - `scheduler` computes the level-batched execution order and rejects
//!   cyclic composites up front.
//! - `executor` validates a composite, runs its nodes level by level through
//!   the [executor::NodeExecutable] contract and reports flattened outputs
//!   plus metrics.
//! - `store` is the system of record: execution status, per-node status,
//!   variables, checkpoints and change events.
//! - `queue` admits execution jobs under rate limiting and priority, retries
//!   failures with backoff and tracks logical worker slots.
//! - `transport` defines the process-boundary envelopes.

pub mod error;
pub mod executor;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod types;

pub use error::{EngineError, Result, ValidationError};
pub use executor::{ExecuteOptions, ExecutionReport, Orchestrator};
pub use queue::{JobQueue, QueueConfig, WorkerPool};
pub use scheduler::{ExecutionOrder, compute_execution_order};
pub use store::ExecutionStore;
pub use types::{Composite, Edge, Execution, ExecutionStatus, JobOptions, JobRequest, NodeSpec};
