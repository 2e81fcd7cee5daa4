//! Core data model: composites, executions, jobs and workers.
//!
//! Everything here is plain serializable data, owned by the component that
//! stores it (the [ExecutionStore](crate::store::ExecutionStore) for
//! executions, the [JobQueue](crate::queue::JobQueue) for jobs).

use std::collections::HashMap;

mod composite;
mod execution;
mod job;

pub use composite::{Composite, Edge, NodeSpec, Position};
pub use execution::{Checkpoint, Execution, ExecutionStatus, NodeState};
pub use job::{
  BackoffKind, BackoffPolicy, JobOptions, JobRequest, JobResponse, WorkerInfo, WorkerStatus,
};

/// Key-value scratchpad shared across one execution.
pub type Variables = HashMap<String, serde_json::Value>;

/// Values keyed by port id, as produced or consumed by one node.
pub type PortValues = HashMap<String, serde_json::Value>;
