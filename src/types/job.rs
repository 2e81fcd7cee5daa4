//! Job types: queued execution requests, retry policy and worker bookkeeping.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Variables;

/// A queued unit of work: one request to run a composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
  pub execution_id: String,
  pub composite_id: String,
  #[serde(default)]
  pub input: Variables,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub webhook_data: Option<serde_json::Value>,
  /// Execution id of the original job when this job is a retry.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_of: Option<String>,
}

impl JobRequest {
  /// New request with a fresh execution id.
  pub fn new(composite_id: impl Into<String>, input: Variables) -> Self {
    Self {
      execution_id: Uuid::new_v4().to_string(),
      composite_id: composite_id.into(),
      input,
      webhook_data: None,
      retry_of: None,
    }
  }

  /// Derive the retry of this job: fresh execution id, `retry_of` pointing at
  /// the original execution (not at intermediate retries).
  pub fn derive_retry(&self) -> Self {
    let origin = self
      .retry_of
      .clone()
      .unwrap_or_else(|| self.execution_id.clone());
    Self {
      execution_id: Uuid::new_v4().to_string(),
      composite_id: self.composite_id.clone(),
      input: self.input.clone(),
      webhook_data: self.webhook_data.clone(),
      retry_of: Some(origin),
    }
  }
}

/// Per-job queue policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
  /// Higher priority is dequeued first when the queue has priority enabled.
  pub priority: i32,
  /// Artificial delay before the first attempt starts.
  pub delay_ms: u64,
  /// Total invocation budget, including the first attempt. Minimum 1.
  pub attempts: u32,
  pub backoff: BackoffPolicy,
  /// Skip storing the JobResponse on success.
  pub remove_on_complete: bool,
  /// Skip storing the JobResponse on terminal failure.
  pub remove_on_fail: bool,
}

impl Default for JobOptions {
  fn default() -> Self {
    Self {
      priority: 0,
      delay_ms: 0,
      attempts: 1,
      backoff: BackoffPolicy::default(),
      remove_on_complete: false,
      remove_on_fail: false,
    }
  }
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
  #[serde(rename = "type")]
  pub kind: BackoffKind,
  pub delay_ms: u64,
}

impl BackoffPolicy {
  pub fn fixed(delay_ms: u64) -> Self {
    Self {
      kind: BackoffKind::Fixed,
      delay_ms,
    }
  }

  pub fn exponential(delay_ms: u64) -> Self {
    Self {
      kind: BackoffKind::Exponential,
      delay_ms,
    }
  }

  /// Delay before the next attempt, given how many retries already fired.
  /// Fixed: constant. Exponential: `delay * 2^retries_used`, shift capped to
  /// keep the multiplication from overflowing.
  pub fn delay_for(&self, retries_used: u32) -> Duration {
    let ms = match self.kind {
      BackoffKind::Fixed => self.delay_ms,
      BackoffKind::Exponential => {
        let shift = retries_used.min(20);
        self.delay_ms.saturating_mul(1u64 << shift)
      }
    };
    Duration::from_millis(ms)
  }
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    BackoffPolicy::fixed(1_000)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
  Fixed,
  Exponential,
}

/// Terminal outcome of one job, cached by the queue until its TTL elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
  pub job_id: String,
  pub success: bool,
  /// Flattened `"<node_id>.<port_id>"` outputs of the final attempt.
  #[serde(default)]
  pub outputs: Variables,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Retries consumed; 0 means the job succeeded or failed on its first
  /// attempt.
  pub retry_count: u32,
  pub finished_at: DateTime<Utc>,
}

/// Load status of one logical worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
  Idle,
  Busy,
  Error,
}

impl fmt::Display for WorkerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerStatus::Idle => "idle",
      WorkerStatus::Busy => "busy",
      WorkerStatus::Error => "error",
    };
    write!(f, "{s}")
  }
}

/// Bookkeeping for one logical concurrency slot. Not an OS thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
  pub id: String,
  pub status: WorkerStatus,
  pub current_job: Option<String>,
  pub processed_count: u64,
  pub error_count: u64,
  pub start_time: DateTime<Utc>,
}

impl WorkerInfo {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      status: WorkerStatus::Idle,
      current_job: None,
      processed_count: 0,
      error_count: 0,
      start_time: Utc::now(),
    }
  }
}
