//! Process-boundary envelopes.
//!
//! An execution request crosses the boundary as `conductor:execute`, the
//! outcome comes back as `conductor:result`, and failures outside an
//! execution (bad payloads, unknown composites at the far end) come back as
//! a bare error envelope. The correlation `id` round-trips unchanged so the
//! caller can match responses to in-flight requests.

use serde::{Deserialize, Serialize};

use crate::executor::ExecutionReport;
use crate::types::Variables;

/// What the far side should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
  pub composite_id: String,
  #[serde(default)]
  pub inputs: Variables,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<ExecuteConfig>,
}

/// Wire-level execution tuning. Mirrors the orchestrator options that make
/// sense to set remotely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteConfig {
  #[serde(default)]
  pub enable_parallel_execution: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_concurrency: Option<usize>,
}

/// Tagged request/result envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageEnvelope {
  #[serde(rename = "conductor:execute")]
  Execute { payload: ExecuteRequest, id: String },
  #[serde(rename = "conductor:result")]
  Result { payload: ExecutionReport, id: String },
}

/// Failure outside any execution report. Carries only the correlation id and
/// a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
  pub id: String,
  pub error: String,
}

/// Anything that can arrive on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
  Message(MessageEnvelope),
  Error(ErrorEnvelope),
}

impl Envelope {
  pub fn execute(id: impl Into<String>, payload: ExecuteRequest) -> Self {
    Envelope::Message(MessageEnvelope::Execute {
      payload,
      id: id.into(),
    })
  }

  pub fn result(id: impl Into<String>, payload: ExecutionReport) -> Self {
    Envelope::Message(MessageEnvelope::Result {
      payload,
      id: id.into(),
    })
  }

  pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
    Envelope::Error(ErrorEnvelope {
      id: id.into(),
      error: error.into(),
    })
  }

  /// The correlation id, whichever shape the envelope has.
  pub fn correlation_id(&self) -> &str {
    match self {
      Envelope::Message(MessageEnvelope::Execute { id, .. }) => id,
      Envelope::Message(MessageEnvelope::Result { id, .. }) => id,
      Envelope::Error(ErrorEnvelope { id, .. }) => id,
    }
  }
}
