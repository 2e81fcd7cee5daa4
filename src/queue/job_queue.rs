//! Job queue: admission, delay, retry with backoff and result caching.
//!
//! A job is one request to run a composite. The queue admits it (subject to
//! the rate limiter), hands it to the task runner under the configured
//! priority and concurrency bound, retries failures per the job's backoff
//! policy, and caches the terminal [JobResponse] until its TTL elapses.
//! Retries are invisible to the processor; it only ever sees single attempts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::types::{JobOptions, JobRequest, JobResponse, Variables};

use super::rate_limiter::{RateLimitConfig, SlidingWindowLimiter};
use super::task_runner::TaskRunner;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Executes one admitted job attempt. The orchestrator sits behind this seam;
/// tests substitute their own.
#[async_trait]
pub trait JobProcessor: Send + Sync {
  /// Runs the job once, returning the flattened execution outputs.
  async fn process(&self, job: &JobRequest) -> Result<Variables>;
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// Concurrent jobs in flight.
  pub max_concurrency: usize,
  /// Honor `JobOptions::priority` when dequeuing; plain FIFO otherwise.
  pub priority_enabled: bool,
  pub rate_limit: Option<RateLimitConfig>,
  /// How long a terminal JobResponse stays queryable.
  pub result_ttl_ms: u64,
  /// How long an unconsumed webhook response is held.
  pub webhook_ttl_ms: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 4,
      priority_enabled: true,
      rate_limit: None,
      result_ttl_ms: 300_000,
      webhook_ttl_ms: 120_000,
    }
  }
}

/// Point-in-time queue health counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
  pub active_jobs: usize,
  pub pending_jobs: usize,
  pub completed_jobs: u64,
  pub failed_jobs: u64,
  pub queue_size: usize,
  pub rate_limit_remaining: Option<usize>,
}

/// Published when a job reaches a terminal outcome.
#[derive(Debug, Clone)]
pub struct JobEvent {
  pub job_id: String,
  pub success: bool,
}

struct StoredResult {
  response: JobResponse,
  stored_at: Instant,
}

struct StoredWebhook {
  payload: serde_json::Value,
  stored_at: Instant,
}

#[derive(Default)]
struct Counters {
  completed: u64,
  failed: u64,
}

/// The queue. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct JobQueue {
  processor: Arc<dyn JobProcessor>,
  runner: TaskRunner,
  limiter: Option<Arc<SlidingWindowLimiter>>,
  config: Arc<QueueConfig>,
  active: Arc<Mutex<HashMap<String, JobRequest>>>,
  results: Arc<Mutex<HashMap<String, StoredResult>>>,
  webhooks: Arc<Mutex<HashMap<String, StoredWebhook>>>,
  counters: Arc<Mutex<Counters>>,
  events: broadcast::Sender<JobEvent>,
  closed: Arc<AtomicBool>,
}

impl JobQueue {
  pub fn new(processor: Arc<dyn JobProcessor>, config: QueueConfig) -> Self {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    Self {
      processor,
      runner: TaskRunner::new(config.max_concurrency),
      limiter: config
        .rate_limit
        .map(|c| Arc::new(SlidingWindowLimiter::new(c))),
      config: Arc::new(config),
      active: Arc::new(Mutex::new(HashMap::new())),
      results: Arc::new(Mutex::new(HashMap::new())),
      webhooks: Arc::new(Mutex::new(HashMap::new())),
      counters: Arc::new(Mutex::new(Counters::default())),
      events,
      closed: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Terminal job outcomes, published as they happen.
  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
    self.events.subscribe()
  }

  /// Admits a job. Rejects synchronously when the queue is shut down or the
  /// rate limiter's window is full. Returns the job id (the request's
  /// execution id); the outcome is queryable via [JobQueue::get_job_result]
  /// once the job finishes.
  pub fn add(&self, job: JobRequest, options: JobOptions) -> Result<String> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(EngineError::QueueClosed);
    }
    if let Some(limiter) = &self.limiter
      && !limiter.try_admit()
    {
      let config = limiter.config();
      warn!(composite_id = %job.composite_id, "job rejected by rate limiter");
      return Err(EngineError::RateLimitExceeded {
        limit: config.limit,
        window_ms: config.duration_ms,
      });
    }

    let job_id = job.execution_id.clone();
    lock(&self.active).insert(job_id.clone(), job.clone());
    info!(job_id = %job_id, composite_id = %job.composite_id, priority = options.priority, "job admitted");

    let priority = if self.config.priority_enabled {
      options.priority
    } else {
      0
    };
    self.submit_attempt(job_id.clone(), job, options, 1, priority);
    Ok(job_id)
  }

  /// Enqueues one attempt of a job through the runner. Retries re-enter here
  /// as fresh tasks so they queue, pause and clear like any other job.
  fn submit_attempt(
    &self,
    job_id: String,
    job: JobRequest,
    options: JobOptions,
    attempt: u32,
    priority: i32,
  ) {
    let queue = self.clone();
    self.runner.submit(priority, async move {
      queue
        .run_attempt(job_id, job, options, attempt, priority)
        .await;
    });
  }

  /// Runs exactly one attempt. A retryable failure with budget left
  /// schedules the derived job off-slot after its backoff; everything else
  /// finishes the job.
  async fn run_attempt(
    &self,
    job_id: String,
    job: JobRequest,
    options: JobOptions,
    attempt: u32,
    priority: i32,
  ) {
    if attempt == 1 && options.delay_ms > 0 {
      sleep(Duration::from_millis(options.delay_ms)).await;
    }

    let attempts = options.attempts.max(1);
    match self.processor.process(&job).await {
      Ok(outputs) => {
        debug!(job_id = %job_id, attempt, "job attempt succeeded");
        let response = JobResponse {
          job_id: job_id.clone(),
          success: true,
          outputs,
          error: None,
          retry_count: attempt - 1,
          finished_at: Utc::now(),
        };
        self.finish_job(job_id, response, &options);
      }
      Err(err) => {
        let message = err.to_string();
        if attempt >= attempts || !err.is_retryable() {
          let error = if attempts > 1 {
            EngineError::RetryExhausted {
              attempts: attempt,
              last_error: message,
            }
            .to_string()
          } else {
            message
          };
          warn!(job_id = %job_id, attempt, error = %error, "job failed terminally");
          let response = JobResponse {
            job_id: job_id.clone(),
            success: false,
            outputs: Variables::new(),
            error: Some(error),
            retry_count: attempt - 1,
            finished_at: Utc::now(),
          };
          self.finish_job(job_id, response, &options);
          return;
        }

        let backoff = options.backoff.delay_for(attempt - 1);
        debug!(
          job_id = %job_id,
          attempt,
          backoff_ms = backoff.as_millis() as u64,
          error = %message,
          "job attempt failed, retrying"
        );
        // The retry is a derived job naming the original execution. The
        // backoff sleeps outside the runner so the concurrency slot is free
        // for other jobs; re-submission is skipped when the job was cleared
        // or the queue shut down in the meantime.
        let next = job.derive_retry();
        let queue = self.clone();
        tokio::spawn(async move {
          sleep(backoff).await;
          if !queue.is_active(&job_id) || queue.closed.load(Ordering::SeqCst) {
            debug!(job_id = %job_id, "retry dropped, job no longer active");
            return;
          }
          queue.submit_attempt(job_id, next, options, attempt + 1, priority);
        });
      }
    }
  }

  /// Stores the terminal response, updates the counters and publishes the
  /// job's terminal event.
  fn finish_job(&self, job_id: String, response: JobResponse, options: &JobOptions) {
    let success = response.success;
    let keep = if success {
      !options.remove_on_complete
    } else {
      !options.remove_on_fail
    };
    if keep {
      lock(&self.results).insert(
        job_id.clone(),
        StoredResult {
          response,
          stored_at: Instant::now(),
        },
      );
    }
    lock(&self.active).remove(&job_id);
    {
      let mut counters = lock(&self.counters);
      if success {
        counters.completed += 1;
      } else {
        counters.failed += 1;
      }
    }
    let _ = self.events.send(JobEvent { job_id, success });
  }

  /// Terminal outcome of a job, if it finished and its TTL has not elapsed.
  pub fn get_job_result(&self, job_id: &str) -> Option<JobResponse> {
    self.prune_results();
    lock(&self.results).get(job_id).map(|r| r.response.clone())
  }

  /// Waits for a job's terminal outcome. Returns `None` when the response
  /// was not stored (`remove_on_complete`/`remove_on_fail`) or already
  /// expired.
  pub async fn wait_for(&self, job_id: &str) -> Option<JobResponse> {
    let mut events = self.subscribe();
    if let Some(response) = self.get_job_result(job_id) {
      return Some(response);
    }
    // Job may have finished before we subscribed but after the check above;
    // the result map covers that window.
    loop {
      match events.recv().await {
        Ok(event) if event.job_id == job_id => return self.get_job_result(job_id),
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => {
          if let Some(response) = self.get_job_result(job_id) {
            return Some(response);
          }
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Jobs admitted but not yet finished, including queued ones.
  pub fn active_count(&self) -> usize {
    lock(&self.active).len()
  }

  /// True while the job is admitted and not yet finished.
  pub fn is_active(&self, job_id: &str) -> bool {
    lock(&self.active).contains_key(job_id)
  }

  pub fn get_metrics(&self) -> QueueMetrics {
    self.prune_results();
    let counters = lock(&self.counters);
    QueueMetrics {
      active_jobs: lock(&self.active).len(),
      pending_jobs: self.runner.pending(),
      completed_jobs: counters.completed,
      failed_jobs: counters.failed,
      queue_size: self.runner.pending() + self.runner.running(),
      rate_limit_remaining: self.limiter.as_ref().map(|l| l.remaining()),
    }
  }

  /// Stops dequeuing new jobs. In-flight jobs are never interrupted.
  pub fn pause(&self) {
    self.runner.pause();
  }

  pub fn resume(&self) {
    self.runner.resume();
  }

  pub fn is_paused(&self) -> bool {
    self.runner.is_paused()
  }

  /// Drops every not-yet-started job and the active-job bookkeeping. Jobs
  /// already executing are unaffected and still store their results.
  pub fn clear(&self) -> usize {
    let dropped = self.runner.clear();
    lock(&self.active).clear();
    info!(dropped, "queue cleared");
    dropped
  }

  /// Pause, wait for in-flight jobs to finish, then drop all stored state.
  /// The queue stays closed afterwards; further [JobQueue::add] calls return
  /// [EngineError::QueueClosed].
  pub async fn graceful_shutdown(&self) {
    info!("queue shutting down");
    self.closed.store(true, Ordering::SeqCst);
    self.runner.pause();
    self.runner.drain().await;
    self.runner.clear();
    lock(&self.active).clear();
    lock(&self.results).clear();
    lock(&self.webhooks).clear();
    info!("queue shut down");
  }

  /// Holds an out-of-band completion payload for `execution_id` until
  /// consumed or expired.
  pub fn set_webhook_response(&self, execution_id: impl Into<String>, payload: serde_json::Value) {
    self.prune_webhooks();
    lock(&self.webhooks).insert(
      execution_id.into(),
      StoredWebhook {
        payload,
        stored_at: Instant::now(),
      },
    );
  }

  /// Takes the stored webhook payload for `execution_id`, removing it.
  pub fn consume_webhook_response(&self, execution_id: &str) -> Option<serde_json::Value> {
    self.prune_webhooks();
    lock(&self.webhooks).remove(execution_id).map(|w| w.payload)
  }

  fn prune_results(&self) {
    let ttl = Duration::from_millis(self.config.result_ttl_ms);
    lock(&self.results).retain(|_, r| r.stored_at.elapsed() < ttl);
  }

  fn prune_webhooks(&self) {
    let ttl = Duration::from_millis(self.config.webhook_ttl_ms);
    lock(&self.webhooks).retain(|_, w| w.stored_at.elapsed() < ttl);
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|p| p.into_inner())
}
