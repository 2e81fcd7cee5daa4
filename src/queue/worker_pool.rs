//! Logical worker pool layered over the job queue.
//!
//! Workers here are bookkeeping slots, not OS threads; actual concurrency is
//! the queue's. The pool assigns each admitted job to an idle slot so load
//! and error counts can be reported per worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::Result;
use crate::types::{JobOptions, JobRequest, WorkerInfo, WorkerStatus};

use super::job_queue::JobQueue;

/// A fixed set of logical workers fed by one [JobQueue].
#[derive(Clone)]
pub struct WorkerPool {
  queue: JobQueue,
  workers: Arc<Mutex<HashMap<String, WorkerInfo>>>,
}

impl WorkerPool {
  pub fn new(queue: JobQueue, worker_count: usize) -> Self {
    let workers = (0..worker_count.max(1))
      .map(|i| {
        let id = format!("worker-{i}");
        (id.clone(), WorkerInfo::new(id))
      })
      .collect();
    info!(worker_count = worker_count.max(1), "worker pool started");
    Self {
      queue,
      workers: Arc::new(Mutex::new(workers)),
    }
  }

  pub fn queue(&self) -> &JobQueue {
    &self.queue
  }

  /// Admits a job and pins it to an idle worker slot. When every slot is
  /// busy the job still queues; it just goes unattributed.
  pub fn distribute_job(&self, job: JobRequest, options: JobOptions) -> Result<String> {
    let assigned = self.claim_idle_worker();
    // Subscribe before admission so a fast job's terminal event is not missed.
    let events = self.queue.subscribe();
    let job_id = match self.queue.add(job, options) {
      Ok(id) => id,
      Err(err) => {
        if let Some(worker_id) = assigned {
          self.unclaim_worker(&worker_id);
        }
        return Err(err);
      }
    };

    if let Some(worker_id) = assigned {
      {
        let mut workers = lock(&self.workers);
        if let Some(worker) = workers.get_mut(&worker_id) {
          worker.current_job = Some(job_id.clone());
        }
      }
      debug!(job_id = %job_id, worker_id = %worker_id, "job assigned to worker");
      self.watch(events, worker_id, job_id.clone());
    } else {
      debug!(job_id = %job_id, "no idle worker, job queued unattributed");
    }
    Ok(job_id)
  }

  /// Snapshot of every worker slot, ordered by id.
  pub fn worker_metrics(&self) -> Vec<WorkerInfo> {
    let workers = lock(&self.workers);
    let mut snapshot: Vec<WorkerInfo> = workers.values().cloned().collect();
    snapshot.sort_by(|a, b| a.id.cmp(&b.id));
    snapshot
  }

  pub fn idle_workers(&self) -> usize {
    lock(&self.workers)
      .values()
      .filter(|w| w.status == WorkerStatus::Idle)
      .count()
  }

  fn claim_idle_worker(&self) -> Option<String> {
    let mut workers = lock(&self.workers);
    let mut ids: Vec<&String> = workers
      .iter()
      .filter(|(_, w)| w.status == WorkerStatus::Idle)
      .map(|(id, _)| id)
      .collect();
    ids.sort();
    let id = ids.first().map(|s| (*s).clone())?;
    if let Some(worker) = workers.get_mut(&id) {
      worker.status = WorkerStatus::Busy;
    }
    Some(id)
  }

  /// Resolves a slot whose event stream lagged. Releases the slot when the
  /// watched job demonstrably finished, counting the stored outcome when one
  /// survives. Returns false while the job is still in flight.
  pub(crate) fn reconcile_worker(&self, worker_id: &str, job_id: &str) -> bool {
    if let Some(result) = self.queue.get_job_result(job_id) {
      self.release_worker(worker_id, result.success);
      return true;
    }
    if !self.queue.is_active(job_id) {
      // Finished without a stored response; free the slot uncounted.
      self.unclaim_worker(worker_id);
      return true;
    }
    false
  }

  /// Resets a claimed slot without counting an outcome. Used when admission
  /// itself fails.
  fn unclaim_worker(&self, worker_id: &str) {
    let mut workers = lock(&self.workers);
    if let Some(worker) = workers.get_mut(worker_id) {
      worker.status = WorkerStatus::Idle;
      worker.current_job = None;
    }
  }

  fn release_worker(&self, worker_id: &str, success: bool) {
    let mut workers = lock(&self.workers);
    if let Some(worker) = workers.get_mut(worker_id) {
      worker.status = WorkerStatus::Idle;
      worker.current_job = None;
      if success {
        worker.processed_count += 1;
      } else {
        worker.error_count += 1;
      }
    }
  }

  /// Frees the worker slot once the job's terminal event arrives.
  fn watch(
    &self,
    mut events: tokio::sync::broadcast::Receiver<super::JobEvent>,
    worker_id: String,
    job_id: String,
  ) {
    let pool = self.clone();
    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(event) if event.job_id == job_id => {
            pool.release_worker(&worker_id, event.success);
            return;
          }
          Ok(_) => continue,
          Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
            // The terminal event may have been among the dropped ones.
            if pool.reconcile_worker(&worker_id, &job_id) {
              return;
            }
          }
          Err(tokio::sync::broadcast::error::RecvError::Closed) => {
            pool.release_worker(&worker_id, false);
            return;
          }
        }
      }
    });
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|p| p.into_inner())
}
