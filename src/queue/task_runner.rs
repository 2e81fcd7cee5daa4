//! Concurrency-bounded cooperative task runner with priority ordering.
//!
//! The queue feeds boxed futures in here; the runner keeps at most
//! `max_concurrency` of them in flight and dequeues the rest
//! priority-then-arrival. Pausing stops dequeuing only; in-flight tasks are
//! never interrupted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedTask {
  priority: i32,
  seq: u64,
  future: TaskFuture,
}

impl PartialEq for QueuedTask {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority && self.seq == other.seq
  }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueuedTask {
  // Max-heap: higher priority first, earlier arrival first within a priority.
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .priority
      .cmp(&other.priority)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct RunnerState {
  queue: BinaryHeap<QueuedTask>,
  running: usize,
  paused: bool,
  next_seq: u64,
}

struct RunnerInner {
  state: Mutex<RunnerState>,
  max_concurrency: usize,
  idle: Notify,
}

/// Shared handle to one task runner. Cloning shares the same queue.
#[derive(Clone)]
pub struct TaskRunner {
  inner: Arc<RunnerInner>,
}

impl TaskRunner {
  pub fn new(max_concurrency: usize) -> Self {
    Self {
      inner: Arc::new(RunnerInner {
        state: Mutex::new(RunnerState {
          queue: BinaryHeap::new(),
          running: 0,
          paused: false,
          next_seq: 0,
        }),
        max_concurrency: max_concurrency.max(1),
        idle: Notify::new(),
      }),
    }
  }

  /// Enqueues a task. It starts as soon as a concurrency slot frees up and
  /// nothing with higher priority is waiting.
  pub fn submit<F>(&self, priority: i32, future: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    {
      let mut state = self.lock();
      let seq = state.next_seq;
      state.next_seq += 1;
      state.queue.push(QueuedTask {
        priority,
        seq,
        future: Box::pin(future),
      });
    }
    self.dispatch();
  }

  /// Stops dequeuing. In-flight tasks keep running.
  pub fn pause(&self) {
    self.lock().paused = true;
    debug!("task runner paused");
  }

  pub fn resume(&self) {
    self.lock().paused = false;
    debug!("task runner resumed");
    self.dispatch();
  }

  pub fn is_paused(&self) -> bool {
    self.lock().paused
  }

  /// Drops every not-yet-started task; returns how many were dropped.
  /// Tasks already executing are unaffected.
  pub fn clear(&self) -> usize {
    let mut state = self.lock();
    let dropped = state.queue.len();
    state.queue.clear();
    dropped
  }

  pub fn pending(&self) -> usize {
    self.lock().queue.len()
  }

  pub fn running(&self) -> usize {
    self.lock().running
  }

  /// Waits until no task is in flight. Queued-but-unstarted tasks are not
  /// waited for; pause first to keep them from starting.
  pub async fn drain(&self) {
    loop {
      let notified = self.inner.idle.notified();
      if self.lock().running == 0 {
        return;
      }
      notified.await;
    }
  }

  fn dispatch(&self) {
    loop {
      let task = {
        let mut state = self.lock();
        if state.paused || state.running >= self.inner.max_concurrency {
          return;
        }
        match state.queue.pop() {
          Some(task) => {
            state.running += 1;
            task
          }
          None => return,
        }
      };
      let runner = self.clone();
      tokio::spawn(async move {
        task.future.await;
        let now_idle = {
          let mut state = runner.lock();
          state.running -= 1;
          state.running == 0
        };
        if now_idle {
          runner.inner.idle.notify_waiters();
        }
        runner.dispatch();
      });
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RunnerState> {
    self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
  }
}
