//! Sliding-window rate limiter for queue admission.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// At most `limit` admissions per `duration_ms` sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
  pub limit: usize,
  pub duration_ms: u64,
}

/// Tracks admission timestamps and rejects synchronously once the window is
/// full. Admission never suspends; a denied request is denied now.
pub struct SlidingWindowLimiter {
  config: RateLimitConfig,
  admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
  pub fn new(config: RateLimitConfig) -> Self {
    Self {
      config,
      admitted: Mutex::new(VecDeque::new()),
    }
  }

  pub fn config(&self) -> RateLimitConfig {
    self.config
  }

  /// Admits the request iff fewer than `limit` admissions happened in the
  /// last `duration_ms`. An admitted request consumes one slot.
  pub fn try_admit(&self) -> bool {
    self.try_admit_at(Instant::now())
  }

  /// Remaining admissions in the current window.
  pub fn remaining(&self) -> usize {
    let mut admitted = self.lock();
    Self::prune(&mut admitted, self.config, Instant::now());
    self.config.limit.saturating_sub(admitted.len())
  }

  fn try_admit_at(&self, now: Instant) -> bool {
    let mut admitted = self.lock();
    Self::prune(&mut admitted, self.config, now);
    if admitted.len() >= self.config.limit {
      return false;
    }
    admitted.push_back(now);
    true
  }

  fn prune(admitted: &mut VecDeque<Instant>, config: RateLimitConfig, now: Instant) {
    let window = Duration::from_millis(config.duration_ms);
    while let Some(&oldest) = admitted.front() {
      if now.duration_since(oldest) >= window {
        admitted.pop_front();
      } else {
        break;
      }
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
    self.admitted.lock().unwrap_or_else(|p| p.into_inner())
  }
}
