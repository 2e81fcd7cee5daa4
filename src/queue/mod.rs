//! Job queue and worker pool: admission, priority, rate limiting, retry with
//! backoff, result caching and logical worker distribution.

mod job_queue;
mod rate_limiter;
mod task_runner;
mod worker_pool;

pub use job_queue::{JobEvent, JobProcessor, JobQueue, QueueConfig, QueueMetrics};
pub use rate_limiter::{RateLimitConfig, SlidingWindowLimiter};
pub use task_runner::TaskRunner;
pub use worker_pool::WorkerPool;
