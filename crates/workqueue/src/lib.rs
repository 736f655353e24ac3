//! Work Queue
//!
//! A deduplicating, rate-limited work queue for level-triggered controllers.
//!
//! Watch notifications are reduced to object keys and added to the queue;
//! workers take keys off the queue, reconcile them, and report back:
//!
//! ```no_run
//! use workqueue::WorkQueue;
//!
//! # async fn example() {
//! let queue: WorkQueue<String> = WorkQueue::new("Websites");
//! queue.add("default/site".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     let succeeded = true; // reconcile `key` here
//!     if succeeded {
//!         queue.forget(&key);
//!     } else {
//!         queue.add_rate_limited(key.clone());
//!     }
//!     queue.done(&key);
//! }
//! # }
//! ```
//!
//! # Guarantees
//!
//! - An item is queued at most once, no matter how often it is added
//! - An item is handed to at most one worker at a time
//! - Failed items back off exponentially per item, bounded by an overall token bucket

pub mod queue;
pub mod rate_limiter;

pub use queue::WorkQueue;
pub use rate_limiter::{
    BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
    default_controller_rate_limiter,
};
