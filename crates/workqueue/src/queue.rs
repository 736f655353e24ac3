//! Deduplicating work queue.
//!
//! Items move through three sets:
//! - `queue`: ordered items waiting to be handed out
//! - `dirty`: items that need processing (superset of `queue`)
//! - `processing`: items handed out by [`WorkQueue::get`] and not yet [`WorkQueue::done`]
//!
//! An item that is added while it is being processed stays dirty and is queued
//! again when the worker calls `done`, so no two workers ever hold the same item.

use crate::rate_limiter::{RateLimiter, default_controller_rate_limiter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    /// Items scheduled by `add_after`, keyed to their earliest ready time
    waiting: HashMap<T, Instant>,
    shutting_down: bool,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            waiting: HashMap::new(),
            shutting_down: false,
        }
    }
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<T>>,
}

/// A rate-limited, deduplicating FIFO of work items.
///
/// Cloning the queue yields another handle to the same queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Creates a named queue using the default controller rate limiter.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, default_controller_rate_limiter())
    }

    /// Creates a named queue with a custom rate limiter.
    pub fn with_rate_limiter(
        name: impl Into<String>,
        rate_limiter: impl RateLimiter<T> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
            }),
        }
    }

    /// Name of the queue, used in logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Marks `item` as needing processing.
    ///
    /// Adding an item that is already queued is a no-op. Adding an item that is
    /// being processed defers it until the current holder calls [`done`](Self::done).
    /// Ignored once the queue is shutting down.
    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            debug!(queue = %self.inner.name, ?item, "Dropping add on shut down queue");
            return;
        }
        if state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `item` once `delay` has elapsed.
    ///
    /// If the item is already waiting with an earlier ready time the call is a no-op.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let ready_at = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&item) {
                Some(existing) if *existing <= ready_at => return,
                _ => {
                    state.waiting.insert(item.clone(), ready_at);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            {
                let mut state = queue.inner.state.lock();
                // A later add_after with an earlier deadline owns the item now
                if state.waiting.get(&item) != Some(&ready_at) {
                    return;
                }
                state.waiting.remove(&item);
            }
            queue.add(item);
        });
    }

    /// Adds `item` after the delay the rate limiter assigns to it.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.inner.rate_limiter.when(&item);
        debug!(queue = %self.inner.name, ?item, ?delay, "Requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Clears the rate limiter's failure history for `item`.
    pub fn forget(&self, item: &T) {
        self.inner.rate_limiter.forget(item);
    }

    /// Number of times `item` has been requeued since it was last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.rate_limiter.num_requeues(item)
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue is shut down and holds no more items.
    /// The returned item is in flight until [`done`](Self::done) is called for it.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting the state so a concurrent add or
            // shutdown cannot slip between the check and the wait
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on in case we consumed it for another waiter
                        self.inner.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks `item` as no longer being processed.
    ///
    /// If it was added again while in flight it goes back on the queue.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops accepting new items and wakes every waiting [`get`](Self::get).
    ///
    /// Items already queued are still handed out; `get` returns `None` once they
    /// are gone.
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
        }
        info!(queue = %self.inner.name, "Shutting down work queue");
        self.inner.notify.notify_waiters();
    }

    /// Whether [`shut_down`](Self::shut_down) has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether no items are waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
