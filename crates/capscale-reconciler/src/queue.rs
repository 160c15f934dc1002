//! Deduplicating work queue keyed by resource id.
//!
//! A key is either absent, pending (queued), processing, or processing
//! with a pending re-run. Adding a key that is already pending is a
//! no-op; adding a key while it is processing marks it for exactly one
//! re-run once `done()` is called.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use capscale_core::ResourceId;

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed to a worker, in FIFO order.
    queue: VecDeque<ResourceId>,
    /// Keys that need processing (queued, or waiting for the running pass).
    dirty: HashSet<ResourceId>,
    /// Keys currently held by a worker.
    processing: HashSet<ResourceId>,
    /// Delayed requeues: key → (timer id, task).
    timers: HashMap<ResourceId, (u64, JoinHandle<()>)>,
    next_timer_id: u64,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true if a worker should be woken.
    fn add(&mut self, key: ResourceId) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            // Re-queued by `done()`.
            return false;
        }
        self.queue.push_back(key);
        true
    }
}

/// Work queue shared by the dispatcher and its workers.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueue a key, collapsing duplicates.
    pub async fn add(&self, key: impl Into<ResourceId>) {
        let wake = self.state.lock().await.add(key.into());
        if wake {
            self.notify.notify_one();
        }
    }

    /// Enqueue a key after `delay`. A newer delayed add for the same key
    /// replaces the older one.
    pub async fn add_after(self: &Arc<Self>, key: impl Into<ResourceId>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        state.next_timer_id += 1;
        let timer_id = state.next_timer_id;

        let queue = Arc::clone(self);
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.fire_timer(timer_key, timer_id).await;
        });

        if let Some((_, old)) = state.timers.insert(key.clone(), (timer_id, handle)) {
            old.abort();
        }
        debug!(resource = %key, delay_ms = delay.as_millis() as u64, "requeue scheduled");
    }

    async fn fire_timer(&self, key: ResourceId, timer_id: u64) {
        let wake = {
            let mut state = self.state.lock().await;
            match state.timers.get(&key) {
                Some((id, _)) if *id == timer_id => {
                    state.timers.remove(&key);
                }
                // Replaced by a newer timer.
                _ => return,
            }
            state.add(key)
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ResourceId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent add cannot be missed.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key returned by `get()` as finished.
    pub async fn done(&self, key: &str) {
        let wake = {
            let mut state = self.state.lock().await;
            state.processing.remove(key);
            if !state.shutting_down && state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Stop handing out work and cancel every delayed requeue.
    pub async fn shut_down(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        for (_, (_, handle)) in state.timers.drain() {
            handle.abort();
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Number of keys ready for a worker.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Number of delayed requeues still pending.
    pub async fn pending_timers(&self) -> usize {
        self.state.lock().await.timers.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a worker currently holds the key.
    #[cfg(test)]
    pub(crate) async fn is_processing(&self, key: &str) -> bool {
        self.state.lock().await.processing.contains(key)
    }
}
