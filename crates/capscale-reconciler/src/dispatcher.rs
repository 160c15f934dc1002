//! Dispatcher — fans store notifications and periodic resyncs out to a
//! fixed pool of reconciliation workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use capscale_core::{DesiredStateStore, EngineConfig};

use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};

/// Runs the reconciliation engine until shutdown.
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn DesiredStateStore>,
    queue: Arc<WorkQueue>,
    workers: usize,
    resync_period: Duration,
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn DesiredStateStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            reconciler,
            store,
            queue: WorkQueue::new(),
            workers: config.workers.max(1),
            resync_period: config.sync_period,
        }
    }

    /// The queue feeding the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Enqueue every resource the store knows about.
    pub async fn resync(&self) {
        match self.store.list_resources().await {
            Ok(ids) => {
                debug!(resources = ids.len(), "resync");
                for id in ids {
                    self.queue.add(id).await;
                }
            }
            Err(e) => warn!(error = %e, "resync failed to list resources"),
        }
    }

    /// Run until `shutdown` flips. In-flight passes are allowed to finish;
    /// queued keys and pending requeue timers are dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.workers,
            resync_secs = self.resync_period.as_secs(),
            "dispatcher started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&self.queue);
            workers.spawn(run_worker(worker_id, reconciler, queue));
        }

        let mut notifications = self.store.subscribe();
        let mut subscribed = true;
        let mut resync = tokio::time::interval(self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = resync.tick() => self.resync().await,
                received = notifications.recv(), if subscribed => match received {
                    Ok(id) => {
                        debug!(resource = %id, "change notification");
                        self.queue.add(id).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "notifications dropped, resyncing");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("notification stream closed, relying on periodic resync");
                        subscribed = false;
                    }
                },
                _ = shutdown.changed() => {
                    let queued = self.queue.len().await;
                    let pending_timers = self.queue.pending_timers().await;
                    info!(
                        queued,
                        pending_timers,
                        "dispatcher shutting down, dropping queued work"
                    );
                    break;
                }
            }
        }

        self.queue.shut_down().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "reconcile worker panicked");
            }
        }
        info!("dispatcher stopped");
    }
}

async fn run_worker(worker_id: usize, reconciler: Arc<Reconciler>, queue: Arc<WorkQueue>) {
    debug!(worker_id, "reconcile worker started");
    while let Some(key) = queue.get().await {
        let action = match reconciler.reconcile(&key).await {
            Ok(action) => action,
            Err(e) => reconciler.error_policy(&key, &e).await,
        };
        queue.done(&key).await;
        if let Action::Requeue(delay) = action {
            queue.add_after(key, delay).await;
        }
    }
    debug!(worker_id, "reconcile worker stopped");
}
