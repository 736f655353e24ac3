//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the informers, the
//! work queue and the reconciler together and runs the worker pool.

use crate::cache::Listers;
use crate::client::KubeClusterClient;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::informer::Informer;
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::recorder::KubeEventRecorder;
use crate::router::NotificationRouter;
use crds::Website;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Client;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use workqueue::{default_controller_rate_limiter, WorkQueue};

/// Name of the work queue, shown in its logs
pub const QUEUE_NAME: &str = "Websites";

/// Main controller for Website resources.
pub struct Controller {
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
    listers: Listers,
    informers: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Creates the controller and starts one informer per watched kind.
    ///
    /// The informers stop when `shutdown` fires.
    pub fn new(client: Client, config: &ControllerConfig, shutdown: &CancellationToken) -> Self {
        info!("Initializing Website Controller");

        let queue = WorkQueue::with_rate_limiter(QUEUE_NAME, default_controller_rate_limiter());
        let listers = Listers::new();
        let router = Arc::new(NotificationRouter::new(queue.clone(), listers.websites.clone()));
        let namespace = config.namespace.as_deref();

        info!("Setting up event handlers");
        let informers = vec![
            tokio::spawn(
                Informer::<Website>::new(
                    client.clone(),
                    namespace,
                    listers.websites.clone(),
                    router.clone(),
                    config.resync_period,
                )
                .run(shutdown.clone()),
            ),
            tokio::spawn(
                Informer::<Deployment>::new(
                    client.clone(),
                    namespace,
                    listers.deployments.clone(),
                    router.clone(),
                    config.resync_period,
                )
                .run(shutdown.clone()),
            ),
            tokio::spawn(
                Informer::<Service>::new(
                    client.clone(),
                    namespace,
                    listers.services.clone(),
                    router,
                    config.resync_period,
                )
                .run(shutdown.clone()),
            ),
        ];

        let reconciler = Reconciler::new(
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(KubeEventRecorder::new(client, config.pod_name.clone())),
            listers.clone(),
        );

        let mut controller = Self::from_parts(queue, reconciler, listers);
        controller.informers = informers;
        controller
    }

    /// Assembles a controller from its parts without starting any informer.
    pub fn from_parts(queue: WorkQueue<String>, reconciler: Reconciler, listers: Listers) -> Self {
        Self {
            queue,
            reconciler: Arc::new(reconciler),
            listers,
            informers: Vec::new(),
        }
    }

    /// The queue feeding the workers
    #[cfg(test)]
    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Runs the controller until `shutdown` fires.
    ///
    /// Waits for the informer caches to sync, then starts `workers` workers.
    /// On shutdown the queue stops accepting keys, queued keys are drained and
    /// the call returns once every worker has exited. Failing to sync the caches
    /// within `cache_sync_timeout` is the only error.
    pub async fn run(
        self,
        workers: usize,
        cache_sync_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), ControllerError> {
        info!("Starting Website controller");

        let synced = if self.listers.has_synced() {
            Ok(())
        } else {
            info!("Waiting for informer caches to sync");
            let wait = tokio::time::timeout(cache_sync_timeout, self.listers.wait_for_sync());
            tokio::select! {
                synced = wait => synced.map_err(|elapsed| {
                    ControllerError::CacheSync(format!(
                        "caches not synced after {cache_sync_timeout:?}: {elapsed}"
                    ))
                }),
                _ = shutdown.cancelled() => Err(ControllerError::CacheSync(
                    "shutdown requested before caches synced".to_string(),
                )),
            }
        };
        if let Err(e) = synced {
            self.queue.shut_down();
            self.stop_informers().await;
            return Err(e);
        }

        info!("Starting {} workers", workers);
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(run_worker(id, self.queue.clone(), Arc::clone(&self.reconciler)));
        }
        info!("Started workers");

        shutdown.cancelled().await;
        info!("Shutting down workers");
        self.queue.shut_down();

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        self.stop_informers().await;
        info!("Website controller stopped");
        Ok(())
    }

    async fn stop_informers(self) {
        for informer in self.informers {
            if !informer.is_finished() {
                informer.abort();
            }
            if let Err(e) = informer.await {
                if !e.is_cancelled() {
                    warn!("Informer task failed: {}", e);
                }
            }
        }
    }
}

/// Processes keys until the queue is shut down and drained.
async fn run_worker(id: usize, queue: WorkQueue<String>, reconciler: Arc<Reconciler>) {
    debug!("Worker {} started", id);
    while process_next_work_item(&queue, &reconciler).await {}
    debug!("Worker {} stopped", id);
}

/// Takes one key off the queue and syncs it.
///
/// Returns `false` once the queue is shut down and empty. Successful syncs
/// reset the key's backoff; errors and panics requeue it with backoff.
pub async fn process_next_work_item(queue: &WorkQueue<String>, reconciler: &Reconciler) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    match AssertUnwindSafe(reconciler.sync(&key)).catch_unwind().await {
        Ok(Ok(outcome)) => {
            queue.forget(&key);
            match outcome {
                SyncOutcome::Synced => info!("Successfully synced '{}'", key),
                SyncOutcome::Dropped(reason) => debug!("Dropped '{}': {:?}", key, reason),
            }
        }
        Ok(Err(e)) => {
            error!("Error syncing '{}': {}, requeuing", key, e);
            queue.add_rate_limited(key.clone());
        }
        Err(panic) => {
            error!("Panic while syncing '{}': {}, requeuing", key, panic_message(&*panic));
            queue.add_rate_limited(key.clone());
        }
    }

    queue.done(&key);
    true
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
