//! Informers.
//!
//! Each informer watches one resource kind, mirrors it into an [`ObjectCache`]
//! and forwards every change to a [`ResourceEventHandler`]. Deletions observed
//! only through a relist are reported like any other deletion, and a periodic
//! resync re-delivers every cached object as an update.

use crate::cache::ObjectCache;
use crate::error::ControllerError;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::watcher::{self, watcher, Event};
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives the changes an informer observes.
///
/// Handlers run on the informer task and must not block.
pub trait ResourceEventHandler<K>: Send + Sync {
    /// An object appeared
    fn on_add(&self, obj: &K);
    /// An object changed; also called with `old == new` on resync
    fn on_update(&self, old: &K, new: &K);
    /// An object disappeared; `obj` is its last known state
    fn on_delete(&self, obj: &K);
}

/// Applies watch events to the cache and notifies the handler.
pub struct EventDispatcher<K> {
    kind: &'static str,
    cache: ObjectCache<K>,
    handler: Arc<dyn ResourceEventHandler<K>>,
    relist: Option<Vec<K>>,
}

impl<K> EventDispatcher<K>
where
    K: Resource + Clone,
{
    /// Dispatcher feeding `cache` and `handler`
    pub fn new(
        kind: &'static str,
        cache: ObjectCache<K>,
        handler: Arc<dyn ResourceEventHandler<K>>,
    ) -> Self {
        Self {
            kind,
            cache,
            handler,
            relist: None,
        }
    }

    /// Processes one watch event.
    pub fn handle_event(&mut self, event: Event<K>) {
        match event {
            Event::Init => {
                debug!("{} relist started", self.kind);
                self.relist = Some(Vec::new());
            }
            Event::InitApply(obj) => match self.relist.as_mut() {
                Some(buffer) => buffer.push(obj),
                None => self.apply(obj),
            },
            Event::InitDone => {
                let objects = self.relist.take().unwrap_or_default();
                let diff = self.cache.replace(objects);
                for obj in &diff.added {
                    self.handler.on_add(obj);
                }
                for (old, new) in &diff.updated {
                    self.handler.on_update(old, new);
                }
                for obj in &diff.deleted {
                    debug!("{} {} disappeared during relist", self.kind, obj.name_any());
                    self.handler.on_delete(obj);
                }
                if self.cache.is_empty() {
                    debug!("{} relist returned no objects", self.kind);
                }
                if !self.cache.has_synced() {
                    info!("{} cache synced with {} objects", self.kind, self.cache.len());
                }
                self.cache.mark_synced();
            }
            Event::Apply(obj) => self.apply(obj),
            Event::Delete(obj) => {
                debug!("{} deleted: {}", self.kind, obj.name_any());
                self.cache.remove(&obj);
                self.handler.on_delete(&obj);
            }
        }
    }

    /// Re-delivers every cached object as an update to itself.
    pub fn resync(&self) {
        if !self.cache.has_synced() {
            return;
        }
        let objects = self.cache.snapshot();
        debug!("Resyncing {} {} objects", objects.len(), self.kind);
        for obj in &objects {
            self.handler.on_update(obj, obj);
        }
    }

    fn apply(&self, obj: K) {
        match self.cache.apply(obj) {
            Some((new, Some(old))) => {
                debug!("{} updated: {}", self.kind, new.name_any());
                self.handler.on_update(&old, &new);
            }
            Some((new, None)) => {
                debug!("{} added: {}", self.kind, new.name_any());
                self.handler.on_add(&new);
            }
            None => warn!("Ignoring {} without a name", self.kind),
        }
    }
}

/// Watches one resource kind until cancelled.
pub struct Informer<K>
where
    K: Resource,
{
    api: Api<K>,
    dispatcher: EventDispatcher<K>,
    resync_period: Option<Duration>,
}

impl<K> Informer<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    /// Informer over `namespace`, or every namespace when `None`.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        cache: ObjectCache<K>,
        handler: Arc<dyn ResourceEventHandler<K>>,
        resync_period: Option<Duration>,
    ) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let kind = match K::kind(&()) {
            std::borrow::Cow::Borrowed(kind) => kind,
            std::borrow::Cow::Owned(_) => "object",
        };
        Self {
            api,
            dispatcher: EventDispatcher::new(kind, cache, handler),
            resync_period,
        }
    }

    /// Runs the watch loop until `shutdown` fires.
    ///
    /// Watch failures are retried with backoff; the cache keeps serving its
    /// last known state in the meantime.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let kind = self.dispatcher.kind;
        info!("Starting {} informer", kind);

        let mut stream =
            Box::pin(watcher(self.api.clone(), watcher::Config::default()).default_backoff());
        let mut resync = self.resync_period.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = next_tick(&mut resync) => self.dispatcher.resync(),
                next = stream.next() => match next {
                    Some(Ok(event)) => self.dispatcher.handle_event(event),
                    Some(Err(e)) => warn!("{}", ControllerError::Watch(format!("{kind}: {e}"))),
                    None => {
                        warn!("{} watch stream ended", kind);
                        break;
                    }
                },
            }
        }

        info!("{} informer stopped", kind);
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
