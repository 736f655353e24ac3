//! Notification routing.
//!
//! Turns informer notifications into work-queue keys. Website changes enqueue
//! the website itself; Deployment and Service changes enqueue the Website that
//! controls them, if any.

use crate::cache::{ObjectCache, ObjectKey};
use crate::informer::ResourceEventHandler;
use crate::resources::controller_of;
use crds::Website;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use tracing::debug;
use workqueue::WorkQueue;

/// Enqueues the owning Website for every relevant notification.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    queue: WorkQueue<String>,
    websites: ObjectCache<Website>,
}

impl NotificationRouter {
    /// Router feeding `queue`, resolving owners through `websites`
    pub fn new(queue: WorkQueue<String>, websites: ObjectCache<Website>) -> Self {
        Self { queue, websites }
    }

    fn enqueue_website(&self, website: &Website) {
        match ObjectKey::from_object(website) {
            Some(key) => self.queue.add(key.to_string()),
            None => debug!("Ignoring Website without a name"),
        }
    }

    /// Enqueues the Website controlling `obj`, if it is controlled by one that
    /// still exists in the cache.
    fn enqueue_owner<K: Resource<DynamicType = ()>>(&self, obj: &K) {
        let Some(owner) = controller_of(obj.meta()) else {
            return;
        };
        if owner.kind != Website::kind(&()) {
            return;
        }

        let namespace = obj.namespace().unwrap_or_default();
        match self.websites.get(&namespace, &owner.name) {
            Some(website) => {
                debug!(
                    "Processing {} {}/{} owned by Website {}",
                    K::kind(&()),
                    namespace,
                    obj.name_any(),
                    owner.name
                );
                self.enqueue_website(&website);
            }
            None => debug!(
                "Ignoring orphaned {} {}/{} of Website {}",
                K::kind(&()),
                namespace,
                obj.name_any(),
                owner.name
            ),
        }
    }

    /// Update filter for owned objects: a notification that carries the same
    /// resource version as before is a resync and changes nothing.
    fn owned_updated<K: Resource<DynamicType = ()>>(&self, old: &K, new: &K) {
        if old.resource_version().is_some() && old.resource_version() == new.resource_version() {
            return;
        }
        self.enqueue_owner(new);
    }
}

impl ResourceEventHandler<Website> for NotificationRouter {
    fn on_add(&self, obj: &Website) {
        self.enqueue_website(obj);
    }

    fn on_update(&self, _old: &Website, new: &Website) {
        self.enqueue_website(new);
    }

    /// Nothing to clean up: owned objects are garbage collected through their
    /// owner references.
    fn on_delete(&self, obj: &Website) {
        debug!("Website {} deleted", obj.name_any());
    }
}

impl ResourceEventHandler<Deployment> for NotificationRouter {
    fn on_add(&self, obj: &Deployment) {
        self.enqueue_owner(obj);
    }

    fn on_update(&self, old: &Deployment, new: &Deployment) {
        self.owned_updated(old, new);
    }

    fn on_delete(&self, obj: &Deployment) {
        self.enqueue_owner(obj);
    }
}

impl ResourceEventHandler<Service> for NotificationRouter {
    fn on_add(&self, obj: &Service) {
        self.enqueue_owner(obj);
    }

    fn on_update(&self, old: &Service, new: &Service) {
        self.owned_updated(old, new);
    }

    fn on_delete(&self, obj: &Service) {
        self.enqueue_owner(obj);
    }
}
