//! Test utilities for unit testing the reconciler and controller
//!
//! This module provides fixture builders plus in-memory implementations of
//! [`ClusterClient`] and [`EventSink`].

use crate::cache::Listers;
use crate::client::ClusterClient;
use crate::error::ControllerError;
use crate::recorder::{EventKind, EventSink};
use crate::resources::new_deployment;
use crds::{Website, WebsiteSpec, WebsiteStatus};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Helper to create a test Website with a uid and resource version
pub fn create_test_website(
    name: &str,
    namespace: &str,
    deployment_name: &str,
    replicas: Option<i32>,
) -> Website {
    Website {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: WebsiteSpec {
            git_repo: format!("https://github.com/example/{name}.git"),
            replicas,
            deployment_name: deployment_name.to_string(),
        },
        status: None,
    }
}

/// Helper to set a Website's status
pub fn with_status(mut website: Website, available_replicas: i32) -> Website {
    website.status = Some(WebsiteStatus { available_replicas });
    website
}

/// Controller owner reference pointing at something other than a Website
pub fn foreign_owner_ref() -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "ReplicaSet".to_string(),
        name: "someone-else".to_string(),
        uid: "uid-someone-else".to_string(),
        controller: Some(true),
        block_owner_deletion: None,
    }
}

/// Helper to set the resource version of any object
pub fn with_resource_version<K: Resource>(mut obj: K, resource_version: &str) -> K {
    obj.meta_mut().resource_version = Some(resource_version.to_string());
    obj
}

/// Deployment owned by `website` as the API server would report it
pub fn owned_deployment(
    website: &Website,
    replicas: Option<i32>,
    available_replicas: Option<i32>,
) -> Deployment {
    let mut deployment = with_resource_version(new_deployment(website), "10");
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = replicas;
    }
    deployment.status = available_replicas.map(|available| DeploymentStatus {
        available_replicas: Some(available),
        ..Default::default()
    });
    deployment
}

/// Deployment with the name `website` expects, controlled by something else
pub fn foreign_deployment(website: &Website) -> Deployment {
    let mut deployment = owned_deployment(website, Some(1), Some(1));
    deployment.metadata.owner_references = Some(vec![foreign_owner_ref()]);
    deployment
}

/// Synced caches seeded with the given objects
pub fn seeded_listers(
    websites: &[Website],
    deployments: &[Deployment],
    services: &[Service],
) -> Listers {
    let listers = Listers::new();
    for website in websites {
        listers.websites.apply(website.clone());
    }
    for deployment in deployments {
        listers.deployments.apply(deployment.clone());
    }
    for service in services {
        listers.services.apply(service.clone());
    }
    listers.websites.mark_synced();
    listers.deployments.mark_synced();
    listers.services.mark_synced();
    listers
}

/// A write issued through [`MockClusterClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    CreateDeployment(Deployment),
    ReplaceDeployment(Deployment),
    CreateService(Service),
    UpdateWebsiteStatus { website: String, status: WebsiteStatus },
}

/// The write operations of [`ClusterClient`], for targeted failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    CreateDeployment,
    ReplaceDeployment,
    CreateService,
    UpdateWebsiteStatus,
}

impl ClientCall {
    /// Operation this call performed
    pub fn kind(&self) -> CallKind {
        match self {
            ClientCall::CreateDeployment(_) => CallKind::CreateDeployment,
            ClientCall::ReplaceDeployment(_) => CallKind::ReplaceDeployment,
            ClientCall::CreateService(_) => CallKind::CreateService,
            ClientCall::UpdateWebsiteStatus { .. } => CallKind::UpdateWebsiteStatus,
        }
    }
}

/// Mock ClusterClient for testing
///
/// Records every call. Optionally mirrors successful writes into a set of
/// caches, standing in for the informers observing them.
#[derive(Clone, Default)]
pub struct MockClusterClient {
    calls: Arc<Mutex<Vec<ClientCall>>>,
    failures_remaining: Arc<Mutex<usize>>,
    failing: Arc<Mutex<HashSet<CallKind>>>,
    mirror: Option<Listers>,
    next_version: Arc<AtomicU64>,
}

impl MockClusterClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock client whose writes show up in `listers`
    pub fn mirroring(listers: Listers) -> Self {
        Self {
            mirror: Some(listers),
            ..Self::default()
        }
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: usize) {
        *self.failures_remaining.lock().unwrap() = count;
    }

    /// Fail every call of `kind` with a transient error
    pub fn fail_on(&self, kind: CallKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget the calls made so far
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: ClientCall) -> Result<(), ControllerError> {
        if self.failing.lock().unwrap().contains(&call.kind()) {
            return Err(ControllerError::Reconciliation(format!(
                "injected {:?} failure",
                call.kind()
            )));
        }
        let mut failures = self.failures_remaining.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(ControllerError::Reconciliation("injected failure".to_string()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn stored<K: Resource>(&self, obj: &K) -> K
    where
        K: Clone,
    {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 100;
        let mut stored = with_resource_version(obj.clone(), &version.to_string());
        if stored.meta().uid.is_none() {
            stored.meta_mut().uid = Some(format!("uid-{}", stored.name_any()));
        }
        stored
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClusterClient {
    async fn create_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        self.record(ClientCall::CreateDeployment(deployment.clone()))?;
        let stored = self.stored(deployment);
        if let Some(listers) = &self.mirror {
            listers.deployments.apply(stored.clone());
        }
        Ok(stored)
    }

    async fn replace_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        self.record(ClientCall::ReplaceDeployment(deployment.clone()))?;
        let mut stored = self.stored(deployment);
        // The API server keeps the status of the object being replaced
        if let Some(listers) = &self.mirror {
            let namespace = deployment.namespace().unwrap_or_default();
            if let Some(current) = listers.deployments.get(&namespace, &deployment.name_any()) {
                stored.status = current.status.clone();
            }
            listers.deployments.apply(stored.clone());
        }
        Ok(stored)
    }

    async fn create_service(
        &self,
        service: &Service,
    ) -> Result<Service, ControllerError> {
        self.record(ClientCall::CreateService(service.clone()))?;
        let stored = self.stored(service);
        if let Some(listers) = &self.mirror {
            listers.services.apply(stored.clone());
        }
        Ok(stored)
    }

    async fn update_website_status(
        &self,
        website: &Website,
        status: &WebsiteStatus,
    ) -> Result<Website, ControllerError> {
        self.record(ClientCall::UpdateWebsiteStatus {
            website: website.name_any(),
            status: status.clone(),
        })?;
        let mut stored = self.stored(website);
        stored.status = Some(status.clone());
        if let Some(listers) = &self.mirror {
            listers.websites.apply(stored.clone());
        }
        Ok(stored)
    }
}

/// ClusterClient that panics on every call
pub struct PanickingClient;

#[async_trait::async_trait]
impl ClusterClient for PanickingClient {
    async fn create_deployment(
        &self,
        _deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        panic!("create_deployment exploded");
    }

    async fn replace_deployment(
        &self,
        _deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        panic!("replace_deployment exploded");
    }

    async fn create_service(
        &self,
        _service: &Service,
    ) -> Result<Service, ControllerError> {
        panic!("create_service exploded");
    }

    async fn update_website_status(
        &self,
        _website: &Website,
        _status: &WebsiteStatus,
    ) -> Result<Website, ControllerError> {
        panic!("update_website_status exploded");
    }
}

/// An event recorded through [`MockEventSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub website: String,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

/// Mock EventSink for testing
#[derive(Clone, Default)]
pub struct MockEventSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MockEventSink {
    /// Create a new mock sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events recorded with the given severity
    pub fn events_of(&self, kind: EventKind) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}

impl EventSink for MockEventSink {
    fn record(&self, website: &Website, kind: EventKind, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            website: website.name_any(),
            kind,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
