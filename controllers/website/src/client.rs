//! Cluster write client.
//!
//! The reconciler only reads through the caches; every write goes through the
//! [`ClusterClient`] trait so tests can substitute an in-memory fake.

use crate::error::ControllerError;
use crds::{Website, WebsiteStatus};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Write operations the reconciler performs against the cluster.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a Deployment in its own namespace
    async fn create_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError>;

    /// Replace an existing Deployment
    async fn replace_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError>;

    /// Create a Service in its own namespace
    async fn create_service(&self, service: &Service) -> Result<Service, ControllerError>;

    /// Write the status subresource of a Website
    async fn update_website_status(
        &self,
        website: &Website,
        status: &WebsiteStatus,
    ) -> Result<Website, ControllerError>;
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Creates a client sharing `client`'s connection pool
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String, ControllerError> {
        obj.namespace().ok_or_else(|| {
            ControllerError::Reconciliation(format!("{} has no namespace", obj.name_any()))
        })
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        let namespace = Self::namespace_of(deployment)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Creating Deployment {}", deployment.name_any());
        Ok(api.create(&PostParams::default(), deployment).await?)
    }

    async fn replace_deployment(
        &self,
        deployment: &Deployment,
    ) -> Result<Deployment, ControllerError> {
        let namespace = Self::namespace_of(deployment)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        debug!("Replacing Deployment {}", deployment.name_any());
        Ok(api
            .replace(&deployment.name_any(), &PostParams::default(), deployment)
            .await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ControllerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &Self::namespace_of(service)?);
        debug!("Creating Service {}", service.name_any());
        Ok(api.create(&PostParams::default(), service).await?)
    }

    async fn update_website_status(
        &self,
        website: &Website,
        status: &WebsiteStatus,
    ) -> Result<Website, ControllerError> {
        let api: Api<Website> = Api::namespaced(self.client.clone(), &Self::namespace_of(website)?);
        let patch = json!({ "status": status });
        debug!("Updating Website {} status: {}", website.name_any(), patch);
        Ok(api
            .patch_status(&website.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
