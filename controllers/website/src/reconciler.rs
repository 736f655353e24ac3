//! Website reconciliation.
//!
//! [`Reconciler::sync`] drives one Website towards its desired state: a
//! NodePort Service and an nginx Deployment owned by the Website, with the
//! Deployment's available replica count reflected in the Website status.
//! State is read from the informer caches; writes go through [`ClusterClient`].

use crate::cache::{Listers, ObjectKey};
use crate::client::ClusterClient;
use crate::error::ControllerError;
use crate::recorder::{
    message_resource_exists, EventKind, EventSink, ERR_RESOURCE_EXISTS, MESSAGE_RESOURCE_SYNCED,
    SUCCESS_SYNCED,
};
use crate::resources::{is_controlled_by, new_deployment, new_service};
use crds::{Website, WebsiteStatus};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Why a key was dropped without further retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Key does not split into namespace and name
    InvalidKey,
    /// Website no longer exists
    WebsiteNotFound,
    /// Website does not name its Deployment
    MissingDeploymentName,
    /// Deployment exists but is controlled by something else
    DeploymentNotOwned,
}

/// Result of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Website converged
    Synced,
    /// Nothing to do for this key, and retrying would not change that
    Dropped(DropReason),
}

/// Reconciles Websites.
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    recorder: Arc<dyn EventSink>,
    listers: Listers,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        recorder: Arc<dyn EventSink>,
        listers: Listers,
    ) -> Self {
        Self {
            client,
            recorder,
            listers,
        }
    }

    /// Compares the actual state with the desired state for the Website
    /// identified by `key` (`<namespace>/<name>`) and converges the two.
    ///
    /// Errors are transient and the caller should retry the key later.
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome, ControllerError> {
        let key: ObjectKey = match key.parse() {
            Ok(key) => key,
            Err(e) => {
                error!("{}", e);
                return Ok(SyncOutcome::Dropped(DropReason::InvalidKey));
            }
        };

        let Some(website) = self.listers.websites.get_by_key(&key) else {
            info!("Website '{}' in work queue no longer exists", key);
            return Ok(SyncOutcome::Dropped(DropReason::WebsiteNotFound));
        };

        let deployment_name = website.spec.deployment_name.as_str();
        if deployment_name.is_empty() {
            error!("{}: deployment name must be specified", key);
            return Ok(SyncOutcome::Dropped(DropReason::MissingDeploymentName));
        }

        self.ensure_service(&key, &website).await?;

        let deployment = match self.listers.deployments.get(&key.namespace, deployment_name) {
            Some(existing) => existing,
            None => {
                info!(
                    "Creating Deployment {}/{} for Website {}",
                    key.namespace, deployment_name, key
                );
                Arc::new(self.client.create_deployment(&new_deployment(&website)).await?)
            }
        };

        if !is_controlled_by(&deployment.metadata, &website) {
            self.recorder.record(
                &website,
                EventKind::Warning,
                ERR_RESOURCE_EXISTS,
                &message_resource_exists(deployment_name),
            );
            return Ok(SyncOutcome::Dropped(DropReason::DeploymentNotOwned));
        }

        let deployment = self.correct_replicas(&key, &website, deployment).await?;

        self.update_status(&key, &website, &deployment).await?;

        self.recorder
            .record(&website, EventKind::Normal, SUCCESS_SYNCED, MESSAGE_RESOURCE_SYNCED);
        Ok(SyncOutcome::Synced)
    }

    /// Creates the Website's Service when it is missing. An existing Service
    /// is left alone, whatever it looks like.
    async fn ensure_service(
        &self,
        key: &ObjectKey,
        website: &Website,
    ) -> Result<(), ControllerError> {
        let service_name = website.spec.service_name();
        if self.listers.services.get(&key.namespace, &service_name).is_some() {
            return Ok(());
        }

        info!("Creating Service {}/{} for Website {}", key.namespace, service_name, key);
        self.client.create_service(&new_service(website)).await?;
        Ok(())
    }

    /// Replaces the Deployment when the Website asks for a replica count it
    /// does not have, returning the current Deployment either way.
    async fn correct_replicas(
        &self,
        key: &ObjectKey,
        website: &Website,
        deployment: Arc<Deployment>,
    ) -> Result<Arc<Deployment>, ControllerError> {
        let Some(desired) = website.spec.replicas else {
            return Ok(deployment);
        };
        let actual = deployment.spec.as_ref().and_then(|spec| spec.replicas);
        if actual == Some(desired) {
            return Ok(deployment);
        }

        info!(
            "Website {} replicas: {}, deployment replicas: {:?}",
            key, desired, actual
        );
        let replaced = self.client.replace_deployment(&new_deployment(website)).await?;
        Ok(Arc::new(replaced))
    }

    /// Mirrors the Deployment's available replicas into the Website status.
    ///
    /// The cached Website is shared with other readers, so the new status is
    /// written from a copy.
    async fn update_status(
        &self,
        key: &ObjectKey,
        website: &Website,
        deployment: &Deployment,
    ) -> Result<(), ControllerError> {
        let available_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or(0);
        let status = WebsiteStatus { available_replicas };

        if website.status.as_ref() == Some(&status) {
            debug!("Website {} status unchanged, skipping update", key);
            return Ok(());
        }

        let mut updated = website.clone();
        updated.status = Some(status.clone());
        self.client.update_website_status(&updated, &status).await?;
        Ok(())
    }
}
