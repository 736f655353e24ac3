//! Website CRD
//!
//! Declares a static website served by nginx and kept in sync with a git
//! repository by a git-sync sidecar.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Suffix appended to `deploymentName` to name the NodePort service.
pub const SERVICE_NAME_SUFFIX: &str = "npsvc";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "mycontroller.k8s.io",
    version = "v1alpha1",
    kind = "Website",
    namespaced,
    status = "WebsiteStatus",
    derive = "PartialEq",
    shortname = "ws",
    printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deploymentName"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteSpec {
    /// Git repository holding the site content
    #[serde(default)]
    pub git_repo: String,

    /// Desired replica count of the backing deployment.
    /// When absent the controller leaves the deployment's replica count alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Name of the deployment created for this website (required)
    #[serde(default)]
    pub deployment_name: String,
}

impl WebsiteSpec {
    /// Name of the service exposing the website's deployment.
    pub fn service_name(&self) -> String {
        format!("{}-{}", self.deployment_name, SERVICE_NAME_SUFFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteStatus {
    /// Available replicas observed on the backing deployment
    #[serde(default)]
    pub available_replicas: i32,
}
