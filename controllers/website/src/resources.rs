//! Desired-state builders.
//!
//! Pure functions turning a `Website` into the Deployment and Service that
//! should exist for it. Both carry a controller owner reference back to the
//! Website so the notification router can find it and the garbage collector
//! can cascade deletes.

use crds::Website;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const NGINX_IMAGE: &str = "nginx";
const GIT_SYNC_IMAGE: &str = "openweb/git-sync";
const CONTENT_VOLUME: &str = "html";
const GIT_SYNC_DEST: &str = "/gitrepo";

/// Labels on the website's pods, also used as the deployment and service selector.
pub fn pod_labels(website: &Website) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "website-nginx".to_string()),
        ("controller".to_string(), website.name_any()),
    ])
}

/// Labels on the website's service.
pub fn service_labels(website: &Website) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "website".to_string()),
        ("controller".to_string(), website.name_any()),
    ])
}

/// Owner reference marking `website` as the managing controller.
pub fn controller_ref(website: &Website) -> OwnerReference {
    OwnerReference {
        api_version: Website::api_version(&()).into_owned(),
        kind: Website::kind(&()).into_owned(),
        name: website.name_any(),
        uid: website.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// The controller owner reference of an object, if it has one.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// Whether the object described by `meta` is controlled by `website`.
///
/// The controller reference must be of kind `Website` and name the website.
/// When both sides carry a uid they must match too, so a recreated website
/// does not adopt its predecessor's objects.
pub fn is_controlled_by(meta: &ObjectMeta, website: &Website) -> bool {
    let Some(owner) = controller_of(meta) else {
        return false;
    };
    if owner.kind != Website::kind(&()) || owner.name != website.name_any() {
        return false;
    }
    match website.uid() {
        Some(uid) if !owner.uid.is_empty() => owner.uid == uid,
        _ => true,
    }
}

/// Deployment serving the website: nginx plus a git-sync sidecar sharing a volume.
pub fn new_deployment(website: &Website) -> Deployment {
    let labels = pod_labels(website);

    let nginx = Container {
        name: "nginx".to_string(),
        image: Some(NGINX_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: 80,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONTENT_VOLUME.to_string(),
            mount_path: "/usr/share/nginx/html".to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let git_sync = Container {
        name: "git-sync".to_string(),
        image: Some(GIT_SYNC_IMAGE.to_string()),
        env: Some(vec![
            env("GIT_SYNC_REPO", &website.spec.git_repo),
            env("GIT_SYNC_DEST", GIT_SYNC_DEST),
            env("GIT_SYNC_BRANCH", "master"),
            env("GIT_SYNC_REV", "FETCH_HEAD"),
            env("GIT_SYNC_WAIT", "3600"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONTENT_VOLUME.to_string(),
            mount_path: GIT_SYNC_DEST.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(website.spec.deployment_name.clone()),
            namespace: website.namespace(),
            owner_references: Some(vec![controller_ref(website)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: website.spec.replicas,
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![nginx, git_sync],
                    volumes: Some(vec![Volume {
                        name: CONTENT_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// NodePort service exposing the website's pods on port 80.
pub fn new_service(website: &Website) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(website.spec.service_name()),
            namespace: website.namespace(),
            labels: Some(service_labels(website)),
            owner_references: Some(vec![controller_ref(website)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("NodePort".to_string()),
            selector: Some(pod_labels(website)),
            ..Default::default()
        }),
        status: None,
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
