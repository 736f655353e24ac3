//! Event recording.
//!
//! Sync outcomes a user should see are published as Kubernetes Events on the
//! Website and mirrored to the log.

use crds::Website;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use std::fmt;
use tracing::{info, warn};

/// Name of the component publishing events
pub const CONTROLLER_NAME: &str = "website-controller";

/// Reason for a Website synced successfully
pub const SUCCESS_SYNCED: &str = "Synced";
/// Reason for a Website whose Deployment belongs to someone else
pub const ERR_RESOURCE_EXISTS: &str = "ErrResourceExists";
/// Message for a Website synced successfully
pub const MESSAGE_RESOURCE_SYNCED: &str = "Website synced successfully";

/// Message for a Deployment name already taken by an object the Website does not control
pub fn message_resource_exists(name: &str) -> String {
    format!("Resource \"{name}\" already exists and is not managed by Website")
}

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Informational
    Normal,
    /// Needs attention
    Warning,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Normal => write!(f, "Normal"),
            EventKind::Warning => write!(f, "Warning"),
        }
    }
}

/// Destination for events about Websites.
pub trait EventSink: Send + Sync {
    /// Record an event on `website`. Must not block.
    fn record(&self, website: &Website, kind: EventKind, reason: &str, message: &str);
}

/// [`EventSink`] publishing to the Kubernetes Events API.
///
/// Publishing happens on a background task; failures are logged and dropped.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// Recorder reporting as [`CONTROLLER_NAME`] from `instance`
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl EventSink for KubeEventRecorder {
    fn record(&self, website: &Website, kind: EventKind, reason: &str, message: &str) {
        log_event(website, kind, reason, message);

        let event = Event {
            type_: match kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        };
        let reference = website.object_ref(&());
        let recorder = self.recorder.clone();
        let name = website.name_any();
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&event, &reference).await {
                warn!("Failed to publish event for Website {}: {}", name, e);
            }
        });
    }
}

/// Writes a recorded event to the log at a level matching its severity.
pub fn log_event(website: &Website, kind: EventKind, reason: &str, message: &str) {
    let namespace = website.namespace().unwrap_or_default();
    match kind {
        EventKind::Normal => info!(
            "Event(Website {}/{}): type: '{}' reason: '{}' {}",
            namespace,
            website.name_any(),
            kind,
            reason,
            message
        ),
        EventKind::Warning => warn!(
            "Event(Website {}/{}): type: '{}' reason: '{}' {}",
            namespace,
            website.name_any(),
            kind,
            reason,
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exists_message() {
        assert_eq!(
            message_resource_exists("blog-web"),
            "Resource \"blog-web\" already exists and is not managed by Website"
        );
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Normal.to_string(), "Normal");
        assert_eq!(EventKind::Warning.to_string(), "Warning");
    }
}
