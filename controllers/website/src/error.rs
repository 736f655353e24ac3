//! Controller-specific error types.
//!
//! Every error returned from a sync is treated as transient: the worker puts
//! the key back on the queue with backoff. Conditions that retrying cannot fix
//! (malformed keys, missing objects, ownership conflicts) are not errors; see
//! [`crate::reconciler::SyncOutcome`].

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the Website Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Informer caches did not sync before the deadline
    #[error("Failed to wait for caches to sync: {0}")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
}
