//! Reconcile error type

use thiserror::Error;

/// Errors that abort a reconcile pass
#[derive(Debug, Error)]
pub enum BackupError {
    /// The object changed since it was read (HTTP 409)
    #[error("conflict writing {kind} {name}: object was modified")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Any other Kubernetes API failure
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Submitting the backup Job failed
    #[error("failed to create backup job for {policy}: {source}")]
    JobCreation {
        /// Policy the Job was for
        policy: String,
        /// Underlying failure
        #[source]
        source: Box<BackupError>,
    },

    /// The policy has no namespace
    #[error("DatabaseBackup {0} has no namespace")]
    MissingNamespace(String),

    /// The policy has no UID, so no owner reference can be built
    #[error("DatabaseBackup {0} has no uid")]
    MissingUid(String),
}

impl BackupError {
    /// Map a kube error, turning 409 responses into [`BackupError::Conflict`]
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 409 => Self::Conflict {
                kind,
                name: name.to_string(),
            },
            other => Self::Kube(other),
        }
    }

    /// Whether this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
