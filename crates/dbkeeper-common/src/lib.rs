//! Shared types and utilities for dbkeeper
//!
//! Holds the `DatabaseBackup` CRD, the startup error type, and the plumbing
//! every dbkeeper binary needs: kube helpers, telemetry, metrics and
//! Kubernetes Events.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using dbkeeper's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of [`LABEL_MANAGED_BY`] on everything dbkeeper creates
pub const MANAGED_BY_VALUE: &str = "dbkeeper";
/// Label linking a backup Job to its DatabaseBackup
pub const DATABASE_BACKUP_LABEL: &str = "dbkeeper.dev/database-backup";
/// Field manager for server-side apply and status patches
pub const FIELD_MANAGER: &str = "dbkeeper-controller";
