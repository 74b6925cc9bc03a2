//! DatabaseBackup Custom Resource Definition
//!
//! A DatabaseBackup declares a cron schedule, a storage destination and a
//! retention for one database. The backup controller launches a Kubernetes
//! Job each time the schedule fires and reports the outcome in status.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default retention in hours (one week)
pub const DEFAULT_RETENTION_HOURS: i64 = 168;

fn default_retention_hours() -> i64 {
    DEFAULT_RETENTION_HOURS
}

/// Database engine a backup targets
///
/// Values outside the known set deserialize to `Generic` so that a new engine
/// still gets a backup job (with the generic image) instead of a decode error.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL
    #[default]
    Postgres,
    /// MySQL / MariaDB
    Mysql,
    /// MongoDB
    Mongodb,
    /// Any engine without a dedicated image
    #[serde(other)]
    Generic,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Mysql => write!(f, "mysql"),
            Self::Mongodb => write!(f, "mongodb"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Storage backend for backup artifacts
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Amazon S3 (or compatible) object store
    #[default]
    S3,
    /// Google Cloud Storage
    Gcs,
    /// PersistentVolumeClaim mounted into the backup pod
    Pvc,
}

impl StorageType {
    /// Whether backups land on a mounted volume rather than an object store
    pub fn is_volume_backed(&self) -> bool {
        matches!(self, Self::Pvc)
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::S3 => write!(f, "s3"),
            Self::Gcs => write!(f, "gcs"),
            Self::Pvc => write!(f, "pvc"),
        }
    }
}

/// Where backup artifacts are written
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageDestination {
    /// Storage backend
    #[serde(rename = "type")]
    pub type_: StorageType,

    /// Bucket name (s3, gcs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Path within the bucket or volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// PersistentVolumeClaim to mount (pvc)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,

    /// Secret holding storage credentials, mounted into the backup pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Outcome of the most recent backup attempt
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackupPhase {
    /// Policy accepted, no backup attempted yet
    Pending,
    /// A backup Job is in flight
    Running,
    /// The last backup Job completed
    Succeeded,
    /// The last backup Job failed
    Failed,
    /// The controller could not schedule or launch a backup
    Error,
}

impl std::fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Observed state of a DatabaseBackup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseBackupStatus {
    /// Outcome of the most recent backup attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_status: Option<BackupPhase>,

    /// When the last successful backup was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_backup_at: Option<DateTime<Utc>>,

    /// When the next backup is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_backup_at: Option<DateTime<Utc>>,

    /// Why the last backup failed; empty when it did not.
    /// Always serialized so a merge patch clears it.
    #[serde(default)]
    pub failure_reason: String,

    /// Name of the backup Job in flight; empty when none.
    /// Always serialized so a merge patch clears it.
    #[serde(default)]
    pub active_job_ref: String,
}

impl DatabaseBackupStatus {
    /// The in-flight Job name, if any
    pub fn active_job(&self) -> Option<&str> {
        if self.active_job_ref.is_empty() {
            None
        } else {
            Some(&self.active_job_ref)
        }
    }

    /// Whether a backup is due at `now`; an unset next-run time counts as due
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_scheduled_backup_at {
            Some(next) => now >= next,
            None => true,
        }
    }
}

/// Specification for a DatabaseBackup
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dbkeeper.dev",
    version = "v1alpha1",
    kind = "DatabaseBackup",
    plural = "databasebackups",
    shortname = "dbb",
    namespaced,
    status = "DatabaseBackupStatus",
    printcolumn = r#"{"name":"Database","type":"string","jsonPath":".spec.databaseType"}"#,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Last Backup","type":"date","jsonPath":".status.lastSuccessfulBackupAt"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.lastBackupStatus"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseBackupSpec {
    /// Database engine to back up
    pub database_type: DatabaseType,

    /// Cron schedule (e.g., "0 2 * * *" for daily at 02:00 UTC)
    pub schedule: String,

    /// How long backups are kept, in hours
    #[serde(default = "default_retention_hours")]
    pub backup_retention: i64,

    /// Where backups are written
    pub storage_destination: StorageDestination,

    /// Selects the database pods to back up
    #[serde(default)]
    pub database_selector: LabelSelector,

    /// Stop launching new backups; a Job already running is still tracked
    #[serde(default)]
    pub paused: bool,
}
