//! Scheduled database backups for Kubernetes
//!
//! Reconciles `DatabaseBackup` policies: parses their cron schedules,
//! launches a backup Job when one is due and tracks its outcome in status.

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod error;
pub mod job;
pub mod schedule;
pub mod status;

pub use client::{JobRunner, KubeJobRunner, KubePolicyStore, PolicyStore};
pub use controller::{
    error_policy, reconcile, reconcile_policy, Context, ContextBuilder, PolicyKey,
    ReconcileOutcome,
};
pub use error::BackupError;
pub use job::{build_backup_job, generate_job_name, ImageCatalog, JobOutcome};
pub use schedule::{CronSchedule, ScheduleError};
pub use status::StatusWriter;
