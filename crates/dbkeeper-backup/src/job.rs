//! Backup Job construction
//!
//! Builds the Kubernetes Job that runs one backup for a DatabaseBackup and
//! reads a Job's outcome back from its conditions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use rand::Rng;

use dbkeeper_common::crd::{DatabaseBackup, DatabaseType};
use dbkeeper_common::kube_utils::{true_condition, HasConditionFields};
use dbkeeper_common::{DATABASE_BACKUP_LABEL, LABEL_MANAGED_BY, MANAGED_BY_VALUE};

use crate::error::BackupError;

/// Registry used when none is configured
pub const DEFAULT_IMAGE_REGISTRY: &str = "ghcr.io/dbkeeper";
/// Image tag used when none is configured
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Mount point of the PVC backup volume
pub const BACKUP_MOUNT_PATH: &str = "/backups";
/// Mount point of the storage credential secret
pub const CREDENTIALS_MOUNT_PATH: &str = "/credentials";

const BACKUP_CONTAINER: &str = "backup";
const BACKUP_VOLUME: &str = "backup-storage";
const CREDENTIALS_VOLUME: &str = "storage-credentials";

/// Kubernetes object names and label values are limited to 63 characters
const MAX_NAME_LEN: usize = 63;
const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Where backup images come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageCatalog {
    /// Registry and repository prefix, e.g. `ghcr.io/dbkeeper`
    pub registry: String,
    /// Tag applied to every backup image
    pub tag: String,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self {
            registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }
}

impl ImageCatalog {
    /// Create a catalog for `registry` and `tag`
    pub fn new(registry: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            tag: tag.into(),
        }
    }

    /// Full image reference for a database engine
    pub fn image_for(&self, database_type: DatabaseType) -> String {
        let name = match database_type {
            DatabaseType::Postgres => "postgres-backup",
            DatabaseType::Mysql => "mysql-backup",
            DatabaseType::Mongodb => "mongodb-backup",
            DatabaseType::Generic => "generic-backup",
        };
        format!(
            "{}/{}:{}",
            self.registry.trim_end_matches('/'),
            name,
            self.tag
        )
    }
}

/// Generate a unique Job name: `<policy>-<YYYYMMDDHHMMSS>-<suffix>`.
///
/// The policy part is shortened so the name fits in 63 characters.
pub fn generate_job_name(policy_name: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    let timestamp = now.format("%Y%m%d%H%M%S").to_string();

    let budget = MAX_NAME_LEN - timestamp.len() - SUFFIX_LEN - 2;
    let prefix = if policy_name.len() > budget {
        policy_name[..budget].trim_end_matches(['-', '.'])
    } else {
        policy_name
    };

    format!("{}-{}-{}", prefix, timestamp, suffix)
}

/// Build the backup Job for `policy` named `job_name`.
///
/// The Job is owned by the policy (controller reference, blocking owner
/// deletion) so it is garbage-collected with it.
pub fn build_backup_job(
    policy: &DatabaseBackup,
    images: &ImageCatalog,
    job_name: &str,
) -> Result<Job, BackupError> {
    let policy_name = policy.name_any();
    let namespace = policy
        .namespace()
        .ok_or_else(|| BackupError::MissingNamespace(policy_name.clone()))?;
    let uid = policy
        .uid()
        .ok_or_else(|| BackupError::MissingUid(policy_name.clone()))?;

    let spec = &policy.spec;
    let storage = &spec.storage_destination;

    let labels = BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (DATABASE_BACKUP_LABEL.to_string(), policy_label_value(&policy_name)),
    ]);

    let env = [
        ("DB_TYPE", spec.database_type.to_string()),
        ("STORAGE_TYPE", storage.type_.to_string()),
        ("BUCKET", storage.bucket.clone().unwrap_or_default()),
        ("BACKUP_PATH", storage.path.clone().unwrap_or_default()),
        ("RETENTION_HOURS", spec.backup_retention.to_string()),
        ("DB_SELECTOR", render_selector(&spec.database_selector)),
        ("POLICY_NAME", policy_name.clone()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect();

    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    if storage.type_.is_volume_backed() {
        if let Some(claim_name) = storage.pvc_name.as_ref().filter(|n| !n.is_empty()) {
            volumes.push(Volume {
                name: BACKUP_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.clone(),
                    read_only: Some(false),
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: BACKUP_VOLUME.to_string(),
                mount_path: BACKUP_MOUNT_PATH.to_string(),
                ..Default::default()
            });
        }
    }

    if let Some(secret_name) = storage.secret_name.as_ref().filter(|n| !n.is_empty()) {
        volumes.push(Volume {
            name: CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let container = Container {
        name: BACKUP_CONTAINER.to_string(),
        image: Some(images.image_for(spec.database_type)),
        env: Some(env),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![OwnerReference {
                api_version: DatabaseBackup::api_version(&()).to_string(),
                kind: DatabaseBackup::kind(&()).to_string(),
                name: policy_name,
                uid,
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Policy name as a label value: at most 63 characters, ending alphanumeric
fn policy_label_value(policy_name: &str) -> String {
    if policy_name.len() <= MAX_NAME_LEN {
        return policy_name.to_string();
    }
    policy_name[..MAX_NAME_LEN]
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Render `matchLabels` as `k1=v1,k2=v2` (sorted by key)
fn render_selector(selector: &LabelSelector) -> String {
    selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Outcome of a backup Job as read from its conditions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Neither `Complete` nor `Failed` holds yet
    Running,
    /// `Complete=True`
    Succeeded,
    /// `Failed=True`, with the condition message if any
    Failed(Option<String>),
}

impl JobOutcome {
    /// Derive the outcome of `job`
    pub fn of(job: &Job) -> Self {
        let conditions = job
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref());

        if true_condition(conditions, "Complete").is_some() {
            return Self::Succeeded;
        }
        match true_condition(conditions, "Failed") {
            Some(failed) => Self::Failed(failed.message_field().map(str::to_string)),
            None => Self::Running,
        }
    }
}
