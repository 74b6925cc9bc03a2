//! Multi-pass backup lifecycles against an in-memory cluster

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use kube::ResourceExt;

use dbkeeper_backup::{
    reconcile_policy, BackupError, Context, ImageCatalog, JobRunner, PolicyKey, PolicyStore,
};
use dbkeeper_common::crd::{BackupPhase, DatabaseBackup, DatabaseBackupStatus};

const MANIFEST: &str = r#"
apiVersion: dbkeeper.dev/v1alpha1
kind: DatabaseBackup
metadata:
  name: orders
  namespace: shop
  uid: 6f1c1f0e-1d3a-4c47-9a55-0d6e4b1f9a11
  resourceVersion: "1"
spec:
  databaseType: postgres
  schedule: "0 * * * *"
  backupRetention: 24
  storageDestination:
    type: pvc
    pvcName: orders-backups
  databaseSelector:
    matchLabels:
      app: orders-db
"#;

#[derive(Default)]
struct State {
    policies: BTreeMap<(String, String), DatabaseBackup>,
    jobs: BTreeMap<(String, String), Job>,
    /// Bump the stored resourceVersion right after the next read
    concurrent_edit: bool,
    status_writes: usize,
}

/// API server stand-in enforcing resourceVersion preconditions
#[derive(Default)]
struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    fn with_policy(policy: DatabaseBackup) -> Arc<Self> {
        let cluster = Arc::new(Self::default());
        cluster.state.lock().unwrap().policies.insert(
            (policy.namespace().unwrap(), policy.name_any()),
            policy,
        );
        cluster
    }

    fn status(&self) -> DatabaseBackupStatus {
        let state = self.state.lock().unwrap();
        let policy = state.policies.values().next().expect("policy stored");
        policy.status.clone().unwrap_or_default()
    }

    fn job_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.jobs.keys().map(|(_, name)| name.clone()).collect()
    }

    fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    fn finish_job(&self, name: &str, condition: &str) {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&("shop".to_string(), name.to_string()))
            .expect("job exists");
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: condition.to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
    }

    fn delete_job(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.jobs.remove(&("shop".to_string(), name.to_string()));
    }

    fn delete_policy(&self) {
        self.state.lock().unwrap().policies.clear();
    }

    fn edit_concurrently_after_next_read(&self) {
        self.state.lock().unwrap().concurrent_edit = true;
    }
}

#[async_trait]
impl PolicyStore for FakeCluster {
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseBackup>, BackupError> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let found = state.policies.get(&key).cloned();
        if state.concurrent_edit {
            state.concurrent_edit = false;
            if let Some(stored) = state.policies.get_mut(&key) {
                bump_resource_version(stored);
            }
        }
        Ok(found)
    }

    async fn update_status(&self, policy: &DatabaseBackup) -> Result<DatabaseBackup, BackupError> {
        let mut state = self.state.lock().unwrap();
        let key = (policy.namespace().unwrap(), policy.name_any());
        let stored = state
            .policies
            .get_mut(&key)
            .expect("status write for a stored policy");

        if stored.resource_version() != policy.resource_version() {
            return Err(BackupError::Conflict {
                kind: "DatabaseBackup",
                name: policy.name_any(),
            });
        }

        stored.status = policy.status.clone();
        bump_resource_version(stored);
        let result = stored.clone();
        state.status_writes += 1;
        Ok(result)
    }
}

#[async_trait]
impl JobRunner for FakeCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, BackupError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, BackupError> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), job.name_any());
        assert!(!state.jobs.contains_key(&key), "job name reused");
        state.jobs.insert(key, job.clone());
        Ok(job.clone())
    }
}

fn bump_resource_version(policy: &mut DatabaseBackup) {
    let current: u64 = policy
        .resource_version()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    policy.metadata.resource_version = Some((current + 1).to_string());
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
}

fn setup() -> (Arc<FakeCluster>, Context) {
    let policy: DatabaseBackup = serde_yaml::from_str(MANIFEST).expect("manifest parses");
    let cluster = FakeCluster::with_policy(policy);
    let ctx = Context::new(cluster.clone(), cluster.clone())
        .with_images(ImageCatalog::new("registry.test/dbkeeper", "v1"));
    (cluster, ctx)
}

fn key() -> PolicyKey {
    PolicyKey::new("shop", "orders")
}

#[tokio::test]
async fn schedule_run_and_succeed() {
    let (cluster, ctx) = setup();

    // First sight: initialize and schedule
    let outcome = reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Pending));
    assert_eq!(status.next_scheduled_backup_at, Some(at(1, 0)));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(30 * 60)));
    assert!(cluster.job_names().is_empty());

    // Trigger time: one Job
    let outcome = reconcile_policy(&key(), &ctx, at(1, 0)).await.unwrap();
    let status = cluster.status();
    let jobs = cluster.job_names();
    assert_eq!(jobs.len(), 1);
    assert_eq!(status.active_job_ref, jobs[0]);
    assert_eq!(status.last_backup_status, Some(BackupPhase::Running));
    assert_eq!(status.next_scheduled_backup_at, Some(at(2, 0)));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60 * 60)));

    // Re-running while the Job is in flight does nothing
    let writes = cluster.status_writes();
    reconcile_policy(&key(), &ctx, at(1, 2)).await.unwrap();
    assert_eq!(cluster.status_writes(), writes);
    assert_eq!(cluster.job_names().len(), 1);

    // Job completes
    cluster.finish_job(&jobs[0], "Complete");
    let outcome = reconcile_policy(&key(), &ctx, at(1, 5)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Succeeded));
    assert_eq!(status.last_successful_backup_at, Some(at(1, 5)));
    assert_eq!(status.active_job(), None);
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(55 * 60)));

    // Next trigger launches a second, distinct Job
    reconcile_policy(&key(), &ctx, at(2, 0)).await.unwrap();
    assert_eq!(cluster.job_names().len(), 2);
    assert_eq!(cluster.status().next_scheduled_backup_at, Some(at(3, 0)));
}

#[tokio::test]
async fn failed_backup_then_recovery() {
    let (cluster, ctx) = setup();
    reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap();
    reconcile_policy(&key(), &ctx, at(1, 0)).await.unwrap();
    let first = cluster.status().active_job_ref;

    cluster.finish_job(&first, "Failed");
    reconcile_policy(&key(), &ctx, at(1, 10)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Failed));
    assert!(!status.failure_reason.is_empty());
    assert_eq!(status.last_successful_backup_at, None);

    reconcile_policy(&key(), &ctx, at(2, 0)).await.unwrap();
    let second = cluster.status().active_job_ref;
    assert_ne!(second, first);

    cluster.finish_job(&second, "Complete");
    reconcile_policy(&key(), &ctx, at(2, 5)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Succeeded));
    assert_eq!(status.failure_reason, "");
}

#[tokio::test]
async fn deleted_job_is_reported_and_schedule_continues() {
    let (cluster, ctx) = setup();
    reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap();
    reconcile_policy(&key(), &ctx, at(1, 0)).await.unwrap();
    let job = cluster.status().active_job_ref;

    cluster.delete_job(&job);
    reconcile_policy(&key(), &ctx, at(1, 20)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Failed));
    assert!(status.failure_reason.contains(&job));
    assert_eq!(status.active_job(), None);
    assert_eq!(status.next_scheduled_backup_at, Some(at(2, 0)));
}

#[tokio::test]
async fn concurrent_edit_conflicts_then_converges() {
    let (cluster, ctx) = setup();

    cluster.edit_concurrently_after_next_read();
    let err = reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(cluster.status_writes(), 0);

    reconcile_policy(&key(), &ctx, at(0, 31)).await.unwrap();
    let status = cluster.status();
    assert_eq!(status.last_backup_status, Some(BackupPhase::Pending));
    assert_eq!(status.next_scheduled_backup_at, Some(at(1, 0)));
}

#[tokio::test]
async fn deleted_policy_stops_reconciling() {
    let (cluster, ctx) = setup();
    reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap();

    cluster.delete_policy();
    let outcome = reconcile_policy(&key(), &ctx, at(1, 0)).await.unwrap();
    assert!(!outcome.status_written);
    assert_eq!(outcome.requeue_after, None);
    assert!(cluster.job_names().is_empty());
}

#[tokio::test]
async fn job_uses_configured_image_and_pvc() {
    let (cluster, ctx) = setup();
    reconcile_policy(&key(), &ctx, at(0, 30)).await.unwrap();
    reconcile_policy(&key(), &ctx, at(1, 0)).await.unwrap();

    let name = cluster.status().active_job_ref;
    let job = JobRunner::get_job(cluster.as_ref(), "shop", &name)
        .await
        .unwrap()
        .expect("job stored");
    let pod = job.spec.unwrap().template.spec.unwrap();
    assert_eq!(
        pod.containers[0].image.as_deref(),
        Some("registry.test/dbkeeper/postgres-backup:v1")
    );
    let volumes = pod.volumes.unwrap();
    assert_eq!(
        volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
        "orders-backups"
    );
    assert_eq!(
        job.metadata.owner_references.unwrap()[0].uid,
        "6f1c1f0e-1d3a-4c47-9a55-0d6e4b1f9a11"
    );
}
