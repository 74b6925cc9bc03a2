//! DatabaseBackup controller
//!
//! Each pass reads the policy fresh, settles the outcome of any in-flight
//! backup Job, advances the schedule, launches a Job when one is due and
//! asks to be re-invoked at the next trigger time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use dbkeeper_common::crd::{BackupPhase, DatabaseBackup};
use dbkeeper_common::events::{
    actions, reasons, EventPublisher, KubeEventPublisher, NoopEventPublisher,
};
use dbkeeper_common::metrics::{self, JobOutcomeLabel, ReconcileTimer};

use crate::client::{JobRunner, KubeJobRunner, KubePolicyStore, PolicyStore};
use crate::error::BackupError;
use crate::job::{build_backup_job, generate_job_name, ImageCatalog, JobOutcome};
use crate::schedule::CronSchedule;
use crate::status::StatusWriter;

/// Requeue delay when no next-run time is known
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(60);
/// Shortest requeue delay, used when the next run is already due
pub const MIN_REQUEUE: Duration = Duration::from_secs(1);
/// Retry delay after a resourceVersion conflict
pub const CONFLICT_RETRY: Duration = Duration::from_secs(1);
/// Retry delay after any other error
pub const ERROR_RETRY: Duration = Duration::from_secs(30);

/// Name of the controller as reported on Events
pub const CONTROLLER_NAME: &str = "dbkeeper-backup-controller";

const JOB_FAILED_REASON: &str = "Backup job failed, check job logs for details";

/// Shared state for the controller
pub struct Context {
    /// DatabaseBackup reads and status writes
    pub store: Arc<dyn PolicyStore>,
    /// Backup Job reads and creation
    pub jobs: Arc<dyn JobRunner>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Backup image selection
    pub images: ImageCatalog,
}

impl Context {
    /// Builder wiring every collaborator to `client`
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context over explicit collaborators, with default images and no Events
    pub fn new(store: Arc<dyn PolicyStore>, jobs: Arc<dyn JobRunner>) -> Self {
        Self {
            store,
            jobs,
            events: Arc::new(NoopEventPublisher),
            images: ImageCatalog::default(),
        }
    }

    /// Replace the image catalog
    pub fn with_images(mut self, images: ImageCatalog) -> Self {
        self.images = images;
        self
    }

    /// Replace the Event publisher
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }
}

/// Builder for a [`Context`] backed by a live cluster
pub struct ContextBuilder {
    client: Client,
    images: ImageCatalog,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            images: ImageCatalog::default(),
            events: None,
        }
    }

    /// Set the backup image catalog
    pub fn images(mut self, images: ImageCatalog) -> Self {
        self.images = images;
        self
    }

    /// Override the Event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
        });
        Context {
            store: Arc::new(KubePolicyStore::new(self.client.clone())),
            jobs: Arc::new(KubeJobRunner::new(self.client)),
            events,
            images: self.images,
        }
    }
}

/// Namespace and name of a DatabaseBackup
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl PolicyKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing policy
    pub fn from_policy(policy: &DatabaseBackup) -> Result<Self, BackupError> {
        let name = policy.name_any();
        let namespace = policy
            .namespace()
            .ok_or_else(|| BackupError::MissingNamespace(name.clone()))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of one reconcile pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether any status write reached the store
    pub status_written: bool,
    /// When to run again; `None` waits for the next watch event
    pub requeue_after: Option<Duration>,
}

/// kube-runtime entry point
#[instrument(skip(policy, ctx), fields(backup = %policy.name_any(), namespace = ?policy.namespace()))]
pub async fn reconcile(
    policy: Arc<DatabaseBackup>,
    ctx: Arc<Context>,
) -> Result<Action, BackupError> {
    let key = PolicyKey::from_policy(&policy)?;
    let timer = ReconcileTimer::start();

    match reconcile_policy(&key, &ctx, Utc::now()).await {
        Ok(outcome) => {
            timer.success();
            Ok(match outcome.requeue_after {
                Some(delay) => Action::requeue(delay),
                None => Action::await_change(),
            })
        }
        Err(e) => {
            timer.error();
            Err(e)
        }
    }
}

/// Requeue policy for failed passes
pub fn error_policy(policy: Arc<DatabaseBackup>, error: &BackupError, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(backup = %policy.name_any(), "status conflict, retrying with fresh state");
        return Action::requeue(CONFLICT_RETRY);
    }
    error!(?error, backup = %policy.name_any(), "reconciliation failed");
    Action::requeue(ERROR_RETRY)
}

/// Run one reconcile pass for `key` as of `now`.
///
/// Store and platform failures abort the pass and are returned unchanged;
/// a missing policy is not an error.
pub async fn reconcile_policy(
    key: &PolicyKey,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, BackupError> {
    let Some(mut policy) = ctx.store.get_policy(&key.namespace, &key.name).await? else {
        debug!(backup = %key, "DatabaseBackup not found, nothing to do");
        return Ok(ReconcileOutcome::default());
    };

    let writer = StatusWriter::new(ctx.store.as_ref());
    let object_ref = policy.object_ref(&());
    let mut status = policy.status.clone().unwrap_or_default();
    let mut written = false;

    if status.last_backup_status.is_none() {
        status.last_backup_status = Some(BackupPhase::Pending);
        written |= writer.write(&mut policy, status.clone()).await?;
        info!(backup = %key, "DatabaseBackup initialized");
    }

    if let Some(job_name) = status.active_job().map(str::to_string) {
        let job = ctx.jobs.get_job(&key.namespace, &job_name).await?;
        let settled = match job.as_ref().map(JobOutcome::of) {
            Some(JobOutcome::Running) => None,
            Some(JobOutcome::Succeeded) => {
                status.last_backup_status = Some(BackupPhase::Succeeded);
                status.last_successful_backup_at = Some(now);
                status.failure_reason.clear();
                Some((
                    JobOutcomeLabel::Succeeded,
                    EventType::Normal,
                    reasons::BACKUP_SUCCEEDED,
                    format!("Backup job {} completed", job_name),
                ))
            }
            Some(JobOutcome::Failed(message)) => {
                status.last_backup_status = Some(BackupPhase::Failed);
                status.failure_reason = match message {
                    Some(message) => format!("{}: {}", JOB_FAILED_REASON, message),
                    None => JOB_FAILED_REASON.to_string(),
                };
                Some((
                    JobOutcomeLabel::Failed,
                    EventType::Warning,
                    reasons::BACKUP_FAILED,
                    status.failure_reason.clone(),
                ))
            }
            None => {
                status.last_backup_status = Some(BackupPhase::Failed);
                status.failure_reason =
                    format!("Backup job {} disappeared before completing", job_name);
                Some((
                    JobOutcomeLabel::Missing,
                    EventType::Warning,
                    reasons::BACKUP_JOB_MISSING,
                    status.failure_reason.clone(),
                ))
            }
        };

        match settled {
            Some((label, type_, reason, note)) => {
                status.active_job_ref.clear();
                written |= writer.write(&mut policy, status.clone()).await?;
                info!(backup = %key, job = %job_name, outcome = label.as_str(), "backup job settled");
                metrics::record_job_outcome(label);
                publish(ctx, &object_ref, type_, reason, actions::RECONCILE, note).await;
            }
            None => debug!(backup = %key, job = %job_name, "backup job still running"),
        }
    }

    let next_run = CronSchedule::parse(&policy.spec.schedule)
        .map_err(|e| e.to_string())
        .and_then(|schedule| {
            schedule
                .next_after(now)
                .ok_or_else(|| "schedule never fires".to_string())
        });
    let next_run = match next_run {
        Ok(next_run) => next_run,
        Err(cause) => {
            warn!(backup = %key, schedule = %policy.spec.schedule, %cause, "invalid schedule");
            status.last_backup_status = Some(BackupPhase::Error);
            status.failure_reason = format!("Invalid schedule: {}", cause);
            let changed = writer.write(&mut policy, status).await?;
            if changed {
                publish(
                    ctx,
                    &object_ref,
                    EventType::Warning,
                    reasons::INVALID_SCHEDULE,
                    actions::RECONCILE,
                    format!("Schedule {:?} rejected: {}", policy.spec.schedule, cause),
                )
                .await;
            }
            return Ok(ReconcileOutcome {
                status_written: written || changed,
                requeue_after: Some(DEFAULT_REQUEUE),
            });
        }
    };

    let paused = policy.spec.paused;
    let refresh = match status.next_scheduled_backup_at {
        None => true,
        Some(stored) if stored > now => next_run > stored,
        // A due run is consumed by the trigger below, or skipped while paused
        Some(_) => paused,
    };
    if refresh {
        status.next_scheduled_backup_at = Some(next_run);
        written |= writer.write(&mut policy, status.clone()).await?;
        debug!(backup = %key, next = %next_run, "next backup scheduled");
    }

    if status.active_job().is_none() && !paused && status.is_due(now) {
        let job_name = generate_job_name(&key.name, now);
        let job = build_backup_job(&policy, &ctx.images, &job_name)?;

        match ctx.jobs.create_job(&key.namespace, &job).await {
            Ok(created) => {
                status.active_job_ref = created.name_any();
                status.last_backup_status = Some(BackupPhase::Running);
                status.next_scheduled_backup_at = Some(next_run);
                written |= writer.write(&mut policy, status.clone()).await?;

                info!(backup = %key, job = %status.active_job_ref, next = %next_run, "backup job created");
                metrics::record_job_created(&policy.spec.database_type.to_string());
                publish(
                    ctx,
                    &object_ref,
                    EventType::Normal,
                    reasons::BACKUP_JOB_CREATED,
                    actions::TRIGGER,
                    format!("Created backup job {}", status.active_job_ref),
                )
                .await;
            }
            Err(e) => {
                warn!(backup = %key, job = %job_name, error = %e, "failed to create backup job");
                status.last_backup_status = Some(BackupPhase::Error);
                status.failure_reason = format!("Failed to create backup job: {}", e);
                if let Err(write_err) = writer.write(&mut policy, status.clone()).await {
                    warn!(backup = %key, error = %write_err, "failed to record job creation failure");
                }
                publish(
                    ctx,
                    &object_ref,
                    EventType::Warning,
                    reasons::BACKUP_JOB_CREATE_FAILED,
                    actions::TRIGGER,
                    status.failure_reason.clone(),
                )
                .await;
                return Err(BackupError::JobCreation {
                    policy: key.to_string(),
                    source: Box::new(e),
                });
            }
        }
    }

    Ok(ReconcileOutcome {
        status_written: written,
        requeue_after: Some(requeue_delay(status.next_scheduled_backup_at, now)),
    })
}

/// Delay until `next`, at least [`MIN_REQUEUE`]; [`DEFAULT_REQUEUE`] when unknown
pub fn requeue_delay(next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    match next {
        Some(next) => (next - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(MIN_REQUEUE),
        None => DEFAULT_REQUEUE,
    }
}

async fn publish(
    ctx: &Context,
    object_ref: &ObjectReference,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(object_ref, type_, reason, action, Some(note))
        .await;
}
