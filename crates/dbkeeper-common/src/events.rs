//! Kubernetes Event publishing for backup policies
//!
//! Events show up in `kubectl describe databasebackup` and record every
//! transition the controller drives. Publishing is fire-and-forget: a failed
//! event is logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about an object
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`.
    ///
    /// `reason` is the machine-readable reason (see [`reasons`]) and `note`
    /// the optional human-readable message.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// A backup Job was submitted
    pub const BACKUP_JOB_CREATED: &str = "BackupJobCreated";
    /// Submitting the backup Job failed
    pub const BACKUP_JOB_CREATE_FAILED: &str = "BackupJobCreateFailed";
    /// The backup Job completed
    pub const BACKUP_SUCCEEDED: &str = "BackupSucceeded";
    /// The backup Job failed
    pub const BACKUP_FAILED: &str = "BackupFailed";
    /// The tracked backup Job no longer exists
    pub const BACKUP_JOB_MISSING: &str = "BackupJobMissing";
    /// The cron schedule does not parse or never fires
    pub const INVALID_SCHEDULE: &str = "InvalidSchedule";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Reconciling policy state
    pub const RECONCILE: &str = "Reconcile";
    /// Launching a backup
    pub const TRIGGER: &str = "TriggerBackup";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
        assert_send_sync::<KubeEventPublisher>();
    }

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::BACKUP_JOB_CREATED,
            reasons::BACKUP_JOB_CREATE_FAILED,
            reasons::BACKUP_SUCCEEDED,
            reasons::BACKUP_FAILED,
            reasons::BACKUP_JOB_MISSING,
            reasons::INVALID_SCHEDULE,
        ] {
            assert!(reason.chars().next().unwrap().is_ascii_uppercase());
            assert!(reason.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::BACKUP_FAILED,
                actions::RECONCILE,
                Some("job failed".to_string()),
            )
            .await;
    }
}
