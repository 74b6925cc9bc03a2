//! Builds the controller futures the operator runs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use dbkeeper_backup::controller::{error_policy, reconcile, Context};
use dbkeeper_backup::ImageCatalog;
use dbkeeper_common::crd::DatabaseBackup;
use dbkeeper_common::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
/// so the API server closes idle watches first.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Label selector matching Jobs created by dbkeeper
pub fn managed_jobs_selector() -> String {
    format!("{}={}", LABEL_MANAGED_BY, MANAGED_BY_VALUE)
}

/// Build the DatabaseBackup controller.
///
/// Watches policies and the Jobs they own, in `namespace` or cluster-wide.
pub fn build_backup_controllers(
    client: Client,
    images: ImageCatalog,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(Context::builder(client.clone()).images(images).build());

    let (policies, jobs): (Api<DatabaseBackup>, Api<Job>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    tracing::info!(namespace = namespace.unwrap_or("*"), "- DatabaseBackup controller");

    vec![Box::pin(
        Controller::new(policies, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .owns(
                jobs,
                WatcherConfig::default()
                    .labels(&managed_jobs_selector())
                    .timeout(WATCH_TIMEOUT_SECS),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("DatabaseBackup")),
    )]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_job_labels() {
        assert_eq!(
            managed_jobs_selector(),
            "app.kubernetes.io/managed-by=dbkeeper"
        );
    }

    #[test]
    fn watch_timeout_below_read_timeout() {
        assert!(
            std::time::Duration::from_secs(WATCH_TIMEOUT_SECS as u64)
                < dbkeeper_common::kube_utils::DEFAULT_READ_TIMEOUT
        );
    }
}
