//! Shared Kubernetes helpers built on kube-rs

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Config, CustomResourceExt};
use tracing::info;

use crate::Error;

/// Condition status value meaning the condition holds
pub const STATUS_TRUE: &str = "True";

/// Connection timeout for the API server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for API calls; must exceed the watch timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for condition-like types (type and status fields)
pub trait HasConditionFields {
    /// The condition type, e.g. "Complete"
    fn type_field(&self) -> &str;
    /// The condition status, "True", "False" or "Unknown"
    fn status_field(&self) -> &str;
    /// Human-readable detail, if any
    fn message_field(&self) -> Option<&str>;
}

impl HasConditionFields for k8s_openapi::api::batch::v1::JobCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn message_field(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Find a condition of `condition_type` whose status is "True"
pub fn true_condition<'a, T>(conditions: Option<&'a [T]>, condition_type: &str) -> Option<&'a T>
where
    T: HasConditionFields,
{
    conditions?
        .iter()
        .find(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
}

/// Create a kube client from the in-cluster or local kubeconfig
pub async fn create_client() -> crate::Result<Client> {
    let mut config = Config::infer().await.map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
    })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Install or update the CRD for `K` using server-side apply
pub async fn install_crd<K: CustomResourceExt>(
    client: &Client,
    field_manager: &str,
) -> crate::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = K::crd();
    let name = K::crd_name();

    crds.patch(
        name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(&crd),
    )
    .await
    .map_err(|e| {
        Error::internal_with_context("install_crd", format!("failed to apply {}: {}", name, e))
    })?;

    info!(crd = name, "CRD installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobCondition;

    fn condition(type_: &str, status: &str, message: Option<&str>) -> JobCondition {
        JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            message: message.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn true_condition_requires_true_status() {
        let conditions = vec![
            condition("Complete", "False", None),
            condition("Failed", "True", Some("BackoffLimitExceeded")),
        ];
        assert!(true_condition(Some(conditions.as_slice()), "Complete").is_none());
        assert!(true_condition(Some(conditions.as_slice()), "Failed").is_some());
    }

    #[test]
    fn missing_conditions_never_match() {
        assert!(true_condition::<JobCondition>(None, "Complete").is_none());
        assert!(true_condition::<JobCondition>(Some(&[]), "Complete").is_none());
    }

    #[test]
    fn true_condition_exposes_message() {
        let conditions = vec![condition("Failed", "True", Some("pod exited 1"))];
        let found = true_condition(Some(conditions.as_slice()), "Failed").unwrap();
        assert_eq!(found.message_field(), Some("pod exited 1"));
    }

    #[test]
    fn read_timeout_outlives_watch_timeout() {
        assert!(DEFAULT_READ_TIMEOUT > Duration::from_secs(25));
    }
}
