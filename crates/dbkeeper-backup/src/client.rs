//! Collaborator traits for the backup controller and their kube-rs implementations
//!
//! The controller only talks to the cluster through [`PolicyStore`] and
//! [`JobRunner`], which lets tests drive it with mocks or an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use dbkeeper_common::crd::DatabaseBackup;
use dbkeeper_common::FIELD_MANAGER;

use crate::error::BackupError;

/// Read and write access to DatabaseBackup objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch a policy; `None` when it does not exist
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseBackup>, BackupError>;

    /// Persist `policy.status`, guarded by `policy`'s resourceVersion.
    ///
    /// Returns the stored object. A stale resourceVersion yields
    /// [`BackupError::Conflict`].
    async fn update_status(&self, policy: &DatabaseBackup) -> Result<DatabaseBackup, BackupError>;
}

/// Read and create backup Jobs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Fetch a Job; `None` when it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, BackupError>;

    /// Submit a Job and return the created object
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, BackupError>;
}

/// [`PolicyStore`] backed by the Kubernetes API
pub struct KubePolicyStore {
    client: Client,
}

impl KubePolicyStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PolicyStore for KubePolicyStore {
    async fn get_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DatabaseBackup>, BackupError> {
        let api: Api<DatabaseBackup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_status(&self, policy: &DatabaseBackup) -> Result<DatabaseBackup, BackupError> {
        let name = policy.name_any();
        let namespace = policy
            .namespace()
            .ok_or_else(|| BackupError::MissingNamespace(name.clone()))?;
        let api: Api<DatabaseBackup> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion in a merge patch body is a precondition
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": policy.resource_version() },
            "status": policy.status,
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        api.patch_status(&name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| BackupError::from_kube("DatabaseBackup", &name, e))
    }
}

/// [`JobRunner`] backed by the Kubernetes API
pub struct KubeJobRunner {
    client: Client,
}

impl KubeJobRunner {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, BackupError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, BackupError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&params, job).await?)
    }
}
