//! Change-detecting status writes

use dbkeeper_common::crd::{DatabaseBackup, DatabaseBackupStatus};
use tracing::debug;

use crate::client::PolicyStore;
use crate::error::BackupError;

/// Writes DatabaseBackup status through a [`PolicyStore`], skipping no-op writes
pub struct StatusWriter<'a> {
    store: &'a dyn PolicyStore,
}

impl<'a> StatusWriter<'a> {
    /// Create a writer over `store`
    pub fn new(store: &'a dyn PolicyStore) -> Self {
        Self { store }
    }

    /// Persist `status` on `policy`.
    ///
    /// Returns `Ok(false)` without calling the store when `status` equals the
    /// current one. Otherwise `policy` is replaced with the stored object, so
    /// a later write in the same pass carries the new resourceVersion.
    pub async fn write(
        &self,
        policy: &mut DatabaseBackup,
        status: DatabaseBackupStatus,
    ) -> Result<bool, BackupError> {
        if policy.status.as_ref() == Some(&status) {
            debug!("status unchanged, skipping write");
            return Ok(false);
        }

        let mut desired = policy.clone();
        desired.status = Some(status);
        *policy = self.store.update_status(&desired).await?;
        Ok(true)
    }
}
