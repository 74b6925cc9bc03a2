//! Custom Resource Definitions owned by dbkeeper

mod database_backup;

pub use database_backup::{
    BackupPhase, DatabaseBackup, DatabaseBackupSpec, DatabaseBackupStatus, DatabaseType,
    StorageDestination, StorageType, DEFAULT_RETENTION_HOURS,
};
