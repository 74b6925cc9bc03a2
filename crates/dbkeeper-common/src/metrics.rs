//! OpenTelemetry metrics for the backup controller
//!
//! Instruments are created lazily on the global meter, so they are no-ops
//! until telemetry installs an exporting meter provider.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("dbkeeper"));

/// Duration of a reconcile pass
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("dbkeeper_reconcile_duration_seconds")
        .with_description("Duration of DatabaseBackup reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Backup Jobs submitted
///
/// Labels:
/// - `database_type`: postgres, mysql, mongodb, generic
pub static BACKUP_JOBS_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("dbkeeper_backup_jobs_created_total")
        .with_description("Total number of backup Jobs created")
        .with_unit("{jobs}")
        .build()
});

/// Observed terminal outcomes of backup Jobs
///
/// Labels:
/// - `outcome`: succeeded, failed, missing
pub static BACKUP_JOB_OUTCOMES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("dbkeeper_backup_job_outcomes_total")
        .with_description("Total number of observed backup Job outcomes")
        .with_unit("{jobs}")
        .build()
});

/// Terminal outcome label for [`BACKUP_JOB_OUTCOMES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcomeLabel {
    /// Job completed
    Succeeded,
    /// Job failed
    Failed,
    /// Job vanished before an outcome was observed
    Missing,
}

impl JobOutcomeLabel {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Missing => "missing",
        }
    }
}

/// Record a backup Job submission
pub fn record_job_created(database_type: &str) {
    BACKUP_JOBS_CREATED.add(1, &[KeyValue::new("database_type", database_type.to_string())]);
}

/// Record an observed backup Job outcome
pub fn record_job_outcome(outcome: JobOutcomeLabel) {
    BACKUP_JOB_OUTCOMES.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
}

/// Times a reconcile pass
pub struct ReconcileTimer {
    start: Instant,
}

impl ReconcileTimer {
    /// Start timing
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record a successful pass
    pub fn success(self) {
        self.record("success");
    }

    /// Record a failed pass
    pub fn error(self) {
        self.record("error");
    }

    fn record(self, result: &'static str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", result)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(JobOutcomeLabel::Succeeded.as_str(), "succeeded");
        assert_eq!(JobOutcomeLabel::Failed.as_str(), "failed");
        assert_eq!(JobOutcomeLabel::Missing.as_str(), "missing");
    }

    #[test]
    fn recording_without_provider_is_a_noop() {
        record_job_created("postgres");
        record_job_outcome(JobOutcomeLabel::Failed);
        ReconcileTimer::start().success();
        ReconcileTimer::start().error();
    }
}
