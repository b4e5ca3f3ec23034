//! Types for the download orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extractor::ExtractorError;
use crate::job::{Job, JobState, JobStoreError};
use crate::schedule::ScheduleStoreError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The submitted string is not a URL we will accept.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job's current state does not admit the requested operation.
    #[error("job {job_id} is {state}: {reason}")]
    InvalidState {
        job_id: String,
        state: JobState,
        reason: String,
    },

    /// A schedule time that could not be used.
    #[error("invalid schedule time: {0}")]
    InvalidTime(String),

    /// A runtime setting that could not be applied.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// Extractor error.
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    /// Schedule store error.
    #[error("schedule store error: {0}")]
    Schedule(#[from] ScheduleStoreError),
}

/// Event fanned out to observers whenever a job record changes.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    JobUpdated(Job),
    JobDeleted { job_id: String },
    HistoryCleared { removed: usize },
}

/// A download currently held by a worker, as exposed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDownload {
    pub job_id: String,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the background loops are running.
    pub running: bool,
    /// Downloads currently held by workers.
    pub active_downloads: usize,
    /// Current concurrency cap.
    pub max_downloads: usize,
    /// Jobs waiting in the dispatch queue.
    pub queued_count: usize,
    /// Jobs deferred by a schedule.
    pub scheduled_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::JobNotFound("job-456".to_string());
        assert_eq!(err.to_string(), "job not found: job-456");

        let err = OrchestratorError::InvalidState {
            job_id: "job-1".to_string(),
            state: JobState::Completed,
            reason: "cannot cancel".to_string(),
        };
        assert_eq!(err.to_string(), "job job-1 is completed: cannot cancel");
    }

    #[test]
    fn test_active_download_serialization() {
        let download = ActiveDownload {
            job_id: "job-123".to_string(),
            source_url: "https://example.com/v/1".to_string(),
            started_at: Utc::now(),
        };

        let json = serde_json::to_string(&download).unwrap();
        let parsed: ActiveDownload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, "job-123");
    }

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.active_downloads, 0);
    }
}
