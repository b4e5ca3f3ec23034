//! Job storage trait and patch types.

use std::fmt;

use chrono::{DateTime, Utc};

use super::{DownloadOptions, Job, JobState};

/// Error type for job store operations.
#[derive(Debug)]
pub enum JobStoreError {
    /// Job not found.
    NotFound(String),
    /// Patch would violate the state transition table.
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },
    /// Patch attempted to mutate a terminal job.
    TerminalState { job_id: String, state: JobState },
    /// Database error.
    Database(String),
}

impl fmt::Display for JobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStoreError::NotFound(id) => write!(f, "Job not found: {}", id),
            JobStoreError::InvalidTransition { job_id, from, to } => {
                write!(f, "Job {}: cannot transition from {} to {}", job_id, from, to)
            }
            JobStoreError::TerminalState { job_id, state } => {
                write!(f, "Job {} is {} and can no longer be updated", job_id, state)
            }
            JobStoreError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for JobStoreError {}

/// Request to create a new job. Jobs always start in `queued`.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub source_url: String,
    pub options: DownloadOptions,
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by state.
    pub state: Option<JobState>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Partial, atomic update to a job record.
///
/// `None` fields are left untouched. A patch carrying a `state` is validated
/// against the transition table; a patch without one is rejected outright if
/// the job is already terminal.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub progress_percent: Option<f32>,
    pub speed_bytes_per_sec: Option<u64>,
    pub eta_seconds: Option<Option<u64>>,
    pub file_size_bytes: Option<u64>,
    pub local_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Progress sample from an in-flight fetch.
    pub fn with_progress(mut self, percent: f32, speed: u64, eta: Option<u64>) -> Self {
        self.progress_percent = Some(percent);
        self.speed_bytes_per_sec = Some(speed);
        self.eta_seconds = Some(eta);
        self
    }

    /// Metadata resolved by the extractor probe.
    pub fn with_metadata(
        mut self,
        title: Option<String>,
        uploader: Option<String>,
        duration_seconds: Option<u64>,
        thumbnail_url: Option<String>,
    ) -> Self {
        self.title = title;
        self.uploader = uploader;
        self.duration_seconds = duration_seconds;
        self.thumbnail_url = thumbnail_url;
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn with_result(mut self, local_path: impl Into<String>, size_bytes: u64) -> Self {
        self.local_path = Some(local_path.into());
        self.file_size_bytes = Some(size_bytes);
        self
    }
}

/// Trait for job storage backends.
///
/// All mutation is atomic with respect to concurrent readers: a reader never
/// observes a half-applied patch.
pub trait JobStore: Send + Sync {
    /// Create a new job in `queued` state with a fresh id and queue ordinal.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError>;

    /// Get a job by id.
    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// List jobs matching the filter, newest first (history order).
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// List up to `limit` queued jobs in FIFO dispatch order.
    fn list_ready(&self, limit: i64) -> Result<Vec<Job>, JobStoreError>;

    /// Count jobs matching the filter.
    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Apply a partial update, enforcing the state transition table and
    /// monotonically non-decreasing progress while downloading.
    fn update(&self, id: &str, patch: JobPatch) -> Result<Job, JobStoreError>;

    /// Permanently delete a job record. Returns the deleted job if found.
    fn delete(&self, id: &str) -> Result<Job, JobStoreError>;

    /// Delete all job records. Returns the number deleted.
    fn clear(&self) -> Result<usize, JobStoreError>;

    /// Sum of `file_size_bytes` over completed jobs.
    fn total_completed_bytes(&self) -> Result<u64, JobStoreError>;

    /// Mean of `speed_bytes_per_sec` over downloading jobs, 0 when none.
    fn average_downloading_speed(&self) -> Result<u64, JobStoreError>;
}
