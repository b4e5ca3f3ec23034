//! Schedule storage trait.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for schedule store operations.
#[derive(Debug)]
pub enum ScheduleStoreError {
    /// Database error.
    Database(String),
}

impl fmt::Display for ScheduleStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStoreError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for ScheduleStoreError {}

/// A deferred-start entry. At most one per job; scheduling an already
/// scheduled job replaces its fire time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub job_id: String,
    /// When the job becomes eligible for dispatch.
    pub fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Trait for schedule storage backends.
pub trait ScheduleStore: Send + Sync {
    /// Insert or replace the entry for a job.
    fn upsert(&self, job_id: &str, fire_at: DateTime<Utc>) -> Result<ScheduleEntry, ScheduleStoreError>;

    /// Get the entry for a job, if any.
    fn get(&self, job_id: &str) -> Result<Option<ScheduleEntry>, ScheduleStoreError>;

    /// Entries whose fire time is at or before `now`, oldest fire time first.
    fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, ScheduleStoreError>;

    /// All entries, soonest first.
    fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleStoreError>;

    /// Remove the entry for a job. Returns whether an entry existed.
    fn remove(&self, job_id: &str) -> Result<bool, ScheduleStoreError>;

    /// Remove all entries. Returns the number removed.
    fn clear(&self) -> Result<usize, ScheduleStoreError>;
}
