//! Aggregate download statistics.
//!
//! Statistics are always recomputed from the job store on demand. Nothing
//! here is persisted, so the numbers can never drift from the jobs table.

use serde::{Deserialize, Serialize};

use crate::job::{JobFilter, JobState, JobStore, JobStoreError};

/// A point-in-time snapshot of per-state job counts and total bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: i64,
    pub queued: i64,
    pub scheduled: i64,
    pub downloading: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Sum of file sizes over completed jobs.
    pub total_downloaded_bytes: u64,
    /// Mean of current speeds across downloading jobs, 0 when none.
    pub average_speed_bytes_per_sec: u64,
}

impl Statistics {
    /// Recompute the snapshot from the store.
    pub fn compute(store: &dyn JobStore) -> Result<Self, JobStoreError> {
        let count_state =
            |state: JobState| store.count(&JobFilter::new().with_state(state));

        Ok(Self {
            total: store.count(&JobFilter::new())?,
            queued: count_state(JobState::Queued)?,
            scheduled: count_state(JobState::Scheduled)?,
            downloading: count_state(JobState::Downloading)?,
            completed: count_state(JobState::Completed)?,
            failed: count_state(JobState::Failed)?,
            cancelled: count_state(JobState::Cancelled)?,
            total_downloaded_bytes: store.total_completed_bytes()?,
            average_speed_bytes_per_sec: store.average_downloading_speed()?,
        })
    }

    /// Jobs that are not in a terminal state.
    pub fn active(&self) -> i64 {
        self.queued + self.scheduled + self.downloading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, DownloadOptions, JobPatch, SqliteJobStore};

    fn request(url: &str) -> CreateJobRequest {
        CreateJobRequest {
            source_url: url.to_string(),
            options: DownloadOptions::default(),
        }
    }

    #[test]
    fn test_compute_counts_by_state() {
        let store = SqliteJobStore::in_memory().unwrap();

        store.create(request("https://e.com/a")).unwrap();
        let b = store.create(request("https://e.com/b")).unwrap();
        let c = store.create(request("https://e.com/c")).unwrap();

        store
            .update(&b.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(&b.id, JobPatch::new().with_progress(25.0, 2000, Some(90)))
            .unwrap();
        store
            .update(&c.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(
                &c.id,
                JobPatch::new()
                    .with_state(JobState::Completed)
                    .with_result("/tmp/c.mp4", 2048),
            )
            .unwrap();

        let stats = Statistics::compute(&store).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.downloading, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total_downloaded_bytes, 2048);
        // b is the only job still downloading, so the mean is its speed.
        assert_eq!(stats.average_speed_bytes_per_sec, 2000);
        assert_eq!(stats.active(), 2);
    }

    #[test]
    fn test_compute_on_empty_store() {
        let store = SqliteJobStore::in_memory().unwrap();
        let stats = Statistics::compute(&store).unwrap();
        assert_eq!(stats, Statistics::default());
    }
}
