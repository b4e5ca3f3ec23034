//! Download job model, state machine and persistence.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobFilter, JobPatch, JobStore, JobStoreError};
pub use types::{DownloadOptions, Job, JobState, MediaFormat, Quality};
