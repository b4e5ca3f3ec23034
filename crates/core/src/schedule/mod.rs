//! Deferred-start schedule entries and persistence.

mod sqlite_store;
mod store;

pub use sqlite_store::SqliteScheduleStore;
pub use store::{ScheduleEntry, ScheduleStore, ScheduleStoreError};
