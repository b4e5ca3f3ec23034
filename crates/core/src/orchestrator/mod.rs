//! The download orchestrator: worker pool, dispatch, scheduling and retry.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::DownloadOrchestrator;
pub use types::{ActiveDownload, OrchestratorError, OrchestratorEvent, OrchestratorStatus};
