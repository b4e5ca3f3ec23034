pub mod config;
pub mod extractor;
pub mod job;
pub mod orchestrator;
pub mod schedule;
pub mod stats;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use extractor::{Extractor, ExtractorError, YtDlpConfig, YtDlpExtractor};
pub use job::{
    DownloadOptions, Job, JobFilter, JobState, JobStore, MediaFormat, Quality, SqliteJobStore,
};
pub use orchestrator::{
    DownloadOrchestrator, OrchestratorConfig, OrchestratorError, OrchestratorEvent,
    OrchestratorStatus,
};
pub use schedule::{ScheduleEntry, ScheduleStore, SqliteScheduleStore};
pub use stats::Statistics;
