//! Orchestrator configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the download orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrent downloads. Runtime-adjustable via the API; this is
    /// the starting value.
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,

    /// Automatic retries per job before a failure sticks.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How often the dispatcher looks for queued jobs (milliseconds).
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_poll_interval_ms: u64,

    /// How often the schedule sweep promotes due jobs (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub schedule_sweep_interval_ms: u64,

    /// Minimum spacing between persisted progress samples per job
    /// (milliseconds). Progress arriving faster than this is coalesced.
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_min_interval_ms: u64,

    /// Cap on videos expanded from a single playlist submission.
    #[serde(default = "default_max_playlist_videos")]
    pub max_playlist_videos: usize,

    /// Directory downloads land in. Each job gets its own subdirectory.
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

fn default_max_downloads() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_dispatch_interval() -> u64 {
    500
}

fn default_sweep_interval() -> u64 {
    1000
}

fn default_broadcast_interval() -> u64 {
    1000
}

fn default_max_playlist_videos() -> usize {
    50
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_downloads: default_max_downloads(),
            max_retries: default_max_retries(),
            dispatch_poll_interval_ms: default_dispatch_interval(),
            schedule_sweep_interval_ms: default_sweep_interval(),
            broadcast_min_interval_ms: default_broadcast_interval(),
            max_playlist_videos: default_max_playlist_videos(),
            downloads_dir: default_downloads_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_downloads, 3);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.dispatch_poll_interval_ms, 500);
        assert_eq!(config.schedule_sweep_interval_ms, 1000);
        assert_eq!(config.max_playlist_videos, 50);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            max_downloads = 5
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_downloads, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.downloads_dir, PathBuf::from("./downloads"));
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_downloads = 1
            max_retries = 0
            dispatch_poll_interval_ms = 50
            schedule_sweep_interval_ms = 100
            broadcast_min_interval_ms = 200
            max_playlist_videos = 10
            downloads_dir = "/data/media"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_downloads, 1);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.dispatch_poll_interval_ms, 50);
        assert_eq!(config.max_playlist_videos, 10);
        assert_eq!(config.downloads_dir, PathBuf::from("/data/media"));
    }
}
