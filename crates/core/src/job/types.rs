//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a download job.
///
/// Exactly one of the non-terminal states holds at a time; `completed`,
/// `failed` and `cancelled` are terminal, except for the `failed -> queued`
/// retry transition driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the dispatch queue.
    Queued,
    /// Deferred; a ScheduleEntry holds the fire time.
    Scheduled,
    /// A worker is running the extractor fetch.
    Downloading,
    /// Download finished; `file_size_bytes` and `local_path` are set.
    Completed,
    /// Download failed; `error_message` is set.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl JobState {
    /// String name used in filters and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Scheduled => "scheduled",
            JobState::Downloading => "downloading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further mutation (retry excepted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether this state can transition to `next`.
    ///
    /// Identity transitions are allowed as no-ops for non-terminal states
    /// (e.g. replacing a schedule keeps the job in `scheduled`).
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        if *self == next {
            return !self.is_terminal();
        }
        matches!(
            (*self, next),
            (Queued, Downloading)
                | (Queued, Scheduled)
                | (Queued, Cancelled)
                | (Scheduled, Queued)
                | (Scheduled, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                // Automatic retry re-enqueues a failed job.
                | (Failed, Queued)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested output quality cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080")]
    P1080,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "360")]
    P360,
}

impl Quality {
    /// Height cap in pixels, if this quality is a cap.
    pub fn max_height(&self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }
}

/// Requested output container/codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    #[default]
    Mp4,
    Mp3,
    Mkv,
    Webm,
}

impl MediaFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Mkv => "mkv",
            MediaFormat::Webm => "webm",
        }
    }

    /// Audio-only formats go through extraction instead of remuxing.
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaFormat::Mp3)
    }
}

/// User-chosen download options, immutable per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub format: MediaFormat,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    /// Optional proxy URL passed through to the extractor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_filename_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            format: MediaFormat::default(),
            filename_template: default_filename_template(),
            proxy: None,
        }
    }
}

/// One tracked download unit for a single video URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, assigned at creation.
    pub id: String,
    /// The submitted URL; immutable.
    pub source_url: String,
    pub state: JobState,

    // Metadata, resolved asynchronously by the extractor probe.
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,

    pub options: DownloadOptions,

    // Transient progress, updated only while downloading and frozen at the
    // last value on any terminal transition.
    pub progress_percent: f32,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,

    // Set only on completion.
    pub file_size_bytes: Option<u64>,
    pub local_path: Option<String>,

    // Set only on failure.
    pub error_message: Option<String>,

    pub retry_count: u32,
    /// FIFO ordinal; reassigned on every transition into `queued`, so
    /// retried jobs land at the back of the dispatch queue.
    pub queue_seq: i64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job should appear in the live-update map sent to
    /// observers.
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}
