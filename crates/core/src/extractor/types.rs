//! Extractor trait and data types.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::DownloadOptions;

/// Errors surfaced by an extractor.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The input is not a syntactically valid URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL points at media that does not exist or is gone.
    #[error("media not found: {0}")]
    NotFound(String),

    /// The site or URL shape is not supported by the extractor.
    #[error("unsupported URL: {0}")]
    Unsupported(String),

    /// The fetch was cancelled via the cancellation token.
    #[error("fetch cancelled")]
    Cancelled,

    /// Extraction failed for any other reason.
    #[error("extraction failed: {0}")]
    ExtractFailed(String),

    /// Failure spawning or talking to the extractor process.
    #[error("extractor process error: {0}")]
    Process(String),
}

/// Metadata resolved for a single video URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
}

/// One entry of a resolved playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: Option<String>,
}

/// A resolved playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub title: Option<String>,
    pub entries: Vec<PlaylistEntry>,
}

/// Result of probing a URL: either a single video or a playlist.
#[derive(Debug, Clone)]
pub enum ProbeResult {
    Single(MediaMetadata),
    Playlist(PlaylistInfo),
}

/// A progress sample from an in-flight fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f32,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
}

/// Callback invoked with progress samples during a fetch.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Everything a fetch needs: what to get, where to put it, and how.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Directory the output file lands in. The caller owns this directory
    /// and may remove it wholesale on cancellation.
    pub dest_dir: PathBuf,
    pub options: DownloadOptions,
}

/// The result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub local_path: PathBuf,
    pub file_size_bytes: u64,
}

/// Seam between the orchestrator and the media extraction backend.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve metadata for a URL without downloading anything. Detects
    /// whether the URL is a single video or a playlist.
    async fn probe(&self, url: &str) -> Result<ProbeResult, ExtractorError>;

    /// Download the media to `request.dest_dir`, reporting progress through
    /// `progress` and aborting promptly when `cancel` fires.
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ExtractorError>;
}
