//! Media extraction: URL probing and download execution.
//!
//! The [`Extractor`] trait hides the yt-dlp subprocess behind a seam so the
//! orchestrator can be tested against a scripted mock.

mod types;
mod ytdlp;

pub use types::{
    Extractor, ExtractorError, FetchOutcome, FetchRequest, MediaMetadata, PlaylistEntry,
    PlaylistInfo, ProbeResult, ProgressFn, ProgressUpdate,
};
pub use ytdlp::{YtDlpConfig, YtDlpExtractor};
