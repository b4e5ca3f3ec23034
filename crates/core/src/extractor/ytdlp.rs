//! yt-dlp subprocess extractor.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{
    Extractor, ExtractorError, FetchOutcome, FetchRequest, MediaMetadata, PlaylistEntry,
    PlaylistInfo, ProbeResult, ProgressFn, ProgressUpdate,
};

/// Marker prefixed to progress lines so they can be told apart from the rest
/// of yt-dlp's stdout.
const PROGRESS_MARKER: &str = "sv-progress:";

/// Configuration for the yt-dlp extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Extra arguments appended to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Default proxy URL, used when a job does not carry its own.
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_binary() -> String {
    "yt-dlp".to_string()
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            extra_args: Vec::new(),
            proxy: None,
        }
    }
}

/// Extractor backed by the yt-dlp command-line tool.
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn classify_failure(stderr: &str) -> ExtractorError {
        let lower = stderr.to_lowercase();
        if lower.contains("is not a valid url") {
            ExtractorError::InvalidUrl(first_error_line(stderr))
        } else if lower.contains("unsupported url") {
            ExtractorError::Unsupported(first_error_line(stderr))
        } else if lower.contains("404")
            || lower.contains("video unavailable")
            || lower.contains("does not exist")
            || lower.contains("private video")
        {
            ExtractorError::NotFound(first_error_line(stderr))
        } else {
            ExtractorError::ExtractFailed(first_error_line(stderr))
        }
    }

    fn build_fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{}%(progress._percent_str)s|%(progress.speed)s|%(progress.eta)s",
                PROGRESS_MARKER
            ),
            "--no-simulate".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            request
                .dest_dir
                .join(&request.options.filename_template)
                .to_string_lossy()
                .into_owned(),
        ];

        if request.options.format.is_audio() {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(request.options.format.extension().to_string());
        } else {
            let selector = match request.options.quality.max_height() {
                Some(h) => format!(
                    "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"
                ),
                None => "bestvideo+bestaudio/best".to_string(),
            };
            args.push("-f".to_string());
            args.push(selector);
            args.push("--merge-output-format".to_string());
            args.push(request.options.format.extension().to_string());
        }

        if let Some(proxy) = request.options.proxy.as_ref().or(self.config.proxy.as_ref()) {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(request.url.clone());
        args
    }
}

/// Parse one `--progress-template` stdout line.
///
/// Lines look like `sv-progress:  42.3%|1048576.0|17`, with `NA` standing in
/// for fields yt-dlp has no value for yet.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let payload = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut parts = payload.split('|');

    let percent = parts
        .next()?
        .trim()
        .trim_end_matches('%')
        .parse::<f32>()
        .ok()?
        .clamp(0.0, 100.0);

    let speed = parts
        .next()
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .map(|s| s.max(0.0) as u64)
        .unwrap_or(0);

    let eta = parts
        .next()
        .map(str::trim)
        .and_then(|s| s.parse::<u64>().ok());

    Some(ProgressUpdate {
        percent,
        speed_bytes_per_sec: speed,
        eta_seconds: eta,
    })
}

#[derive(Debug, Deserialize)]
struct ProbeJson {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    entries: Option<Vec<ProbeEntryJson>>,
}

#[derive(Debug, Deserialize)]
struct ProbeEntryJson {
    url: Option<String>,
    title: Option<String>,
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| stderr.lines().find(|l| !l.trim().is_empty()))
        .unwrap_or("unknown error")
        .to_string()
}

fn parse_probe_output(json: &str) -> Result<ProbeResult, ExtractorError> {
    let parsed: ProbeJson = serde_json::from_str(json)
        .map_err(|e| ExtractorError::ExtractFailed(format!("bad probe output: {}", e)))?;

    if parsed.kind.as_deref() == Some("playlist") {
        let entries = parsed
            .entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| {
                e.url.map(|url| PlaylistEntry {
                    url,
                    title: e.title,
                })
            })
            .collect();
        Ok(ProbeResult::Playlist(PlaylistInfo {
            title: parsed.title,
            entries,
        }))
    } else {
        Ok(ProbeResult::Single(MediaMetadata {
            title: parsed.title,
            uploader: parsed.uploader.or(parsed.channel),
            duration_seconds: parsed.duration.map(|d| d.max(0.0) as u64),
            thumbnail_url: parsed.thumbnail,
        }))
    }
}

#[async_trait::async_trait]
impl Extractor for YtDlpExtractor {
    async fn probe(&self, url: &str) -> Result<ProbeResult, ExtractorError> {
        debug!("Probing URL: {}", url);

        let output = Command::new(&self.config.binary)
            .args(["-J", "--flat-playlist", "--no-warnings"])
            .args(&self.config.extra_args)
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExtractorError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_failure(&stderr));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ExtractorError> {
        tokio::fs::create_dir_all(&request.dest_dir)
            .await
            .map_err(|e| ExtractorError::Process(e.to_string()))?;

        let args = self.build_fetch_args(&request);
        debug!("Running {} {}", self.config.binary, args.join(" "));

        let mut child = Command::new(&self.config.binary)
            .args(&self.config.extra_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractorError::Process(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Process("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Process("no stderr pipe".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut final_path: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(ExtractorError::Cancelled);
                }
                line = lines.next_line() => {
                    match line.map_err(|e| ExtractorError::Process(e.to_string()))? {
                        Some(line) => {
                            if let Some(update) = parse_progress_line(&line) {
                                progress(update);
                            } else if !line.trim().is_empty() {
                                // The only non-progress print is the final
                                // filepath requested via --print.
                                final_path = Some(line.trim().to_string());
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(ExtractorError::Cancelled);
            }
            status = child.wait() => {
                status.map_err(|e| ExtractorError::Process(e.to_string()))?
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            warn!("yt-dlp exited with {}: {}", status, first_error_line(&stderr));
            return Err(Self::classify_failure(&stderr));
        }

        let path = final_path
            .ok_or_else(|| ExtractorError::ExtractFailed("no output file reported".to_string()))?;
        let local_path = std::path::PathBuf::from(path);

        let metadata = tokio::fs::metadata(&local_path)
            .await
            .map_err(|e| ExtractorError::Process(e.to_string()))?;

        Ok(FetchOutcome {
            file_size_bytes: metadata.len(),
            local_path,
        })
    }
}
