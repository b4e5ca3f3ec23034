//! Mock extractor for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::extractor::{
    Extractor, ExtractorError, FetchOutcome, FetchRequest, MediaMetadata, PlaylistInfo,
    ProbeResult, ProgressFn, ProgressUpdate,
};

/// Scripted probe outcome for a URL.
#[derive(Debug, Clone)]
pub enum MockProbe {
    Single(MediaMetadata),
    Playlist(PlaylistInfo),
    InvalidUrl,
    NotFound,
    Unsupported,
    Error(String),
}

/// Scripted fetch behavior for a URL.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    /// Progress samples emitted in order before the outcome.
    pub steps: Vec<ProgressUpdate>,
    /// Delay before each step and before the outcome.
    pub step_delay: Duration,
    /// How many times the fetch fails before `outcome` applies.
    pub failures_before_success: u32,
    /// Error message used for scripted failures.
    pub failure_message: String,
    /// What happens after the steps.
    pub outcome: FetchResult,
}

/// Terminal behavior of a scripted fetch.
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// Write a file of `size_bytes` into the destination directory.
    Success { size_bytes: u64 },
    /// Always fail with the plan's failure message.
    Failure,
    /// Never finish; only a cancellation ends the fetch.
    Hold,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            step_delay: Duration::from_millis(0),
            failures_before_success: 0,
            failure_message: "mock fetch failed".to_string(),
            outcome: FetchResult::Success { size_bytes: 1024 },
        }
    }
}

impl FetchPlan {
    /// A plan that succeeds immediately with the given file size.
    pub fn success(size_bytes: u64) -> Self {
        Self {
            outcome: FetchResult::Success { size_bytes },
            ..Default::default()
        }
    }

    /// A plan that always fails.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            failure_message: message.into(),
            outcome: FetchResult::Failure,
            ..Default::default()
        }
    }

    /// A plan that fails `n` times, then succeeds.
    pub fn flaky(n: u32, size_bytes: u64) -> Self {
        Self {
            failures_before_success: n,
            outcome: FetchResult::Success { size_bytes },
            ..Default::default()
        }
    }

    /// A plan that blocks until cancelled.
    pub fn hold() -> Self {
        Self {
            outcome: FetchResult::Hold,
            ..Default::default()
        }
    }

    pub fn with_steps(mut self, steps: Vec<ProgressUpdate>, step_delay: Duration) -> Self {
        self.steps = steps;
        self.step_delay = step_delay;
        self
    }
}

/// Mock implementation of the Extractor trait.
///
/// Provides controllable behavior for testing:
/// - Script probe results and fetch outcomes per URL
/// - Record fetch order for dispatch assertions
/// - Simulate slow downloads, failures and hangs
#[derive(Debug)]
pub struct MockExtractor {
    probes: Arc<RwLock<HashMap<String, MockProbe>>>,
    plans: Arc<RwLock<HashMap<String, FetchPlan>>>,
    /// Remaining scripted failures by URL.
    failures_left: Arc<RwLock<HashMap<String, u32>>>,
    /// URLs in the order fetches started.
    fetch_log: Arc<RwLock<Vec<String>>>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            probes: Arc::new(RwLock::new(HashMap::new())),
            plans: Arc::new(RwLock::new(HashMap::new())),
            failures_left: Arc::new(RwLock::new(HashMap::new())),
            fetch_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script the probe result for a URL.
    pub async fn set_probe(&self, url: &str, probe: MockProbe) {
        self.probes.write().await.insert(url.to_string(), probe);
    }

    /// Script the fetch behavior for a URL.
    pub async fn set_fetch_plan(&self, url: &str, plan: FetchPlan) {
        self.failures_left
            .write()
            .await
            .insert(url.to_string(), plan.failures_before_success);
        self.plans.write().await.insert(url.to_string(), plan);
    }

    /// URLs in the order their fetches started.
    pub async fn fetch_log(&self) -> Vec<String> {
        self.fetch_log.read().await.clone()
    }

    fn probe_error(probe: &MockProbe, url: &str) -> Option<ExtractorError> {
        match probe {
            MockProbe::InvalidUrl => Some(ExtractorError::InvalidUrl(url.to_string())),
            MockProbe::NotFound => Some(ExtractorError::NotFound(url.to_string())),
            MockProbe::Unsupported => Some(ExtractorError::Unsupported(url.to_string())),
            MockProbe::Error(msg) => Some(ExtractorError::ExtractFailed(msg.clone())),
            _ => None,
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn probe(&self, url: &str) -> Result<ProbeResult, ExtractorError> {
        let probes = self.probes.read().await;
        match probes.get(url) {
            Some(MockProbe::Single(meta)) => Ok(ProbeResult::Single(meta.clone())),
            Some(MockProbe::Playlist(playlist)) => Ok(ProbeResult::Playlist(playlist.clone())),
            Some(probe) => Err(Self::probe_error(probe, url).unwrap()),
            // Unscripted URLs resolve to a bare single video.
            None => Ok(ProbeResult::Single(MediaMetadata::default())),
        }
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, ExtractorError> {
        self.fetch_log.write().await.push(request.url.clone());

        let plan = self
            .plans
            .read()
            .await
            .get(&request.url)
            .cloned()
            .unwrap_or_default();

        for step in &plan.steps {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExtractorError::Cancelled),
                _ = tokio::time::sleep(plan.step_delay) => progress(*step),
            }
        }

        {
            let mut failures = self.failures_left.write().await;
            if let Some(left) = failures.get_mut(&request.url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ExtractorError::ExtractFailed(plan.failure_message));
                }
            }
        }

        match plan.outcome {
            FetchResult::Failure => Err(ExtractorError::ExtractFailed(plan.failure_message)),
            FetchResult::Hold => {
                cancel.cancelled().await;
                Err(ExtractorError::Cancelled)
            }
            FetchResult::Success { size_bytes } => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExtractorError::Cancelled),
                    _ = tokio::time::sleep(plan.step_delay) => {}
                }

                tokio::fs::create_dir_all(&request.dest_dir)
                    .await
                    .map_err(|e| ExtractorError::Process(e.to_string()))?;
                let local_path = request
                    .dest_dir
                    .join(format!("video.{}", request.options.format.extension()));
                tokio::fs::write(&local_path, vec![0u8; size_bytes as usize])
                    .await
                    .map_err(|e| ExtractorError::Process(e.to_string()))?;

                Ok(FetchOutcome {
                    local_path,
                    file_size_bytes: size_bytes,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DownloadOptions;
    use std::path::PathBuf;

    fn request(url: &str, dir: &std::path::Path) -> FetchRequest {
        FetchRequest {
            url: url.to_string(),
            dest_dir: PathBuf::from(dir),
            options: DownloadOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_unscripted_fetch_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let extractor = MockExtractor::new();

        let outcome = extractor
            .fetch(
                request("https://e.com/a", temp.path()),
                Arc::new(|_| {}),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.file_size_bytes, 1024);
        assert!(outcome.local_path.exists());
        assert_eq!(extractor.fetch_log().await, vec!["https://e.com/a"]);
    }

    #[tokio::test]
    async fn test_flaky_plan_fails_then_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let extractor = MockExtractor::new();
        extractor
            .set_fetch_plan("https://e.com/a", FetchPlan::flaky(1, 64))
            .await;

        let result = extractor
            .fetch(
                request("https://e.com/a", temp.path()),
                Arc::new(|_| {}),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ExtractorError::ExtractFailed(_))));

        let outcome = extractor
            .fetch(
                request("https://e.com/a", temp.path()),
                Arc::new(|_| {}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.file_size_bytes, 64);
    }

    #[tokio::test]
    async fn test_hold_plan_waits_for_cancellation() {
        let temp = tempfile::tempdir().unwrap();
        let extractor = MockExtractor::new();
        extractor
            .set_fetch_plan("https://e.com/a", FetchPlan::hold())
            .await;

        let cancel = CancellationToken::new();
        let handle = {
            let req = request("https://e.com/a", temp.path());
            let cancel = cancel.clone();
            let extractor = Arc::new(extractor);
            let ex = Arc::clone(&extractor);
            tokio::spawn(async move { ex.fetch(req, Arc::new(|_| {}), cancel).await })
        };

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ExtractorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_scripted_probe() {
        let extractor = MockExtractor::new();
        extractor
            .set_probe("https://e.com/gone", MockProbe::NotFound)
            .await;

        let result = extractor.probe("https://e.com/gone").await;
        assert!(matches!(result, Err(ExtractorError::NotFound(_))));
    }
}
