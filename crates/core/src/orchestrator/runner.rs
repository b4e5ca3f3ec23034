//! Download orchestrator implementation.
//!
//! Drives jobs through the state machine automatically:
//! - Dispatch: queued jobs are handed to workers FIFO, up to the
//!   concurrency cap
//! - Workers: one spawned task per active download, cancellable
//! - Schedule sweep: promotes due scheduled jobs back into the queue

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::extractor::{
    Extractor, ExtractorError, FetchRequest, PlaylistEntry, PlaylistInfo, ProbeResult, ProgressFn,
};
use crate::job::{
    CreateJobRequest, DownloadOptions, Job, JobFilter, JobPatch, JobState, JobStore, JobStoreError,
};
use crate::schedule::ScheduleStore;
use crate::stats::Statistics;

use super::config::OrchestratorConfig;
use super::types::{ActiveDownload, OrchestratorError, OrchestratorEvent, OrchestratorStatus};

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/]+\.[^\s/]+").unwrap());

/// A download held by a worker, with its cancellation handle.
struct ActiveEntry {
    info: ActiveDownload,
    cancel: CancellationToken,
}

/// The download orchestrator. Owns the worker pool and the background loops
/// and is the single mutation path for job state.
pub struct DownloadOrchestrator {
    config: OrchestratorConfig,
    job_store: Arc<dyn JobStore>,
    schedule_store: Arc<dyn ScheduleStore>,
    extractor: Arc<dyn Extractor>,

    // Runtime state
    max_downloads: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    active: Arc<RwLock<HashMap<String, ActiveEntry>>>,
    shutdown_tx: broadcast::Sender<()>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DownloadOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        job_store: Arc<dyn JobStore>,
        schedule_store: Arc<dyn ScheduleStore>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events_tx, _) = broadcast::channel(256);
        let max_downloads = Arc::new(AtomicUsize::new(config.max_downloads.max(1)));

        Self {
            config,
            job_store,
            schedule_store,
            extractor,
            max_downloads,
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            events_tx,
        }
    }

    /// Subscribe to job change events.
    pub fn events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    /// Start the orchestrator (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting download orchestrator");

        // Downloads interrupted by a previous shutdown have no worker any
        // more; put them back in the queue.
        self.recover_interrupted_jobs();

        self.spawn_dispatch_loop();
        self.spawn_schedule_sweep_loop();

        info!("Download orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping download orchestrator");

        let _ = self.shutdown_tx.send(());

        // Cancel in-flight downloads so workers exit promptly.
        let active = self.active.read().await;
        for entry in active.values() {
            entry.cancel.cancel();
        }
        drop(active);

        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("Download orchestrator stopped");
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        let active_downloads = self.active.read().await.len();

        let queued_count = self
            .job_store
            .count(&JobFilter::new().with_state(JobState::Queued))
            .unwrap_or(0) as usize;
        let scheduled_count = self
            .job_store
            .count(&JobFilter::new().with_state(JobState::Scheduled))
            .unwrap_or(0) as usize;

        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            active_downloads,
            max_downloads: self.max_downloads.load(Ordering::Relaxed),
            queued_count,
            scheduled_count,
        }
    }

    // ---- Submission ----

    /// Submit a single URL for download. The job is created in `queued` and
    /// metadata resolution happens in the background.
    pub fn submit_single(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<Job, OrchestratorError> {
        let url = url.trim();
        if !URL_RE.is_match(url) {
            return Err(OrchestratorError::InvalidUrl(url.to_string()));
        }

        let job = self.job_store.create(CreateJobRequest {
            source_url: url.to_string(),
            options,
        })?;

        info!("Submitted job {} for {}", job.id, job.source_url);
        self.emit_updated(job.clone());
        self.spawn_metadata_probe(job.id.clone(), job.source_url.clone());

        Ok(job)
    }

    /// Submit many URLs at once. Duplicates are collapsed to their first
    /// occurrence and invalid URLs are skipped; job order follows input
    /// order.
    pub fn submit_bulk(
        &self,
        urls: &[String],
        options: DownloadOptions,
    ) -> Result<Vec<Job>, OrchestratorError> {
        let mut seen = std::collections::HashSet::new();
        let mut jobs = Vec::new();

        for url in urls {
            let url = url.trim();
            if !seen.insert(url.to_string()) {
                continue;
            }
            if !URL_RE.is_match(url) {
                warn!("Skipping invalid URL in bulk submission: {}", url);
                continue;
            }
            jobs.push(self.submit_single(url, options.clone())?);
        }

        if jobs.is_empty() && !urls.is_empty() {
            return Err(OrchestratorError::InvalidUrl(urls[0].clone()));
        }

        Ok(jobs)
    }

    /// Resolve a playlist URL into its entries without creating any jobs.
    /// A plain video URL comes back as a single-entry playlist.
    pub async fn analyze_playlist(&self, url: &str) -> Result<PlaylistInfo, OrchestratorError> {
        let url = url.trim();
        if !URL_RE.is_match(url) {
            return Err(OrchestratorError::InvalidUrl(url.to_string()));
        }

        let mut playlist = match self.extractor.probe(url).await? {
            ProbeResult::Playlist(playlist) => playlist,
            ProbeResult::Single(meta) => PlaylistInfo {
                title: meta.title.clone(),
                entries: vec![PlaylistEntry {
                    url: url.to_string(),
                    title: meta.title,
                }],
            },
        };

        playlist.entries.truncate(self.config.max_playlist_videos);
        Ok(playlist)
    }

    /// Resolve a playlist and submit a job per entry. The per-call bound can
    /// only tighten the configured `max_playlist_videos` cap.
    pub async fn submit_playlist(
        &self,
        url: &str,
        options: DownloadOptions,
        max_videos: Option<usize>,
    ) -> Result<(PlaylistInfo, Vec<Job>), OrchestratorError> {
        let mut playlist = self.analyze_playlist(url).await?;
        let cap = max_videos
            .unwrap_or(self.config.max_playlist_videos)
            .min(self.config.max_playlist_videos);
        playlist.entries.truncate(cap);

        let mut seen = std::collections::HashSet::new();
        let mut jobs = Vec::new();
        for entry in &playlist.entries {
            if !seen.insert(entry.url.clone()) {
                continue;
            }
            match self.submit_single(&entry.url, options.clone()) {
                Ok(job) => {
                    // Flat playlist probes already carry the title.
                    if let Some(ref title) = entry.title {
                        if let Ok(updated) = self.job_store.update(
                            &job.id,
                            JobPatch::new().with_metadata(Some(title.clone()), None, None, None),
                        ) {
                            self.emit_updated(updated.clone());
                            jobs.push(updated);
                            continue;
                        }
                    }
                    jobs.push(job);
                }
                Err(OrchestratorError::InvalidUrl(url)) => {
                    warn!("Skipping invalid playlist entry: {}", url);
                }
                Err(e) => return Err(e),
            }
        }

        Ok((playlist, jobs))
    }

    // ---- Job operations ----

    /// Get a job by id.
    pub fn get_job(&self, id: &str) -> Result<Job, OrchestratorError> {
        self.job_store
            .get(id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(id.to_string()))
    }

    /// List jobs, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.job_store.list(filter)?)
    }

    /// Current statistics snapshot, recomputed from the store.
    pub fn statistics(&self) -> Result<Statistics, OrchestratorError> {
        Ok(Statistics::compute(self.job_store.as_ref())?)
    }

    /// Downloads currently held by workers.
    pub async fn active_downloads(&self) -> Vec<ActiveDownload> {
        self.active
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Defer a job until `fire_at`. Scheduling an already scheduled job
    /// replaces its fire time. Past times are accepted and fire on the next
    /// sweep.
    pub fn schedule(&self, id: &str, fire_at: DateTime<Utc>) -> Result<Job, OrchestratorError> {
        let job = self.get_job(id)?;

        match job.state {
            JobState::Queued | JobState::Scheduled => {}
            state => {
                return Err(OrchestratorError::InvalidState {
                    job_id: id.to_string(),
                    state,
                    reason: "only queued or scheduled jobs can be scheduled".to_string(),
                });
            }
        }

        let job = self
            .job_store
            .update(id, JobPatch::new().with_state(JobState::Scheduled))?;
        self.schedule_store.upsert(id, fire_at)?;

        info!("Scheduled job {} for {}", id, fire_at);
        self.emit_updated(job.clone());
        Ok(job)
    }

    /// Cancel a job. Queued and scheduled jobs cancel immediately; a
    /// downloading job has its worker aborted and its partial output removed.
    pub async fn cancel(&self, id: &str) -> Result<Job, OrchestratorError> {
        let job = self.get_job(id)?;

        match job.state {
            JobState::Queued => {}
            JobState::Scheduled => {
                self.schedule_store.remove(id)?;
            }
            JobState::Downloading => {
                if let Some(entry) = self.active.read().await.get(id) {
                    entry.cancel.cancel();
                }
            }
            state => {
                return Err(OrchestratorError::InvalidState {
                    job_id: id.to_string(),
                    state,
                    reason: "job already finished".to_string(),
                });
            }
        }

        let job = self
            .job_store
            .update(id, JobPatch::new().with_state(JobState::Cancelled))?;

        info!("Cancelled job {}", id);
        self.emit_updated(job.clone());
        Ok(job)
    }

    /// Delete a job record and any file it produced. A downloading job has
    /// its fetch cancelled first, so no worker keeps writing progress for a
    /// removed id.
    pub async fn delete_job(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.get_job(id)?;

        if job.state == JobState::Downloading {
            if let Some(entry) = self.active.read().await.get(id) {
                entry.cancel.cancel();
            }
        }

        self.schedule_store.remove(id)?;
        let job = self.job_store.delete(id)?;

        if let Some(ref path) = job.local_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove file for deleted job {}: {}", id, e);
                }
            }
        }
        Self::cleanup_dest_dir(&self.config.downloads_dir.join(&job.id)).await;

        info!("Deleted job {}", id);
        let _ = self
            .events_tx
            .send(OrchestratorEvent::JobDeleted {
                job_id: id.to_string(),
            });
        Ok(())
    }

    /// Remove every job record and schedule entry. In-flight fetches are
    /// cancelled first, so no worker keeps writing progress for a removed
    /// record. Finished files stay on disk.
    pub async fn clear_history(&self) -> Result<usize, OrchestratorError> {
        let active = self.active.read().await;
        for entry in active.values() {
            entry.cancel.cancel();
        }
        drop(active);

        self.schedule_store.clear()?;
        let removed = self.job_store.clear()?;

        info!("Cleared {} jobs from history", removed);
        let _ = self
            .events_tx
            .send(OrchestratorEvent::HistoryCleared { removed });
        Ok(removed)
    }

    /// Adjust the concurrency cap. Takes effect on future dispatches only;
    /// running downloads are never interrupted.
    pub fn set_max_downloads(&self, value: usize) -> Result<(), OrchestratorError> {
        if value == 0 {
            return Err(OrchestratorError::InvalidSetting(
                "max_downloads must be at least 1".to_string(),
            ));
        }
        self.max_downloads.store(value, Ordering::SeqCst);
        info!("max_downloads set to {}", value);
        Ok(())
    }

    // ---- Internals ----

    fn emit_updated(&self, job: Job) {
        let _ = self.events_tx.send(OrchestratorEvent::JobUpdated(job));
    }

    /// Jobs stuck in `downloading` from a previous run get re-enqueued.
    fn recover_interrupted_jobs(&self) {
        let filter = JobFilter::new()
            .with_state(JobState::Downloading)
            .with_limit(i64::MAX);
        match self.job_store.list(&filter) {
            Ok(jobs) => {
                for job in jobs {
                    info!("Recovering interrupted job {}", job.id);
                    let requeue = self
                        .job_store
                        .update(&job.id, JobPatch::new().with_state(JobState::Failed))
                        .and_then(|_| {
                            self.job_store
                                .update(&job.id, JobPatch::new().with_state(JobState::Queued))
                        });
                    if let Err(e) = requeue {
                        error!("Failed to recover job {}: {}", job.id, e);
                    }
                }
            }
            Err(e) => error!("Failed to list interrupted jobs: {}", e),
        }
    }

    fn spawn_metadata_probe(&self, job_id: String, url: String) {
        let extractor = Arc::clone(&self.extractor);
        let job_store = Arc::clone(&self.job_store);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let meta = match extractor.probe(&url).await {
                Ok(ProbeResult::Single(meta)) => meta,
                Ok(ProbeResult::Playlist(playlist)) => crate::extractor::MediaMetadata {
                    title: playlist.title,
                    ..Default::default()
                },
                Err(e) => {
                    debug!("Metadata probe failed for job {}: {}", job_id, e);
                    return;
                }
            };

            let patch = JobPatch::new().with_metadata(
                meta.title,
                meta.uploader,
                meta.duration_seconds,
                meta.thumbnail_url,
            );
            // The job may have finished or been cancelled while we probed.
            match job_store.update(&job_id, patch) {
                Ok(job) => {
                    let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
                }
                Err(JobStoreError::TerminalState { .. }) | Err(JobStoreError::NotFound(_)) => {}
                Err(e) => warn!("Failed to store metadata for job {}: {}", job_id, e),
            }
        });
    }

    fn spawn_dispatch_loop(&self) {
        let running = Arc::clone(&self.running);
        let job_store = Arc::clone(&self.job_store);
        let extractor = Arc::clone(&self.extractor);
        let active = Arc::clone(&self.active);
        let max_downloads = Arc::clone(&self.max_downloads);
        let config = self.config.clone();
        let events_tx = self.events_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(config.dispatch_poll_interval_ms)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = Self::dispatch_ready(
                            &job_store,
                            &extractor,
                            &active,
                            &max_downloads,
                            &config,
                            &events_tx,
                        ).await {
                            warn!("Dispatch error: {}", e);
                        }
                    }
                }
            }
            info!("Dispatch loop stopped");
        });
    }

    fn spawn_schedule_sweep_loop(&self) {
        let running = Arc::clone(&self.running);
        let job_store = Arc::clone(&self.job_store);
        let schedule_store = Arc::clone(&self.schedule_store);
        let config = self.config.clone();
        let events_tx = self.events_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Schedule sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Schedule sweep loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(config.schedule_sweep_interval_ms)) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        Self::sweep_due_schedules(&job_store, &schedule_store, &events_tx);
                    }
                }
            }
            info!("Schedule sweep loop stopped");
        });
    }

    /// Promote every schedule entry whose fire time has passed.
    fn sweep_due_schedules(
        job_store: &Arc<dyn JobStore>,
        schedule_store: &Arc<dyn ScheduleStore>,
        events_tx: &broadcast::Sender<OrchestratorEvent>,
    ) {
        let due = match schedule_store.due(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                warn!("Failed to read due schedules: {}", e);
                return;
            }
        };

        for entry in due {
            if let Err(e) = schedule_store.remove(&entry.job_id) {
                warn!("Failed to remove schedule entry {}: {}", entry.job_id, e);
                continue;
            }
            match job_store.update(&entry.job_id, JobPatch::new().with_state(JobState::Queued)) {
                Ok(job) => {
                    info!("Promoted scheduled job {} into the queue", job.id);
                    let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
                }
                // The job was cancelled or deleted while scheduled.
                Err(JobStoreError::NotFound(_)) | Err(JobStoreError::TerminalState { .. }) => {}
                Err(e) => warn!("Failed to promote scheduled job {}: {}", entry.job_id, e),
            }
        }
    }

    /// Hand queued jobs to workers until the concurrency cap is reached.
    async fn dispatch_ready(
        job_store: &Arc<dyn JobStore>,
        extractor: &Arc<dyn Extractor>,
        active: &Arc<RwLock<HashMap<String, ActiveEntry>>>,
        max_downloads: &Arc<AtomicUsize>,
        config: &OrchestratorConfig,
        events_tx: &broadcast::Sender<OrchestratorEvent>,
    ) -> Result<(), OrchestratorError> {
        let cap = max_downloads.load(Ordering::Relaxed);
        let in_flight = active.read().await.len();
        if in_flight >= cap {
            return Ok(());
        }

        let ready = job_store.list_ready((cap - in_flight) as i64)?;
        for job in ready {
            let started_at = Utc::now();
            let job = match job_store.update(
                &job.id,
                JobPatch::new()
                    .with_state(JobState::Downloading)
                    .with_started_at(started_at),
            ) {
                Ok(job) => job,
                // Cancelled between listing and claiming.
                Err(JobStoreError::TerminalState { .. }) | Err(JobStoreError::NotFound(_)) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let cancel = CancellationToken::new();
            active.write().await.insert(
                job.id.clone(),
                ActiveEntry {
                    info: ActiveDownload {
                        job_id: job.id.clone(),
                        source_url: job.source_url.clone(),
                        started_at,
                    },
                    cancel: cancel.clone(),
                },
            );

            let _ = events_tx.send(OrchestratorEvent::JobUpdated(job.clone()));
            info!("Dispatching job {} to a worker", job.id);

            Self::spawn_worker(
                job,
                cancel,
                Arc::clone(job_store),
                Arc::clone(extractor),
                Arc::clone(active),
                config.clone(),
                events_tx.clone(),
            );
        }

        Ok(())
    }

    fn spawn_worker(
        job: Job,
        cancel: CancellationToken,
        job_store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        active: Arc<RwLock<HashMap<String, ActiveEntry>>>,
        config: OrchestratorConfig,
        events_tx: broadcast::Sender<OrchestratorEvent>,
    ) {
        tokio::spawn(async move {
            let job_id = job.id.clone();
            let dest_dir = config.downloads_dir.join(&job_id);

            let request = FetchRequest {
                url: job.source_url.clone(),
                dest_dir: dest_dir.clone(),
                options: job.options.clone(),
            };

            let progress = Self::progress_sink(
                job_id.clone(),
                Arc::clone(&job_store),
                events_tx.clone(),
                Duration::from_millis(config.broadcast_min_interval_ms),
            );

            let result = extractor.fetch(request, progress, cancel).await;
            active.write().await.remove(&job_id);

            match result {
                Ok(outcome) => {
                    let patch = JobPatch::new()
                        .with_state(JobState::Completed)
                        .with_progress(100.0, 0, None)
                        .with_result(outcome.local_path.to_string_lossy(), outcome.file_size_bytes)
                        .with_completed_at(Utc::now());
                    match job_store.update(&job_id, patch) {
                        Ok(job) => {
                            info!(
                                "Job {} completed ({} bytes)",
                                job_id, outcome.file_size_bytes
                            );
                            let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
                        }
                        // Cancelled or deleted at the finish line; drop the
                        // output.
                        Err(JobStoreError::TerminalState { .. })
                        | Err(JobStoreError::NotFound(_)) => {
                            Self::cleanup_dest_dir(&dest_dir).await;
                        }
                        Err(e) => error!("Failed to complete job {}: {}", job_id, e),
                    }
                }
                Err(ExtractorError::Cancelled) => {
                    Self::cleanup_dest_dir(&dest_dir).await;
                    // The cancel call usually already moved the job; this
                    // covers cancellation via shutdown.
                    match job_store.update(&job_id, JobPatch::new().with_state(JobState::Cancelled))
                    {
                        Ok(job) => {
                            let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
                        }
                        Err(JobStoreError::TerminalState { .. })
                        | Err(JobStoreError::NotFound(_)) => {}
                        Err(e) => error!("Failed to mark job {} cancelled: {}", job_id, e),
                    }
                }
                Err(e) => {
                    Self::cleanup_dest_dir(&dest_dir).await;
                    Self::handle_fetch_failure(&job_id, e, &job_store, &config, &events_tx);
                }
            }
        });
    }

    /// Persist the failure, then re-enqueue if the job has retries left.
    fn handle_fetch_failure(
        job_id: &str,
        error: ExtractorError,
        job_store: &Arc<dyn JobStore>,
        config: &OrchestratorConfig,
        events_tx: &broadcast::Sender<OrchestratorEvent>,
    ) {
        let failed = job_store.update(
            job_id,
            JobPatch::new()
                .with_state(JobState::Failed)
                .with_error(error.to_string())
                .with_completed_at(Utc::now()),
        );

        let failed = match failed {
            Ok(job) => job,
            Err(JobStoreError::TerminalState { .. }) | Err(JobStoreError::NotFound(_)) => return,
            Err(e) => {
                error!("Failed to mark job {} failed: {}", job_id, e);
                return;
            }
        };
        let _ = events_tx.send(OrchestratorEvent::JobUpdated(failed.clone()));

        if failed.retry_count >= config.max_retries {
            warn!(
                "Job {} failed permanently after {} retries: {}",
                job_id, failed.retry_count, error
            );
            return;
        }

        match job_store.update(
            job_id,
            JobPatch::new()
                .with_state(JobState::Queued)
                .with_retry_count(failed.retry_count + 1),
        ) {
            Ok(job) => {
                info!(
                    "Job {} failed, retry {}/{} queued: {}",
                    job_id,
                    job.retry_count,
                    config.max_retries,
                    error
                );
                let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
            }
            Err(e) => error!("Failed to re-enqueue job {}: {}", job_id, e),
        }
    }

    /// Build the progress callback for a worker. Samples are persisted at
    /// most once per `min_interval` per job; the 100% sample always lands.
    fn progress_sink(
        job_id: String,
        job_store: Arc<dyn JobStore>,
        events_tx: broadcast::Sender<OrchestratorEvent>,
        min_interval: Duration,
    ) -> ProgressFn {
        let last_persisted = std::sync::Mutex::new(None::<std::time::Instant>);

        Arc::new(move |update| {
            let now = std::time::Instant::now();
            {
                let mut last = last_persisted.lock().unwrap();
                let elapsed_enough = last
                    .map(|t| now.duration_since(t) >= min_interval)
                    .unwrap_or(true);
                if !elapsed_enough && update.percent < 100.0 {
                    return;
                }
                *last = Some(now);
            }

            let patch = JobPatch::new().with_progress(
                update.percent,
                update.speed_bytes_per_sec,
                update.eta_seconds,
            );
            match job_store.update(&job_id, patch) {
                Ok(job) => {
                    let _ = events_tx.send(OrchestratorEvent::JobUpdated(job));
                }
                // Terminal already (cancelled mid-flight); the worker will
                // notice shortly.
                Err(JobStoreError::TerminalState { .. }) | Err(JobStoreError::NotFound(_)) => {}
                Err(e) => warn!("Failed to persist progress for job {}: {}", job_id, e),
            }
        })
    }

    async fn cleanup_dest_dir(dest_dir: &PathBuf) {
        if let Err(e) = tokio::fs::remove_dir_all(dest_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up {}: {}", dest_dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(URL_RE.is_match("https://example.com/watch?v=abc"));
        assert!(URL_RE.is_match("http://example.com"));
        assert!(!URL_RE.is_match("example.com/watch"));
        assert!(!URL_RE.is_match("ftp://example.com/file"));
        assert!(!URL_RE.is_match("not a url"));
        assert!(!URL_RE.is_match(""));
    }
}
