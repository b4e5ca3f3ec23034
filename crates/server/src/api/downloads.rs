//! Download job API handlers.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use streamvault_core::{
    extractor::{ExtractorError, PlaylistInfo},
    DownloadOptions, Job, JobFilter, JobState, OrchestratorError, Statistics,
};

use crate::metrics::JOBS_SUBMITTED_TOTAL;
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a single download
#[derive(Debug, Deserialize)]
pub struct SubmitDownloadBody {
    pub url: String,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

/// Request body for submitting many downloads at once
#[derive(Debug, Deserialize)]
pub struct BulkDownloadBody {
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

/// Request body for playlist analysis
#[derive(Debug, Deserialize)]
pub struct AnalyzePlaylistBody {
    pub url: String,
}

/// Request body for playlist submission
#[derive(Debug, Deserialize)]
pub struct SubmitPlaylistBody {
    pub url: String,
    /// Optional per-request cap on the number of videos submitted.
    #[serde(default)]
    pub max_videos: Option<usize>,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

/// Request body for scheduling a job
#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    /// RFC 3339 timestamp the job should start at.
    pub fire_at: String,
}

/// Request body for adjusting the concurrency cap
#[derive(Debug, Deserialize)]
pub struct MaxDownloadsBody {
    pub max_downloads: usize,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by state name
    pub state: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for job operations
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub url: String,
    pub state: JobState,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub options: DownloadOptions,
    pub progress_percent: f32,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub local_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            url: job.source_url,
            state: job.state,
            title: job.title,
            uploader: job.uploader,
            duration_seconds: job.duration_seconds,
            thumbnail_url: job.thumbnail_url,
            options: job.options,
            progress_percent: job.progress_percent,
            speed_bytes_per_sec: job.speed_bytes_per_sec,
            eta_seconds: job.eta_seconds,
            file_size_bytes: job.file_size_bytes,
            local_path: job.local_path,
            error_message: job.error_message,
            retry_count: job.retry_count,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for bulk and playlist submissions
#[derive(Debug, Serialize)]
pub struct BulkSubmitResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

/// One playlist entry in an analysis response
#[derive(Debug, Serialize)]
pub struct PlaylistEntryResponse {
    pub url: String,
    pub title: Option<String>,
}

/// Response for playlist analysis
#[derive(Debug, Serialize)]
pub struct AnalyzePlaylistResponse {
    pub title: Option<String>,
    pub total_videos: usize,
    pub entries: Vec<PlaylistEntryResponse>,
}

impl From<PlaylistInfo> for AnalyzePlaylistResponse {
    fn from(playlist: PlaylistInfo) -> Self {
        Self {
            title: playlist.title,
            total_videos: playlist.entries.len(),
            entries: playlist
                .entries
                .into_iter()
                .map(|e| PlaylistEntryResponse {
                    url: e.url,
                    title: e.title,
                })
                .collect(),
        }
    }
}

/// Response for submitting a playlist
#[derive(Debug, Serialize)]
pub struct SubmitPlaylistResponse {
    pub playlist_title: Option<String>,
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

/// Response for clearing history
#[derive(Debug, Serialize)]
pub struct ClearHistoryResponse {
    pub removed: usize,
}

/// Response for setting the concurrency cap
#[derive(Debug, Serialize)]
pub struct MaxDownloadsResponse {
    pub max_downloads: usize,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
}

type ErrorReply = (StatusCode, Json<ApiError>);

/// Map an orchestrator error to a status code and wire error kind.
pub fn error_response(err: OrchestratorError) -> ErrorReply {
    let (status, kind) = match &err {
        OrchestratorError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
        OrchestratorError::InvalidTime(_) => (StatusCode::BAD_REQUEST, "invalid_time"),
        OrchestratorError::InvalidSetting(_) => (StatusCode::BAD_REQUEST, "invalid_setting"),
        OrchestratorError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        OrchestratorError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        OrchestratorError::Extractor(e) => match e {
            ExtractorError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            ExtractorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ExtractorError::Unsupported(_) => (StatusCode::BAD_REQUEST, "unsupported"),
            ExtractorError::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            _ => (StatusCode::BAD_GATEWAY, "extract_error"),
        },
        OrchestratorError::Store(_) | OrchestratorError::Schedule(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "store_error")
        }
    };

    (
        status,
        Json(ApiError {
            kind,
            message: err.to_string(),
        }),
    )
}

fn parse_state(name: &str) -> Result<JobState, ErrorReply> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                kind: "invalid_state",
                message: format!("Unknown job state: {}", name),
            }),
        )
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a single download
pub async fn submit_download(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitDownloadBody>,
) -> Result<(StatusCode, Json<JobResponse>), ErrorReply> {
    let job = state
        .orchestrator()
        .submit_single(&body.url, body.options)
        .map_err(error_response)?;

    JOBS_SUBMITTED_TOTAL.inc();
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Submit many downloads at once
pub async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkDownloadBody>,
) -> Result<(StatusCode, Json<BulkSubmitResponse>), ErrorReply> {
    let jobs = state
        .orchestrator()
        .submit_bulk(&body.urls, body.options)
        .map_err(error_response)?;

    for _ in &jobs {
        JOBS_SUBMITTED_TOTAL.inc();
    }
    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    Ok((
        StatusCode::CREATED,
        Json(BulkSubmitResponse {
            total: jobs.len(),
            jobs,
        }),
    ))
}

/// Resolve a playlist URL into its entries without creating any jobs
pub async fn analyze_playlist(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzePlaylistBody>,
) -> Result<Json<AnalyzePlaylistResponse>, ErrorReply> {
    let playlist = state
        .orchestrator()
        .analyze_playlist(&body.url)
        .await
        .map_err(error_response)?;

    Ok(Json(AnalyzePlaylistResponse::from(playlist)))
}

/// Submit a job per playlist entry
pub async fn submit_playlist(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitPlaylistBody>,
) -> Result<(StatusCode, Json<SubmitPlaylistResponse>), ErrorReply> {
    let (playlist, jobs) = state
        .orchestrator()
        .submit_playlist(&body.url, body.options, body.max_videos)
        .await
        .map_err(error_response)?;

    for _ in &jobs {
        JOBS_SUBMITTED_TOTAL.inc();
    }
    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    Ok((
        StatusCode::CREATED,
        Json(SubmitPlaylistResponse {
            playlist_title: playlist.title,
            total: jobs.len(),
            jobs,
        }),
    ))
}

/// List jobs with optional filters, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ErrorReply> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref name) = params.state {
        filter = filter.with_state(parse_state(name)?);
    }

    let jobs = state
        .orchestrator()
        .list_jobs(&filter)
        .map_err(error_response)?;

    let total = state
        .orchestrator()
        .statistics()
        .map(|stats| match filter.state {
            Some(JobState::Queued) => stats.queued,
            Some(JobState::Scheduled) => stats.scheduled,
            Some(JobState::Downloading) => stats.downloading,
            Some(JobState::Completed) => stats.completed,
            Some(JobState::Failed) => stats.failed,
            Some(JobState::Cancelled) => stats.cancelled,
            None => stats.total,
        })
        .map_err(error_response)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ErrorReply> {
    let job = state.orchestrator().get_job(&id).map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}

/// Stream the finished file of a completed job
pub async fn get_job_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ErrorReply> {
    let job = state.orchestrator().get_job(&id).map_err(error_response)?;

    let path = match (&job.state, &job.local_path) {
        (JobState::Completed, Some(path)) => path.clone(),
        _ => {
            return Err((
                StatusCode::CONFLICT,
                Json(ApiError {
                    kind: "invalid_state",
                    message: format!("Job {} has no finished file", id),
                }),
            ));
        }
    };

    let file = tokio::fs::File::open(&path).await.map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                kind: "not_found",
                message: format!("File for job {} is missing on disk", id),
            }),
        )
    })?;

    let filename = std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.bin", id));

    let content_type = match std::path::Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    };

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(body)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    kind: "store_error",
                    message: e.to_string(),
                }),
            )
        })
}

/// Cancel a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ErrorReply> {
    let job = state
        .orchestrator()
        .cancel(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}

/// Defer a job to a later start time
pub async fn schedule_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<JobResponse>, ErrorReply> {
    let fire_at = DateTime::parse_from_rfc3339(&body.fire_at)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| {
            error_response(OrchestratorError::InvalidTime(format!(
                "{}: {}",
                body.fire_at, e
            )))
        })?;

    let job = state
        .orchestrator()
        .schedule(&id, fire_at)
        .map_err(error_response)?;
    Ok(Json(JobResponse::from(job)))
}

/// Delete a job record and its file
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorReply> {
    state
        .orchestrator()
        .delete_job(&id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove every job record, cancelling in-flight downloads first
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearHistoryResponse>, ErrorReply> {
    let removed = state
        .orchestrator()
        .clear_history()
        .await
        .map_err(error_response)?;
    Ok(Json(ClearHistoryResponse { removed }))
}

/// Current statistics snapshot
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Statistics>, ErrorReply> {
    let stats = state.orchestrator().statistics().map_err(error_response)?;
    crate::metrics::update_job_gauges(&stats);
    Ok(Json(stats))
}

/// Adjust the download concurrency cap at runtime
pub async fn set_max_downloads(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MaxDownloadsBody>,
) -> Result<Json<MaxDownloadsResponse>, ErrorReply> {
    state
        .orchestrator()
        .set_max_downloads(body.max_downloads)
        .map_err(error_response)?;
    Ok(Json(MaxDownloadsResponse {
        max_downloads: body.max_downloads,
    }))
}
