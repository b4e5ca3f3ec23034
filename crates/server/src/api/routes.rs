use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;

use super::{downloads, handlers, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let downloads_dir = state.config().orchestrator.downloads_dir.clone();

    // API routes
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::metrics))
        // Statistics
        .route("/stats", get(downloads::get_stats))
        // Download jobs
        .route("/downloads", post(downloads::submit_download))
        .route("/downloads", get(downloads::list_jobs))
        .route("/downloads", delete(downloads::clear_history))
        .route("/downloads/bulk", post(downloads::submit_bulk))
        .route("/downloads/playlist", post(downloads::submit_playlist))
        .route("/downloads/{id}", get(downloads::get_job))
        .route("/downloads/{id}", delete(downloads::delete_job))
        .route("/downloads/{id}/file", get(downloads::get_job_file))
        .route("/downloads/{id}/cancel", post(downloads::cancel_job))
        .route("/downloads/{id}/schedule", post(downloads::schedule_job))
        // Playlists
        .route("/playlists/analyze", post(downloads::analyze_playlist))
        // Settings
        .route("/settings/max-downloads", post(downloads::set_max_downloads))
        // Real-time updates
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    // Finished files are also served directly from the downloads directory.
    Router::new()
        .nest("/api/v1", api_routes)
        .nest_service("/downloads", ServeDir::new(downloads_dir))
}
