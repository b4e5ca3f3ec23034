//! API tests with a mock extractor.
//!
//! The orchestrator stays stopped in most tests so jobs remain `queued` and
//! every response is deterministic. The end-to-end tests at the bottom start
//! the background loops and drive a download to completion.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use streamvault_core::extractor::{PlaylistEntry, PlaylistInfo};
use streamvault_core::testing::MockProbe;
use streamvault_core::JobState;
use streamvault_server::api::ws::{build_stats_update, WsMessage};

use common::TestFixture;

// =============================================================================
// Health / config / stats
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert!(response.body["version"].is_string());
}

#[tokio::test]
async fn test_config_endpoint_redacts_proxy() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["extractor"]["proxy_configured"], true);
    // The proxy URL embeds credentials and must never reach the wire.
    assert!(!response.body.to_string().contains("secret"));
}

#[tokio::test]
async fn test_stats_empty() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/stats").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 0);
    assert_eq!(response.body["queued"], 0);
    assert_eq!(response.body["total_downloaded_bytes"], 0);
    assert_eq!(response.body["average_speed_bytes_per_sec"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&text).contains("streamvault_"));
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_submit_download() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({ "url": "https://example.com/watch?v=abc" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body["id"].is_string());
    assert_eq!(response.body["url"], "https://example.com/watch?v=abc");
    assert_eq!(response.body["state"], "queued");
    assert_eq!(response.body["progress_percent"], 0.0);
    // Option defaults applied when the body carries none.
    assert_eq!(response.body["options"]["quality"], "best");
    assert_eq!(response.body["options"]["format"], "mp4");
}

#[tokio::test]
async fn test_submit_download_with_options() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads",
            json!({
                "url": "https://example.com/watch?v=abc",
                "quality": "720",
                "format": "mp3"
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["options"]["quality"], "720");
    assert_eq!(response.body["options"]["format"], "mp3");
}

#[tokio::test]
async fn test_submit_invalid_url() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/downloads", json!({ "url": "not a url" }))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "invalid_url");
}

#[tokio::test]
async fn test_submit_bulk_deduplicates() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads/bulk",
            json!({
                "urls": [
                    "https://example.com/a",
                    "https://example.com/a",
                    "https://example.com/b"
                ]
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["jobs"][0]["url"], "https://example.com/a");
    assert_eq!(response.body["jobs"][1]["url"], "https://example.com/b");
}

#[tokio::test]
async fn test_submit_bulk_all_invalid() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/downloads/bulk",
            json!({ "urls": ["nope", "also nope"] }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "invalid_url");
}

// =============================================================================
// Listing and lookup
// =============================================================================

#[tokio::test]
async fn test_list_jobs() {
    let fixture = TestFixture::new().await;

    for i in 0..3 {
        fixture
            .post(
                "/api/v1/downloads",
                json!({ "url": format!("https://example.com/v/{}", i) }),
            )
            .await;
    }

    let response = fixture.get("/api/v1/downloads").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 3);
    assert_eq!(response.body["jobs"].as_array().unwrap().len(), 3);

    let filtered = fixture.get("/api/v1/downloads?state=queued&limit=2").await;
    assert_eq!(filtered.body["jobs"].as_array().unwrap().len(), 2);
    assert_eq!(filtered.body["total"], 3);
    assert_eq!(filtered.body["limit"], 2);

    let empty = fixture.get("/api/v1/downloads?state=completed").await;
    assert_eq!(empty.body["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_jobs_unknown_state() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/downloads?state=bogus").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "invalid_state");
}

#[tokio::test]
async fn test_get_job() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture.get(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["id"], id);
}

#[tokio::test]
async fn test_get_missing_job() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/downloads/no-such-job").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["kind"], "not_found");
}

#[tokio::test]
async fn test_get_file_of_unfinished_job() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture
        .get(&format!("/api/v1/downloads/{}/file", id))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["kind"], "invalid_state");
}

// =============================================================================
// Cancel / schedule / delete
// =============================================================================

#[tokio::test]
async fn test_cancel_queued_job() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture
        .post(&format!("/api/v1/downloads/{}/cancel", id), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["state"], "cancelled");

    // Cancelling a finished job is a conflict.
    let again = fixture
        .post(&format!("/api/v1/downloads/{}/cancel", id), json!({}))
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.body["kind"], "invalid_state");
}

#[tokio::test]
async fn test_schedule_job() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let fire_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let response = fixture
        .post(
            &format!("/api/v1/downloads/{}/schedule", id),
            json!({ "fire_at": fire_at }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["state"], "scheduled");
}

#[tokio::test]
async fn test_schedule_with_bad_timestamp() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture
        .post(
            &format!("/api/v1/downloads/{}/schedule", id),
            json!({ "fire_at": "next tuesday" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "invalid_time");
}

#[tokio::test]
async fn test_schedule_finished_job_rejected() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();
    fixture
        .post(&format!("/api/v1/downloads/{}/cancel", id), json!({}))
        .await;

    let fire_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let response = fixture
        .post(
            &format!("/api/v1/downloads/{}/schedule", id),
            json!({ "fire_at": fire_at }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_job() {
    let fixture = TestFixture::new().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let response = fixture.delete(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let gone = fixture.get(&format!("/api/v1/downloads/{}", id)).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_history_removes_all_records() {
    let fixture = TestFixture::new().await;

    let queued = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let cancelled = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/b" }))
        .await;
    let cancelled_id = cancelled.body["id"].as_str().unwrap();
    fixture
        .post(
            &format!("/api/v1/downloads/{}/cancel", cancelled_id),
            json!({}),
        )
        .await;

    let response = fixture.delete("/api/v1/downloads").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["removed"], 2);

    // Waiting jobs go with the finished ones.
    for id in [queued.body["id"].as_str().unwrap(), cancelled_id] {
        let gone = fixture.get(&format!("/api/v1/downloads/{}", id)).await;
        assert_eq!(gone.status, StatusCode::NOT_FOUND);
    }
}

// =============================================================================
// Playlists
// =============================================================================

#[tokio::test]
async fn test_analyze_playlist() {
    let fixture = TestFixture::new().await;

    fixture
        .extractor
        .set_probe(
            "https://example.com/playlist?list=x",
            MockProbe::Playlist(PlaylistInfo {
                title: Some("Mix".to_string()),
                entries: vec![
                    PlaylistEntry {
                        url: "https://example.com/v/1".to_string(),
                        title: Some("One".to_string()),
                    },
                    PlaylistEntry {
                        url: "https://example.com/v/2".to_string(),
                        title: Some("Two".to_string()),
                    },
                ],
            }),
        )
        .await;

    let response = fixture
        .post(
            "/api/v1/playlists/analyze",
            json!({ "url": "https://example.com/playlist?list=x" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["title"], "Mix");
    assert_eq!(response.body["total_videos"], 2);
    assert_eq!(response.body["entries"][1]["title"], "Two");
}

#[tokio::test]
async fn test_submit_playlist() {
    let fixture = TestFixture::new().await;

    fixture
        .extractor
        .set_probe(
            "https://example.com/playlist?list=x",
            MockProbe::Playlist(PlaylistInfo {
                title: Some("Mix".to_string()),
                entries: vec![
                    PlaylistEntry {
                        url: "https://example.com/v/1".to_string(),
                        title: Some("One".to_string()),
                    },
                    PlaylistEntry {
                        url: "https://example.com/v/2".to_string(),
                        title: None,
                    },
                ],
            }),
        )
        .await;

    let response = fixture
        .post(
            "/api/v1/downloads/playlist",
            json!({ "url": "https://example.com/playlist?list=x", "quality": "480" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["playlist_title"], "Mix");
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["jobs"][0]["title"], "One");
    assert_eq!(response.body["jobs"][0]["state"], "queued");
    assert_eq!(response.body["jobs"][0]["options"]["quality"], "480");
}

#[tokio::test]
async fn test_submit_playlist_with_max_videos() {
    let fixture = TestFixture::new().await;

    fixture
        .extractor
        .set_probe(
            "https://example.com/playlist?list=x",
            MockProbe::Playlist(PlaylistInfo {
                title: Some("Mix".to_string()),
                entries: (1..=3)
                    .map(|i| PlaylistEntry {
                        url: format!("https://example.com/v/{}", i),
                        title: None,
                    })
                    .collect(),
            }),
        )
        .await;

    let response = fixture
        .post(
            "/api/v1/downloads/playlist",
            json!({
                "url": "https://example.com/playlist?list=x",
                "max_videos": 2
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["jobs"][1]["url"], "https://example.com/v/2");
}

#[tokio::test]
async fn test_analyze_playlist_not_found() {
    let fixture = TestFixture::new().await;

    fixture
        .extractor
        .set_probe("https://example.com/playlist?list=gone", MockProbe::NotFound)
        .await;

    let response = fixture
        .post(
            "/api/v1/playlists/analyze",
            json!({ "url": "https://example.com/playlist?list=gone" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["kind"], "not_found");
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn test_set_max_downloads() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/settings/max-downloads", json!({ "max_downloads": 5 }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["max_downloads"], 5);

    let zero = fixture
        .post("/api/v1/settings/max-downloads", json!({ "max_downloads": 0 }))
        .await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);
    assert_eq!(zero.body["kind"], "invalid_setting");
}

// =============================================================================
// Live updates
// =============================================================================

#[tokio::test]
async fn test_stats_update_carries_all_waiting_jobs() {
    let fixture = TestFixture::new().await;

    let queued = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let queued_id = queued.body["id"].as_str().unwrap();

    let scheduled = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/b" }))
        .await;
    let scheduled_id = scheduled.body["id"].as_str().unwrap();
    let fire_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    fixture
        .post(
            &format!("/api/v1/downloads/{}/schedule", scheduled_id),
            json!({ "fire_at": fire_at }),
        )
        .await;

    let finished = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/c" }))
        .await;
    let finished_id = finished.body["id"].as_str().unwrap();
    fixture
        .post(&format!("/api/v1/downloads/{}/cancel", finished_id), json!({}))
        .await;

    let WsMessage::StatsUpdate {
        stats,
        active_downloads,
    } = build_stats_update(&fixture.orchestrator).unwrap()
    else {
        panic!("expected a stats_update message");
    };

    // Every unfinished job is in the map, keyed by id; terminal jobs only
    // show up in the counters.
    assert_eq!(stats.total, 3);
    assert_eq!(active_downloads.len(), 2);
    assert_eq!(active_downloads[queued_id].state, JobState::Queued);
    assert_eq!(active_downloads[scheduled_id].state, JobState::Scheduled);
    assert!(!active_downloads.contains_key(finished_id));
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test]
async fn test_download_completes_and_file_is_served() {
    let fixture = TestFixture::new().await;
    fixture.start().await;

    let created = fixture
        .post("/api/v1/downloads", json!({ "url": "https://example.com/a" }))
        .await;
    let id = created.body["id"].as_str().unwrap();

    let job = fixture.wait_for_state(id, "completed").await;
    assert_eq!(job["progress_percent"], 100.0);
    assert_eq!(job["file_size_bytes"], 1024);
    assert!(job["local_path"].as_str().unwrap().ends_with("video.mp4"));

    let response = fixture
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/downloads/{}/file", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "video/mp4"
    );
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("attachment"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), 1024);

    let stats = fixture.get("/api/v1/stats").await;
    assert_eq!(stats.body["completed"], 1);
    assert_eq!(stats.body["total_downloaded_bytes"], 1024);
}

#[tokio::test]
async fn test_failed_download_reports_error() {
    let fixture = TestFixture::new().await;
    fixture
        .extractor
        .set_fetch_plan(
            "https://example.com/broken",
            streamvault_core::testing::FetchPlan::failure("codec mismatch"),
        )
        .await;
    fixture.start().await;

    let created = fixture
        .post(
            "/api/v1/downloads",
            json!({ "url": "https://example.com/broken" }),
        )
        .await;
    let id = created.body["id"].as_str().unwrap();

    let job = fixture.wait_for_state(id, "failed").await;
    assert!(job["error_message"]
        .as_str()
        .unwrap()
        .contains("codec mismatch"));
}
