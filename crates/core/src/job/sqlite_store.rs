//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    CreateJobRequest, DownloadOptions, Job, JobFilter, JobPatch, JobState, JobStore, JobStoreError,
};

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables
    /// if needed.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(|e| JobStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| JobStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                state TEXT NOT NULL,
                title TEXT,
                uploader TEXT,
                duration_seconds INTEGER,
                thumbnail_url TEXT,
                options TEXT NOT NULL,
                progress_percent REAL NOT NULL DEFAULT 0,
                speed_bytes_per_sec INTEGER NOT NULL DEFAULT 0,
                eta_seconds INTEGER,
                file_size_bytes INTEGER,
                local_path TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                queue_seq INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_queue_seq ON jobs(queue_seq);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(())
    }

    const COLUMNS: &'static str = "id, source_url, state, title, uploader, duration_seconds, \
         thumbnail_url, options, progress_percent, speed_bytes_per_sec, eta_seconds, \
         file_size_bytes, local_path, error_message, retry_count, queue_seq, created_at, \
         started_at, completed_at, updated_at";

    fn state_from_str(s: &str) -> JobState {
        match s {
            "scheduled" => JobState::Scheduled,
            "downloading" => JobState::Downloading,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "cancelled" => JobState::Cancelled,
            _ => JobState::Queued,
        }
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let state_str: String = row.get(2)?;
        let options_json: String = row.get(7)?;
        let created_at_str: String = row.get(16)?;
        let started_at_str: Option<String> = row.get(17)?;
        let completed_at_str: Option<String> = row.get(18)?;
        let updated_at_str: String = row.get(19)?;

        let options: DownloadOptions =
            serde_json::from_str(&options_json).unwrap_or_default();

        Ok(Job {
            id: row.get(0)?,
            source_url: row.get(1)?,
            state: Self::state_from_str(&state_str),
            title: row.get(3)?,
            uploader: row.get(4)?,
            duration_seconds: row.get(5)?,
            thumbnail_url: row.get(6)?,
            options,
            progress_percent: row.get(8)?,
            speed_bytes_per_sec: row.get(9)?,
            eta_seconds: row.get(10)?,
            file_size_bytes: row.get(11)?,
            local_path: row.get(12)?,
            error_message: row.get(13)?,
            retry_count: row.get(14)?,
            queue_seq: row.get(15)?,
            created_at: Self::parse_timestamp(&created_at_str),
            started_at: started_at_str.as_deref().map(Self::parse_timestamp),
            completed_at: completed_at_str.as_deref().map(Self::parse_timestamp),
            updated_at: Self::parse_timestamp(&updated_at_str),
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Job, JobStoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", Self::COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_job)
            .optional()
            .map_err(|e| JobStoreError::Database(e.to_string()))?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    fn next_queue_seq(conn: &Connection) -> Result<i64, JobStoreError> {
        conn.query_row(
            "SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM jobs",
            [],
            |row| row.get(0),
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))
    }

    /// Validate a patch against the current job state.
    fn validate_patch(current: &Job, patch: &JobPatch) -> Result<(), JobStoreError> {
        match patch.state {
            Some(next) => {
                if !current.state.can_transition_to(next) {
                    if current.state.is_terminal() {
                        return Err(JobStoreError::TerminalState {
                            job_id: current.id.clone(),
                            state: current.state,
                        });
                    }
                    return Err(JobStoreError::InvalidTransition {
                        job_id: current.id.clone(),
                        from: current.state,
                        to: next,
                    });
                }
            }
            None => {
                if current.state.is_terminal() {
                    return Err(JobStoreError::TerminalState {
                        job_id: current.id.clone(),
                        state: current.state,
                    });
                }
            }
        }
        Ok(())
    }

    /// Merge a validated patch into the current record.
    fn apply_patch(conn: &Connection, mut job: Job, patch: JobPatch) -> Result<Job, JobStoreError> {
        if let Some(next) = patch.state {
            // Re-entering the queue gets a fresh ordinal so retries land at
            // the back of the dispatch queue. Transient progress resets so
            // the next attempt starts from a clean slate.
            if next == JobState::Queued && job.state != JobState::Queued {
                job.queue_seq = Self::next_queue_seq(conn)?;
                job.progress_percent = 0.0;
                job.speed_bytes_per_sec = 0;
                job.eta_seconds = None;
            }
            job.state = next;
        }
        if let Some(title) = patch.title {
            job.title = Some(title);
        }
        if let Some(uploader) = patch.uploader {
            job.uploader = Some(uploader);
        }
        if let Some(duration) = patch.duration_seconds {
            job.duration_seconds = Some(duration);
        }
        if let Some(thumb) = patch.thumbnail_url {
            job.thumbnail_url = Some(thumb);
        }
        if let Some(percent) = patch.progress_percent {
            // Progress never goes backwards.
            job.progress_percent = job.progress_percent.max(percent.clamp(0.0, 100.0));
        }
        if let Some(speed) = patch.speed_bytes_per_sec {
            job.speed_bytes_per_sec = speed;
        }
        if let Some(eta) = patch.eta_seconds {
            job.eta_seconds = eta;
        }
        if let Some(size) = patch.file_size_bytes {
            job.file_size_bytes = Some(size);
        }
        if let Some(path) = patch.local_path {
            job.local_path = Some(path);
        }
        if let Some(message) = patch.error_message {
            job.error_message = Some(message);
        }
        if let Some(count) = patch.retry_count {
            job.retry_count = count;
        }
        if let Some(at) = patch.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            job.completed_at = Some(at);
        }
        job.updated_at = Utc::now();
        Ok(job)
    }

    fn persist(conn: &Connection, job: &Job) -> Result<(), JobStoreError> {
        conn.execute(
            "UPDATE jobs SET state = ?, title = ?, uploader = ?, duration_seconds = ?, \
             thumbnail_url = ?, progress_percent = ?, speed_bytes_per_sec = ?, eta_seconds = ?, \
             file_size_bytes = ?, local_path = ?, error_message = ?, retry_count = ?, \
             queue_seq = ?, started_at = ?, completed_at = ?, updated_at = ? WHERE id = ?",
            params![
                job.state.as_str(),
                job.title,
                job.uploader,
                job.duration_seconds,
                job.thumbnail_url,
                job.progress_percent,
                job.speed_bytes_per_sec,
                job.eta_seconds,
                job.file_size_bytes,
                job.local_path,
                job.error_message,
                job.retry_count,
                job.queue_seq,
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.updated_at.to_rfc3339(),
                job.id,
            ],
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let queue_seq = Self::next_queue_seq(&conn)?;

        let options_json = serde_json::to_string(&request.options)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, source_url, state, options, progress_percent, \
             speed_bytes_per_sec, retry_count, queue_seq, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, 0, 0, ?, ?, ?)",
            params![
                id,
                request.source_url,
                JobState::Queued.as_str(),
                options_json,
                queue_seq,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(Job {
            id,
            source_url: request.source_url,
            state: JobState::Queued,
            title: None,
            uploader: None,
            duration_seconds: None,
            thumbnail_url: None,
            options: request.options,
            progress_percent: 0.0,
            speed_bytes_per_sec: 0,
            eta_seconds: None,
            file_size_bytes: None,
            local_path: None,
            error_message: None,
            retry_count: 0,
            queue_seq,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", Self::COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_job)
            .optional()
            .map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let (sql, state_param) = match filter.state {
            Some(state) => (
                format!(
                    "SELECT {} FROM jobs WHERE state = ? ORDER BY created_at DESC, queue_seq DESC \
                     LIMIT ? OFFSET ?",
                    Self::COLUMNS
                ),
                Some(state.as_str()),
            ),
            None => (
                format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, queue_seq DESC LIMIT ? OFFSET ?",
                    Self::COLUMNS
                ),
                None,
            ),
        };

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        let map_err = |e: rusqlite::Error| JobStoreError::Database(e.to_string());
        let rows = match state_param {
            Some(state) => stmt
                .query_map(params![state, filter.limit, filter.offset], Self::row_to_job)
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>(),
            None => stmt
                .query_map(params![filter.limit, filter.offset], Self::row_to_job)
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>(),
        };

        rows.map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn list_ready(&self, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM jobs WHERE state = 'queued' ORDER BY queue_seq ASC LIMIT ?",
            Self::COLUMNS
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], Self::row_to_job)
            .map_err(|e| JobStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>();
        rows.map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        let result = match filter.state {
            Some(state) => conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE state = ?",
                params![state.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0)),
        };
        result.map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn update(&self, id: &str, patch: JobPatch) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::get_locked(&conn, id)?;
        Self::validate_patch(&current, &patch)?;

        let updated = Self::apply_patch(&conn, current, patch)?;
        Self::persist(&conn, &updated)?;

        Ok(updated)
    }

    fn delete(&self, id: &str) -> Result<Job, JobStoreError> {
        let conn = self.conn.lock().unwrap();

        let job = Self::get_locked(&conn, id)?;
        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        Ok(job)
    }

    fn clear(&self) -> Result<usize, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM jobs", [])
            .map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn total_completed_bytes(&self) -> Result<u64, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COALESCE(SUM(file_size_bytes), 0) FROM jobs WHERE state = 'completed'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|total| total.max(0) as u64)
        .map_err(|e| JobStoreError::Database(e.to_string()))
    }

    fn average_downloading_speed(&self) -> Result<u64, JobStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COALESCE(AVG(speed_bytes_per_sec), 0) FROM jobs \
             WHERE state = 'downloading'",
            [],
            |row| row.get::<_, f64>(0),
        )
        .map(|avg| avg.max(0.0).round() as u64)
        .map_err(|e| JobStoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_test_request(url: &str) -> CreateJobRequest {
        CreateJobRequest {
            source_url: url.to_string(),
            options: DownloadOptions::default(),
        }
    }

    #[test]
    fn test_create_job() {
        let store = create_test_store();
        let job = store
            .create(create_test_request("https://example.com/v/1"))
            .unwrap();

        assert!(!job.id.is_empty());
        assert_eq!(job.source_url, "https://example.com/v/1");
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress_percent, 0.0);
        assert_eq!(job.retry_count, 0);
        assert!(job.title.is_none());
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_list_ready_is_fifo() {
        let store = create_test_store();
        let a = store.create(create_test_request("https://e.com/a")).unwrap();
        let b = store.create(create_test_request("https://e.com/b")).unwrap();
        let c = store.create(create_test_request("https://e.com/c")).unwrap();

        let ready = store.list_ready(10).unwrap();
        let ids: Vec<_> = ready.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_requeue_moves_job_to_back() {
        let store = create_test_store();
        let a = store.create(create_test_request("https://e.com/a")).unwrap();
        let b = store.create(create_test_request("https://e.com/b")).unwrap();

        // a fails and is re-enqueued: it must now sit behind b.
        store
            .update(&a.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(
                &a.id,
                JobPatch::new().with_state(JobState::Failed).with_error("boom"),
            )
            .unwrap();
        store
            .update(
                &a.id,
                JobPatch::new().with_state(JobState::Queued).with_retry_count(1),
            )
            .unwrap();

        let ready = store.list_ready(10).unwrap();
        let ids: Vec<_> = ready.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let store = create_test_store();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        let result = store.update(&job.id, JobPatch::new().with_state(JobState::Completed));
        assert!(matches!(
            result,
            Err(JobStoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_terminal_job_rejects_mutation() {
        let store = create_test_store();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        store
            .update(&job.id, JobPatch::new().with_state(JobState::Cancelled))
            .unwrap();

        // No further patches once terminal, with or without a state change.
        let result = store.update(&job.id, JobPatch::new().with_progress(50.0, 0, None));
        assert!(matches!(result, Err(JobStoreError::TerminalState { .. })));

        let result = store.update(&job.id, JobPatch::new().with_state(JobState::Queued));
        assert!(matches!(result, Err(JobStoreError::TerminalState { .. })));
    }

    #[test]
    fn test_failed_job_can_be_requeued() {
        let store = create_test_store();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        store
            .update(&job.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(&job.id, JobPatch::new().with_state(JobState::Failed))
            .unwrap();
        let requeued = store
            .update(
                &job.id,
                JobPatch::new().with_state(JobState::Queued).with_retry_count(1),
            )
            .unwrap();
        assert_eq!(requeued.state, JobState::Queued);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.progress_percent, 0.0);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let store = create_test_store();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        store
            .update(&job.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(&job.id, JobPatch::new().with_progress(40.0, 1000, Some(60)))
            .unwrap();

        // A stale lower sample must not move progress backwards.
        let updated = store
            .update(&job.id, JobPatch::new().with_progress(35.0, 900, Some(70)))
            .unwrap();
        assert_eq!(updated.progress_percent, 40.0);
        assert_eq!(updated.speed_bytes_per_sec, 900);

        let updated = store
            .update(&job.id, JobPatch::new().with_progress(80.0, 1200, Some(20)))
            .unwrap();
        assert_eq!(updated.progress_percent, 80.0);
    }

    #[test]
    fn test_progress_frozen_on_terminal_transition() {
        let store = create_test_store();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        store
            .update(&job.id, JobPatch::new().with_state(JobState::Downloading))
            .unwrap();
        store
            .update(&job.id, JobPatch::new().with_progress(62.5, 1000, Some(30)))
            .unwrap();
        store
            .update(&job.id, JobPatch::new().with_state(JobState::Cancelled))
            .unwrap();

        let job = store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.progress_percent, 62.5);
    }

    #[test]
    fn test_list_filters_by_state() {
        let store = create_test_store();
        store.create(create_test_request("https://e.com/a")).unwrap();
        let b = store.create(create_test_request("https://e.com/b")).unwrap();
        store
            .update(&b.id, JobPatch::new().with_state(JobState::Cancelled))
            .unwrap();

        let queued = store
            .list(&JobFilter::new().with_state(JobState::Queued))
            .unwrap();
        assert_eq!(queued.len(), 1);

        let cancelled = store
            .list(&JobFilter::new().with_state(JobState::Cancelled))
            .unwrap();
        assert_eq!(cancelled.len(), 1);

        assert_eq!(store.count(&JobFilter::new()).unwrap(), 2);
        assert_eq!(
            store
                .count(&JobFilter::new().with_state(JobState::Queued))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_total_completed_bytes() {
        let store = create_test_store();
        let a = store.create(create_test_request("https://e.com/a")).unwrap();
        let b = store.create(create_test_request("https://e.com/b")).unwrap();

        for (id, size) in [(&a.id, 1000u64), (&b.id, 500u64)] {
            store
                .update(id, JobPatch::new().with_state(JobState::Downloading))
                .unwrap();
            store
                .update(
                    id,
                    JobPatch::new()
                        .with_state(JobState::Completed)
                        .with_result("/tmp/file", size),
                )
                .unwrap();
        }

        assert_eq!(store.total_completed_bytes().unwrap(), 1500);
    }

    #[test]
    fn test_average_downloading_speed() {
        let store = create_test_store();
        assert_eq!(store.average_downloading_speed().unwrap(), 0);

        let a = store.create(create_test_request("https://e.com/a")).unwrap();
        let b = store.create(create_test_request("https://e.com/b")).unwrap();
        for (id, speed) in [(&a.id, 1000u64), (&b.id, 3000u64)] {
            store
                .update(id, JobPatch::new().with_state(JobState::Downloading))
                .unwrap();
            store
                .update(id, JobPatch::new().with_progress(10.0, speed, None))
                .unwrap();
        }
        assert_eq!(store.average_downloading_speed().unwrap(), 2000);

        // Only downloading jobs count towards the mean.
        store
            .update(
                &a.id,
                JobPatch::new()
                    .with_state(JobState::Completed)
                    .with_result("/tmp/a.mp4", 64),
            )
            .unwrap();
        assert_eq!(store.average_downloading_speed().unwrap(), 3000);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = create_test_store();
        let a = store.create(create_test_request("https://e.com/a")).unwrap();
        store.create(create_test_request("https://e.com/b")).unwrap();

        let deleted = store.delete(&a.id).unwrap();
        assert_eq!(deleted.id, a.id);
        assert!(store.get(&a.id).unwrap().is_none());
        assert!(matches!(
            store.delete(&a.id),
            Err(JobStoreError::NotFound(_))
        ));

        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.count(&JobFilter::new()).unwrap(), 0);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let store = SqliteJobStore::new(&db_path).unwrap();
        let job = store.create(create_test_request("https://e.com/a")).unwrap();

        assert!(db_path.exists());
        assert!(store.get(&job.id).unwrap().is_some());
    }
}
