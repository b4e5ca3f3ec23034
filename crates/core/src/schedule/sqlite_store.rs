//! SQLite-backed schedule store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{ScheduleEntry, ScheduleStore, ScheduleStoreError};

/// SQLite-backed schedule store.
pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

impl SqliteScheduleStore {
    pub fn new(path: &Path) -> Result<Self, ScheduleStoreError> {
        let conn =
            Connection::open(path).map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ScheduleStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ScheduleStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                job_id TEXT PRIMARY KEY,
                fire_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_fire_at ON schedules(fire_at);
            "#,
        )
        .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ScheduleEntry> {
        let fire_at_str: String = row.get(1)?;
        let created_at_str: String = row.get(2)?;
        Ok(ScheduleEntry {
            job_id: row.get(0)?,
            fire_at: parse_timestamp(&fire_at_str),
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl ScheduleStore for SqliteScheduleStore {
    fn upsert(
        &self,
        job_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<ScheduleEntry, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO schedules (job_id, fire_at, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET fire_at = excluded.fire_at",
            params![job_id, fire_at.to_rfc3339(), now.to_rfc3339()],
        )
        .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;

        conn.query_row(
            "SELECT job_id, fire_at, created_at FROM schedules WHERE job_id = ?",
            params![job_id],
            Self::row_to_entry,
        )
        .map_err(|e| ScheduleStoreError::Database(e.to_string()))
    }

    fn get(&self, job_id: &str) -> Result<Option<ScheduleEntry>, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT job_id, fire_at, created_at FROM schedules WHERE job_id = ?",
            params![job_id],
            Self::row_to_entry,
        )
        .optional()
        .map_err(|e| ScheduleStoreError::Database(e.to_string()))
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, fire_at, created_at FROM schedules WHERE fire_at <= ? \
                 ORDER BY fire_at ASC",
            )
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_entry)
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>();
        rows.map_err(|e| ScheduleStoreError::Database(e.to_string()))
    }

    fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT job_id, fire_at, created_at FROM schedules ORDER BY fire_at ASC")
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>();
        rows.map_err(|e| ScheduleStoreError::Database(e.to_string()))
    }

    fn remove(&self, job_id: &str) -> Result<bool, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute("DELETE FROM schedules WHERE job_id = ?", params![job_id])
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    fn clear(&self) -> Result<usize, ScheduleStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM schedules", [])
            .map_err(|e| ScheduleStoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_replaces_fire_time() {
        let store = SqliteScheduleStore::in_memory().unwrap();
        let first = Utc::now() + Duration::hours(1);
        let second = Utc::now() + Duration::hours(2);

        store.upsert("job-1", first).unwrap();
        let entry = store.upsert("job-1", second).unwrap();

        assert_eq!(entry.fire_at.timestamp(), second.timestamp());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_due_returns_only_elapsed_entries() {
        let store = SqliteScheduleStore::in_memory().unwrap();
        let now = Utc::now();

        store.upsert("past", now - Duration::minutes(5)).unwrap();
        store.upsert("future", now + Duration::minutes(5)).unwrap();

        let due = store.due(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, "past");
    }

    #[test]
    fn test_due_orders_by_fire_time() {
        let store = SqliteScheduleStore::in_memory().unwrap();
        let now = Utc::now();

        store.upsert("later", now - Duration::minutes(1)).unwrap();
        store.upsert("earlier", now - Duration::minutes(10)).unwrap();

        let due = store.due(now).unwrap();
        let ids: Vec<_> = due.iter().map(|e| e.job_id.as_str()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
    }

    #[test]
    fn test_remove() {
        let store = SqliteScheduleStore::in_memory().unwrap();
        store.upsert("job-1", Utc::now()).unwrap();

        assert!(store.remove("job-1").unwrap());
        assert!(!store.remove("job-1").unwrap());
        assert!(store.get("job-1").unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let store = SqliteScheduleStore::in_memory().unwrap();
        store.upsert("job-1", Utc::now()).unwrap();
        store.upsert("job-2", Utc::now()).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }
}
