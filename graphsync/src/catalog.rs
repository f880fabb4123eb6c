use crate::config::StorageConfig;
use crate::errors::Result;
use crate::models::{RunLog, SyncCursor};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sync bookkeeping: one cursor per stream plus a log of every cycle.
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let conn = Connection::open(&config.catalog_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS sync_cursor (
                stream TEXT PRIMARY KEY,
                last_sync_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS sync_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT,
                details TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// The persisted cursor, or a fresh one when the stream never completed a cycle.
    pub fn get_cursor(&self, stream: &str) -> Result<SyncCursor> {
        let conn = self.conn();
        let last_sync_at: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_sync_at FROM sync_cursor WHERE stream = ?1",
                params![stream],
                |row| row.get(0),
            )
            .optional()?;

        let last_sync = last_sync_at
            .flatten()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        Ok(SyncCursor {
            stream: stream.to_string(),
            last_sync,
        })
    }

    pub fn upsert_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sync_cursor (stream, last_sync_at)
             VALUES (?1, ?2)
             ON CONFLICT(stream) DO UPDATE SET
                last_sync_at = excluded.last_sync_at",
            params![
                cursor.stream,
                cursor.last_sync.map(|at| at.timestamp_millis())
            ],
        )?;
        Ok(())
    }

    pub fn list_cursors(&self) -> Result<Vec<SyncCursor>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT stream, last_sync_at FROM sync_cursor ORDER BY stream")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
        })?;

        let mut cursors = Vec::new();
        for row in rows {
            let (stream, last_sync_at) = row?;
            cursors.push(SyncCursor {
                stream,
                last_sync: last_sync_at.and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            });
        }
        Ok(cursors)
    }

    pub fn create_run_log(&self, stream: &str) -> Result<i64> {
        let conn = self.conn();
        let start_time = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO sync_runs (stream, start_time, status) VALUES (?1, ?2, 'RUNNING')",
            params![stream, start_time],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_run_log_status(&self, run_id: i64, status: &str, details: &str) -> Result<()> {
        let conn = self.conn();
        let end_time = Utc::now().timestamp();
        conn.execute(
            "UPDATE sync_runs SET status = ?1, details = ?2, end_time = ?3 WHERE run_id = ?4",
            params![status, details, end_time, run_id],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, stream: &str, limit: usize) -> Result<Vec<RunLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT run_id, stream, start_time, end_time, status, details FROM sync_runs
             WHERE stream = ?1 ORDER BY run_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![stream, limit as i64], |row| {
            Ok(RunLog {
                run_id: row.get(0)?,
                stream: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                details: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
