//! SQLite-based history store implementation.

use super::{check_continuation, HistoryStore, SessionSummary};
use crate::conversation::HistoryRecord;
use crate::error::{ItineraError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
        turn_index INTEGER NOT NULL,
        agent TEXT NOT NULL,
        action_kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        PRIMARY KEY (session_id, turn_index)
    );

    CREATE INDEX IF NOT EXISTS idx_records_kind ON records(action_kind);
"#;

/// SQLite-based history store.
///
/// Each record is one row keyed by `(session_id, turn_index)`, so a gap or a
/// rewrite of an existing index is refused by the primary key as well.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Open (or create) a store at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite history store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ItineraError::Session(format!("Failed to acquire lock: {}", e)))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ItineraError::Session(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn session_exists(conn: &Connection, session_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    #[instrument(skip(self))]
    async fn create_session(&self, session_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions (session_id, created_at) VALUES (?1, ?2)",
            params![session_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn append(&self, session_id: &str, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        if !session_exists(&conn, session_id)? {
            return Err(ItineraError::Session(format!("Unknown session: {}", session_id)));
        }

        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        check_continuation(session_id, existing as u64, records)?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO records (session_id, turn_index, agent, action_kind, payload, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;

            for record in records {
                let action = serde_json::to_value(&record.action)?;
                stmt.execute(params![
                    session_id,
                    record.turn_index as i64,
                    record.agent.as_str(),
                    record.action.kind(),
                    serde_json::to_string(&action["payload"])?,
                    record.recorded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;

        debug!("Appended {} records to {}", records.len(), session_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, session_id: &str) -> Result<Option<Vec<HistoryRecord>>> {
        let conn = self.lock()?;
        if !session_exists(&conn, session_id)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT turn_index, agent, action_kind, payload, recorded_at
            FROM records WHERE session_id = ?1 ORDER BY turn_index
            "#,
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (turn_index, agent, action_kind, payload, recorded_at) = row?;
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let record: HistoryRecord = serde_json::from_value(json!({
                "turn_index": turn_index,
                "agent": agent,
                "action_kind": action_kind,
                "payload": payload,
                "recorded_at": parse_time(&recorded_at)?,
            }))?;
            records.push(record);
        }

        Ok(Some(records))
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.session_id, s.created_at, COUNT(r.turn_index), MAX(r.recorded_at),
                   SUM(CASE WHEN r.action_kind = 'terminated' THEN 1 ELSE 0 END)
            FROM sessions s
            LEFT JOIN records r ON r.session_id = s.session_id
            GROUP BY s.session_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (session_id, created_at, count, updated_at, terminated) = row?;
            let created_at = parse_time(&created_at)?;
            let updated_at = match updated_at {
                Some(raw) => parse_time(&raw)?,
                None => created_at,
            };
            sessions.push(SessionSummary {
                session_id,
                record_count: count as u64,
                terminal: terminated.unwrap_or(0) > 0,
                created_at,
                updated_at,
            });
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    #[instrument(skip(self))]
    async fn delete(&self, session_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records WHERE session_id = ?1", params![session_id])?;
        let deleted = conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        Ok(deleted > 0)
    }
}
