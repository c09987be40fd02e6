//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Subsystems never see it; the engine persists their events and reports.

use crate::{error::InsightResult, event::EventLogEntry, import::SheetKind};
mod import_batch;
mod report;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub struct InsightStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id:         String,
    pub reference_date: String,
    pub filter_json:    String,
    pub version:        String,
    pub started_at:     String,
    pub completed_at:   Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatchRow {
    pub batch_id:    String,
    pub sheet:       SheetKind,
    pub source:      String,
    pub accepted:    i64,
    pub rejected:    i64,
    pub imported_at: String,
}

pub(crate) fn now_text() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl InsightStore {
    /// Open (or create) the dashboard database at `path`.
    pub fn open(path: &str) -> InsightResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> InsightResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> InsightResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(
        &self,
        run_id: &str,
        reference_date: &str,
        filter_json: &str,
        version: &str,
    ) -> InsightResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, reference_date, filter_json, version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, reference_date, filter_json, version, now_text()],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, run_id: &str) -> InsightResult<()> {
        self.conn.execute(
            "UPDATE run SET completed_at = ?2 WHERE run_id = ?1",
            params![run_id, now_text()],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> InsightResult<Option<RunRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, reference_date, filter_json, version, started_at, completed_at
                 FROM run WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        run_id:         row.get(0)?,
                        reference_date: row.get(1)?,
                        filter_json:    row.get(2)?,
                        version:        row.get(3)?,
                        started_at:     row.get(4)?,
                        completed_at:   row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn run_count(&self) -> InsightResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM run", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> InsightResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, seq, subsystem, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.seq as i64,
                entry.subsystem,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> InsightResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, subsystem, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY seq ASC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    seq:        row.get::<_, i64>(2)? as u64,
                    subsystem:  row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> InsightResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
