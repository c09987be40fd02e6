use super::InsightStore;
use crate::error::InsightResult;
use rusqlite::{params, OptionalExtension};

impl InsightStore {
    // ── Report snapshots ───────────────────────────────────────

    pub fn save_snapshot(&self, run_id: &str, report_json: &str) -> InsightResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO report_snapshot (run_id, report_json) VALUES (?1, ?2)",
            params![run_id, report_json],
        )?;
        Ok(())
    }

    pub fn load_snapshot(&self, run_id: &str) -> InsightResult<Option<String>> {
        let json = self
            .conn
            .query_row(
                "SELECT report_json FROM report_snapshot WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    /// Snapshot of the most recently started completed run.
    pub fn latest_snapshot(&self) -> InsightResult<Option<(String, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT s.run_id, s.report_json
                 FROM report_snapshot s JOIN run r ON r.run_id = s.run_id
                 WHERE r.completed_at IS NOT NULL
                 ORDER BY r.rowid DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}
