use super::{now_text, ImportBatchRow, InsightStore};
use crate::{
    error::{InsightError, InsightResult},
    import::SheetKind,
    normalizer::RejectedRow,
};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

fn sheet_from_text(text: &str) -> rusqlite::Result<SheetKind> {
    match text {
        "service_orders" => Ok(SheetKind::ServiceOrders),
        "sales"          => Ok(SheetKind::Sales),
        "payments"       => Ok(SheetKind::Payments),
        "targets"        => Ok(SheetKind::Targets),
        "base"           => Ok(SheetKind::Base),
        other => Err(rusqlite::Error::InvalidColumnType(
            1,
            format!("sheet '{other}'"),
            rusqlite::types::Type::Text,
        )),
    }
}

impl InsightStore {
    // ── Import batches ─────────────────────────────────────────

    /// Store one upload: the accepted records as JSON payloads and the
    /// rejected rows with their reasons. Runs in a single transaction.
    pub fn insert_batch<T: Serialize>(
        &mut self,
        batch_id: &str,
        sheet: SheetKind,
        source: &str,
        records: &[T],
        rejected: &[RejectedRow],
    ) -> InsightResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO import_batch (batch_id, sheet, source, accepted, rejected, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                batch_id,
                sheet.as_str(),
                source,
                records.len() as i64,
                rejected.len() as i64,
                now_text(),
            ],
        )?;
        {
            let mut insert_record = tx.prepare(
                "INSERT INTO imported_record (batch_id, payload) VALUES (?1, ?2)",
            )?;
            for r in records {
                insert_record.execute(params![batch_id, serde_json::to_string(r)?])?;
            }
            let mut insert_rejected = tx.prepare(
                "INSERT INTO rejected_row (batch_id, line, reason) VALUES (?1, ?2, ?3)",
            )?;
            for r in rejected {
                insert_rejected.execute(params![batch_id, r.line as i64, r.reason])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The most recent upload of a sheet, if any.
    pub fn latest_batch(&self, sheet: SheetKind) -> InsightResult<Option<ImportBatchRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT batch_id, sheet, source, accepted, rejected, imported_at
                 FROM import_batch WHERE sheet = ?1
                 ORDER BY rowid DESC LIMIT 1",
                params![sheet.as_str()],
                |row| {
                    Ok(ImportBatchRow {
                        batch_id:    row.get(0)?,
                        sheet:       sheet_from_text(&row.get::<_, String>(1)?)?,
                        source:      row.get(2)?,
                        accepted:    row.get(3)?,
                        rejected:    row.get(4)?,
                        imported_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn batch_records<T: DeserializeOwned>(&self, batch_id: &str) -> InsightResult<Vec<T>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM imported_record WHERE batch_id = ?1 ORDER BY id ASC",
        )?;
        let payloads = stmt
            .query_map(params![batch_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(InsightError::from))
            .collect()
    }

    /// Records of the latest upload of a sheet; empty when never imported.
    pub fn latest_records<T: DeserializeOwned>(&self, sheet: SheetKind) -> InsightResult<Vec<T>> {
        match self.latest_batch(sheet)? {
            Some(batch) => self.batch_records(&batch.batch_id),
            None => Ok(Vec::new()),
        }
    }

    pub fn rejected_rows(&self, batch_id: &str) -> InsightResult<Vec<RejectedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT line, reason FROM rejected_row WHERE batch_id = ?1 ORDER BY line ASC",
        )?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                Ok(RejectedRow {
                    line:   row.get::<_, i64>(0)? as usize,
                    reason: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
