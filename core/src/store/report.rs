use super::{encode_ts, SqliteStore};
use crate::{error::SlaResult, types::Timestamp, workflow::ReportLookup};
use rusqlite::params;

impl SqliteStore {
    // ── Reports ────────────────────────────────────────────────
    //
    // Report content belongs to the reporting side; the SLA core only
    // needs to know that one exists.

    pub fn insert_report(
        &self,
        complaint_id: &str,
        author: Option<&str>,
        summary: &str,
        submitted_at: Timestamp,
    ) -> SlaResult<()> {
        self.conn()?.execute(
            "INSERT INTO report (complaint_id, author, summary, submitted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![complaint_id, author, summary, encode_ts(&submitted_at)],
        )?;
        Ok(())
    }

    pub fn has_report(&self, complaint_id: &str) -> SlaResult<bool> {
        let exists: i64 = self.conn()?.query_row(
            "SELECT EXISTS (SELECT 1 FROM report WHERE complaint_id = ?1)",
            params![complaint_id],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }
}

impl ReportLookup for SqliteStore {
    fn report_exists(&self, complaint_id: &str) -> SlaResult<bool> {
        self.has_report(complaint_id)
    }
}
