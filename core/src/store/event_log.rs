use super::{decode_ts, encode_ts, SqliteStore};
use crate::{
    error::{SlaError, SlaResult},
    event::EventLogEntry,
};
use rusqlite::params;

impl SqliteStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event_entry(&self, entry: &EventLogEntry) -> SlaResult<()> {
        self.conn()?.execute(
            "INSERT INTO event_log (complaint_id, recorded_at, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.complaint_id.as_deref(),
                encode_ts(&entry.recorded_at),
                &entry.event_type,
                &entry.payload,
            ],
        )?;
        Ok(())
    }

    /// Log entries for one complaint, in append order.
    pub fn events_for_complaint(&self, complaint_id: &str) -> SlaResult<Vec<EventLogEntry>> {
        self.select_events("WHERE complaint_id = ?1 ORDER BY id ASC", params![complaint_id])
    }

    /// Log entries of one type, in append order.
    pub fn events_of_type(&self, event_type: &str) -> SlaResult<Vec<EventLogEntry>> {
        self.select_events("WHERE event_type = ?1 ORDER BY id ASC", params![event_type])
    }

    fn select_events(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> SlaResult<Vec<EventLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, complaint_id, recorded_at, event_type, payload FROM event_log {clause}"
        ))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, complaint_id, recorded_at, event_type, payload)| {
                let recorded_at = decode_ts(&recorded_at).map_err(|reason| {
                    SlaError::Other(anyhow::anyhow!("event_log row {id}: {reason}"))
                })?;
                Ok(EventLogEntry {
                    id: Some(id),
                    complaint_id,
                    recorded_at,
                    event_type,
                    payload,
                })
            })
            .collect()
    }
}
