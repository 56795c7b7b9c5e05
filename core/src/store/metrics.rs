use super::{decode_ts, encode_ts, SlaCounts, SqliteStore};
use crate::{
    error::{SlaError, SlaResult},
    types::Timestamp,
};
use rusqlite::params;

impl SqliteStore {
    // ── SLA aggregates ─────────────────────────────────────────

    pub fn compute_sla_counts(&self, now: Timestamp) -> SlaResult<SlaCounts> {
        let now = encode_ts(&now);
        let conn = self.conn()?;

        let (total, escalated, resolved_on_time, resolved_late) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN escalation_level > 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'resolved' AND sla_due IS NOT NULL
                                       AND closed_at <= sla_due THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'resolved' AND sla_due IS NOT NULL
                                       AND closed_at > sla_due THEN 1 ELSE 0 END), 0)
             FROM complaint",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let mut counts = SlaCounts {
            total,
            escalated,
            resolved_on_time,
            resolved_late,
            ..SlaCounts::default()
        };

        let mut stmt = conn.prepare(
            "SELECT priority, COUNT(*) FROM complaint
             WHERE sla_due IS NOT NULL AND sla_due < ?1 AND status != 'resolved'
             GROUP BY priority",
        )?;
        let overdue = stmt
            .query_map(params![now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (priority, n) in overdue {
            counts.overdue += n;
            match priority.as_str() {
                "high" => counts.high_priority_overdue = n,
                "medium" => counts.medium_priority_overdue = n,
                "low" => counts.low_priority_overdue = n,
                other => log::warn!("unexpected priority {other:?} in overdue counts"),
            }
        }

        let mut stmt = conn.prepare(
            "SELECT complaint_id, submitted_at, closed_at FROM complaint
             WHERE status = 'resolved' AND closed_at IS NOT NULL",
        )?;
        let closed = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if !closed.is_empty() {
            let mut sum_hours = 0i64;
            for (id, submitted, closed_at) in &closed {
                let corrupt = |reason: String| SlaError::CorruptRecord {
                    id: id.clone(),
                    reason,
                };
                let submitted = decode_ts(submitted).map_err(corrupt)?;
                let closed_at = decode_ts(closed_at).map_err(corrupt)?;
                sum_hours += (closed_at - submitted).num_hours();
            }
            counts.avg_resolution_hours = Some(sum_hours as f64 / closed.len() as f64);
        }

        Ok(counts)
    }
}
