use super::{decode_opt_ts, decode_ts, encode_opt_ts, encode_ts, SqliteStore};
use crate::{
    complaint::Complaint,
    error::{SlaError, SlaResult},
    ledger::{EscalationEvent, EscalationLedger},
    types::{Timestamp, Version},
};
use rusqlite::{params, OptionalExtension, Row};

const COMPLAINT_COLUMNS: &str = "complaint_id, title, description, category, submitted_by,
    status, priority, assigned_to, assigned_at, acknowledged_at,
    sla_phase, sla_start, triage_sla_due, resolution_sla_due, sla_due,
    response_sla_due, priority_set_at, triage_breached, escalation_level, escalation_history,
    submitted_at, closed_at, closed_by, resolution_notes, updated_by, version";

/// Raw column values, converted into a `Complaint` outside the rusqlite
/// callback so decoding failures surface as `CorruptRecord`.
struct ComplaintRow {
    id: String,
    title: String,
    description: String,
    category: String,
    submitted_by: Option<String>,
    status: String,
    priority: String,
    assigned_to: Option<String>,
    assigned_at: Option<String>,
    acknowledged_at: Option<String>,
    sla_phase: String,
    sla_start: Option<String>,
    triage_sla_due: Option<String>,
    resolution_sla_due: Option<String>,
    sla_due: Option<String>,
    response_sla_due: Option<String>,
    priority_set_at: Option<String>,
    triage_breached: bool,
    escalation_level: i64,
    escalation_history: String,
    submitted_at: String,
    closed_at: Option<String>,
    closed_by: Option<String>,
    resolution_notes: Option<String>,
    updated_by: Option<String>,
    version: i64,
}

fn complaint_row_mapper(row: &Row<'_>) -> rusqlite::Result<ComplaintRow> {
    Ok(ComplaintRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        submitted_by: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        assigned_to: row.get(7)?,
        assigned_at: row.get(8)?,
        acknowledged_at: row.get(9)?,
        sla_phase: row.get(10)?,
        sla_start: row.get(11)?,
        triage_sla_due: row.get(12)?,
        resolution_sla_due: row.get(13)?,
        sla_due: row.get(14)?,
        response_sla_due: row.get(15)?,
        priority_set_at: row.get(16)?,
        triage_breached: row.get::<_, i32>(17)? != 0,
        escalation_level: row.get(18)?,
        escalation_history: row.get(19)?,
        submitted_at: row.get(20)?,
        closed_at: row.get(21)?,
        closed_by: row.get(22)?,
        resolution_notes: row.get(23)?,
        updated_by: row.get(24)?,
        version: row.get(25)?,
    })
}

impl ComplaintRow {
    fn into_complaint(self) -> SlaResult<Complaint> {
        let id = self.id.clone();
        self.decode().map_err(|reason| SlaError::CorruptRecord { id, reason })
    }

    fn decode(self) -> Result<Complaint, String> {
        let entries: Vec<EscalationEvent> = serde_json::from_str(&self.escalation_history)
            .map_err(|e| format!("bad escalation history: {e}"))?;
        let ledger = EscalationLedger::from_entries(entries)?;
        if i64::from(ledger.level()) != self.escalation_level {
            return Err(format!(
                "escalation_level column is {} but the ledger holds {} entries",
                self.escalation_level,
                ledger.len()
            ));
        }

        Ok(Complaint {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            submitted_by: self.submitted_by,
            status: self.status.parse()?,
            priority: self.priority.parse()?,
            assigned_to: self.assigned_to,
            assigned_at: decode_opt_ts(self.assigned_at.as_deref())?,
            acknowledged_at: decode_opt_ts(self.acknowledged_at.as_deref())?,
            sla_phase: self.sla_phase.parse()?,
            sla_start: decode_opt_ts(self.sla_start.as_deref())?,
            triage_sla_due: decode_opt_ts(self.triage_sla_due.as_deref())?,
            resolution_sla_due: decode_opt_ts(self.resolution_sla_due.as_deref())?,
            sla_due: decode_opt_ts(self.sla_due.as_deref())?,
            response_sla_due: decode_opt_ts(self.response_sla_due.as_deref())?,
            priority_set_at: decode_opt_ts(self.priority_set_at.as_deref())?,
            triage_breached: self.triage_breached,
            escalation_history: ledger,
            submitted_at: decode_ts(&self.submitted_at)?,
            closed_at: decode_opt_ts(self.closed_at.as_deref())?,
            closed_by: self.closed_by,
            resolution_notes: self.resolution_notes,
            updated_by: self.updated_by,
            version: u64::try_from(self.version).map_err(|_| "negative version".to_string())?,
        })
    }
}

impl SqliteStore {
    // ── Complaint ──────────────────────────────────────────────────

    pub fn insert_complaint(&self, c: &Complaint) -> SlaResult<Complaint> {
        let history = serde_json::to_string(&c.escalation_history)?;
        self.conn()?.execute(
            "INSERT INTO complaint (
                complaint_id, title, description, category, submitted_by,
                status, priority, assigned_to, assigned_at, acknowledged_at,
                sla_phase, sla_start, triage_sla_due, resolution_sla_due, sla_due,
                response_sla_due, priority_set_at, triage_breached, escalation_level,
                escalation_history, submitted_at, closed_at, closed_by, resolution_notes,
                updated_by, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                       ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, 0)",
            params![
                &c.id,
                &c.title,
                &c.description,
                &c.category,
                c.submitted_by.as_deref(),
                c.status.as_str(),
                c.priority.as_str(),
                c.assigned_to.as_deref(),
                encode_opt_ts(&c.assigned_at),
                encode_opt_ts(&c.acknowledged_at),
                c.sla_phase.as_str(),
                encode_opt_ts(&c.sla_start),
                encode_opt_ts(&c.triage_sla_due),
                encode_opt_ts(&c.resolution_sla_due),
                encode_opt_ts(&c.sla_due),
                encode_opt_ts(&c.response_sla_due),
                encode_opt_ts(&c.priority_set_at),
                if c.triage_breached { 1i32 } else { 0i32 },
                i64::from(c.escalation_level()),
                history,
                encode_ts(&c.submitted_at),
                encode_opt_ts(&c.closed_at),
                c.closed_by.as_deref(),
                c.resolution_notes.as_deref(),
                c.updated_by.as_deref(),
            ],
        )?;
        let mut saved = c.clone();
        saved.version = 0;
        Ok(saved)
    }

    pub fn get_complaint(&self, id: &str) -> SlaResult<Complaint> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {COMPLAINT_COLUMNS} FROM complaint WHERE complaint_id = ?1"),
                params![id],
                complaint_row_mapper,
            )
            .optional()?;
        match row {
            Some(row) => row.into_complaint(),
            None => Err(SlaError::NotFound { id: id.to_string() }),
        }
    }

    pub fn save_complaint(&self, c: &Complaint, expected_version: Version) -> SlaResult<Complaint> {
        let history = serde_json::to_string(&c.escalation_history)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE complaint SET
                title = ?1, description = ?2, category = ?3, submitted_by = ?4,
                status = ?5, priority = ?6, assigned_to = ?7, assigned_at = ?8,
                acknowledged_at = ?9, sla_phase = ?10, sla_start = ?11,
                triage_sla_due = ?12, resolution_sla_due = ?13, sla_due = ?14,
                response_sla_due = ?15, priority_set_at = ?16, triage_breached = ?17,
                escalation_level = ?18, escalation_history = ?19, closed_at = ?20,
                closed_by = ?21, resolution_notes = ?22, updated_by = ?23,
                version = version + 1
             WHERE complaint_id = ?24 AND version = ?25",
            params![
                &c.title,
                &c.description,
                &c.category,
                c.submitted_by.as_deref(),
                c.status.as_str(),
                c.priority.as_str(),
                c.assigned_to.as_deref(),
                encode_opt_ts(&c.assigned_at),
                encode_opt_ts(&c.acknowledged_at),
                c.sla_phase.as_str(),
                encode_opt_ts(&c.sla_start),
                encode_opt_ts(&c.triage_sla_due),
                encode_opt_ts(&c.resolution_sla_due),
                encode_opt_ts(&c.sla_due),
                encode_opt_ts(&c.response_sla_due),
                encode_opt_ts(&c.priority_set_at),
                if c.triage_breached { 1i32 } else { 0i32 },
                i64::from(c.escalation_level()),
                history,
                encode_opt_ts(&c.closed_at),
                c.closed_by.as_deref(),
                c.resolution_notes.as_deref(),
                c.updated_by.as_deref(),
                &c.id,
                expected_version as i64,
            ],
        )?;

        if updated == 0 {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT version FROM complaint WHERE complaint_id = ?1",
                    params![&c.id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match found {
                Some(found) => SlaError::ConcurrencyConflict {
                    id: c.id.clone(),
                    expected: expected_version,
                    found: found as u64,
                },
                None => SlaError::NotFound { id: c.id.clone() },
            });
        }

        let mut saved = c.clone();
        saved.version = expected_version + 1;
        Ok(saved)
    }

    pub fn breached_complaints(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.select_complaints(
            "WHERE sla_due IS NOT NULL AND sla_due < ?1 AND status != 'resolved'
             ORDER BY sla_due ASC, complaint_id ASC",
            params![encode_ts(&now)],
        )
    }

    pub fn triage_overdue_complaints(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.select_complaints(
            "WHERE sla_phase = 'triage' AND status = 'pending'
               AND triage_sla_due IS NOT NULL AND triage_sla_due <= ?1
             ORDER BY triage_sla_due ASC, complaint_id ASC",
            params![encode_ts(&now)],
        )
    }

    pub fn triage_candidates(&self) -> SlaResult<Vec<Complaint>> {
        self.select_complaints(
            "WHERE sla_phase = 'triage' AND status = 'pending' AND triage_sla_due IS NOT NULL
             ORDER BY triage_sla_due ASC, complaint_id ASC",
            params![],
        )
    }

    pub fn escalated_complaints(&self, min_level: u8) -> SlaResult<Vec<Complaint>> {
        self.select_complaints(
            "WHERE escalation_level >= ?1 AND status != 'resolved'
             ORDER BY escalation_level DESC, sla_due ASC, complaint_id ASC",
            params![i64::from(min_level)],
        )
    }

    /// Every complaint, oldest submission first. Used by tooling.
    pub fn all_complaints(&self) -> SlaResult<Vec<Complaint>> {
        self.select_complaints("ORDER BY submitted_at ASC, complaint_id ASC", params![])
    }

    fn select_complaints(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> SlaResult<Vec<Complaint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPLAINT_COLUMNS} FROM complaint {clause}"
        ))?;
        let rows = stmt
            .query_map(params, complaint_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ComplaintRow::into_complaint).collect()
    }
}
