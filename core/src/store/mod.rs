//! Complaint persistence.
//!
//! RULE: Only the store talks to the database.
//! The engine, guard, and scheduler call store methods; they never
//! execute SQL directly.
//!
//! Writes are compare-and-swap: `save` carries the version read at load
//! time and is rejected with `ConcurrencyConflict` if the row moved on.

use crate::{
    complaint::Complaint,
    error::{SlaError, SlaResult},
    event::EventLogEntry,
    types::{Timestamp, Version},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

mod complaint;
mod event_log;
mod metrics;
mod report;

/// Aggregate SLA counters, as of a given instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaCounts {
    pub total: i64,
    pub overdue: i64,
    pub resolved_on_time: i64,
    pub resolved_late: i64,
    pub escalated: i64,
    pub high_priority_overdue: i64,
    pub medium_priority_overdue: i64,
    pub low_priority_overdue: i64,
    pub avg_resolution_hours: Option<f64>,
}

/// The store contract consumed by the service and scheduler.
pub trait ComplaintStore: Send + Sync {
    /// Persist a new complaint. Fails if the id already exists.
    fn insert(&self, complaint: &Complaint) -> SlaResult<Complaint>;

    fn get(&self, id: &str) -> SlaResult<Complaint>;

    /// Compare-and-swap write. On success the returned complaint carries
    /// the new version.
    fn save(&self, complaint: &Complaint, expected_version: Version) -> SlaResult<Complaint>;

    /// Unresolved complaints whose `sla_due` is before `now`, most urgent first.
    fn query_breached(&self, now: Timestamp) -> SlaResult<Vec<Complaint>>;

    /// Pending triage complaints whose triage deadline is at or before `now`.
    fn query_triage_overdue(&self, now: Timestamp) -> SlaResult<Vec<Complaint>>;

    /// Every pending complaint still in triage, earliest deadline first.
    fn query_triage_candidates(&self) -> SlaResult<Vec<Complaint>>;

    /// Unresolved complaints at or above `min_level`, highest first.
    fn query_escalated(&self, min_level: u8) -> SlaResult<Vec<Complaint>>;

    fn sla_counts(&self, now: Timestamp) -> SlaResult<SlaCounts>;

    fn append_event(&self, entry: &EventLogEntry) -> SlaResult<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> SlaResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SlaResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SlaResult<()> {
        self.conn()?
            .execute_batch(include_str!("../../../migrations/001_sla_foundation.sql"))?;
        Ok(())
    }

    fn conn(&self) -> SlaResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SlaError::Other(anyhow::anyhow!("store connection mutex poisoned")))
    }
}

// ── Timestamp encoding ─────────────────────────────────────────────

pub(crate) fn encode_ts(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_opt_ts(t: &Option<Timestamp>) -> Option<String> {
    t.as_ref().map(encode_ts)
}

pub(crate) fn decode_ts(raw: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

pub(crate) fn decode_opt_ts(raw: Option<&str>) -> Result<Option<Timestamp>, String> {
    raw.map(decode_ts).transpose()
}

impl ComplaintStore for SqliteStore {
    fn insert(&self, complaint: &Complaint) -> SlaResult<Complaint> {
        self.insert_complaint(complaint)
    }

    fn get(&self, id: &str) -> SlaResult<Complaint> {
        self.get_complaint(id)
    }

    fn save(&self, complaint: &Complaint, expected_version: Version) -> SlaResult<Complaint> {
        self.save_complaint(complaint, expected_version)
    }

    fn query_breached(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.breached_complaints(now)
    }

    fn query_triage_overdue(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.triage_overdue_complaints(now)
    }

    fn query_triage_candidates(&self) -> SlaResult<Vec<Complaint>> {
        self.triage_candidates()
    }

    fn query_escalated(&self, min_level: u8) -> SlaResult<Vec<Complaint>> {
        self.escalated_complaints(min_level)
    }

    fn sla_counts(&self, now: Timestamp) -> SlaResult<SlaCounts> {
        self.compute_sla_counts(now)
    }

    fn append_event(&self, entry: &EventLogEntry) -> SlaResult<()> {
        self.append_event_entry(entry)
    }
}
