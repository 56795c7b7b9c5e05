//! Store tests: compare-and-swap writes, persisted ledger layout, and
//! rejection of rows that break the ledger invariants.

use chrono::{Duration, TimeZone, Utc};
use complaint_sla_core::{
    complaint::{Complaint, ComplaintDraft},
    config::SlaPolicy,
    error::SlaError,
    ledger::SLA_BREACH_REASON,
    sla_engine::SlaEngine,
    store::{ComplaintStore, SqliteStore},
    types::Timestamp,
};
use rusqlite::Connection;
use std::sync::Arc;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
}

fn engine() -> SlaEngine {
    SlaEngine::new(Arc::new(SlaPolicy::default()))
}

fn new_complaint(id: &str) -> Complaint {
    let mut c = Complaint::new(id.into(), ComplaintDraft::default(), t0());
    engine().initialize_triage(&mut c, t0()).unwrap();
    c
}

fn memory_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

/// A file-backed store plus a raw connection to the same file, for
/// inspecting and tampering with rows.
fn file_store(tag: &str) -> (SqliteStore, Connection, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("sla-{tag}-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();
    let store = SqliteStore::open(&path_str).unwrap();
    store.migrate().unwrap();
    let raw = Connection::open(&path).unwrap();
    (store, raw, path)
}

/// Versions start at 0 and advance by one per successful save.
#[test]
fn save_advances_version() {
    let store = memory_store();
    let c = store.insert(&new_complaint("cmp-1")).unwrap();
    assert_eq!(c.version, 0);

    let mut edit = c.clone();
    edit.title = "Renamed".into();
    let saved = store.save(&edit, c.version).unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(store.get("cmp-1").unwrap().title, "Renamed");
}

/// A save against an outdated version reports what it found.
#[test]
fn stale_save_is_a_conflict() {
    let store = memory_store();
    let c = store.insert(&new_complaint("cmp-1")).unwrap();
    store.save(&c, 0).unwrap();

    match store.save(&c, 0).unwrap_err() {
        SlaError::ConcurrencyConflict { id, expected, found } => {
            assert_eq!(id, "cmp-1");
            assert_eq!(expected, 0);
            assert_eq!(found, 1);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// Saving or loading an unknown id is NotFound, not a conflict.
#[test]
fn unknown_complaint_is_not_found() {
    let store = memory_store();
    assert!(matches!(store.get("missing"), Err(SlaError::NotFound { .. })));

    let ghost = new_complaint("ghost");
    assert!(matches!(store.save(&ghost, 0), Err(SlaError::NotFound { .. })));
}

/// Inserting the same id twice fails.
#[test]
fn duplicate_insert_fails() {
    let store = memory_store();
    store.insert(&new_complaint("cmp-1")).unwrap();
    assert!(matches!(
        store.insert(&new_complaint("cmp-1")),
        Err(SlaError::Database(_))
    ));
}

/// The ledger is persisted as a JSON array of
/// `{escalated_at, level, reason}` objects, with the level column in step.
#[test]
fn ledger_persisted_layout() {
    let (store, raw, path) = file_store("layout");
    let c = store.insert(&new_complaint("cmp-1")).unwrap();
    let mut escalated = c.clone();
    engine()
        .escalate(&mut escalated, t0() + Duration::hours(30), SLA_BREACH_REASON)
        .unwrap();
    store.save(&escalated, c.version).unwrap();

    let (level, history): (i64, String) = raw
        .query_row(
            "SELECT escalation_level, escalation_history FROM complaint WHERE complaint_id = 'cmp-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(level, 1);

    let json: serde_json::Value = serde_json::from_str(&history).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["level"], 1);
    assert_eq!(entries[0]["reason"], SLA_BREACH_REASON);
    assert!(entries[0]["escalated_at"].is_string());

    drop(raw);
    let _ = std::fs::remove_file(path);
}

/// A row whose level column disagrees with its ledger is rejected on read.
#[test]
fn mismatched_level_is_corrupt() {
    let (store, raw, path) = file_store("corrupt");
    store.insert(&new_complaint("cmp-1")).unwrap();
    raw.execute(
        "UPDATE complaint SET escalation_level = 2 WHERE complaint_id = 'cmp-1'",
        [],
    )
    .unwrap();

    assert!(matches!(store.get("cmp-1"), Err(SlaError::CorruptRecord { .. })));

    drop(raw);
    let _ = std::fs::remove_file(path);
}

/// A ledger with a gap in its levels is rejected on read.
#[test]
fn ledger_with_gap_is_corrupt() {
    let (store, raw, path) = file_store("gap");
    store.insert(&new_complaint("cmp-1")).unwrap();
    raw.execute(
        "UPDATE complaint SET escalation_level = 1,
             escalation_history = '[{\"escalated_at\":\"2025-07-02T12:00:00Z\",\"level\":2,\"reason\":\"SLA breach\"}]'
         WHERE complaint_id = 'cmp-1'",
        [],
    )
    .unwrap();

    match store.get("cmp-1") {
        Err(SlaError::CorruptRecord { id, .. }) => assert_eq!(id, "cmp-1"),
        other => panic!("expected corrupt record, got {other:?}"),
    }

    drop(raw);
    let _ = std::fs::remove_file(path);
}

/// The breach query returns only unresolved complaints past `sla_due`,
/// earliest deadline first.
#[test]
fn breach_query_orders_by_deadline() {
    let store = memory_store();
    let mut late = new_complaint("cmp-late");
    late.sla_due = Some(t0() + Duration::hours(5));
    let mut later = new_complaint("cmp-later");
    later.sla_due = Some(t0() + Duration::hours(3));
    let mut fine = new_complaint("cmp-fine");
    fine.sla_due = Some(t0() + Duration::hours(50));
    for c in [&late, &later, &fine] {
        store.insert(c).unwrap();
    }

    let ids: Vec<_> = store
        .query_breached(t0() + Duration::hours(10))
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["cmp-later", "cmp-late"]);
}
