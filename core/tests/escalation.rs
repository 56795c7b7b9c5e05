//! Escalation scheduler tests: breach pass, triage pass, re-arm window,
//! and per-complaint failure isolation.

use chrono::{Duration, TimeZone, Utc};
use complaint_sla_core::{
    clock::{Clock, ManualClock},
    complaint::{Complaint, ComplaintDraft, Priority},
    config::SlaConfig,
    error::{SlaError, SlaResult},
    event::{EventLogEntry, SlaEvent},
    ledger::{SLA_BREACH_REASON, TRIAGE_BREACH_REASON},
    service::SlaService,
    store::{ComplaintStore, SlaCounts, SqliteStore},
    types::{Timestamp, Version, MAX_ESCALATION_LEVEL},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 3, 6, 0, 0).unwrap()
}

fn hours(n: i64) -> Duration {
    Duration::hours(n)
}

fn draft(title: &str) -> ComplaintDraft {
    ComplaintDraft {
        title: title.into(),
        description: format!("{title} reported by resident"),
        category: "utilities".into(),
        submitted_by: None,
    }
}

fn sqlite() -> Arc<SqliteStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = SqliteStore::in_memory().unwrap();
    store.migrate().unwrap();
    Arc::new(store)
}

fn service_over(store: Arc<dyn ComplaintStore>, reports: Arc<SqliteStore>, config: SlaConfig) -> SlaService {
    let clock = Arc::new(ManualClock::new(t0()));
    SlaService::new(&config, store, reports, clock).unwrap()
}

fn build() -> (Arc<SqliteStore>, SlaService) {
    let store = sqlite();
    let service = service_over(store.clone(), store.clone(), SlaConfig::default_test());
    (store, service)
}

fn assert_ledger_consistent(c: &Complaint) {
    assert_eq!(
        c.escalation_history.len(),
        c.escalation_level() as usize,
        "complaint {} ledger/level mismatch",
        c.id
    );
    assert!(c.escalation_level() <= MAX_ESCALATION_LEVEL);
}

// ── Test store that races or fails saves ─────────────────────────────

/// Wraps the SQLite store. Each armed race makes a concurrent writer bump
/// the row just before the scheduler's save lands; `broken` saves fail.
struct RacingStore {
    inner: Arc<SqliteStore>,
    races: AtomicUsize,
    broken: Mutex<Option<String>>,
}

impl RacingStore {
    fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            races: AtomicUsize::new(0),
            broken: Mutex::new(None),
        }
    }

    fn arm_races(&self, n: usize) {
        self.races.store(n, Ordering::SeqCst);
    }

    fn break_saves_for(&self, id: &str) {
        *self.broken.lock().unwrap() = Some(id.to_string());
    }
}

impl ComplaintStore for RacingStore {
    fn insert(&self, complaint: &Complaint) -> SlaResult<Complaint> {
        self.inner.insert(complaint)
    }

    fn get(&self, id: &str) -> SlaResult<Complaint> {
        self.inner.get(id)
    }

    fn save(&self, complaint: &Complaint, expected_version: Version) -> SlaResult<Complaint> {
        if self.broken.lock().unwrap().as_deref() == Some(complaint.id.as_str()) {
            return Err(SlaError::Other(anyhow::anyhow!("simulated write failure")));
        }
        let raced = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if raced {
            let fresh = self.inner.get(&complaint.id)?;
            let mut edited = fresh.clone();
            edited.updated_by = Some("api-writer".into());
            self.inner.save(&edited, fresh.version)?;
        }
        self.inner.save(complaint, expected_version)
    }

    fn query_breached(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.inner.query_breached(now)
    }

    fn query_triage_overdue(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        self.inner.query_triage_overdue(now)
    }

    fn query_triage_candidates(&self) -> SlaResult<Vec<Complaint>> {
        self.inner.query_triage_candidates()
    }

    fn query_escalated(&self, min_level: u8) -> SlaResult<Vec<Complaint>> {
        self.inner.query_escalated(min_level)
    }

    fn sla_counts(&self, now: Timestamp) -> SlaResult<SlaCounts> {
        self.inner.sla_counts(now)
    }

    fn append_event(&self, entry: &EventLogEntry) -> SlaResult<()> {
        self.inner.append_event(entry)
    }
}

fn build_racing() -> (Arc<SqliteStore>, Arc<RacingStore>, SlaService) {
    let inner = sqlite();
    let racing = Arc::new(RacingStore::new(inner.clone()));
    let service = service_over(racing.clone(), inner.clone(), SlaConfig::default_test());
    (inner, racing, service)
}

// ── General breach pass ──────────────────────────────────────────────

/// A breached complaint is escalated once; a second run at the same
/// instant leaves it alone.
#[test]
fn same_instant_scans_escalate_once() {
    let (_, service) = build();
    let c = service.submit(draft("No water"), t0()).unwrap();
    let now = t0() + hours(30);

    let first = service.run_escalation_scan(now).unwrap();
    assert_eq!(first.escalated, 1);
    assert_eq!(first.escalated_count(), 1);

    let second = service.run_escalation_scan(now).unwrap();
    assert_eq!(second.escalated_count(), 0);
    assert_eq!(second.not_rearmed, 1);

    let after = service.get(&c.id).unwrap();
    assert_eq!(after.escalation_level(), 1);
    assert_ledger_consistent(&after);
}

/// A wider re-arm window holds back the next level until it has elapsed.
#[test]
fn configured_rearm_window_spaces_escalations() {
    let store = sqlite();
    let mut config = SlaConfig::default_test();
    config.scheduler.rearm_hours = 2;
    let service = service_over(store.clone(), store.clone(), config);
    let c = service.submit(draft("Blocked drain"), t0()).unwrap();

    assert_eq!(service.run_escalation_scan(t0() + hours(30)).unwrap().escalated, 1);

    let early = service.run_escalation_scan(t0() + hours(31)).unwrap();
    assert_eq!(early.escalated, 0);
    assert_eq!(early.not_rearmed, 1);
    assert_eq!(service.get(&c.id).unwrap().escalation_level(), 1);

    let due = service.run_escalation_scan(t0() + hours(32)).unwrap();
    assert_eq!(due.escalated, 1);
    let after = service.get(&c.id).unwrap();
    assert_eq!(after.escalation_level(), 2);
    assert_ledger_consistent(&after);
}

/// Hourly runs climb one level per run and stop at the cap, where the
/// complaint is reported for manual handling.
#[test]
fn hourly_scans_climb_to_cap_and_stop() {
    let (_, service) = build();
    let c = service.submit(draft("Gas smell"), t0()).unwrap();
    service
        .assign_with_priority(&c.id, "officer-7", Priority::High, t0() + hours(1))
        .unwrap();
    // High priority: resolution due at t0+25h.
    let mut expected = 0;
    for step in 0..5 {
        let now = t0() + hours(26 + step);
        let report = service.run_escalation_scan(now).unwrap();
        let current = service.get(&c.id).unwrap();
        assert_ledger_consistent(&current);

        if expected < MAX_ESCALATION_LEVEL {
            expected += 1;
            assert_eq!(report.escalated, 1, "run {step}");
        } else {
            assert_eq!(report.escalated, 0, "run {step}");
            assert_eq!(report.at_max_level, 1, "run {step}");
        }
        assert_eq!(current.escalation_level(), expected);
    }

    let top = service.highly_escalated(MAX_ESCALATION_LEVEL).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, c.id);
    for event in top[0].escalation_history.all() {
        assert_eq!(event.reason, SLA_BREACH_REASON);
    }
}

/// Complaints within their deadline and resolved complaints are never escalated.
#[test]
fn unbreached_and_resolved_complaints_are_untouched() {
    let (store, service) = build();
    let fresh = service.submit(draft("Pothole"), t0() + hours(20)).unwrap();
    let closed = service.submit(draft("Graffiti"), t0()).unwrap();
    service
        .assign_with_priority(&closed.id, "officer-1", Priority::Low, t0() + hours(1))
        .unwrap();
    store
        .insert_report(&closed.id, Some("officer-1"), "Cleaned", t0() + hours(2))
        .unwrap();
    service.resolve(&closed.id, t0() + hours(3)).unwrap();

    let report = service.run_escalation_scan(t0() + hours(30)).unwrap();

    assert_eq!(report.escalated_count(), 0);
    assert_eq!(service.get(&fresh.id).unwrap().escalation_level(), 0);
    assert_eq!(service.get(&closed.id).unwrap().escalation_level(), 0);
}

/// The most overdue complaint is escalated first.
#[test]
fn breach_pass_runs_most_urgent_first() {
    let (store, service) = build();
    let later = service.submit(draft("Noise"), t0() + hours(2)).unwrap();
    let earlier = service.submit(draft("Flooding"), t0()).unwrap();

    service.run_escalation_scan(t0() + hours(40)).unwrap();

    let order: Vec<String> = store
        .events_of_type("complaint_escalated")
        .unwrap()
        .into_iter()
        .filter_map(|e| e.complaint_id)
        .collect();
    assert_eq!(order, vec![earlier.id, later.id]);
}

// ── Triage breach pass ───────────────────────────────────────────────

/// Exactly at the triage deadline the complaint is not breached yet, so
/// only the triage pass acts: level 1 with the triage reason.
#[test]
fn triage_deadline_reached_forces_level_one_with_triage_reason() {
    let (_, service) = build();
    let c = service.submit(draft("Broken bench"), t0()).unwrap();

    let report = service.run_escalation_scan(t0() + hours(24)).unwrap();
    assert_eq!(report.escalated, 0);
    assert_eq!(report.triage_marked, 1);

    let after = service.get(&c.id).unwrap();
    assert!(after.triage_breached);
    assert_eq!(after.escalation_level(), 1);
    assert_eq!(after.escalation_history.all()[0].reason, TRIAGE_BREACH_REASON);
}

/// Past the triage deadline the general pass escalates first; the triage
/// pass then only marks the breach, adding no second ledger entry.
#[test]
fn triage_pass_after_general_escalation_only_marks() {
    let (_, service) = build();
    let c = service.submit(draft("Dead tree"), t0()).unwrap();

    let report = service.run_escalation_scan(t0() + hours(25)).unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.triage_marked, 1);
    assert_eq!(report.escalated_count(), 1, "one distinct complaint");

    let after = service.get(&c.id).unwrap();
    assert!(after.triage_breached);
    assert_eq!(after.escalation_level(), 1);
    assert_eq!(after.escalation_history.all()[0].reason, SLA_BREACH_REASON);

    // Already marked: later runs leave the triage flag path alone.
    let next = service.run_escalation_scan(t0() + hours(26)).unwrap();
    assert_eq!(next.triage_marked, 0);
    assert_eq!(next.escalated, 1);
}

// ── Conflicts and failures ───────────────────────────────────────────

/// A concurrent write between load and save is retried once on a fresh read.
#[test]
fn conflict_is_retried_on_fresh_read() {
    let (inner, racing, service) = build_racing();
    let c = service.submit(draft("Blocked drain"), t0()).unwrap();
    racing.arm_races(1);

    let report = service.run_escalation_scan(t0() + hours(30)).unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.deferred, 0);

    let after = inner.get_complaint(&c.id).unwrap();
    assert_eq!(after.escalation_level(), 1);
    assert_eq!(after.updated_by.as_deref(), Some("api-writer"), "concurrent edit kept");
    assert_ledger_consistent(&after);
}

/// Two conflicts in a row defer the complaint to the next run.
#[test]
fn repeated_conflict_is_deferred_to_next_run() {
    let (_, racing, service) = build_racing();
    let c = service.submit(draft("Streetlight"), t0()).unwrap();
    let now = t0() + hours(24);
    racing.arm_races(2);

    let report = service.run_escalation_scan(now).unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(service.get(&c.id).unwrap().escalation_level(), 0);

    let retry = service.run_escalation_scan(now + hours(1)).unwrap();
    assert_eq!(retry.escalated_count(), 1);
    assert_eq!(service.get(&c.id).unwrap().escalation_level(), 1);
}

/// One failing complaint is counted and skipped; the rest of the batch runs.
#[test]
fn failing_complaint_does_not_stop_the_batch() {
    let (_, racing, service) = build_racing();
    let bad = service.submit(draft("Bad row"), t0()).unwrap();
    let good = service.submit(draft("Good row"), t0() + hours(1)).unwrap();
    racing.break_saves_for(&bad.id);

    let report = service.run_escalation_scan(t0() + hours(30)).unwrap();

    // The bad complaint fails in both passes.
    assert_eq!(report.failed, 2);
    assert_eq!(report.escalated, 1);
    assert_eq!(service.get(&good.id).unwrap().escalation_level(), 1);
    assert_eq!(service.get(&bad.id).unwrap().escalation_level(), 0);
}

// ── Run bookkeeping and periodic task ────────────────────────────────

/// Each run leaves a completion record in the event log.
#[test]
fn scan_completion_is_logged() {
    let (store, service) = build();
    service.submit(draft("Litter"), t0()).unwrap();
    service.run_escalation_scan(t0() + hours(30)).unwrap();

    let entries = store.events_of_type("escalation_scan_completed").unwrap();
    assert_eq!(entries.len(), 1);
    match entries[0].decode().unwrap() {
        SlaEvent::EscalationScanCompleted { escalated, failed, .. } => {
            assert_eq!(escalated, 1);
            assert_eq!(failed, 0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// `run_now` reads the injected clock.
#[test]
fn run_now_uses_injected_clock() {
    let store = sqlite();
    let clock = Arc::new(ManualClock::new(t0()));
    let service = SlaService::new(
        &SlaConfig::default_test(),
        store.clone(),
        store.clone(),
        clock.clone(),
    )
    .unwrap();
    let c = service.submit(draft("Bins"), clock.now()).unwrap();

    clock.advance_hours(10);
    assert_eq!(service.scheduler().run_now().unwrap().escalated_count(), 0);

    clock.advance_hours(20);
    assert_eq!(service.scheduler().run_now().unwrap().escalated_count(), 1);
    assert_eq!(service.get(&c.id).unwrap().escalation_level(), 1);
}

/// Disabled escalation never starts the periodic task; manual runs still work.
#[test]
fn disabled_scheduler_does_not_start() {
    let (_, service) = build();

    assert!(service.start_scheduler().unwrap().is_none());

    service.submit(draft("Manual only"), t0()).unwrap();
    let report = service.run_escalation_scan(t0() + hours(30)).unwrap();
    assert_eq!(report.escalated_count(), 1);
}

/// The periodic task starts when enabled and stops cleanly on shutdown.
#[test]
fn enabled_scheduler_starts_and_shuts_down() {
    let store = sqlite();
    let service = service_over(store.clone(), store.clone(), SlaConfig::default());
    let handle = service.start_scheduler().unwrap().expect("scheduler enabled");
    handle.shutdown();
}
