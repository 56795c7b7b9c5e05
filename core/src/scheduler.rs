//! Escalation scheduler: the periodic driver over the whole store.
//!
//! EXECUTION ORDER per run (fixed):
//!   1. Snapshot both candidate sets as of `now` (scan start).
//!   2. General breach pass: escalate breached complaints, most urgent first.
//!   3. Triage breach pass: mark unassigned complaints past triage.
//!
//! RULES:
//!   - Complaints breaching mid-scan wait for the next run.
//!   - A failure on one complaint is logged and skipped; the batch goes on.
//!   - A stale-version write is retried once after a fresh read, then
//!     deferred to the next run.
//!   - A complaint is escalated at most once per re-arm window, so two
//!     runs at the same instant escalate it once.

use crate::{
    clock::Clock,
    complaint::Complaint,
    config::SchedulerConfig,
    error::{SlaError, SlaResult},
    event::{record_events, SlaEvent},
    ledger::SLA_BREACH_REASON,
    metrics::SlaMetrics,
    sla_engine::SlaEngine,
    store::ComplaintStore,
    types::{ComplaintId, Timestamp, MAX_ESCALATION_LEVEL},
};
use chrono::{Duration, NaiveDate, Timelike};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub started_at: Option<Timestamp>,
    /// Complaints returned by the breach query at scan start.
    pub breached_seen: usize,
    /// Complaints returned by the triage-overdue query at scan start.
    pub triage_seen: usize,
    pub escalated: usize,
    pub triage_marked: usize,
    /// Breached but already at the top level; left for manual handling.
    pub at_max_level: usize,
    /// Breached but escalated too recently to escalate again.
    pub not_rearmed: usize,
    /// Still conflicting after the retry; picked up next run.
    pub deferred: usize,
    pub failed: usize,
    touched: BTreeSet<ComplaintId>,
}

impl ScanReport {
    /// Distinct complaints that were escalated or triage-marked.
    pub fn escalated_count(&self) -> usize {
        self.touched.len()
    }

    pub fn escalated_ids(&self) -> impl Iterator<Item = &ComplaintId> {
        self.touched.iter()
    }
}

/// What a pass decided for one complaint.
enum Step {
    Skip(Skip),
    Write(Vec<SlaEvent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    NotEligible,
    AtMaxLevel,
    NotRearmed,
}

enum Applied {
    Skipped(Skip),
    Written,
}

pub struct EscalationScheduler {
    engine: SlaEngine,
    store: Arc<dyn ComplaintStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    scan_lock: Mutex<()>,
    last_report_day: Mutex<Option<NaiveDate>>,
}

impl EscalationScheduler {
    pub fn new(
        engine: SlaEngine,
        store: Arc<dyn ComplaintStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            store,
            clock,
            config,
            scan_lock: Mutex::new(()),
            last_report_day: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run both passes at the clock's current time.
    pub fn run_now(&self) -> SlaResult<ScanReport> {
        self.run(self.clock.now())
    }

    /// Run both passes as of `now`. Only the candidate queries can fail
    /// the batch; per-complaint errors are counted in the report.
    pub fn run(&self, now: Timestamp) -> SlaResult<ScanReport> {
        let _guard = self.scan_lock.lock().unwrap_or_else(|e| e.into_inner());

        let breached = self.store.query_breached(now)?;
        let triage_overdue = self.store.query_triage_overdue(now)?;

        let mut report = ScanReport {
            started_at: Some(now),
            breached_seen: breached.len(),
            triage_seen: triage_overdue.len(),
            ..ScanReport::default()
        };
        log::info!(
            "escalation scan at {now}: {} breached, {} triage overdue",
            breached.len(),
            triage_overdue.len()
        );

        let rearm_hours = self.config.rearm_hours;
        for complaint in breached {
            let id = complaint.id.clone();
            let result = self.apply_with_retry(complaint, now, |engine, c, now| {
                Self::general_step(engine, c, now, rearm_hours)
            });
            self.tally(&mut report, &id, result, |r| r.escalated += 1);
        }

        for candidate in triage_overdue {
            let id = candidate.id;
            // The general pass may have written this row already.
            let result = self.store.get(&id).and_then(|fresh| {
                self.apply_with_retry(fresh, now, |engine, c, now| {
                    Self::triage_step(engine, c, now)
                })
            });
            self.tally(&mut report, &id, result, |r| r.triage_marked += 1);
        }

        self.record(&[SlaEvent::EscalationScanCompleted {
            at: now,
            escalated: report.escalated_count(),
            failed: report.failed + report.deferred,
        }]);
        log::info!(
            "escalation scan at {now} completed: {} complaints escalated \
             (general={}, triage={}, max_level={}, deferred={}, failed={})",
            report.escalated_count(),
            report.escalated,
            report.triage_marked,
            report.at_max_level,
            report.deferred,
            report.failed,
        );
        Ok(report)
    }

    fn general_step(engine: &SlaEngine, c: &mut Complaint, now: Timestamp, rearm_hours: i64) -> Step {
        if !engine.needs_escalation(c, now) {
            if engine.is_breached(c, now) {
                return Step::Skip(Skip::AtMaxLevel);
            }
            return Step::Skip(Skip::NotEligible);
        }
        if !Self::rearmed(c, now, rearm_hours) {
            return Step::Skip(Skip::NotRearmed);
        }
        match engine.escalate(c, now, SLA_BREACH_REASON) {
            Some(event) => Step::Write(vec![SlaEvent::ComplaintEscalated {
                at: now,
                complaint_id: c.id.clone(),
                level: event.level,
                reason: event.reason,
            }]),
            None => Step::Skip(Skip::AtMaxLevel),
        }
    }

    fn triage_step(engine: &SlaEngine, c: &mut Complaint, now: Timestamp) -> Step {
        if !engine.triage_overdue(c, now) || c.triage_breached {
            return Step::Skip(Skip::NotEligible);
        }
        let mut events = vec![SlaEvent::TriageBreached {
            at: now,
            complaint_id: c.id.clone(),
        }];
        if let Some(event) = engine.record_triage_breach(c, now) {
            events.push(SlaEvent::ComplaintEscalated {
                at: now,
                complaint_id: c.id.clone(),
                level: event.level,
                reason: event.reason,
            });
        }
        Step::Write(events)
    }

    /// No escalation since `now - rearm_hours`.
    fn rearmed(c: &Complaint, now: Timestamp, rearm_hours: i64) -> bool {
        match c.escalation_history.last() {
            Some(last) => now >= last.timestamp + Duration::hours(rearm_hours),
            None => true,
        }
    }

    /// Decide, write with the loaded version, and on a conflict re-read
    /// and decide once more.
    fn apply_with_retry<F>(&self, loaded: Complaint, now: Timestamp, step: F) -> SlaResult<Applied>
    where
        F: Fn(&SlaEngine, &mut Complaint, Timestamp) -> Step,
    {
        let mut current = loaded;
        for attempt in 0..2 {
            let mut working = current.clone();
            let events = match step(&self.engine, &mut working, now) {
                Step::Skip(skip) => return Ok(Applied::Skipped(skip)),
                Step::Write(events) => events,
            };
            match self.store.save(&working, current.version) {
                Ok(_) => {
                    self.record(&events);
                    return Ok(Applied::Written);
                }
                Err(e) if e.is_conflict() && attempt == 0 => {
                    log::warn!("complaint {}: {e}; re-reading and retrying once", current.id);
                    current = self.store.get(&current.id)?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(SlaError::Other(anyhow::anyhow!(
            "complaint {}: retry loop exhausted",
            current.id
        )))
    }

    fn tally(
        &self,
        report: &mut ScanReport,
        id: &str,
        result: SlaResult<Applied>,
        on_written: impl FnOnce(&mut ScanReport),
    ) {
        match result {
            Ok(Applied::Written) => {
                on_written(report);
                report.touched.insert(id.to_string());
            }
            Ok(Applied::Skipped(Skip::AtMaxLevel)) => {
                report.at_max_level += 1;
                log::warn!(
                    "complaint {id} is breached at level {MAX_ESCALATION_LEVEL}; needs manual intervention"
                );
            }
            Ok(Applied::Skipped(Skip::NotRearmed)) => report.not_rearmed += 1,
            Ok(Applied::Skipped(Skip::NotEligible)) => {}
            Err(e) if e.is_conflict() => {
                report.deferred += 1;
                log::error!("complaint {id}: still conflicting after retry, deferred to next run: {e}");
            }
            Err(e) => {
                report.failed += 1;
                log::error!("complaint {id}: escalation failed, skipped: {e}");
            }
        }
    }

    fn record(&self, events: &[SlaEvent]) {
        record_events(self.store.as_ref(), events);
    }

    // ── Periodic task ──────────────────────────────────────────

    /// One timer firing: scan, then the daily report if it is due.
    /// Never panics or propagates; the periodic task must survive.
    pub fn tick(&self) {
        let now = self.clock.now();
        log::info!("Starting escalation check for overdue complaints");
        match self.run(now) {
            Ok(report) => log::info!(
                "Escalation check completed - {} complaints escalated",
                report.escalated_count()
            ),
            Err(e) => log::error!("Error during escalation check: {e}"),
        }
        self.maybe_daily_report(now);
    }

    fn maybe_daily_report(&self, now: Timestamp) {
        if now.hour() < self.config.daily_report_hour {
            return;
        }
        let today = now.date_naive();
        {
            let mut last = self
                .last_report_day
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *last == Some(today) {
                return;
            }
            *last = Some(today);
        }
        match self.store.sla_counts(now) {
            Ok(counts) => {
                let m = SlaMetrics::from_counts(&counts);
                log::info!(
                    "Daily SLA report {today}: total={}, overdue={}, escalated={}, compliance={:.1}%",
                    m.total_complaints,
                    m.overdue_complaints,
                    m.escalated_complaints,
                    m.sla_compliance_rate,
                );
            }
            Err(e) => log::error!("Error generating daily SLA report: {e}"),
        }
    }

    /// Start the periodic background task at the configured cadence.
    /// Returns `None` when escalation is disabled in config.
    pub fn spawn(self: Arc<Self>) -> SlaResult<Option<SchedulerHandle>> {
        if !self.config.enabled {
            log::info!("escalation scheduler disabled by configuration");
            return Ok(None);
        }
        let cadence = self.config.cadence();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = Arc::clone(&self);
        let join = std::thread::Builder::new()
            .name("escalation-scheduler".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(cadence) {
                    Err(RecvTimeoutError::Timeout) => worker.tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| SlaError::Other(anyhow::anyhow!("cannot start scheduler thread: {e}")))?;
        log::info!(
            "escalation scheduler started, cadence {} minutes",
            self.config.cadence_minutes
        );
        Ok(Some(SchedulerHandle {
            stop_tx,
            join: Some(join),
        }))
    }
}

/// Owner of the running periodic task.
pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the task and wait for any in-flight run to finish.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("escalation scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
