//! SLA service: the operations the API layer calls.
//!
//! Each operation loads one complaint, applies the engine (and guard),
//! and writes it back with the version it loaded. A stale write surfaces
//! as `ConcurrencyConflict`; the caller decides whether to retry.

use crate::{
    clock::Clock,
    complaint::{Complaint, ComplaintDraft, ComplaintStatus, Priority},
    config::{SlaConfig, SlaPolicy},
    error::{SlaError, SlaResult},
    event::{record_events, SlaEvent},
    metrics::SlaMetrics,
    scheduler::{EscalationScheduler, ScanReport, SchedulerHandle},
    sla_engine::SlaEngine,
    store::ComplaintStore,
    types::Timestamp,
    workflow::{ReportLookup, WorkflowGuard},
};
use std::sync::Arc;

pub struct SlaService {
    engine: SlaEngine,
    store: Arc<dyn ComplaintStore>,
    guard: WorkflowGuard,
    scheduler: Arc<EscalationScheduler>,
}

impl SlaService {
    /// Wire the core together. Fails on invalid configuration.
    pub fn new(
        config: &SlaConfig,
        store: Arc<dyn ComplaintStore>,
        reports: Arc<dyn ReportLookup>,
        clock: Arc<dyn Clock>,
    ) -> SlaResult<Self> {
        config.validate()?;
        let engine = SlaEngine::new(Arc::new(config.policy.clone()));
        let scheduler = Arc::new(EscalationScheduler::new(
            engine.clone(),
            Arc::clone(&store),
            clock,
            config.scheduler.clone(),
        ));
        Ok(Self {
            engine,
            store,
            guard: WorkflowGuard::new(reports),
            scheduler,
        })
    }

    pub fn engine(&self) -> &SlaEngine {
        &self.engine
    }

    pub fn policy(&self) -> &SlaPolicy {
        self.engine.policy()
    }

    pub fn get(&self, id: &str) -> SlaResult<Complaint> {
        self.store.get(id)
    }

    /// Register a new complaint and start its triage clock.
    pub fn submit(&self, draft: ComplaintDraft, now: Timestamp) -> SlaResult<Complaint> {
        let id = format!("cmp-{}", uuid::Uuid::new_v4().simple());
        self.submit_with_id(id, draft, now)
    }

    /// As `submit`, with a caller-chosen id.
    pub fn submit_with_id(
        &self,
        id: String,
        draft: ComplaintDraft,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        let mut complaint = Complaint::new(id, draft, now);
        self.engine.initialize_triage(&mut complaint, now)?;
        let saved = self.store.insert(&complaint)?;

        if let Some(triage_due) = saved.triage_sla_due {
            self.record(&[SlaEvent::ComplaintSubmitted {
                at: now,
                complaint_id: saved.id.clone(),
                triage_due,
            }]);
        }
        log::info!("complaint {} submitted, triage due {:?}", saved.id, saved.triage_sla_due);
        Ok(saved)
    }

    /// Assign an officer and set the priority; starts the resolution clock.
    pub fn assign_with_priority(
        &self,
        id: &str,
        officer: &str,
        priority: Priority,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        let loaded = self.store.get(id)?;
        if loaded.is_resolved() {
            return Err(SlaError::invalid_transition(id, "complaint is already resolved"));
        }
        let mut c = loaded.clone();
        self.engine.transition_to_resolution(&mut c, priority, now)?;
        c.assigned_to = Some(officer.to_string());
        c.assigned_at = Some(now);
        c.status = ComplaintStatus::Assigned;
        c.updated_by = Some(officer.to_string());

        let saved = self.store.save(&c, loaded.version)?;
        let mut events = Vec::with_capacity(2);
        if loaded.status != saved.status {
            events.push(SlaEvent::StatusChanged {
                at: now,
                complaint_id: saved.id.clone(),
                from: loaded.status,
                to: saved.status,
            });
        }
        if let Some(resolution_due) = saved.resolution_sla_due {
            events.push(SlaEvent::ResolutionPhaseStarted {
                at: now,
                complaint_id: saved.id.clone(),
                officer: officer.to_string(),
                priority,
                resolution_due,
                triage_breached: saved.triage_breached,
            });
        }
        self.record(&events);
        log::info!(
            "complaint {id} assigned to {officer} with priority {priority}, resolution due {:?}",
            saved.resolution_sla_due
        );
        Ok(saved)
    }

    /// Change the priority. Unchanged priority is a no-op.
    pub fn change_priority(
        &self,
        id: &str,
        priority: Priority,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        let loaded = self.store.get(id)?;
        if loaded.is_resolved() {
            return Err(SlaError::invalid_transition(id, "complaint is already resolved"));
        }
        if loaded.priority == priority {
            log::debug!("complaint {id}: priority already {priority}");
            return Ok(loaded);
        }
        let mut c = loaded.clone();
        self.engine.recalculate_on_priority_change(&mut c, priority, now);

        let saved = self.store.save(&c, loaded.version)?;
        self.record(&[SlaEvent::PriorityChanged {
            at: now,
            complaint_id: saved.id.clone(),
            from: loaded.priority,
            to: priority,
            sla_due: saved.sla_due,
        }]);
        log::info!(
            "complaint {id} priority changed from {} to {priority}",
            loaded.priority
        );
        Ok(saved)
    }

    /// Generic status change. `Resolved` goes through the workflow guard.
    pub fn update_status(
        &self,
        id: &str,
        status: ComplaintStatus,
        actor: &str,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        if status == ComplaintStatus::Resolved {
            return self.close(id, Some(actor), None, now);
        }
        let loaded = self.store.get(id)?;
        if loaded.is_resolved() {
            return Err(SlaError::invalid_transition(id, "complaint is already resolved"));
        }
        let mut c = loaded.clone();
        c.status = status;
        c.updated_by = Some(actor.to_string());
        match status {
            ComplaintStatus::Assigned => {
                c.assigned_at.get_or_insert(now);
            }
            ComplaintStatus::InProgress => {
                c.acknowledged_at.get_or_insert(now);
            }
            ComplaintStatus::Pending | ComplaintStatus::Resolved => {}
        }

        let saved = self.store.save(&c, loaded.version)?;
        if loaded.status != status {
            self.record(&[SlaEvent::StatusChanged {
                at: now,
                complaint_id: saved.id.clone(),
                from: loaded.status,
                to: status,
            }]);
        }
        log::info!(
            "complaint {id} status changed from {} to {status} by {actor}",
            loaded.status
        );
        Ok(saved)
    }

    /// Resolve the complaint; requires a filed report.
    pub fn resolve(&self, id: &str, now: Timestamp) -> SlaResult<Complaint> {
        self.close(id, None, None, now)
    }

    /// Resolve with closing notes and the closing actor.
    pub fn resolve_with_notes(
        &self,
        id: &str,
        closed_by: &str,
        notes: &str,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        self.close(id, Some(closed_by), Some(notes), now)
    }

    fn close(
        &self,
        id: &str,
        closed_by: Option<&str>,
        notes: Option<&str>,
        now: Timestamp,
    ) -> SlaResult<Complaint> {
        let loaded = self.store.get(id)?;
        if loaded.is_resolved() {
            return Err(SlaError::invalid_transition(id, "complaint is already resolved"));
        }
        let mut c = loaded.clone();
        self.guard.resolve(&mut c, now)?;
        if let Some(actor) = closed_by {
            c.closed_by = Some(actor.to_string());
            c.updated_by = Some(actor.to_string());
        }
        if let Some(notes) = notes {
            c.resolution_notes = Some(notes.to_string());
        }

        let saved = self.store.save(&c, loaded.version)?;
        let on_time = saved.sla_due.map_or(true, |due| now <= due);
        self.record(&[
            SlaEvent::StatusChanged {
                at: now,
                complaint_id: saved.id.clone(),
                from: loaded.status,
                to: saved.status,
            },
            SlaEvent::ComplaintResolved {
                at: now,
                complaint_id: saved.id.clone(),
                on_time,
            },
        ]);
        log::info!(
            "complaint {id} resolved (on_time={on_time}), resolution time {:?} hours",
            saved.resolution_time_hours()
        );
        Ok(saved)
    }

    /// Manually triggered escalation run, synchronous.
    pub fn run_escalation_scan(&self, now: Timestamp) -> SlaResult<ScanReport> {
        let report = self.scheduler.run(now)?;
        log::info!(
            "Manual escalation triggered - {} complaints escalated",
            report.escalated_count()
        );
        Ok(report)
    }

    pub fn metrics(&self, now: Timestamp) -> SlaResult<SlaMetrics> {
        let counts = self.store.sla_counts(now)?;
        Ok(SlaMetrics::from_counts(&counts))
    }

    /// Unassigned complaints nearing their triage deadline, earliest first.
    pub fn triage_critical_complaints(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        Ok(self
            .store
            .query_triage_candidates()?
            .into_iter()
            .filter(|c| self.engine.triage_critical(c, now))
            .collect())
    }

    pub fn triage_overdue_complaints(&self, now: Timestamp) -> SlaResult<Vec<Complaint>> {
        Ok(self
            .store
            .query_triage_overdue(now)?
            .into_iter()
            .filter(|c| self.engine.triage_overdue(c, now))
            .collect())
    }

    /// Unresolved complaints at or above `min_level`, highest first.
    pub fn highly_escalated(&self, min_level: u8) -> SlaResult<Vec<Complaint>> {
        self.store.query_escalated(min_level)
    }

    pub fn scheduler(&self) -> Arc<EscalationScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Start the periodic escalation task, unless disabled in config.
    pub fn start_scheduler(&self) -> SlaResult<Option<SchedulerHandle>> {
        Arc::clone(&self.scheduler).spawn()
    }

    fn record(&self, events: &[SlaEvent]) {
        record_events(self.store.as_ref(), events);
    }
}
