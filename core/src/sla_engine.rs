//! SLA engine: pure decision logic over a single complaint.
//!
//! PHASES: `Triage` (initial) -> `Resolution` (terminal for SLA purposes).
//! Every operation matches exhaustively on `SlaPhase`.
//!
//! RULES:
//!   - All durations are whole wall-clock hours.
//!   - Comparisons are strict: a deadline equal to `now` is still compliant.
//!   - The engine never touches the store; callers persist the result.

use crate::{
    complaint::{Complaint, ComplaintStatus, Priority, SlaPhase},
    config::SlaPolicy,
    error::{SlaError, SlaResult},
    ledger::{EscalationEvent, TRIAGE_BREACH_REASON},
    types::{Timestamp, MAX_ESCALATION_LEVEL},
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SlaEngine {
    policy: Arc<SlaPolicy>,
}

impl SlaEngine {
    pub fn new(policy: Arc<SlaPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SlaPolicy {
        &self.policy
    }

    /// Start the triage clock. Called exactly once, at submission.
    pub fn initialize_triage(&self, c: &mut Complaint, now: Timestamp) -> SlaResult<()> {
        if c.sla_start.is_some() {
            return Err(SlaError::invalid_transition(
                &c.id,
                "triage SLA has already been initialized",
            ));
        }
        let due = self.policy.triage_deadline(now);
        c.sla_phase = SlaPhase::Triage;
        c.sla_start = Some(now);
        c.triage_sla_due = Some(due);
        c.sla_due = Some(due);
        c.triage_breached = false;
        c.escalation_history = Default::default();

        log::info!("complaint {}: triage SLA started, due {due}", c.id);
        Ok(())
    }

    /// Assignment: start the resolution clock from `now`.
    /// A late assignment is allowed but recorded as a triage breach.
    pub fn transition_to_resolution(
        &self,
        c: &mut Complaint,
        priority: Priority,
        now: Timestamp,
    ) -> SlaResult<()> {
        match c.sla_phase {
            SlaPhase::Resolution => {
                return Err(SlaError::invalid_transition(
                    &c.id,
                    "complaint is already in the resolution phase",
                ));
            }
            SlaPhase::Triage => {}
        }

        if c.triage_sla_due.is_some_and(|due| now > due) {
            c.triage_breached = true;
            log::warn!("complaint {}: assigned after triage breach", c.id);
        }

        let due = self.policy.resolution_deadline(priority, now);
        c.sla_phase = SlaPhase::Resolution;
        c.priority = priority;
        c.priority_set_at = Some(now);
        c.resolution_sla_due = Some(due);
        c.sla_due = Some(due);
        c.response_sla_due = Some(self.policy.response_deadline(priority, now));

        log::info!(
            "complaint {}: resolution SLA started, priority={priority} due {due}",
            c.id
        );
        Ok(())
    }

    /// Record a priority edit. In triage the priority is inert; in
    /// resolution the clock restarts from `now`.
    pub fn recalculate_on_priority_change(
        &self,
        c: &mut Complaint,
        new_priority: Priority,
        now: Timestamp,
    ) {
        c.priority = new_priority;
        match c.sla_phase {
            SlaPhase::Triage => {
                log::info!(
                    "complaint {}: priority set to {new_priority} during triage, no SLA impact",
                    c.id
                );
            }
            SlaPhase::Resolution => {
                let due = self.policy.resolution_deadline(new_priority, now);
                c.priority_set_at = Some(now);
                c.resolution_sla_due = Some(due);
                c.sla_due = Some(due);
                c.response_sla_due = Some(self.policy.response_deadline(new_priority, now));
                log::info!(
                    "complaint {}: SLA recalculated for priority {new_priority}, due {due}",
                    c.id
                );
            }
        }
    }

    pub fn is_breached(&self, c: &Complaint, now: Timestamp) -> bool {
        c.sla_due.is_some_and(|due| now > due) && c.status != ComplaintStatus::Resolved
    }

    pub fn needs_escalation(&self, c: &Complaint, now: Timestamp) -> bool {
        self.is_breached(c, now) && c.escalation_level() < MAX_ESCALATION_LEVEL
    }

    /// Raise the level by one and append the matching ledger entry.
    /// Returns `None` (and changes nothing) at the cap.
    pub fn escalate(
        &self,
        c: &mut Complaint,
        now: Timestamp,
        reason: &str,
    ) -> Option<EscalationEvent> {
        let event = c.escalation_history.append(now, reason)?;
        log::warn!(
            "complaint {} escalated to level {} ({reason})",
            c.id,
            event.level
        );
        Some(event)
    }

    /// Mark a triage breach, guaranteeing at least level 1.
    /// Returns the ledger entry when one had to be written.
    pub fn record_triage_breach(
        &self,
        c: &mut Complaint,
        now: Timestamp,
    ) -> Option<EscalationEvent> {
        c.triage_breached = true;
        if !c.escalation_history.is_empty() {
            return None;
        }
        let event = c.escalation_history.append(now, TRIAGE_BREACH_REASON)?;
        log::error!(
            "TRIAGE BREACH: complaint {} not assigned within {}h",
            c.id,
            self.policy.triage_hours
        );
        Some(event)
    }

    /// Unassigned and inside the alert window, not yet breached.
    pub fn triage_critical(&self, c: &Complaint, now: Timestamp) -> bool {
        if !self.awaiting_triage(c) {
            return false;
        }
        match c.triage_sla_due {
            Some(due) => now < due && (due - now) <= self.policy.triage_alert_window(),
            None => false,
        }
    }

    pub fn triage_overdue(&self, c: &Complaint, now: Timestamp) -> bool {
        self.awaiting_triage(c) && c.triage_sla_due.is_some_and(|due| now >= due)
    }

    fn awaiting_triage(&self, c: &Complaint) -> bool {
        match c.sla_phase {
            SlaPhase::Triage => c.status == ComplaintStatus::Pending,
            SlaPhase::Resolution => false,
        }
    }
}
