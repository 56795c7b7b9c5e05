//! SLA event log: every state change the core makes is recorded here.
//!
//! Notification delivery hooks in by reading this log; the core itself
//! sends nothing.

use crate::{
    complaint::{ComplaintStatus, Priority},
    error::SlaError,
    store::ComplaintStore,
    types::{ComplaintId, Timestamp},
};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlaEvent {
    ComplaintSubmitted {
        at: Timestamp,
        complaint_id: ComplaintId,
        triage_due: Timestamp,
    },
    ResolutionPhaseStarted {
        at: Timestamp,
        complaint_id: ComplaintId,
        officer: String,
        priority: Priority,
        resolution_due: Timestamp,
        triage_breached: bool,
    },
    PriorityChanged {
        at: Timestamp,
        complaint_id: ComplaintId,
        from: Priority,
        to: Priority,
        sla_due: Option<Timestamp>,
    },
    StatusChanged {
        at: Timestamp,
        complaint_id: ComplaintId,
        from: ComplaintStatus,
        to: ComplaintStatus,
    },
    ComplaintEscalated {
        at: Timestamp,
        complaint_id: ComplaintId,
        level: u8,
        reason: String,
    },
    TriageBreached {
        at: Timestamp,
        complaint_id: ComplaintId,
    },
    ComplaintResolved {
        at: Timestamp,
        complaint_id: ComplaintId,
        on_time: bool,
    },
    EscalationScanCompleted {
        at: Timestamp,
        escalated: usize,
        failed: usize,
    },
}

impl SlaEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            SlaEvent::ComplaintSubmitted { .. } => "complaint_submitted",
            SlaEvent::ResolutionPhaseStarted { .. } => "resolution_phase_started",
            SlaEvent::PriorityChanged { .. } => "priority_changed",
            SlaEvent::StatusChanged { .. } => "status_changed",
            SlaEvent::ComplaintEscalated { .. } => "complaint_escalated",
            SlaEvent::TriageBreached { .. } => "triage_breached",
            SlaEvent::ComplaintResolved { .. } => "complaint_resolved",
            SlaEvent::EscalationScanCompleted { .. } => "escalation_scan_completed",
        }
    }

    pub fn complaint_id(&self) -> Option<&str> {
        match self {
            SlaEvent::ComplaintSubmitted { complaint_id, .. }
            | SlaEvent::ResolutionPhaseStarted { complaint_id, .. }
            | SlaEvent::PriorityChanged { complaint_id, .. }
            | SlaEvent::StatusChanged { complaint_id, .. }
            | SlaEvent::ComplaintEscalated { complaint_id, .. }
            | SlaEvent::TriageBreached { complaint_id, .. }
            | SlaEvent::ComplaintResolved { complaint_id, .. } => Some(complaint_id),
            SlaEvent::EscalationScanCompleted { .. } => None,
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            SlaEvent::ComplaintSubmitted { at, .. }
            | SlaEvent::ResolutionPhaseStarted { at, .. }
            | SlaEvent::PriorityChanged { at, .. }
            | SlaEvent::StatusChanged { at, .. }
            | SlaEvent::ComplaintEscalated { at, .. }
            | SlaEvent::TriageBreached { at, .. }
            | SlaEvent::ComplaintResolved { at, .. }
            | SlaEvent::EscalationScanCompleted { at, .. } => *at,
        }
    }
}

/// One persisted row of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub complaint_id: Option<ComplaintId>,
    pub recorded_at: Timestamp,
    pub event_type: String,
    pub payload: String,
}

impl EventLogEntry {
    pub fn from_event(event: &SlaEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            complaint_id: event.complaint_id().map(String::from),
            recorded_at: event.at(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn decode(&self) -> serde_json::Result<SlaEvent> {
        serde_json::from_str(&self.payload)
    }
}

/// Append events to the store's log. A failed append is logged, never
/// propagated: the state change it describes has already been saved.
pub(crate) fn record_events(store: &dyn ComplaintStore, events: &[SlaEvent]) {
    for event in events {
        let result = EventLogEntry::from_event(event)
            .map_err(SlaError::from)
            .and_then(|entry| store.append_event(&entry));
        if let Err(e) = result {
            log::error!("failed to record {} event: {e}", event.type_name());
        }
    }
}
