//! The complaint aggregate: the only record this core mutates.
//!
//! SLA fields are written exclusively by `SlaEngine`; the escalation
//! ledger is append-only and its length *is* the escalation level.

use crate::{
    ledger::EscalationLedger,
    types::{ComplaintId, Timestamp, Version},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::Assigned => "assigned",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ComplaintStatus::Pending),
            "assigned" => Ok(ComplaintStatus::Assigned),
            "in_progress" => Ok(ComplaintStatus::InProgress),
            "resolved" => Ok(ComplaintStatus::Resolved),
            _ => Err(format!("Invalid complaint status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

/// Which deadline is currently running. `Triage` -> `Resolution`, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaPhase {
    Triage,
    Resolution,
}

impl SlaPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SlaPhase::Triage => "triage",
            SlaPhase::Resolution => "resolution",
        }
    }
}

impl fmt::Display for SlaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlaPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "triage" => Ok(SlaPhase::Triage),
            "resolution" => Ok(SlaPhase::Resolution),
            _ => Err(format!("Invalid SLA phase: {s}")),
        }
    }
}

/// Caller-supplied content of a new complaint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplaintDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub submitted_by: Option<String>,

    pub status: ComplaintStatus,
    pub priority: Priority,

    pub assigned_to: Option<String>,
    pub assigned_at: Option<Timestamp>,
    pub acknowledged_at: Option<Timestamp>,

    pub sla_phase: SlaPhase,
    pub sla_start: Option<Timestamp>,
    pub triage_sla_due: Option<Timestamp>,
    pub resolution_sla_due: Option<Timestamp>,
    /// Mirrors the deadline of the active phase.
    pub sla_due: Option<Timestamp>,
    pub response_sla_due: Option<Timestamp>,
    pub priority_set_at: Option<Timestamp>,
    pub triage_breached: bool,
    pub escalation_history: EscalationLedger,

    pub submitted_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub closed_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub updated_by: Option<String>,

    pub version: Version,
}

impl Complaint {
    /// A freshly submitted complaint. SLA fields stay empty until
    /// `SlaEngine::initialize_triage` runs.
    pub fn new(id: ComplaintId, draft: ComplaintDraft, submitted_at: Timestamp) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            category: draft.category,
            submitted_by: draft.submitted_by,
            status: ComplaintStatus::Pending,
            // Placeholder: inert until an officer is assigned.
            priority: Priority::Medium,
            assigned_to: None,
            assigned_at: None,
            acknowledged_at: None,
            sla_phase: SlaPhase::Triage,
            sla_start: None,
            triage_sla_due: None,
            resolution_sla_due: None,
            sla_due: None,
            response_sla_due: None,
            priority_set_at: None,
            triage_breached: false,
            escalation_history: EscalationLedger::default(),
            submitted_at,
            closed_at: None,
            closed_by: None,
            resolution_notes: None,
            updated_by: None,
            version: 0,
        }
    }

    pub fn escalation_level(&self) -> u8 {
        self.escalation_history.level()
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ComplaintStatus::Resolved
    }

    /// Whole hours until the active phase's deadline (negative once past).
    pub fn hours_remaining(&self, now: Timestamp) -> Option<i64> {
        let deadline = match self.sla_phase {
            SlaPhase::Triage => self.triage_sla_due,
            SlaPhase::Resolution => self.resolution_sla_due,
        }?;
        Some((deadline - now).num_hours())
    }

    /// Whole hours until `sla_due` (negative once past).
    pub fn hours_until_breach(&self, now: Timestamp) -> Option<i64> {
        self.sla_due.map(|due| (due - now).num_hours())
    }

    pub fn resolution_time_hours(&self) -> Option<i64> {
        self.closed_at
            .map(|closed| (closed - self.submitted_at).num_hours())
    }

    /// First-response deadline passed with nobody having picked it up.
    pub fn response_overdue(&self, now: Timestamp) -> bool {
        match self.response_sla_due {
            Some(due) => now > due && self.acknowledged_at.is_none() && !self.is_resolved(),
            None => false,
        }
    }
}
