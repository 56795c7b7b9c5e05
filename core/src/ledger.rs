//! Escalation ledger: append-only audit trail of escalations.
//!
//! RULE: entries are never updated, removed, or reordered.
//! Only the engine appends, and every append raises the level by one.

use crate::types::{Timestamp, MAX_ESCALATION_LEVEL};
use serde::{Deserialize, Serialize};

pub const SLA_BREACH_REASON: &str = "SLA breach";
pub const TRIAGE_BREACH_REASON: &str = "Triage SLA breach - no officer assigned";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    #[serde(rename = "escalated_at")]
    pub timestamp: Timestamp,
    /// The level reached by this event.
    pub level: u8,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationLedger {
    entries: Vec<EscalationEvent>,
}

impl EscalationLedger {
    /// Rebuild from persisted entries, checking the ledger shape.
    pub fn from_entries(entries: Vec<EscalationEvent>) -> Result<Self, String> {
        if entries.len() > MAX_ESCALATION_LEVEL as usize {
            return Err(format!(
                "{} escalation entries exceed the cap of {MAX_ESCALATION_LEVEL}",
                entries.len()
            ));
        }
        for (i, entry) in entries.iter().enumerate() {
            if entry.level as usize != i + 1 {
                return Err(format!(
                    "entry {i} records level {} but should record {}",
                    entry.level,
                    i + 1
                ));
            }
        }
        Ok(Self { entries })
    }

    /// Entries in insertion order.
    pub fn all(&self) -> &[EscalationEvent] {
        &self.entries
    }

    pub fn last(&self) -> Option<&EscalationEvent> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn level(&self) -> u8 {
        self.entries.len() as u8
    }

    pub fn at_cap(&self) -> bool {
        self.level() >= MAX_ESCALATION_LEVEL
    }

    /// Append the next-level event. `None` once the cap is reached.
    pub(crate) fn append(&mut self, timestamp: Timestamp, reason: &str) -> Option<EscalationEvent> {
        if self.at_cap() {
            return None;
        }
        let event = EscalationEvent {
            timestamp,
            level: self.level() + 1,
            reason: reason.to_string(),
        };
        self.entries.push(event.clone());
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn append_stops_at_cap() {
        let mut ledger = EscalationLedger::default();
        for h in 0..5 {
            ledger.append(t(h), SLA_BREACH_REASON);
        }
        assert_eq!(ledger.level(), MAX_ESCALATION_LEVEL);
        let levels: Vec<u8> = ledger.all().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        assert_eq!(ledger.last().unwrap().timestamp, t(2));
    }

    #[test]
    fn persisted_layout_uses_escalated_at() {
        let mut ledger = EscalationLedger::default();
        ledger.append(t(9), TRIAGE_BREACH_REASON);

        let json = serde_json::to_value(&ledger).unwrap();
        let entry = &json.as_array().unwrap()[0];
        assert_eq!(entry["level"], 1);
        assert_eq!(entry["reason"], TRIAGE_BREACH_REASON);
        assert!(entry.get("escalated_at").is_some());
    }

    #[test]
    fn from_entries_rejects_gaps() {
        let bad = vec![EscalationEvent {
            timestamp: t(1),
            level: 2,
            reason: SLA_BREACH_REASON.into(),
        }];
        assert!(EscalationLedger::from_entries(bad).is_err());
    }
}
