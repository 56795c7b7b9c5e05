//! Shared primitive types used across the SLA core.

use chrono::{DateTime, Utc};

/// A wall-clock instant. All SLA arithmetic happens in UTC.
pub type Timestamp = DateTime<Utc>;

/// A stable, unique identifier for a complaint.
pub type ComplaintId = String;

/// Optimistic-concurrency version carried on every complaint row.
pub type Version = u64;

/// Highest escalation level a complaint can reach.
pub const MAX_ESCALATION_LEVEL: u8 = 3;
