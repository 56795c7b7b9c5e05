//! SLA metrics: derived from the store's aggregate counters.

use crate::store::SlaCounts;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaMetrics {
    pub total_complaints: i64,
    pub overdue_complaints: i64,
    pub resolved_on_time: i64,
    pub resolved_late: i64,
    /// Percentage of resolved complaints closed by their deadline.
    /// 0.0 while nothing has been resolved.
    pub sla_compliance_rate: f64,
    pub avg_resolution_hours: Option<f64>,
    pub high_priority_overdue: i64,
    pub medium_priority_overdue: i64,
    pub low_priority_overdue: i64,
    pub escalated_complaints: i64,
}

impl SlaMetrics {
    pub fn from_counts(counts: &SlaCounts) -> Self {
        let resolved = counts.resolved_on_time + counts.resolved_late;
        let sla_compliance_rate = if resolved > 0 {
            counts.resolved_on_time as f64 / resolved as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_complaints: counts.total,
            overdue_complaints: counts.overdue,
            resolved_on_time: counts.resolved_on_time,
            resolved_late: counts.resolved_late,
            sla_compliance_rate,
            avg_resolution_hours: counts.avg_resolution_hours,
            high_priority_overdue: counts.high_priority_overdue,
            medium_priority_overdue: counts.medium_priority_overdue,
            low_priority_overdue: counts.low_priority_overdue,
            escalated_complaints: counts.escalated,
        }
    }
}
