//! Workflow guard: the single coupling point with the reporting side.
//!
//! RULE: a complaint may only become `Resolved` once a report exists.
//! Status ordering (Pending -> Assigned -> InProgress) is the caller's job.

use crate::{
    complaint::{Complaint, ComplaintStatus},
    error::{SlaError, SlaResult},
    types::Timestamp,
};
use std::sync::Arc;

/// Answers whether a resolution report has been filed for a complaint.
pub trait ReportLookup: Send + Sync {
    fn report_exists(&self, complaint_id: &str) -> SlaResult<bool>;
}

impl<F> ReportLookup for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn report_exists(&self, complaint_id: &str) -> SlaResult<bool> {
        Ok(self(complaint_id))
    }
}

#[derive(Clone)]
pub struct WorkflowGuard {
    reports: Arc<dyn ReportLookup>,
}

impl WorkflowGuard {
    pub fn new(reports: Arc<dyn ReportLookup>) -> Self {
        Self { reports }
    }

    /// Move the complaint to `Resolved` if its report exists.
    /// On rejection the complaint is left untouched.
    pub fn resolve(&self, c: &mut Complaint, now: Timestamp) -> SlaResult<()> {
        if !self.reports.report_exists(&c.id)? {
            log::warn!("complaint {}: resolution rejected, no report filed", c.id);
            return Err(SlaError::invalid_transition(
                &c.id,
                "cannot resolve a complaint without a submitted report",
            ));
        }
        c.status = ComplaintStatus::Resolved;
        c.closed_at = Some(now);
        Ok(())
    }
}
