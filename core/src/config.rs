//! SLA policy and scheduler configuration.
//!
//! RULE: configuration is validated once, at startup. A bad value is a
//! `SlaError::Configuration` and no complaint processing proceeds.
//! After load the policy is shared read-only behind an `Arc`.

use crate::{
    complaint::Priority,
    error::{SlaError, SlaResult},
    types::Timestamp,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Hours per priority. Every priority must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityHours {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl PriorityHours {
    pub fn get(&self, priority: Priority) -> i64 {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub triage_hours: i64,
    /// Hours after submission at which a still-unassigned complaint is
    /// flagged critical (24 - 15 = 9h remaining by default).
    pub triage_alert_lead_hours: i64,
    pub resolution_hours_by_priority: PriorityHours,
    pub response_hours_by_priority: PriorityHours,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            triage_hours: 24,
            triage_alert_lead_hours: 15,
            resolution_hours_by_priority: PriorityHours {
                high: 24,
                medium: 72,
                low: 168,
            },
            response_hours_by_priority: PriorityHours {
                high: 2,
                medium: 8,
                low: 24,
            },
        }
    }
}

impl SlaPolicy {
    pub fn triage_deadline(&self, from: Timestamp) -> Timestamp {
        from + Duration::hours(self.triage_hours)
    }

    pub fn resolution_deadline(&self, priority: Priority, from: Timestamp) -> Timestamp {
        from + Duration::hours(self.resolution_hours_by_priority.get(priority))
    }

    pub fn response_deadline(&self, priority: Priority, from: Timestamp) -> Timestamp {
        from + Duration::hours(self.response_hours_by_priority.get(priority))
    }

    /// Remaining time at or below which a triage complaint is critical.
    pub fn triage_alert_window(&self) -> Duration {
        Duration::hours(self.triage_hours - self.triage_alert_lead_hours)
    }

    pub fn validate(&self) -> SlaResult<()> {
        check_hours("triage_hours", self.triage_hours)?;
        if self.triage_alert_lead_hours < 0 || self.triage_alert_lead_hours > self.triage_hours {
            return Err(config_error(format!(
                "triage_alert_lead_hours must be within 0..={}, got {}",
                self.triage_hours, self.triage_alert_lead_hours
            )));
        }
        for priority in Priority::ALL {
            check_hours(
                &format!("resolution hours for {priority}"),
                self.resolution_hours_by_priority.get(priority),
            )?;
            check_hours(
                &format!("response hours for {priority}"),
                self.response_hours_by_priority.get(priority),
            )?;
        }
        Ok(())
    }
}

/// Largest accepted policy duration. Deadlines are computed with plain
/// `Timestamp + Duration`, which must not overflow for any valid policy.
pub const MAX_POLICY_HOURS: i64 = 24 * 365 * 100;

fn check_hours(name: &str, hours: i64) -> SlaResult<()> {
    if hours <= 0 {
        return Err(config_error(format!("{name} must be positive, got {hours}")));
    }
    if hours > MAX_POLICY_HOURS {
        return Err(config_error(format!(
            "{name} must be at most {MAX_POLICY_HOURS}, got {hours}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// When false the periodic task is never started; manual scans still run.
    pub enabled: bool,
    pub cadence_minutes: u64,
    /// Minimum hours between two escalations of the same complaint.
    pub rearm_hours: i64,
    /// UTC hour at or after which the daily SLA report is logged.
    pub daily_report_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_minutes: 60,
            rearm_hours: 1,
            daily_report_hour: 9,
        }
    }
}

impl SchedulerConfig {
    pub fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cadence_minutes * 60)
    }

    pub fn validate(&self) -> SlaResult<()> {
        if self.cadence_minutes == 0 {
            return Err(config_error("cadence_minutes must be positive"));
        }
        if self.rearm_hours < 1 {
            return Err(config_error(format!(
                "rearm_hours must be at least 1, got {}",
                self.rearm_hours
            )));
        }
        if self.daily_report_hour >= 24 {
            return Err(config_error(format!(
                "daily_report_hour must be below 24, got {}",
                self.daily_report_hour
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfig {
    pub policy: SlaPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl SlaConfig {
    /// Load from a JSON file. Missing or malformed entries are fatal.
    pub fn load(path: &str) -> SlaResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("Cannot read {path}: {e}")))?;
        let config: SlaConfig = serde_json::from_str(&content)
            .map_err(|e| config_error(format!("Cannot parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> SlaResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup. Absent keys take the default; present but
    /// unparsable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> SlaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = SlaConfig::default();
        let policy = SlaPolicy {
            triage_hours: read(&lookup, "SLA_TRIAGE_HOURS", d.policy.triage_hours)?,
            triage_alert_lead_hours: read(
                &lookup,
                "SLA_TRIAGE_ALERT_HOURS",
                d.policy.triage_alert_lead_hours,
            )?,
            resolution_hours_by_priority: PriorityHours {
                high: read(&lookup, "SLA_RESOLUTION_HIGH", d.policy.resolution_hours_by_priority.high)?,
                medium: read(&lookup, "SLA_RESOLUTION_MEDIUM", d.policy.resolution_hours_by_priority.medium)?,
                low: read(&lookup, "SLA_RESOLUTION_LOW", d.policy.resolution_hours_by_priority.low)?,
            },
            response_hours_by_priority: PriorityHours {
                high: read(&lookup, "SLA_RESPONSE_HIGH", d.policy.response_hours_by_priority.high)?,
                medium: read(&lookup, "SLA_RESPONSE_MEDIUM", d.policy.response_hours_by_priority.medium)?,
                low: read(&lookup, "SLA_RESPONSE_LOW", d.policy.response_hours_by_priority.low)?,
            },
        };
        let scheduler = SchedulerConfig {
            enabled: read(&lookup, "ESCALATION_ENABLED", d.scheduler.enabled)?,
            cadence_minutes: read(&lookup, "ESCALATION_CADENCE_MINUTES", d.scheduler.cadence_minutes)?,
            rearm_hours: read(&lookup, "ESCALATION_REARM_HOURS", d.scheduler.rearm_hours)?,
            daily_report_hour: read(&lookup, "SLA_DAILY_REPORT_HOUR", d.scheduler.daily_report_hour)?,
        };
        let config = SlaConfig { policy, scheduler };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SlaResult<()> {
        self.policy.validate()?;
        self.scheduler.validate()
    }

    /// Default policy with the periodic task switched off, so tests drive
    /// scans themselves through a manual clock.
    pub fn default_test() -> Self {
        Self {
            policy: SlaPolicy::default(),
            scheduler: SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
        }
    }
}

fn read<F, T>(lookup: &F, key: &str, default: T) -> SlaResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| config_error(format!("{key}={raw:?} is invalid: {e}"))),
    }
}

fn config_error(msg: impl Into<String>) -> SlaError {
    SlaError::Configuration(msg.into())
}
