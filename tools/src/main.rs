//! sla-runner: headless driver for the complaint SLA engine.
//!
//! Usage:
//!   sla-runner --seed 12345 --hours 720 --per-day 40 --db run.db
//!   sla-runner --config sla.json --ipc-mode --scheduler
//!
//! Simulation mode replays a seeded intake/triage/resolution workload on a
//! manual clock and runs the escalation scheduler once per simulated hour.
//! IPC mode reads one JSON command per line on stdin and answers on stdout.

use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use complaint_sla_core::{
    clock::{Clock, ManualClock, SystemClock},
    complaint::{Complaint, ComplaintDraft, ComplaintStatus, Priority},
    config::SlaConfig,
    error::SlaResult,
    service::SlaService,
    store::SqliteStore,
    types::MAX_ESCALATION_LEVEL,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const CATEGORIES: [&str; 5] = ["billing", "service_outage", "staff_conduct", "safety", "other"];
const OFFICERS: [&str; 4] = ["officer-ahmed", "officer-brown", "officer-chen", "officer-diaz"];

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Submit {
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        category: String,
        submitted_by: Option<String>,
    },
    Assign {
        complaint_id: String,
        officer: String,
        priority: Priority,
    },
    ChangePriority {
        complaint_id: String,
        priority: Priority,
    },
    UpdateStatus {
        complaint_id: String,
        status: ComplaintStatus,
        actor: String,
    },
    FileReport {
        complaint_id: String,
        author: Option<String>,
        #[serde(default)]
        summary: String,
    },
    Resolve {
        complaint_id: String,
        closed_by: Option<String>,
        notes: Option<String>,
    },
    Get {
        complaint_id: String,
    },
    Scan,
    Metrics,
    Policy,
    TriageCritical,
    TriageOverdue,
    Escalated {
        min_level: Option<u8>,
    },
    Quit,
}

/// Workload shape for simulation mode. Probabilities are per simulated hour.
struct Workload {
    per_day: f64,
    p_assign: f64,
    p_acknowledge: f64,
    p_report: f64,
    p_reprioritise: f64,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            per_day: 30.0,
            p_assign: 0.05,
            p_acknowledge: 0.10,
            p_report: 0.03,
            p_reprioritise: 0.005,
        }
    }
}

impl Workload {
    /// Default workload with `per_day` arrivals. The rate must be a finite,
    /// non-negative number.
    fn with_per_day(per_day: f64) -> Result<Self> {
        if !per_day.is_finite() || per_day < 0.0 {
            bail!("--per-day must be a finite, non-negative number, got {per_day}");
        }
        Ok(Self {
            per_day,
            ..Self::default()
        })
    }

    /// Whole arrivals per hour plus the chance of one more.
    fn hourly_arrivals(&self) -> (u64, f64) {
        let per_hour = self.per_day / 24.0;
        (per_hour.floor() as u64, per_hour.fract())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let hours = parse_arg(&args, "--hours", 720i64);
    let per_day = parse_arg(&args, "--per-day", Workload::default().per_day);
    let workload = Workload::with_per_day(per_day)?;
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let background = args.iter().any(|a| a == "--scheduler");
    let db = str_arg(&args, "--db").unwrap_or(":memory:");

    let config = match str_arg(&args, "--config") {
        Some(path) => SlaConfig::load(path)?,
        None => SlaConfig::from_env()?,
    };

    if !ipc_mode {
        println!("Complaint SLA: sla-runner");
        println!("  seed:      {seed}");
        println!("  hours:     {hours}");
        println!("  per day:   {per_day}");
        println!("  db:        {db}");
        println!();
    }

    let store = Arc::new(SqliteStore::open(db)?);
    store.migrate()?;

    if ipc_mode {
        let clock = Arc::new(SystemClock);
        let service = SlaService::new(&config, store.clone(), store.clone(), clock.clone())?;
        // Dropping the handle stops the periodic task.
        let _handle = if background {
            service.start_scheduler()?
        } else {
            None
        };
        run_ipc_loop(&service, &store, clock.as_ref())?;
    } else {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).single().unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let service = SlaService::new(&config, store.clone(), store.clone(), clock.clone())?;
        run_simulation(&service, &store, &clock, &workload, seed, hours)?;
        print_summary(&service, clock.now(), seed, hours)?;
    }

    Ok(())
}

// ── Simulation ───────────────────────────────────────────────────────

fn run_simulation(
    service: &SlaService,
    store: &SqliteStore,
    clock: &ManualClock,
    workload: &Workload,
    seed: u64,
    hours: i64,
) -> Result<()> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut open: Vec<String> = Vec::new();
    let mut next_id = 0u64;
    let (whole, extra) = workload.hourly_arrivals();

    for _ in 0..hours {
        let now = clock.advance_hours(1);

        let arrivals = whole + u64::from(rng.gen_bool(extra));
        for _ in 0..arrivals {
            next_id += 1;
            let category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
            let draft = ComplaintDraft {
                title: format!("{category} complaint #{next_id}"),
                description: String::new(),
                category: category.to_string(),
                submitted_by: Some(format!("resident-{}", rng.gen_range(1..500))),
            };
            let c = service.submit_with_id(format!("cmp-{seed}-{next_id:05}"), draft, now)?;
            open.push(c.id);
        }

        let mut still_open = Vec::with_capacity(open.len());
        for id in open.drain(..) {
            let c = service.get(&id)?;
            if step_complaint(service, store, &mut rng, workload, &c, now)? {
                still_open.push(id);
            }
        }
        open = still_open;

        if service.scheduler().config().enabled {
            service.scheduler().tick();
        }
    }
    Ok(())
}

/// Advance one complaint by at most one workflow step. Returns false once
/// it is resolved.
fn step_complaint(
    service: &SlaService,
    store: &SqliteStore,
    rng: &mut Pcg64Mcg,
    workload: &Workload,
    c: &Complaint,
    now: DateTime<Utc>,
) -> SlaResult<bool> {
    match c.status {
        ComplaintStatus::Pending => {
            if rng.gen_bool(workload.p_assign) {
                let officer = OFFICERS[rng.gen_range(0..OFFICERS.len())];
                service.assign_with_priority(&c.id, officer, random_priority(rng), now)?;
            }
        }
        ComplaintStatus::Assigned => {
            if rng.gen_bool(workload.p_acknowledge) {
                let actor = c.assigned_to.as_deref().unwrap_or("desk");
                service.update_status(&c.id, ComplaintStatus::InProgress, actor, now)?;
            }
        }
        ComplaintStatus::InProgress => {
            if rng.gen_bool(workload.p_reprioritise) {
                service.change_priority(&c.id, random_priority(rng), now)?;
            } else if rng.gen_bool(workload.p_report) {
                let officer = c.assigned_to.as_deref().unwrap_or("desk");
                store.insert_report(&c.id, Some(officer), "Investigation complete", now)?;
                service.resolve_with_notes(&c.id, officer, "Closed after report", now)?;
                return Ok(false);
            }
        }
        ComplaintStatus::Resolved => return Ok(false),
    }
    Ok(true)
}

fn random_priority(rng: &mut Pcg64Mcg) -> Priority {
    match rng.gen_range(0..10) {
        0..=1 => Priority::High,
        2..=6 => Priority::Medium,
        _ => Priority::Low,
    }
}

fn print_summary(service: &SlaService, now: DateTime<Utc>, seed: u64, hours: i64) -> Result<()> {
    let m = service.metrics(now)?;
    let critical = service.triage_critical_complaints(now)?.len();
    let triage_overdue = service.triage_overdue_complaints(now)?.len();
    let top = service.highly_escalated(MAX_ESCALATION_LEVEL)?;

    println!("=== RUN SUMMARY ===");
    println!("  seed:              {seed}");
    println!("  simulated hours:   {hours}");
    println!("  final time:        {now}");
    println!("  complaints:        {}", m.total_complaints);
    println!("  overdue:           {}", m.overdue_complaints);
    println!("    high:            {}", m.high_priority_overdue);
    println!("    medium:          {}", m.medium_priority_overdue);
    println!("    low:             {}", m.low_priority_overdue);
    println!("  resolved on time:  {}", m.resolved_on_time);
    println!("  resolved late:     {}", m.resolved_late);
    println!("  compliance:        {:.1}%", m.sla_compliance_rate);
    match m.avg_resolution_hours {
        Some(avg) => println!("  avg resolution:    {avg:.1}h"),
        None => println!("  avg resolution:    (none resolved)"),
    }
    println!("  escalated:         {}", m.escalated_complaints);
    println!("  triage critical:   {critical}");
    println!("  triage overdue:    {triage_overdue}");

    println!();
    println!("=== MANUAL INTERVENTION (level {MAX_ESCALATION_LEVEL}) ===");
    if top.is_empty() {
        println!("  (none)");
    } else {
        for c in top.iter().take(10) {
            println!(
                "  {} | {} | {} | overdue {}h",
                c.id,
                c.priority,
                c.status,
                -c.hours_until_breach(now).unwrap_or(0)
            );
        }
        if top.len() > 10 {
            println!("  ... and {} more", top.len() - 10);
        }
    }
    Ok(())
}

// ── IPC ──────────────────────────────────────────────────────────────

fn run_ipc_loop(service: &SlaService, store: &SqliteStore, clock: &dyn Clock) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(service, store, clock.now(), cmd) {
            Ok(value) => serde_json::json!({ "ok": value }),
            Err(e) => {
                log::warn!("IPC command failed: {e}");
                serde_json::json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(
    service: &SlaService,
    store: &SqliteStore,
    now: DateTime<Utc>,
    cmd: IpcCommand,
) -> Result<serde_json::Value> {
    let value = match cmd {
        IpcCommand::Submit {
            title,
            description,
            category,
            submitted_by,
        } => {
            let draft = ComplaintDraft {
                title,
                description,
                category,
                submitted_by,
            };
            serde_json::to_value(service.submit(draft, now)?)?
        }
        IpcCommand::Assign {
            complaint_id,
            officer,
            priority,
        } => serde_json::to_value(service.assign_with_priority(&complaint_id, &officer, priority, now)?)?,
        IpcCommand::ChangePriority {
            complaint_id,
            priority,
        } => serde_json::to_value(service.change_priority(&complaint_id, priority, now)?)?,
        IpcCommand::UpdateStatus {
            complaint_id,
            status,
            actor,
        } => serde_json::to_value(service.update_status(&complaint_id, status, &actor, now)?)?,
        IpcCommand::FileReport {
            complaint_id,
            author,
            summary,
        } => {
            store.insert_report(&complaint_id, author.as_deref(), &summary, now)?;
            serde_json::json!({ "complaint_id": complaint_id, "filed_at": now })
        }
        IpcCommand::Resolve {
            complaint_id,
            closed_by,
            notes,
        } => {
            let resolved = match closed_by {
                Some(actor) => service.resolve_with_notes(
                    &complaint_id,
                    &actor,
                    notes.as_deref().unwrap_or_default(),
                    now,
                )?,
                None => service.resolve(&complaint_id, now)?,
            };
            serde_json::to_value(resolved)?
        }
        IpcCommand::Get { complaint_id } => {
            let c = service.get(&complaint_id)?;
            serde_json::json!({
                "complaint": c,
                "hours_remaining": c.hours_remaining(now),
                "hours_until_breach": c.hours_until_breach(now),
                "response_overdue": c.response_overdue(now),
            })
        }
        IpcCommand::Scan => serde_json::to_value(service.run_escalation_scan(now)?)?,
        IpcCommand::Metrics => serde_json::to_value(service.metrics(now)?)?,
        IpcCommand::Policy => serde_json::to_value(service.policy())?,
        IpcCommand::TriageCritical => {
            serde_json::to_value(service.triage_critical_complaints(now)?)?
        }
        IpcCommand::TriageOverdue => serde_json::to_value(service.triage_overdue_complaints(now)?)?,
        IpcCommand::Escalated { min_level } => {
            serde_json::to_value(service.highly_escalated(min_level.unwrap_or(MAX_ESCALATION_LEVEL))?)?
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

// ── Args ─────────────────────────────────────────────────────────────

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
