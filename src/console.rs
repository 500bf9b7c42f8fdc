use tracing::info;

use crate::models::SubjectFilter;
use crate::scheduler::{Cadence, Scheduler};
use crate::sync::{SyncEngine, SyncReport};

/// Operator commands accepted by the daemon, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sync(Option<String>),
    Reschedule { expression: String, cadence: Cadence },
    Status,
    Help,
}

pub fn parse(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Command::Help;
    };
    let rest: Vec<&str> = parts.collect();

    match verb.to_lowercase().as_str() {
        "sync" => Command::Sync(rest.first().map(|id| id.to_string())),
        "reschedule" => {
            let (fields, cadence) = match rest.split_last() {
                Some((last, fields)) => match last.parse::<Cadence>() {
                    Ok(cadence) => (fields, cadence),
                    Err(_) => (rest.as_slice(), Cadence::Daily),
                },
                None => (rest.as_slice(), Cadence::Daily),
            };
            Command::Reschedule {
                expression: fields.join(" "),
                cadence,
            }
        }
        "status" => Command::Status,
        _ => Command::Help,
    }
}

pub fn help_message() -> String {
    "Commands:\n\
     • sync [student-id] - sync every student, or only one\n\
     • reschedule <sec> <min> <hour> <day> <month> <weekday> [daily|weekly] - change the sync schedule\n\
     • status - show the current schedule and next run\n\
     • help - show this help"
        .to_string()
}

fn describe_report(report: &SyncReport) -> String {
    let mut out = format!(
        "Synced {} student(s), {} failed, {} reminder(s) sent",
        report.synced.len(),
        report.failed.len(),
        report.reminders_sent
    );
    if report.reminder_failures > 0 {
        out.push_str(&format!(", {} reminder(s) not delivered", report.reminder_failures));
    }
    for failure in &report.failed {
        out.push_str(&format!("\n  {} ({}): {}", failure.handle, failure.subject_id, failure.error));
    }
    out
}

pub async fn execute(command: Command, scheduler: &mut Scheduler, engine: &SyncEngine) -> String {
    match command {
        Command::Sync(id) => {
            info!("Manual sync requested for {}", id.as_deref().unwrap_or("all students"));
            match engine.reconcile(&SubjectFilter::from_option(id)).await {
                Ok(report) => describe_report(&report),
                Err(e) => format!("Sync failed: {}", e),
            }
        }
        Command::Reschedule {
            expression,
            cadence,
        } => match scheduler.reschedule(&expression, cadence) {
            Ok(()) => format!("Schedule updated: {}", scheduler.current_expression()),
            Err(e) => format!("{} (keeping {})", e, scheduler.current_expression()),
        },
        Command::Status => {
            let next = scheduler
                .next_fire()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "not scheduled".to_string());
            format!(
                "Schedule: {} (UTC)\nRunning: {}\nNext run: {}",
                scheduler.current_expression(),
                scheduler.is_running(),
                next
            )
        }
        Command::Help => help_message(),
    }
}
