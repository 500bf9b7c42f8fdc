//! Recurring sync timer.
//!
//! The [`Scheduler`] owns the one live timer. Every `start`/`reschedule`
//! stops the previous timer before arming the next, so at most one is ever
//! firing. Stopping only interrupts the wait between fires; a cycle already
//! running is left to finish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::InvalidScheduleError;
use crate::models::SubjectFilter;
use crate::sync::SyncEngine;

pub const JOB_NAME: &str = "codeforces-sync";

/// Day-of-week used for weekly runs. The cron crate numbers days 1-7
/// starting at Sunday, so this is the first day of its week.
pub const WEEKLY_DAY: &str = "1";

const FIELD_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    #[default]
    Daily,
    Weekly,
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            other => Err(format!("unknown cadence '{}' (expected daily or weekly)", other)),
        }
    }
}

/// Work run on every fire.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run(&self);
}

#[async_trait]
impl ScheduledJob for SyncEngine {
    async fn run(&self) {
        match self.reconcile(&SubjectFilter::All).await {
            Ok(report) => info!(
                "Scheduled sync finished: {} synced, {} failed, {} reminders sent",
                report.synced.len(),
                report.failed.len(),
                report.reminders_sent
            ),
            Err(e) => error!("Error in scheduled sync: {}", e),
        }
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> InvalidScheduleError {
    InvalidScheduleError {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

/// Applies the cadence to a six-field expression. Weekly keeps the
/// time-of-day fields and pins the rest to one run per week.
pub fn effective_expression(
    expression: &str,
    cadence: Cadence,
) -> Result<String, InvalidScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(invalid(
            expression,
            format!("expected {} fields, got {}", FIELD_COUNT, fields.len()),
        ));
    }

    Ok(match cadence {
        Cadence::Daily => fields.join(" "),
        Cadence::Weekly => format!("{} * * {}", fields[..3].join(" "), WEEKLY_DAY),
    })
}

pub fn parse_schedule(expression: &str) -> Result<Schedule, InvalidScheduleError> {
    let fields = expression.split_whitespace().count();
    if fields != FIELD_COUNT {
        return Err(invalid(
            expression,
            format!("expected {} fields, got {}", FIELD_COUNT, fields),
        ));
    }

    Schedule::from_str(expression).map_err(|e| invalid(expression, e.to_string()))
}

struct Timer {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn arm(schedule: Schedule, job: Arc<dyn ScheduledJob>) -> Self {
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(run_timer(schedule, job, stopped));
        Self { stop, handle }
    }

    fn stop(self) {
        // The receiver may already be gone if the schedule ran out of fires.
        let _ = self.stop.send(true);
    }

    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

async fn run_timer(
    schedule: Schedule,
    job: Arc<dyn ScheduledJob>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Schedule for {} has no future fire times", JOB_NAME);
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        // A stop that lands together with the fire wins.
        tokio::select! {
            biased;
            _ = stopped.changed() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        info!("Running {} (scheduled for {})", JOB_NAME, next);
        job.run().await;
    }
}

/// Current recurrence plus the handle of the timer running it.
struct ScheduleState {
    expression: String,
    schedule: Schedule,
    timer: Option<Timer>,
}

pub struct Scheduler {
    state: ScheduleState,
    job: Arc<dyn ScheduledJob>,
}

impl Scheduler {
    /// Validates the initial expression. No timer runs until [`start`](Self::start).
    pub fn new(
        expression: &str,
        cadence: Cadence,
        job: Arc<dyn ScheduledJob>,
    ) -> Result<Self, InvalidScheduleError> {
        let expression = effective_expression(expression, cadence)?;
        let schedule = parse_schedule(&expression)?;

        Ok(Self {
            state: ScheduleState {
                expression,
                schedule,
                timer: None,
            },
            job,
        })
    }

    /// Arms the timer with the current expression, replacing any live one.
    pub fn start(&mut self) {
        self.stop();
        self.state.timer = Some(Timer::arm(self.state.schedule.clone(), self.job.clone()));
        info!(
            "Started {} with schedule: {} (UTC)",
            JOB_NAME, self.state.expression
        );
    }

    /// Switches to a new expression. On error the current timer keeps
    /// running untouched.
    pub fn reschedule(
        &mut self,
        expression: &str,
        cadence: Cadence,
    ) -> Result<(), InvalidScheduleError> {
        let expression = effective_expression(expression, cadence)?;
        let schedule = parse_schedule(&expression)?;

        self.stop();
        self.state.expression = expression;
        self.state.schedule = schedule;
        self.state.timer = Some(Timer::arm(self.state.schedule.clone(), self.job.clone()));

        info!(
            "Updated {} with schedule: {} (UTC)",
            JOB_NAME, self.state.expression
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(timer) = self.state.timer.take() {
            timer.stop();
            info!("Stopped previous {} timer", JOB_NAME);
        }
    }

    pub fn current_expression(&self) -> &str {
        &self.state.expression
    }

    pub fn is_running(&self) -> bool {
        self.state.timer.as_ref().is_some_and(Timer::is_live)
    }

    /// Next fire time of the active timer, if one is armed.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.state.timer.as_ref()?;
        self.next_fire_after(Utc::now())
    }

    /// Fire time the current expression yields after `after`, armed or not.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.state.schedule.after(&after).next()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
