use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::codeforces::{ActivitySource, PAGE_SIZE};
use crate::database::SubjectStore;
use crate::error::{ExternalApiError, Result, SendError, SyncError, TrackerError};
use crate::mailer::Notifier;
use crate::models::{ContestResult, Profile, Subject, SubjectFilter, Submission};

/// A student with no submissions inside this window gets a reminder.
pub const INACTIVITY_WINDOW_DAYS: i64 = 7;

pub const REMINDER_SUBJECT: &str = "Get Back to Problem Solving!";

pub fn reminder_body(name: &str) -> String {
    format!(
        "Hi {},\n\nYou haven't submitted any problems on Codeforces in the last {} days. Time to get back to solving!",
        name, INACTIVITY_WINDOW_DAYS
    )
}

/// Receives the outcome of every per-student cycle. Nothing here can fail the
/// run; implementations only record.
pub trait SyncObserver: Send + Sync {
    fn on_subject_synced(&self, _subject: &Subject) {}

    fn on_reminder_sent(&self, _subject: &Subject) {}

    fn on_reminder_failed(&self, _subject: &Subject, _error: &SendError) {}

    fn on_subject_failed(&self, _subject: &Subject, _error: &SyncError) {}
}

pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_subject_synced(&self, subject: &Subject) {
        info!(
            "Successfully synced data for {} (rating {}, {} submissions)",
            subject.handle,
            subject.current_rating,
            subject.submissions.len()
        );
    }

    fn on_reminder_sent(&self, subject: &Subject) {
        info!(
            "Sent reminder email to {} (total {})",
            subject.email, subject.reminders_sent
        );
    }

    fn on_reminder_failed(&self, subject: &Subject, error: &SendError) {
        warn!("Reminder for {} not sent: {}", subject.handle, error);
    }

    fn on_subject_failed(&self, subject: &Subject, error: &SyncError) {
        error!("Error syncing data for {}: {}", subject.handle, error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Recent activity found, or reminders are off.
    Skipped,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFailure {
    pub subject_id: String,
    pub handle: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub failed: Vec<SubjectFailure>,
    pub reminders_sent: usize,
    pub reminder_failures: usize,
}

/// Everything fetched for one handle in one cycle.
#[derive(Debug)]
struct Activity {
    profile: Profile,
    contests: Vec<ContestResult>,
    submissions: Vec<Submission>,
}

/// Pages through `user.status` until a short page comes back.
pub async fn fetch_all_submissions(
    source: &dyn ActivitySource,
    handle: &str,
) -> std::result::Result<Vec<Submission>, ExternalApiError> {
    let mut all = Vec::new();
    let mut from = 1;

    loop {
        let page = source.fetch_submissions(handle, from, PAGE_SIZE).await?;
        let fetched = page.len();
        all.extend(page);

        if fetched < PAGE_SIZE {
            break;
        }
        from += PAGE_SIZE;
    }

    Ok(all)
}

/// Submissions at or after `cutoff`, compared at millisecond precision.
pub fn recent_submissions<'a>(
    submissions: &'a [Submission],
    cutoff: DateTime<Utc>,
) -> impl Iterator<Item = &'a Submission> {
    let cutoff_ms = cutoff.timestamp_millis();
    submissions
        .iter()
        .filter(move |s| s.creation_time_seconds.saturating_mul(1000) >= cutoff_ms)
}

pub struct SyncEngine {
    source: Arc<dyn ActivitySource>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn SubjectStore>,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn SubjectStore>,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn reconcile(&self, filter: &SubjectFilter) -> Result<SyncReport> {
        self.reconcile_at(filter, Utc::now()).await
    }

    /// Runs one cycle with `now` as the reference instant for every student.
    ///
    /// Per-student failures are reported to the observer and collected in the
    /// report. Only a failed student lookup fails an unfiltered run; a run for
    /// a single id also returns that student's error.
    pub async fn reconcile_at(
        &self,
        filter: &SubjectFilter,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let subjects = self
            .store
            .find_subjects(filter)
            .map_err(TrackerError::Lookup)?;
        info!("Found {} students to sync", subjects.len());

        let mut report = SyncReport::default();
        let cutoff = now - Duration::days(INACTIVITY_WINDOW_DAYS);
        let single = matches!(filter, SubjectFilter::ById(_));

        for mut subject in subjects {
            match self.sync_subject(&mut subject, now, cutoff).await {
                Ok(reminder) => {
                    self.observer.on_subject_synced(&subject);
                    match reminder {
                        ReminderOutcome::Sent => report.reminders_sent += 1,
                        ReminderOutcome::Failed => report.reminder_failures += 1,
                        ReminderOutcome::Skipped => {}
                    }
                    report.synced.push(subject.id);
                }
                Err(err) => {
                    self.observer.on_subject_failed(&subject, &err);
                    if single {
                        return Err(err.into());
                    }
                    report.failed.push(SubjectFailure {
                        subject_id: subject.id,
                        handle: subject.handle,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn sync_subject(
        &self,
        subject: &mut Subject,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> std::result::Result<ReminderOutcome, SyncError> {
        info!("Syncing data for {}", subject.handle);

        // Nothing is written to the subject until every fetch has succeeded.
        let activity = self.fetch_activity(&subject.handle).await?;
        let inactive = recent_submissions(&activity.submissions, cutoff)
            .next()
            .is_none();

        apply_activity(subject, activity, now);

        let reminder = if inactive && subject.reminders_enabled {
            self.send_reminder(subject).await
        } else {
            ReminderOutcome::Skipped
        };

        self.store
            .save(subject)
            .map_err(|source| SyncError::Persist {
                subject_id: subject.id.clone(),
                source,
            })?;

        Ok(reminder)
    }

    async fn fetch_activity(
        &self,
        handle: &str,
    ) -> std::result::Result<Activity, ExternalApiError> {
        let profile = self.source.fetch_profile(handle).await?;
        let contests = self.source.fetch_rating_history(handle).await?;
        let submissions = fetch_all_submissions(self.source.as_ref(), handle).await?;

        Ok(Activity {
            profile,
            contests,
            submissions,
        })
    }

    async fn send_reminder(&self, subject: &mut Subject) -> ReminderOutcome {
        let body = reminder_body(&subject.name);
        match self
            .notifier
            .send(&subject.email, REMINDER_SUBJECT, &body)
            .await
        {
            Ok(()) => {
                subject.reminders_sent = subject.reminders_sent.saturating_add(1);
                self.observer.on_reminder_sent(subject);
                ReminderOutcome::Sent
            }
            Err(e) => {
                self.observer.on_reminder_failed(subject, &e);
                ReminderOutcome::Failed
            }
        }
    }
}

/// Overwrites ratings and both histories; the fetched data is authoritative.
fn apply_activity(subject: &mut Subject, activity: Activity, now: DateTime<Utc>) {
    subject.current_rating = activity.profile.rating.unwrap_or(0);
    subject.max_rating = activity.profile.max_rating.unwrap_or(0);
    subject.last_synced = Some(now);
    subject.contest_history = activity.contests;
    subject.submissions = activity.submissions;
}
