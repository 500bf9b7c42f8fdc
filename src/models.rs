use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked student. Rating, history and reminder fields are only written by
/// the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub email: String,
    pub handle: String,
    pub coach_id: String,
    pub current_rating: i64,
    pub max_rating: i64,
    pub last_synced: Option<DateTime<Utc>>,
    pub contest_history: Vec<ContestResult>,
    pub submissions: Vec<Submission>,
    pub reminders_enabled: bool,
    pub reminders_sent: u32,
    pub profile_token: String,
}

impl Subject {
    pub fn new(new: NewSubject, id: String, profile_token: String) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            handle: new.handle,
            coach_id: new.coach_id,
            current_rating: 0,
            max_rating: 0,
            last_synced: None,
            contest_history: Vec::new(),
            submissions: Vec::new(),
            reminders_enabled: true,
            reminders_sent: 0,
            profile_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubject {
    pub name: String,
    pub email: String,
    pub handle: String,
    pub coach_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestResult {
    pub contest_id: i64,
    pub contest_name: String,
    pub rank: i64,
    pub rating_update_time_seconds: i64,
    pub old_rating: i64,
    pub new_rating: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: i64,
    pub contest_id: i64,
    pub problem_index: String,
    pub problem_name: String,
    pub problem_rating: i64,
    pub creation_time_seconds: i64,
    pub verdict: String,
}

/// Which students a sync run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectFilter {
    All,
    ById(String),
}

impl SubjectFilter {
    pub fn from_option(id: Option<String>) -> Self {
        match id {
            Some(id) => SubjectFilter::ById(id),
            None => SubjectFilter::All,
        }
    }
}

// Activity API wire shapes.

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub comment: Option<String>,
    pub result: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub handle: String,
    pub rating: Option<i64>,
    pub max_rating: Option<i64>,
    pub rank: Option<String>,
    pub max_rank: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRatingChange {
    pub contest_id: i64,
    pub contest_name: String,
    pub rank: i64,
    pub rating_update_time_seconds: i64,
    pub old_rating: i64,
    pub new_rating: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSubmission {
    pub id: i64,
    pub contest_id: Option<i64>,
    pub creation_time_seconds: i64,
    pub problem: ApiProblem,
    pub verdict: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProblem {
    pub index: String,
    pub name: String,
    pub rating: Option<i64>,
}

impl From<ApiRatingChange> for ContestResult {
    fn from(change: ApiRatingChange) -> Self {
        Self {
            contest_id: change.contest_id,
            contest_name: change.contest_name,
            rank: change.rank,
            rating_update_time_seconds: change.rating_update_time_seconds,
            old_rating: change.old_rating,
            new_rating: change.new_rating,
        }
    }
}

impl From<ApiSubmission> for Submission {
    fn from(sub: ApiSubmission) -> Self {
        Self {
            submission_id: sub.id,
            contest_id: sub.contest_id.unwrap_or(0),
            problem_index: sub.problem.index,
            problem_name: sub.problem.name,
            problem_rating: sub.problem.rating.unwrap_or(0),
            creation_time_seconds: sub.creation_time_seconds,
            // In-queue submissions carry no verdict yet.
            verdict: sub.verdict.unwrap_or_default(),
        }
    }
}
