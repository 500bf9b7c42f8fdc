use thiserror::Error;

/// Failure talking to the activity API. Always scoped to one handle.
#[derive(Error, Debug)]
#[error("Error fetching {facet} for {handle}: {kind}")]
pub struct ExternalApiError {
    pub handle: String,
    pub facet: &'static str,
    pub kind: ExternalApiErrorKind,
}

#[derive(Error, Debug)]
pub enum ExternalApiErrorKind {
    /// The API answered but its status field was not "OK".
    #[error("API status not OK: {0}")]
    Status(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ExternalApiError {
    pub fn new(handle: &str, facet: &'static str, kind: ExternalApiErrorKind) -> Self {
        Self {
            handle: handle.to_string(),
            facet,
            kind,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    /// Mail transport settings are absent. Not retryable.
    #[error("Mail configuration missing: {}", .0.join(", "))]
    NotConfigured(Vec<&'static str>),

    #[error("Invalid mail address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to deliver message: {0}")]
    Transport(String),
}

impl SendError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SendError::NotConfigured(_))
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Student not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid schedule expression '{expression}': {reason}")]
pub struct InvalidScheduleError {
    pub expression: String,
    pub reason: String,
}

/// Why one subject's reconciliation cycle failed.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] ExternalApiError),

    #[error("Failed to save student {subject_id}: {source}")]
    Persist {
        subject_id: String,
        #[source]
        source: PersistenceError,
    },
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to load students: {0}")]
    Lookup(#[source] PersistenceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
