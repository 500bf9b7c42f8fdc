use csv::ReaderBuilder;
use rand::RngCore;
use regex::Regex;
use std::io::Read;
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::config::ProfileConfig;
use crate::database::{find_one, Database};
use crate::error::{PersistenceError, Result, TrackerError};
use crate::mailer::Notifier;
use crate::models::{NewSubject, Subject, SubjectFilter};
use crate::sync::SyncEngine;

pub const PROFILE_SUBJECT: &str = "Your Code Coach Profile Access";

fn handle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,24}$").expect("valid handle regex"))
}

pub fn validate(new: &NewSubject) -> Result<()> {
    if new.name.trim().is_empty() || new.email.trim().is_empty() || new.handle.trim().is_empty() {
        return Err(TrackerError::InvalidData(
            "Missing required fields (name, email, handle)".to_string(),
        ));
    }
    if !new.email.contains('@') {
        return Err(TrackerError::InvalidData(format!(
            "Invalid email: {}",
            new.email
        )));
    }
    if !handle_pattern().is_match(new.handle.trim()) {
        return Err(TrackerError::InvalidData(format!(
            "Invalid Codeforces handle: {}",
            new.handle
        )));
    }
    Ok(())
}

/// 32 random bytes, hex encoded.
pub fn generate_profile_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn profile_url(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/student/token/{}",
        frontend_url.trim_end_matches('/'),
        token
    )
}

pub fn profile_message(name: &str, url: &str) -> String {
    format!(
        "Hello {},\n\nYour coach has created a profile for you on Code Coach.\n\
         Access your profile here: {}\n\n\
         This link is permanent and gives you direct access to your profile.\n\n\
         Best regards,\nThe Code Coach Team",
        name, url
    )
}

#[derive(Debug)]
pub struct Registration {
    pub subject: Subject,
    pub warnings: Vec<String>,
}

/// Stores a new student, syncs it once, and mails the profile link.
///
/// Only validation and the insert can fail the call; the first sync and the
/// profile mail are reported as warnings.
pub async fn register(
    db: &Database,
    engine: &SyncEngine,
    notifier: &dyn Notifier,
    profile: &ProfileConfig,
    new: NewSubject,
) -> Result<Registration> {
    validate(&new)?;

    let new = NewSubject {
        name: new.name.trim().to_string(),
        email: new.email.trim().to_string(),
        handle: new.handle.trim().to_string(),
        coach_id: new.coach_id,
    };
    let subject = Subject::new(
        new,
        uuid::Uuid::new_v4().to_string(),
        generate_profile_token(),
    );
    db.insert(&subject)?;
    info!("Registered student {} ({})", subject.handle, subject.id);

    let mut warnings = Vec::new();

    let filter = SubjectFilter::ById(subject.id.clone());
    if let Err(e) = engine.reconcile(&filter).await {
        error!("Sync failed for {}: {}", subject.handle, e);
        warnings.push(format!("Initial sync failed: {}", e));
    }

    if !send_profile_link(notifier, profile, &subject).await {
        warnings.push("Student created but email notification failed".to_string());
    }

    // Re-read so the caller sees the synced ratings.
    let subject = find_one(db, &subject.id)?.unwrap_or(subject);

    Ok(Registration { subject, warnings })
}

/// Mails the profile link when a frontend URL is configured. Returns false
/// only when a send was attempted and failed.
async fn send_profile_link(
    notifier: &dyn Notifier,
    profile: &ProfileConfig,
    subject: &Subject,
) -> bool {
    let Some(frontend_url) = &profile.frontend_url else {
        return true;
    };
    let url = profile_url(frontend_url, &subject.profile_token);
    match notifier
        .send(&subject.email, PROFILE_SUBJECT, &profile_message(&subject.name, &url))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!("Profile email to {} failed: {}", subject.email, e);
            false
        }
    }
}

/// Fields an edit may change. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub handle: Option<String>,
}

/// Edits a student's details. A new email or handle invalidates the old
/// profile link, so the token is rotated and the link mailed again.
pub async fn update(
    db: &Database,
    notifier: &dyn Notifier,
    profile: &ProfileConfig,
    id: &str,
    changes: SubjectChanges,
) -> Result<Registration> {
    let current = find_one(db, id)?.ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;

    let edited = NewSubject {
        name: changes.name.unwrap_or_else(|| current.name.clone()),
        email: changes.email.unwrap_or_else(|| current.email.clone()),
        handle: changes.handle.unwrap_or_else(|| current.handle.clone()),
        coach_id: current.coach_id.clone(),
    };
    validate(&edited)?;

    let name = edited.name.trim().to_string();
    let email = edited.email.trim().to_string();
    let handle = edited.handle.trim().to_string();
    let rotate = email != current.email || handle != current.handle;
    let profile_token = if rotate {
        generate_profile_token()
    } else {
        current.profile_token.clone()
    };

    if !db.update_details(id, &name, &email, &handle, &profile_token)? {
        return Err(PersistenceError::NotFound(id.to_string()).into());
    }
    info!("Updated student {} ({})", handle, id);

    let subject = Subject {
        name,
        email,
        handle,
        profile_token,
        ..current
    };

    let mut warnings = Vec::new();
    if rotate && !send_profile_link(notifier, profile, &subject).await {
        warnings.push("Student updated but email notification failed".to_string());
    }

    Ok(Registration { subject, warnings })
}

#[derive(Debug)]
pub struct RosterRow {
    pub line: usize,
    pub student: NewSubject,
}

#[derive(Debug, Default)]
pub struct RosterFile {
    pub rows: Vec<RosterRow>,
    /// (line, reason) for rows that were skipped.
    pub rejected: Vec<(usize, String)>,
}

/// Reads a `name,email,handle` CSV. Bad rows are collected, not fatal.
pub fn read_roster<R: Read>(reader: R, coach_id: &str) -> Result<RosterFile> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut roster = RosterFile::default();

    for (index, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                roster.rejected.push((line, e.to_string()));
                continue;
            }
        };

        if record.len() < 3 {
            roster.rejected.push((
                line,
                "expected 3 columns (name, email, handle)".to_string(),
            ));
            continue;
        }

        let student = NewSubject {
            name: record[0].to_string(),
            email: record[1].to_string(),
            handle: record[2].to_string(),
            coach_id: coach_id.to_string(),
        };

        match validate(&student) {
            Ok(()) => roster.rows.push(RosterRow { line, student }),
            Err(e) => roster.rejected.push((line, e.to_string())),
        }
    }

    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(name: &str, email: &str, handle: &str) -> NewSubject {
        NewSubject {
            name: name.to_string(),
            email: email.to_string(),
            handle: handle.to_string(),
            coach_id: "coach-1".to_string(),
        }
    }

    #[test]
    fn accepts_typical_handles() {
        for handle in ["tourist", "Um_nik", "jiangly", "a.b-c"] {
            assert!(validate(&student("A", "a@b.c", handle)).is_ok(), "{handle}");
        }
    }

    #[test]
    fn rejects_bad_handles_and_blank_fields() {
        assert!(validate(&student("A", "a@b.c", "ab")).is_err());
        assert!(validate(&student("A", "a@b.c", "has space")).is_err());
        assert!(validate(&student("A", "a@b.c", "x".repeat(25).as_str())).is_err());
        assert!(validate(&student("", "a@b.c", "tourist")).is_err());
        assert!(validate(&student("A", "no-at-sign", "tourist")).is_err());
    }

    #[test]
    fn profile_token_is_64_hex_chars() {
        let token = generate_profile_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_profile_token());
    }

    #[test]
    fn profile_url_strips_trailing_slash() {
        assert_eq!(
            profile_url("https://coach.test/", "abc"),
            "https://coach.test/student/token/abc"
        );
    }

    #[test]
    fn roster_keeps_good_rows_and_reports_bad_ones() {
        let csv_data = "name,email,handle\n\
                        Alice, alice@test.org ,alice\n\
                        Bob,bob-at-test,bob_cf\n\
                        Carol,carol@test.org\n\
                        Dan,dan@test.org,dan.cf\n";

        let roster = read_roster(csv_data.as_bytes(), "coach-1").unwrap();

        let handles: Vec<&str> = roster.rows.iter().map(|r| r.student.handle.as_str()).collect();
        assert_eq!(handles, vec!["alice", "dan.cf"]);
        assert_eq!(roster.rows[0].student.email, "alice@test.org");
        assert_eq!(roster.rows[1].line, 5);

        let rejected_lines: Vec<usize> = roster.rejected.iter().map(|(line, _)| *line).collect();
        assert_eq!(rejected_lines, vec![3, 4]);
    }
}
