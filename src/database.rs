use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Params, Transaction};

use crate::error::PersistenceError;
use crate::models::{ContestResult, Subject, SubjectFilter, Submission};

type Result<T> = std::result::Result<T, PersistenceError>;

/// What the sync engine needs from storage.
pub trait SubjectStore: Send + Sync {
    fn find_subjects(&self, filter: &SubjectFilter) -> Result<Vec<Subject>>;

    /// Writes the whole record back, replacing both histories.
    fn save(&self, subject: &Subject) -> Result<()>;
}

const STUDENT_COLUMNS: &str = "id, name, email, handle, coach_id, current_rating, max_rating,
     last_synced, reminders_enabled, reminders_sent, profile_token";

pub struct Database {
    path: String,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            path: path.to_string(),
        })
    }

    fn get_connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.get_connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                handle TEXT NOT NULL,
                coach_id TEXT NOT NULL,
                current_rating INTEGER NOT NULL DEFAULT 0,
                max_rating INTEGER NOT NULL DEFAULT 0,
                last_synced TEXT,
                reminders_enabled INTEGER NOT NULL DEFAULT 1,
                reminders_sent INTEGER NOT NULL DEFAULT 0,
                profile_token TEXT NOT NULL UNIQUE
            );
            CREATE INDEX IF NOT EXISTS idx_students_coach ON students (coach_id);

            CREATE TABLE IF NOT EXISTS contest_results (
                student_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                contest_id INTEGER NOT NULL,
                contest_name TEXT NOT NULL,
                rank INTEGER NOT NULL,
                rating_update_time_seconds INTEGER NOT NULL,
                old_rating INTEGER NOT NULL,
                new_rating INTEGER NOT NULL,
                PRIMARY KEY (student_id, position)
            );

            CREATE TABLE IF NOT EXISTS submissions (
                student_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                submission_id INTEGER NOT NULL,
                contest_id INTEGER NOT NULL,
                problem_index TEXT NOT NULL,
                problem_name TEXT NOT NULL,
                problem_rating INTEGER NOT NULL,
                creation_time_seconds INTEGER NOT NULL,
                verdict TEXT NOT NULL,
                PRIMARY KEY (student_id, position)
            );",
        )?;

        Ok(())
    }

    pub fn insert(&self, subject: &Subject) -> Result<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO students (
                id, name, email, handle, coach_id, current_rating, max_rating,
                last_synced, reminders_enabled, reminders_sent, profile_token
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                subject.id,
                subject.name,
                subject.email,
                subject.handle,
                subject.coach_id,
                subject.current_rating,
                subject.max_rating,
                subject.last_synced.map(|t| t.to_rfc3339()),
                subject.reminders_enabled,
                subject.reminders_sent,
                subject.profile_token,
            ],
        )?;
        replace_histories(&tx, subject)?;

        tx.commit()?;
        Ok(())
    }

    pub fn list_by_coach(&self, coach_id: Option<&str>) -> Result<Vec<Subject>> {
        let conn = self.get_connection()?;
        match coach_id {
            Some(coach) => query_subjects(&conn, "WHERE coach_id = ?1 ORDER BY name", [coach]),
            None => query_subjects(&conn, "ORDER BY name", []),
        }
    }

    pub fn find_by_token(&self, token: &str) -> Result<Option<Subject>> {
        let conn = self.get_connection()?;
        Ok(query_subjects(&conn, "WHERE profile_token = ?1", [token])?
            .into_iter()
            .next())
    }

    /// Returns false when no such student existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM contest_results WHERE student_id = ?1", [id])?;
        tx.execute("DELETE FROM submissions WHERE student_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM students WHERE id = ?1", [id])?;

        tx.commit()?;
        Ok(removed > 0)
    }

    /// Rewrites the editable fields only; ratings and histories stay as synced.
    pub fn update_details(
        &self,
        id: &str,
        name: &str,
        email: &str,
        handle: &str,
        profile_token: &str,
    ) -> Result<bool> {
        let conn = self.get_connection()?;
        let updated = conn.execute(
            "UPDATE students SET name = ?2, email = ?3, handle = ?4, profile_token = ?5
             WHERE id = ?1",
            params![id, name, email, handle, profile_token],
        )?;
        Ok(updated > 0)
    }

    pub fn set_reminders(&self, id: &str, enabled: bool) -> Result<bool> {
        let conn = self.get_connection()?;
        let updated = conn.execute(
            "UPDATE students SET reminders_enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(updated > 0)
    }
}

impl SubjectStore for Database {
    fn find_subjects(&self, filter: &SubjectFilter) -> Result<Vec<Subject>> {
        let conn = self.get_connection()?;
        match filter {
            SubjectFilter::All => query_subjects(&conn, "ORDER BY rowid", []),
            SubjectFilter::ById(id) => query_subjects(&conn, "WHERE id = ?1", [id]),
        }
    }

    fn save(&self, subject: &Subject) -> Result<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE students SET
                name = ?2, email = ?3, handle = ?4, coach_id = ?5,
                current_rating = ?6, max_rating = ?7, last_synced = ?8,
                reminders_enabled = ?9, reminders_sent = ?10, profile_token = ?11
             WHERE id = ?1",
            params![
                subject.id,
                subject.name,
                subject.email,
                subject.handle,
                subject.coach_id,
                subject.current_rating,
                subject.max_rating,
                subject.last_synced.map(|t| t.to_rfc3339()),
                subject.reminders_enabled,
                subject.reminders_sent,
                subject.profile_token,
            ],
        )?;
        if updated == 0 {
            return Err(PersistenceError::NotFound(subject.id.clone()));
        }
        replace_histories(&tx, subject)?;

        tx.commit()?;
        Ok(())
    }
}

fn replace_histories(tx: &Transaction<'_>, subject: &Subject) -> Result<()> {
    tx.execute(
        "DELETE FROM contest_results WHERE student_id = ?1",
        [&subject.id],
    )?;
    tx.execute("DELETE FROM submissions WHERE student_id = ?1", [&subject.id])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO contest_results (
                student_id, position, contest_id, contest_name, rank,
                rating_update_time_seconds, old_rating, new_rating
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (position, c) in subject.contest_history.iter().enumerate() {
            stmt.execute(params![
                subject.id,
                position as i64,
                c.contest_id,
                c.contest_name,
                c.rank,
                c.rating_update_time_seconds,
                c.old_rating,
                c.new_rating,
            ])?;
        }
    }

    let mut stmt = tx.prepare(
        "INSERT INTO submissions (
            student_id, position, submission_id, contest_id, problem_index,
            problem_name, problem_rating, creation_time_seconds, verdict
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for (position, s) in subject.submissions.iter().enumerate() {
        stmt.execute(params![
            subject.id,
            position as i64,
            s.submission_id,
            s.contest_id,
            s.problem_index,
            s.problem_name,
            s.problem_rating,
            s.creation_time_seconds,
            s.verdict,
        ])?;
    }

    Ok(())
}

fn query_subjects<P: Params>(conn: &Connection, clause: &str, params: P) -> Result<Vec<Subject>> {
    let sql = format!("SELECT {} FROM students {}", STUDENT_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(params, |row| {
            Ok((
                Subject {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    handle: row.get(3)?,
                    coach_id: row.get(4)?,
                    current_rating: row.get(5)?,
                    max_rating: row.get(6)?,
                    last_synced: None,
                    contest_history: Vec::new(),
                    submissions: Vec::new(),
                    reminders_enabled: row.get(8)?,
                    reminders_sent: row.get(9)?,
                    profile_token: row.get(10)?,
                },
                row.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut subjects = Vec::with_capacity(rows.len());
    for (mut subject, last_synced) in rows {
        subject.last_synced = last_synced.as_deref().map(parse_timestamp).transpose()?;
        subject.contest_history = load_contests(conn, &subject.id)?;
        subject.submissions = load_submissions(conn, &subject.id)?;
        subjects.push(subject);
    }

    Ok(subjects)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("last_synced '{}': {}", raw, e)))
}

fn load_contests(conn: &Connection, student_id: &str) -> Result<Vec<ContestResult>> {
    let mut stmt = conn.prepare(
        "SELECT contest_id, contest_name, rank, rating_update_time_seconds, old_rating, new_rating
         FROM contest_results
         WHERE student_id = ?1
         ORDER BY position",
    )?;

    let contests = stmt
        .query_map([student_id], |row| {
            Ok(ContestResult {
                contest_id: row.get(0)?,
                contest_name: row.get(1)?,
                rank: row.get(2)?,
                rating_update_time_seconds: row.get(3)?,
                old_rating: row.get(4)?,
                new_rating: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(contests)
}

fn load_submissions(conn: &Connection, student_id: &str) -> Result<Vec<Submission>> {
    let mut stmt = conn.prepare(
        "SELECT submission_id, contest_id, problem_index, problem_name, problem_rating,
                creation_time_seconds, verdict
         FROM submissions
         WHERE student_id = ?1
         ORDER BY position",
    )?;

    let submissions = stmt
        .query_map([student_id], |row| {
            Ok(Submission {
                submission_id: row.get(0)?,
                contest_id: row.get(1)?,
                problem_index: row.get(2)?,
                problem_name: row.get(3)?,
                problem_rating: row.get(4)?,
                creation_time_seconds: row.get(5)?,
                verdict: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(submissions)
}

/// Convenience for callers that only need one record.
pub fn find_one(store: &dyn SubjectStore, id: &str) -> Result<Option<Subject>> {
    Ok(store
        .find_subjects(&SubjectFilter::ById(id.to_string()))?
        .into_iter()
        .next())
}
