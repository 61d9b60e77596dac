//! Faculty assignment conflict validation.
//!
//! A faculty member may not hold two active assignments for the same
//! (subject, section) within one quarter/term/year, even when the track or
//! strand copies differ. What happens when the validator itself faults is a
//! policy decision: fail-open favors availability and is the default, but a
//! workspace can opt into fail-closed via `engine.conflictPolicy`.

use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    FailOpen,
    FailClosed,
}

impl ConflictPolicy {
    pub fn from_settings(conn: &Connection) -> Self {
        let raw = crate::db::settings_get_json(conn, "engine.conflictPolicy")
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        match raw.as_deref() {
            Some("failClosed") => Self::FailClosed,
            _ => Self::FailOpen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentConflict {
    pub assignment_id: String,
    pub faculty_id: String,
    pub subject_name: String,
    pub section_name: String,
}

#[derive(Debug)]
pub enum Outcome {
    Valid,
    Conflict(AssignmentConflict),
    /// The lookup itself failed and the policy let the write through.
    FailedOpen,
}

pub fn validate_faculty_assignment(
    conn: &Connection,
    faculty_id: &str,
    subject_name: &str,
    section_name: &str,
    school_year: &str,
    term_name: &str,
    quarter_name: Option<&str>,
    exclude_assignment_id: Option<&str>,
    policy: ConflictPolicy,
) -> anyhow::Result<Outcome> {
    match lookup(
        conn,
        faculty_id,
        subject_name,
        section_name,
        school_year,
        term_name,
        quarter_name,
        exclude_assignment_id,
    ) {
        Ok(Some(conflict)) => Ok(Outcome::Conflict(conflict)),
        Ok(None) => Ok(Outcome::Valid),
        Err(e) => match policy {
            ConflictPolicy::FailOpen => {
                eprintln!(
                    "registrard: conflict validation failed open for faculty {}: {}",
                    faculty_id, e
                );
                Ok(Outcome::FailedOpen)
            }
            ConflictPolicy::FailClosed => Err(e),
        },
    }
}

fn lookup(
    conn: &Connection,
    faculty_id: &str,
    subject_name: &str,
    section_name: &str,
    school_year: &str,
    term_name: &str,
    quarter_name: Option<&str>,
    exclude_assignment_id: Option<&str>,
) -> anyhow::Result<Option<AssignmentConflict>> {
    let exclude = exclude_assignment_id.unwrap_or("");
    let found = conn
        .query_row(
            "SELECT id, faculty_id, subject_name, section_name FROM faculty_assignments
             WHERE faculty_id = ? AND subject_name = ? AND section_name = ?
               AND school_year = ? AND term_name = ? AND quarter_name IS ?
               AND status = 'active' AND id <> ?",
            (
                faculty_id,
                subject_name,
                section_name,
                school_year,
                term_name,
                quarter_name,
                exclude,
            ),
            |r| {
                Ok(AssignmentConflict {
                    assignment_id: r.get(0)?,
                    faculty_id: r.get(1)?,
                    subject_name: r.get(2)?,
                    section_name: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}
