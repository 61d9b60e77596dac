//! Auto-class synthesis.
//!
//! Persisting a faculty assignment derives a `Class` record the faculty can
//! later confirm: a generated code, and a student roster resolved from the
//! section's assignments. Synthesis is idempotent per assignment identity
//! tuple and must never fail the parent write.

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The slice of a faculty assignment the synthesizer needs.
#[derive(Debug, Clone)]
pub struct AssignmentKey {
    pub faculty_id: String,
    pub subject_name: String,
    pub section_name: String,
    pub school_year: String,
    pub term_name: String,
    pub term_id: String,
}

#[derive(Debug, Clone)]
pub struct SynthesizedClass {
    pub id: String,
    pub class_id: String,
    pub class_code: String,
    pub class_name: String,
    pub members: Vec<String>,
    pub created: bool,
}

impl SynthesizedClass {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "classId": self.class_id,
            "classCode": self.class_code,
            "className": self.class_name,
            "members": self.members,
            "created": self.created,
        })
    }
}

pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().find(|c| c.is_ascii_alphanumeric()))
        .collect();
    if letters.is_empty() {
        "X".to_string()
    } else {
        letters.to_ascii_uppercase()
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Random-enough 3-digit display id; the row id proper is a UUID.
pub fn generate_class_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}", 100 + (nanos % 900))
}

/// Subject initials + section initials + year suffix + time disambiguator,
/// e.g. "GM-S1-25-417".
pub fn generate_class_code(subject_name: &str, section_name: &str, school_year: &str) -> String {
    let year_suffix: String = school_year
        .rsplit('-')
        .next()
        .map(|y| {
            let trimmed = y.trim();
            if trimmed.len() >= 2 {
                trimmed[trimmed.len() - 2..].to_string()
            } else {
                trimmed.to_string()
            }
        })
        .unwrap_or_default();
    format!(
        "{}-{}-{}-{}",
        initials(subject_name),
        initials(section_name),
        year_suffix,
        unix_millis() % 1000
    )
}

/// One resolution order for every assignment row: the raw school-ID string
/// wins when it maps to a real user, the linked user row is the fallback.
/// Temporary accounts resolve to nothing.
pub fn resolve_student_identity(
    conn: &Connection,
    student_school_id: Option<&str>,
    student_id: Option<&str>,
) -> anyhow::Result<Option<String>> {
    if let Some(school_id) = student_school_id.filter(|s| !s.trim().is_empty()) {
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT school_id, is_temporary, user_code FROM users WHERE school_id = ?",
                [school_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        if let Some((resolved, is_temporary, user_code)) = row {
            if is_temporary != 0 || user_code.to_ascii_uppercase().starts_with("TEMP") {
                return Ok(None);
            }
            return Ok(Some(resolved));
        }
    }

    if let Some(user_id) = student_id.filter(|s| !s.trim().is_empty()) {
        let row: Option<(Option<String>, i64, String)> = conn
            .query_row(
                "SELECT school_id, is_temporary, user_code FROM users WHERE id = ?",
                [user_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        if let Some((school_id, is_temporary, user_code)) = row {
            if is_temporary != 0 || user_code.to_ascii_uppercase().starts_with("TEMP") {
                return Ok(None);
            }
            return Ok(school_id.filter(|s| !s.is_empty()));
        }
    }

    Ok(None)
}

/// De-duplicated roster for a section within a term: school-ID strings only.
pub fn resolve_roster(conn: &Connection, key: &AssignmentKey) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_school_id, student_id FROM student_assignments
         WHERE section_name = ? AND term_id = ? AND school_year = ?
           AND status IN ('active', 'pending')",
    )?;
    let rows = stmt
        .query_map(
            (&key.section_name, &key.term_id, &key.school_year),
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut members = Vec::new();
    for (school_id, linked_id) in rows {
        let resolved =
            resolve_student_identity(conn, school_id.as_deref(), linked_id.as_deref())?;
        if let Some(id) = resolved {
            if seen.insert(id.clone()) {
                members.push(id);
            }
        }
    }
    Ok(members)
}

fn find_existing(
    conn: &Connection,
    key: &AssignmentKey,
) -> anyhow::Result<Option<SynthesizedClass>> {
    let found = conn
        .query_row(
            "SELECT id, class_id, class_code, class_name, members FROM classes
             WHERE faculty_id = ? AND class_name = ? AND section_name = ?
               AND academic_year = ? AND term_name = ?",
            (
                &key.faculty_id,
                &key.subject_name,
                &key.section_name,
                &key.school_year,
                &key.term_name,
            ),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    let Some((id, class_id, class_code, class_name, members_raw)) = found else {
        return Ok(None);
    };
    let members: Vec<String> = serde_json::from_str(&members_raw).unwrap_or_default();
    Ok(Some(SynthesizedClass {
        id,
        class_id,
        class_code,
        class_name,
        members,
        created: false,
    }))
}

/// Derives the class for a freshly persisted faculty assignment. Returns the
/// pre-existing class unchanged when the identity tuple already has one.
pub fn synthesize_class(
    conn: &Connection,
    key: &AssignmentKey,
) -> anyhow::Result<SynthesizedClass> {
    if let Some(existing) = find_existing(conn, key)? {
        return Ok(existing);
    }

    let members = resolve_roster(conn, key)?;
    let id = Uuid::new_v4().to_string();
    let class_id = generate_class_id();
    let class_code = generate_class_code(&key.subject_name, &key.section_name, &key.school_year);
    let stamp = crate::db::now_iso();
    conn.execute(
        "INSERT INTO classes(id, class_id, class_code, class_name, members, faculty_id,
                             section_name, academic_year, term_name, is_auto_created,
                             needs_confirmation, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 1, ?, ?)",
        (
            &id,
            &class_id,
            &class_code,
            &key.subject_name,
            serde_json::to_string(&members)?,
            &key.faculty_id,
            &key.section_name,
            &key.school_year,
            &key.term_name,
            &stamp,
            &stamp,
        ),
    )?;

    Ok(SynthesizedClass {
        id,
        class_id,
        class_code,
        class_name: key.subject_name.clone(),
        members,
        created: true,
    })
}

/// Removes the auto-created class for a deleted assignment. Classes the
/// faculty already confirmed (flag cleared) are left alone.
pub fn remove_auto_class(conn: &Connection, key: &AssignmentKey) -> anyhow::Result<usize> {
    let removed = conn.execute(
        "DELETE FROM classes
         WHERE faculty_id = ? AND class_name = ? AND section_name = ?
           AND academic_year = ? AND term_name = ? AND is_auto_created = 1",
        (
            &key.faculty_id,
            &key.subject_name,
            &key.section_name,
            &key.school_year,
            &key.term_name,
        ),
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn key() -> AssignmentKey {
        AssignmentKey {
            faculty_id: "f1".into(),
            subject_name: "General Math".into(),
            section_name: "S1".into(),
            school_year: "2024-2025".into(),
            term_name: "Term 1".into(),
            term_id: "tm1".into(),
        }
    }

    fn seed_users(conn: &Connection) {
        db::init_schema(conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users(id, user_code, school_id, last_name, first_name, role, is_temporary)
             VALUES('u1', 'STU-001', '2024-0001', 'Reyes', 'Ana', 'student', 0),
                   ('u2', 'STU-002', '2024-0002', 'Cruz', 'Ben', 'student', 0),
                   ('u3', 'TEMP-003', '2024-0003', 'Diaz', 'Cara', 'student', 0),
                   ('u4', 'STU-004', '2024-0004', 'Evans', 'Dan', 'student', 1);",
        )
        .unwrap();
    }

    #[test]
    fn initials_take_the_first_letter_of_each_word() {
        assert_eq!(initials("General Math"), "GM");
        assert_eq!(initials("S1"), "S");
        assert_eq!(initials("  practical   research 2 "), "PR2");
        assert_eq!(initials(""), "X");
    }

    #[test]
    fn class_code_carries_year_suffix() {
        let code = generate_class_code("General Math", "S1", "2024-2025");
        assert!(code.starts_with("GM-S-25-"), "unexpected code {}", code);
    }

    #[test]
    fn identity_prefers_school_id_and_excludes_temp_accounts() {
        let conn = Connection::open_in_memory().unwrap();
        seed_users(&conn);

        // raw school id wins even when a linked id is present
        let got = resolve_student_identity(&conn, Some("2024-0001"), Some("u2")).unwrap();
        assert_eq!(got.as_deref(), Some("2024-0001"));

        // linked fallback
        let got = resolve_student_identity(&conn, None, Some("u2")).unwrap();
        assert_eq!(got.as_deref(), Some("2024-0002"));

        // TEMP user-code prefix excluded on both paths
        assert!(resolve_student_identity(&conn, Some("2024-0003"), None)
            .unwrap()
            .is_none());
        assert!(resolve_student_identity(&conn, None, Some("u3"))
            .unwrap()
            .is_none());

        // is_temporary flag excluded
        assert!(resolve_student_identity(&conn, Some("2024-0004"), None)
            .unwrap()
            .is_none());

        // unknown ids resolve to nothing
        assert!(resolve_student_identity(&conn, Some("9999-9999"), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn roster_deduplicates_across_both_identity_paths() {
        let conn = Connection::open_in_memory().unwrap();
        seed_users(&conn);
        // Three assignments: one by school id, one linked, one duplicate
        // student reachable by both paths.
        conn.execute_batch(
            "INSERT INTO student_assignments(id, student_school_id, track_name, strand_name,
                                             section_name, grade_level, term_id, school_year,
                                             term_name, status)
             VALUES('sa1', '2024-0001', 'STEM', 'STEM-A', 'S1', 'Grade 11', 'tm1',
                    '2024-2025', 'Term 1', 'active');
             INSERT INTO student_assignments(id, student_id, track_name, strand_name,
                                             section_name, grade_level, term_id, school_year,
                                             term_name, status)
             VALUES('sa2', 'u2', 'STEM', 'STEM-A', 'S1', 'Grade 11', 'tm1',
                    '2024-2025', 'Term 1', 'pending');
             INSERT INTO student_assignments(id, student_id, student_school_id, track_name,
                                             strand_name, section_name, grade_level, term_id,
                                             school_year, term_name, status)
             VALUES('sa3', 'u1', '2024-0001', 'STEM', 'STEM-A', 'S1', 'Grade 11', 'tm1',
                    '2024-2025', 'Term 1', 'active');",
        )
        .unwrap();

        let members = resolve_roster(&conn, &key()).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&"2024-0001".to_string()));
        assert!(members.contains(&"2024-0002".to_string()));
    }

    #[test]
    fn synthesis_is_idempotent_per_assignment_tuple() {
        let conn = Connection::open_in_memory().unwrap();
        seed_users(&conn);

        let first = synthesize_class(&conn, &key()).unwrap();
        assert!(first.created);

        // same tuple, different case on the copies
        let mut k = key();
        k.subject_name = "GENERAL MATH".into();
        k.section_name = "s1".into();
        let second = synthesize_class(&conn, &k).unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn remove_only_touches_auto_created_classes() {
        let conn = Connection::open_in_memory().unwrap();
        seed_users(&conn);
        synthesize_class(&conn, &key()).unwrap();
        conn.execute("UPDATE classes SET is_auto_created = 0", [])
            .unwrap();

        assert_eq!(remove_auto_class(&conn, &key()).unwrap(), 0);
        conn.execute("UPDATE classes SET is_auto_created = 1", [])
            .unwrap();
        assert_eq!(remove_auto_class(&conn, &key()).unwrap(), 1);
    }
}
