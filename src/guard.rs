//! Delete dependency guard.
//!
//! Dependents are keyed by denormalized name copies, so a taxonomy delete
//! must be matched against every collection that copied the node's names.
//! Unconfirmed deletes are blocked with the exact dependent count; confirmed
//! deletes fan out inside one transaction, in dependency order.

use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Default)]
pub struct Dependencies {
    pub strands: Vec<serde_json::Value>,
    pub sections: Vec<serde_json::Value>,
    pub subjects: Vec<serde_json::Value>,
    pub student_assignments: Vec<serde_json::Value>,
    pub faculty_assignments: Vec<serde_json::Value>,
}

impl Dependencies {
    pub fn total(&self) -> usize {
        self.strands.len()
            + self.sections.len()
            + self.subjects.len()
            + self.student_assignments.len()
            + self.faculty_assignments.len()
    }
}

fn collect(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> anyhow::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn track_dependencies(
    conn: &Connection,
    track_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<Dependencies> {
    let scope: &[&dyn rusqlite::ToSql] = &[&track_name, &school_year, &term_name];
    Ok(Dependencies {
        strands: collect(
            conn,
            "SELECT id, strand_name FROM strands
             WHERE track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        sections: collect(
            conn,
            "SELECT id, section_name FROM sections
             WHERE track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        subjects: collect(
            conn,
            "SELECT id, subject_name FROM subjects
             WHERE track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        student_assignments: collect(
            conn,
            "SELECT id, section_name FROM student_assignments
             WHERE track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        faculty_assignments: collect(
            conn,
            "SELECT id, subject_name FROM faculty_assignments
             WHERE track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
    })
}

pub fn strand_dependencies(
    conn: &Connection,
    strand_name: &str,
    track_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<Dependencies> {
    let scope: &[&dyn rusqlite::ToSql] = &[&strand_name, &track_name, &school_year, &term_name];
    Ok(Dependencies {
        strands: Vec::new(),
        sections: collect(
            conn,
            "SELECT id, section_name FROM sections
             WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        subjects: collect(
            conn,
            "SELECT id, subject_name FROM subjects
             WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        student_assignments: collect(
            conn,
            "SELECT id, section_name FROM student_assignments
             WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
        faculty_assignments: collect(
            conn,
            "SELECT id, subject_name FROM faculty_assignments
             WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
            scope,
        )?,
    })
}

pub fn section_dependencies(
    conn: &Connection,
    section_name: &str,
    track_name: &str,
    strand_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<Dependencies> {
    let scope: &[&dyn rusqlite::ToSql] = &[
        &section_name,
        &track_name,
        &strand_name,
        &school_year,
        &term_name,
    ];
    Ok(Dependencies {
        strands: Vec::new(),
        sections: Vec::new(),
        subjects: Vec::new(),
        student_assignments: collect(
            conn,
            "SELECT id, section_name FROM student_assignments
             WHERE section_name = ? AND track_name = ? AND strand_name = ?
               AND school_year = ? AND term_name = ?",
            scope,
        )?,
        faculty_assignments: collect(
            conn,
            "SELECT id, subject_name FROM faculty_assignments
             WHERE section_name = ? AND track_name = ? AND strand_name = ?
               AND school_year = ? AND term_name = ?",
            scope,
        )?,
    })
}

pub fn subject_dependencies(
    conn: &Connection,
    subject_name: &str,
    track_name: &str,
    strand_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<Dependencies> {
    let scope: &[&dyn rusqlite::ToSql] = &[
        &subject_name,
        &track_name,
        &strand_name,
        &school_year,
        &term_name,
    ];
    Ok(Dependencies {
        strands: Vec::new(),
        sections: Vec::new(),
        subjects: Vec::new(),
        student_assignments: Vec::new(),
        faculty_assignments: collect(
            conn,
            "SELECT id, subject_name FROM faculty_assignments
             WHERE subject_name = ? AND track_name = ? AND strand_name = ?
               AND school_year = ? AND term_name = ?",
            scope,
        )?,
    })
}

/// Deletes everything under a track. Caller wraps this in a transaction and
/// deletes the track row afterwards.
pub fn delete_track_dependents(
    conn: &Connection,
    track_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<()> {
    let scope = (track_name, school_year, term_name);
    conn.execute(
        "DELETE FROM student_assignments
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM faculty_assignments
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM subjects WHERE track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM sections WHERE track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM strands WHERE track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    Ok(())
}

pub fn delete_strand_dependents(
    conn: &Connection,
    strand_name: &str,
    track_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<()> {
    let scope = (strand_name, track_name, school_year, term_name);
    conn.execute(
        "DELETE FROM student_assignments
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM faculty_assignments
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM subjects
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM sections
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        scope,
    )?;
    Ok(())
}

pub fn delete_section_dependents(
    conn: &Connection,
    section_name: &str,
    track_name: &str,
    strand_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<()> {
    let scope = (section_name, track_name, strand_name, school_year, term_name);
    conn.execute(
        "DELETE FROM student_assignments
         WHERE section_name = ? AND track_name = ? AND strand_name = ?
           AND school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM faculty_assignments
         WHERE section_name = ? AND track_name = ? AND strand_name = ?
           AND school_year = ? AND term_name = ?",
        scope,
    )?;
    Ok(())
}

/// Term deletion is the superset cascade: taxonomy rows go by
/// `(schoolYear, termName)`, assignments by termId — the one place an actual
/// ID reference exists.
pub fn delete_term_dependents(
    conn: &Connection,
    term_id: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM student_assignments WHERE term_id = ?",
        [term_id],
    )?;
    conn.execute(
        "DELETE FROM faculty_assignments WHERE term_id = ?",
        [term_id],
    )?;
    let scope = (school_year, term_name);
    conn.execute(
        "DELETE FROM subjects WHERE school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM sections WHERE school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM strands WHERE school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM tracks WHERE school_year = ? AND term_name = ?",
        scope,
    )?;
    conn.execute(
        "DELETE FROM quarters WHERE school_year = ? AND term_name = ?",
        scope,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection) {
        db::init_schema(conn).unwrap();
        conn.execute_batch(
            "INSERT INTO tracks(id, track_name, school_year, term_name)
             VALUES('tr1', 'STEM', '2024-2025', 'Term 1');
             INSERT INTO strands(id, strand_name, track_name, school_year, term_name)
             VALUES('st1', 'STEM-A', 'STEM', '2024-2025', 'Term 1');
             INSERT INTO sections(id, section_name, section_code, track_name, strand_name,
                                  grade_level, school_year, term_name)
             VALUES('se1', 'S1', 'S1C', 'STEM', 'STEM-A', 'Grade 11', '2024-2025', 'Term 1');
             INSERT INTO subjects(id, subject_name, track_name, strand_name, grade_level,
                                  school_year, term_name)
             VALUES('su1', 'General Math', 'STEM', 'STEM-A', 'Grade 11', '2024-2025', 'Term 1');
             INSERT INTO student_assignments(id, student_id, track_name, strand_name,
                                             section_name, grade_level, term_id,
                                             school_year, term_name)
             VALUES('sa1', 'u1', 'STEM', 'STEM-A', 'S1', 'Grade 11', 'tm1',
                    '2024-2025', 'Term 1');
             INSERT INTO faculty_assignments(id, faculty_id, track_name, strand_name,
                                             section_name, subject_name, grade_level,
                                             term_id, school_year, term_name)
             VALUES('fa1', 'f1', 'STEM', 'STEM-A', 'S1', 'General Math', 'Grade 11',
                    'tm1', '2024-2025', 'Term 1');",
        )
        .unwrap();
    }

    #[test]
    fn track_dependency_count_sums_every_collection() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);

        let deps = track_dependencies(&conn, "STEM", "2024-2025", "Term 1").unwrap();
        assert_eq!(deps.strands.len(), 1);
        assert_eq!(deps.sections.len(), 1);
        assert_eq!(deps.subjects.len(), 1);
        assert_eq!(deps.student_assignments.len(), 1);
        assert_eq!(deps.faculty_assignments.len(), 1);
        assert_eq!(deps.total(), 5);
    }

    #[test]
    fn confirmed_track_delete_leaves_no_dependents() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);

        delete_track_dependents(&conn, "STEM", "2024-2025", "Term 1").unwrap();
        conn.execute("DELETE FROM tracks WHERE id = 'tr1'", []).unwrap();

        let deps = track_dependencies(&conn, "STEM", "2024-2025", "Term 1").unwrap();
        assert_eq!(deps.total(), 0);
    }

    #[test]
    fn drifted_copies_survive_a_scoped_delete() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        // A copy left behind by an older rename no longer matches the scope
        // tuple and is deliberately not collected.
        conn.execute(
            "UPDATE student_assignments SET track_name = 'STEM-OLD' WHERE id = 'sa1'",
            [],
        )
        .unwrap();

        let deps = track_dependencies(&conn, "STEM", "2024-2025", "Term 1").unwrap();
        assert_eq!(deps.student_assignments.len(), 0);

        delete_track_dependents(&conn, "STEM", "2024-2025", "Term 1").unwrap();
        let survivors: i64 = conn
            .query_row("SELECT COUNT(*) FROM student_assignments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(survivors, 1);
    }
}
