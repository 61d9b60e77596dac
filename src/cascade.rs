//! Rename cascade propagation.
//!
//! Assignment records and lower taxonomy levels carry copied name strings,
//! not references. When a node is renamed, every copy in the same
//! `(schoolYear, termName)` scope must be rewritten or it silently detaches
//! from the hierarchy. All propagation runs inside the caller's transaction
//! so a renamed node can never be committed with stale copies.

use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Default, Clone, Copy)]
pub struct CascadeCounts {
    pub strands: usize,
    pub sections: usize,
    pub subjects: usize,
    pub student_assignments: usize,
    pub faculty_assignments: usize,
}

impl CascadeCounts {
    pub fn total(&self) -> usize {
        self.strands
            + self.sections
            + self.subjects
            + self.student_assignments
            + self.faculty_assignments
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "strands": self.strands,
            "sections": self.sections,
            "subjects": self.subjects,
            "studentAssignments": self.student_assignments,
            "facultyAssignments": self.faculty_assignments,
            "total": self.total(),
        })
    }
}

/// Old identity of a section, captured before the edit. A section cascade
/// also fires on track/strand/grade changes since assignments copy all four.
#[derive(Debug, Clone)]
pub struct SectionIdentity {
    pub section_name: String,
    pub track_name: String,
    pub strand_name: String,
    pub grade_level: String,
}

pub fn propagate_track_rename(
    conn: &Connection,
    old_name: &str,
    new_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<CascadeCounts> {
    let mut counts = CascadeCounts::default();
    if old_name == new_name {
        return Ok(counts);
    }
    let stamp = crate::db::now_iso();

    counts.strands = conn.execute(
        "UPDATE strands SET track_name = ?, updated_at = ?
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, school_year, term_name),
    )?;
    counts.sections = conn.execute(
        "UPDATE sections SET track_name = ?, updated_at = ?
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, school_year, term_name),
    )?;
    counts.subjects = conn.execute(
        "UPDATE subjects SET track_name = ?, updated_at = ?
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, school_year, term_name),
    )?;
    counts.student_assignments = conn.execute(
        "UPDATE student_assignments SET track_name = ?, updated_at = ?
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, school_year, term_name),
    )?;
    counts.faculty_assignments = conn.execute(
        "UPDATE faculty_assignments SET track_name = ?, updated_at = ?
         WHERE track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, school_year, term_name),
    )?;
    Ok(counts)
}

pub fn propagate_strand_rename(
    conn: &Connection,
    track_name: &str,
    old_name: &str,
    new_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<CascadeCounts> {
    let mut counts = CascadeCounts::default();
    if old_name == new_name {
        return Ok(counts);
    }
    let stamp = crate::db::now_iso();

    counts.sections = conn.execute(
        "UPDATE sections SET strand_name = ?, updated_at = ?
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, track_name, school_year, term_name),
    )?;
    counts.subjects = conn.execute(
        "UPDATE subjects SET strand_name = ?, updated_at = ?
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, track_name, school_year, term_name),
    )?;
    counts.student_assignments = conn.execute(
        "UPDATE student_assignments SET strand_name = ?, updated_at = ?
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, track_name, school_year, term_name),
    )?;
    counts.faculty_assignments = conn.execute(
        "UPDATE faculty_assignments SET strand_name = ?, updated_at = ?
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?",
        (new_name, &stamp, old_name, track_name, school_year, term_name),
    )?;
    Ok(counts)
}

/// Rewrites assignment copies after a section edit. Matches on the full old
/// identity tuple; rows whose copies already drifted (for example a section
/// row edited while its assignments were archived under an older name) are
/// left alone rather than guessed at.
pub fn propagate_section_update(
    conn: &Connection,
    old: &SectionIdentity,
    new: &SectionIdentity,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<CascadeCounts> {
    let mut counts = CascadeCounts::default();
    let unchanged = old.section_name == new.section_name
        && old.track_name == new.track_name
        && old.strand_name == new.strand_name
        && old.grade_level == new.grade_level;
    if unchanged {
        return Ok(counts);
    }
    let stamp = crate::db::now_iso();

    counts.student_assignments = conn.execute(
        "UPDATE student_assignments
         SET section_name = ?, track_name = ?, strand_name = ?, grade_level = ?, updated_at = ?
         WHERE section_name = ? AND track_name = ? AND strand_name = ? AND grade_level = ?
           AND school_year = ? AND term_name = ?",
        (
            &new.section_name,
            &new.track_name,
            &new.strand_name,
            &new.grade_level,
            &stamp,
            &old.section_name,
            &old.track_name,
            &old.strand_name,
            &old.grade_level,
            school_year,
            term_name,
        ),
    )?;
    counts.faculty_assignments = conn.execute(
        "UPDATE faculty_assignments
         SET section_name = ?, track_name = ?, strand_name = ?, grade_level = ?, updated_at = ?
         WHERE section_name = ? AND track_name = ? AND strand_name = ? AND grade_level = ?
           AND school_year = ? AND term_name = ?",
        (
            &new.section_name,
            &new.track_name,
            &new.strand_name,
            &new.grade_level,
            &stamp,
            &old.section_name,
            &old.track_name,
            &old.strand_name,
            &old.grade_level,
            school_year,
            term_name,
        ),
    )?;
    Ok(counts)
}

pub fn propagate_subject_rename(
    conn: &Connection,
    track_name: &str,
    strand_name: &str,
    old_name: &str,
    new_name: &str,
    school_year: &str,
    term_name: &str,
) -> anyhow::Result<CascadeCounts> {
    let mut counts = CascadeCounts::default();
    if old_name == new_name {
        return Ok(counts);
    }
    let stamp = crate::db::now_iso();

    counts.faculty_assignments = conn.execute(
        "UPDATE faculty_assignments SET subject_name = ?, updated_at = ?
         WHERE subject_name = ? AND track_name = ? AND strand_name = ?
           AND school_year = ? AND term_name = ?",
        (
            new_name,
            &stamp,
            old_name,
            track_name,
            strand_name,
            school_year,
            term_name,
        ),
    )?;
    Ok(counts)
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
             INSERT INTO student_assignments(id, student_id, track_name, strand_name,
                                             section_name, grade_level, term_id,
                                             school_year, term_name)
             VALUES('sa1', 'u1', 'STEM', 'STEM-A', 'S1', 'Grade 11', 'tm1',
                    '2024-2025', 'Term 1');
             INSERT INTO student_assignments(id, student_id, track_name, strand_name,
                                             section_name, grade_level, term_id,
                                             school_year, term_name)
             VALUES('sa2', 'u2', 'STEM', 'OTHER', 'S9', 'Grade 11', 'tm2',
                    '2024-2025', 'Term 2');",
        )
        .unwrap();
    }

    #[test]
    fn track_rename_rewrites_every_dependent_in_scope() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);

        let counts =
            propagate_track_rename(&conn, "STEM", "STEM-X", "2024-2025", "Term 1").unwrap();
        assert_eq!(counts.strands, 1);
        assert_eq!(counts.sections, 1);
        assert_eq!(counts.student_assignments, 1);

        let track: String = conn
            .query_row(
                "SELECT track_name FROM student_assignments WHERE id = 'sa1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(track, "STEM-X");

        // Term 2 scope untouched
        let other: String = conn
            .query_row(
                "SELECT track_name FROM student_assignments WHERE id = 'sa2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(other, "STEM");

        // no dependent still holds the old name in the renamed scope
        let stale: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM student_assignments
                 WHERE track_name = 'STEM' AND school_year = '2024-2025'
                   AND term_name = 'Term 1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
    }

    #[test]
    fn rerunning_a_cascade_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);

        let first =
            propagate_track_rename(&conn, "STEM", "STEM-X", "2024-2025", "Term 1").unwrap();
        assert!(first.total() > 0);

        let second =
            propagate_track_rename(&conn, "STEM", "STEM-X", "2024-2025", "Term 1").unwrap();
        assert_eq!(second.total(), 0);
    }

    #[test]
    fn section_update_cascades_on_grade_change_alone() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);

        let old = SectionIdentity {
            section_name: "S1".into(),
            track_name: "STEM".into(),
            strand_name: "STEM-A".into(),
            grade_level: "Grade 11".into(),
        };
        let mut new = old.clone();
        new.grade_level = "Grade 12".into();

        let counts =
            propagate_section_update(&conn, &old, &new, "2024-2025", "Term 1").unwrap();
        assert_eq!(counts.student_assignments, 1);

        let grade: String = conn
            .query_row(
                "SELECT grade_level FROM student_assignments WHERE id = 'sa1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(grade, "Grade 12");
    }
}
