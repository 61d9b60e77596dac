use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

/// Identity of the record a candidate collides with inside its scope.
/// Name comparisons are case-insensitive exact match, never fuzzy.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub id: String,
    pub name: String,
}

pub const STATUSES: [&str; 3] = ["active", "inactive", "archived"];
pub const STUDENT_ASSIGNMENT_STATUSES: [&str; 4] = ["active", "pending", "inactive", "archived"];
pub const GRADE_LEVELS: [&str; 2] = ["Grade 11", "Grade 12"];
pub const QUARTER_NAMES: [&str; 4] = ["Quarter 1", "Quarter 2", "Quarter 3", "Quarter 4"];

pub fn is_valid_status(s: &str) -> bool {
    STATUSES.contains(&s)
}

pub fn is_valid_student_assignment_status(s: &str) -> bool {
    STUDENT_ASSIGNMENT_STATUSES.contains(&s)
}

pub fn is_valid_grade_level(s: &str) -> bool {
    GRADE_LEVELS.contains(&s)
}

pub fn is_valid_quarter_name(s: &str) -> bool {
    QUARTER_NAMES.iter().any(|q| q.eq_ignore_ascii_case(s))
}

/// Quarter 1/2 belong to Term 1, Quarter 3/4 to Term 2.
pub fn quarter_belongs_to_term(quarter_name: &str, term_name: &str) -> bool {
    let q = quarter_name.to_ascii_lowercase();
    let t = term_name.to_ascii_lowercase();
    match q.as_str() {
        "quarter 1" | "quarter 2" => t == "term 1",
        "quarter 3" | "quarter 4" => t == "term 2",
        _ => false,
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date: {} (expected YYYY-MM-DD)", s))
}

fn one_conflict(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> anyhow::Result<Option<Conflict>> {
    let found = conn
        .query_row(sql, params, |r| {
            Ok(Conflict {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .optional()?;
    Ok(found)
}

pub fn track_conflict(
    conn: &Connection,
    track_name: &str,
    school_year: &str,
    term_name: &str,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, track_name FROM tracks
         WHERE track_name = ? AND school_year = ? AND term_name = ? AND id <> ?",
        &[&track_name, &school_year, &term_name, &exclude],
    )
}

pub fn strand_conflict(
    conn: &Connection,
    strand_name: &str,
    track_name: &str,
    school_year: &str,
    term_name: &str,
    quarter_name: Option<&str>,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, strand_name FROM strands
         WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?
           AND quarter_name IS ? AND id <> ?",
        &[
            &strand_name,
            &track_name,
            &school_year,
            &term_name,
            &quarter_name,
            &exclude,
        ],
    )
}

pub fn section_conflict(
    conn: &Connection,
    section_name: &str,
    track_name: &str,
    strand_name: &str,
    school_year: &str,
    term_name: &str,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, section_name FROM sections
         WHERE section_name = ? AND track_name = ? AND strand_name = ?
           AND school_year = ? AND term_name = ? AND id <> ?",
        &[
            &section_name,
            &track_name,
            &strand_name,
            &school_year,
            &term_name,
            &exclude,
        ],
    )
}

pub fn subject_conflict(
    conn: &Connection,
    subject_name: &str,
    track_name: &str,
    strand_name: &str,
    grade_level: &str,
    school_year: &str,
    term_name: &str,
    quarter_name: Option<&str>,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, subject_name FROM subjects
         WHERE subject_name = ? AND track_name = ? AND strand_name = ?
           AND grade_level = ? AND school_year = ? AND term_name = ?
           AND quarter_name IS ? AND id <> ?",
        &[
            &subject_name,
            &track_name,
            &strand_name,
            &grade_level,
            &school_year,
            &term_name,
            &quarter_name,
            &exclude,
        ],
    )
}

pub fn quarter_conflict(
    conn: &Connection,
    quarter_name: &str,
    school_year: &str,
    term_name: &str,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, quarter_name FROM quarters
         WHERE quarter_name = ? AND school_year = ? AND term_name = ? AND id <> ?",
        &[&quarter_name, &school_year, &term_name, &exclude],
    )
}

/// A student may hold at most one assignment per term+quarter, regardless of
/// section. The compound unique index cannot express this; it is an
/// application-level lookup.
pub fn student_assignment_conflict(
    conn: &Connection,
    student_id: &str,
    school_year: &str,
    term_name: &str,
    quarter_name: Option<&str>,
    exclude_id: Option<&str>,
) -> anyhow::Result<Option<Conflict>> {
    let exclude = exclude_id.unwrap_or("");
    one_conflict(
        conn,
        "SELECT id, section_name FROM student_assignments
         WHERE student_id = ? AND school_year = ? AND term_name = ?
           AND quarter_name IS ? AND status <> 'archived' AND id <> ?",
        &[&student_id, &school_year, &term_name, &quarter_name, &exclude],
    )
}

/// Date ranges of non-archived terms within one school year must not overlap.
/// Returns the names of every offending term. Three conditions: new start
/// inside existing, new end inside existing, new range contains existing.
pub fn overlapping_terms(
    conn: &Connection,
    school_year: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    exclude_id: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let exclude = exclude_id.unwrap_or("");
    let mut stmt = conn.prepare(
        "SELECT term_name, start_date, end_date FROM terms
         WHERE school_year = ? AND status <> 'archived' AND id <> ?",
    )?;
    let rows = stmt
        .query_map([school_year, exclude], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut offending = Vec::new();
    for (name, s, e) in rows {
        let (Ok(existing_start), Ok(existing_end)) = (parse_date(&s), parse_date(&e)) else {
            continue;
        };
        if ranges_overlap(start_date, end_date, existing_start, existing_end) {
            offending.push(name);
        }
    }
    Ok(offending)
}

pub fn ranges_overlap(
    new_start: NaiveDate,
    new_end: NaiveDate,
    existing_start: NaiveDate,
    existing_end: NaiveDate,
) -> bool {
    let start_inside = new_start >= existing_start && new_start <= existing_end;
    let end_inside = new_end >= existing_start && new_end <= existing_end;
    let contains = new_start <= existing_start && new_end >= existing_end;
    start_inside || end_inside || contains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn overlap_covers_all_three_conditions() {
        // start inside existing
        assert!(ranges_overlap(
            d("2024-09-15"),
            d("2025-01-20"),
            d("2024-08-01"),
            d("2024-12-20")
        ));
        // end inside existing
        assert!(ranges_overlap(
            d("2024-06-01"),
            d("2024-09-15"),
            d("2024-08-01"),
            d("2024-12-20")
        ));
        // new range contains existing
        assert!(ranges_overlap(
            d("2024-07-01"),
            d("2025-01-31"),
            d("2024-08-01"),
            d("2024-12-20")
        ));
        // disjoint
        assert!(!ranges_overlap(
            d("2025-01-06"),
            d("2025-05-30"),
            d("2024-08-01"),
            d("2024-12-20")
        ));
    }

    #[test]
    fn quarter_term_pairing() {
        assert!(quarter_belongs_to_term("Quarter 1", "Term 1"));
        assert!(quarter_belongs_to_term("Quarter 2", "Term 1"));
        assert!(quarter_belongs_to_term("Quarter 3", "Term 2"));
        assert!(quarter_belongs_to_term("Quarter 4", "Term 2"));
        assert!(!quarter_belongs_to_term("Quarter 1", "Term 2"));
        assert!(!quarter_belongs_to_term("Quarter 4", "Term 1"));
        // case-insensitive like every other name comparison
        assert!(quarter_belongs_to_term("quarter 3", "TERM 2"));
    }

    #[test]
    fn track_conflict_is_case_insensitive_within_scope() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO tracks(id, track_name, school_year, term_name)
             VALUES('t1', 'STEM', '2024-2025', 'Term 1')",
            [],
        )
        .unwrap();

        let hit = track_conflict(&conn, "stem", "2024-2025", "Term 1", None).unwrap();
        assert_eq!(hit.unwrap().id, "t1");

        // other term scope is untouched
        let miss = track_conflict(&conn, "STEM", "2024-2025", "Term 2", None).unwrap();
        assert!(miss.is_none());

        // the row being edited does not collide with itself
        let self_edit = track_conflict(&conn, "STEM", "2024-2025", "Term 1", Some("t1")).unwrap();
        assert!(self_edit.is_none());
    }

    #[test]
    fn overlapping_terms_reports_every_offender() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO terms(id, school_year, term_name, start_date, end_date, status)
             VALUES('a', '2024-2025', 'Term 1', '2024-08-01', '2024-12-20', 'archived'),
                   ('b', '2024-2025', 'Term 2', '2025-01-06', '2025-05-30', 'active'),
                   ('c', '2025-2026', 'Term 1', '2025-02-01', '2025-06-30', 'active')",
            [],
        )
        .unwrap();

        // overlaps the active Term 2 only; archived and other-year terms do not count
        let hits = overlapping_terms(&conn, "2024-2025", d("2025-05-01"), d("2025-09-30"), None)
            .unwrap();
        assert_eq!(hits, vec!["Term 2".to_string()]);
    }
}
