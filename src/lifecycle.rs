//! Term and school-year lifecycle.
//!
//! Terms are numbered sequentially per school year and never revived:
//! re-activation of an archived period means creating the next term.
//! Activation demotes every sibling so the single-active invariants hold.

use rusqlite::{Connection, OptionalExtension};

/// Next sequential name for a school year's terms: `Term N`.
pub fn next_term_name(conn: &Connection, school_year: &str) -> anyhow::Result<String> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM terms WHERE school_year = ?",
        [school_year],
        |r| r.get(0),
    )?;
    Ok(format!("Term {}", count + 1))
}

/// The most recent term of a school year, by creation order.
/// A new term may only be created once this one is archived.
pub fn latest_active_term(
    conn: &Connection,
    school_year: &str,
) -> anyhow::Result<Option<String>> {
    let found: Option<String> = conn
        .query_row(
            "SELECT term_name FROM terms
             WHERE school_year = ? AND status = 'active'
             ORDER BY rowid DESC LIMIT 1",
            [school_year],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found)
}

/// Promotes one term and archives every other term in the same school year.
/// Runs inside the caller's transaction.
pub fn activate_term(conn: &Connection, term_id: &str, school_year: &str) -> anyhow::Result<()> {
    let stamp = crate::db::now_iso();
    conn.execute(
        "UPDATE terms SET status = 'archived', updated_at = ?
         WHERE school_year = ? AND id <> ? AND status <> 'archived'",
        (&stamp, school_year, term_id),
    )?;
    conn.execute(
        "UPDATE terms SET status = 'active', updated_at = ? WHERE id = ?",
        (&stamp, term_id),
    )?;
    Ok(())
}

/// Archives a term and cascades the status write to both assignment
/// collections by termId. A status cascade, not a deletion.
pub fn archive_term(conn: &Connection, term_id: &str) -> anyhow::Result<(usize, usize)> {
    let stamp = crate::db::now_iso();
    conn.execute(
        "UPDATE terms SET status = 'archived', updated_at = ? WHERE id = ?",
        (&stamp, term_id),
    )?;
    let students = conn.execute(
        "UPDATE student_assignments SET status = 'archived', updated_at = ? WHERE term_id = ?",
        (&stamp, term_id),
    )?;
    let faculty = conn.execute(
        "UPDATE faculty_assignments SET status = 'archived', updated_at = ? WHERE term_id = ?",
        (&stamp, term_id),
    )?;
    Ok((students, faculty))
}

/// At most one active school year system-wide; activation demotes the rest.
pub fn activate_school_year(conn: &Connection, school_year_id: &str) -> anyhow::Result<()> {
    let stamp = crate::db::now_iso();
    conn.execute(
        "UPDATE school_years SET status = 'inactive', updated_at = ?
         WHERE id <> ? AND status = 'active'",
        (&stamp, school_year_id),
    )?;
    conn.execute(
        "UPDATE school_years SET status = 'active', updated_at = ? WHERE id = ?",
        (&stamp, school_year_id),
    )?;
    Ok(())
}
