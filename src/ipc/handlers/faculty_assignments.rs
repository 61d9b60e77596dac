use crate::conflict::{self, ConflictPolicy, Outcome};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, map_write_err, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, AssignmentKey};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct FacultyAssignmentRow {
    id: String,
    faculty_id: String,
    track_name: String,
    strand_name: String,
    section_name: String,
    subject_name: String,
    grade_level: String,
    term_id: String,
    school_year: String,
    term_name: String,
    quarter_name: Option<String>,
    status: String,
}

fn fetch(conn: &Connection, id: &str) -> Result<FacultyAssignmentRow, HandlerErr> {
    conn.query_row(
        "SELECT id, faculty_id, track_name, strand_name, section_name, subject_name,
                grade_level, term_id, school_year, term_name, quarter_name, status
         FROM faculty_assignments WHERE id = ?",
        [id],
        |r| {
            Ok(FacultyAssignmentRow {
                id: r.get(0)?,
                faculty_id: r.get(1)?,
                track_name: r.get(2)?,
                strand_name: r.get(3)?,
                section_name: r.get(4)?,
                subject_name: r.get(5)?,
                grade_level: r.get(6)?,
                term_id: r.get(7)?,
                school_year: r.get(8)?,
                term_name: r.get(9)?,
                quarter_name: r.get(10)?,
                status: r.get(11)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "faculty assignment not found"))
}

fn to_json(a: &FacultyAssignmentRow) -> serde_json::Value {
    json!({
        "id": a.id,
        "facultyId": a.faculty_id,
        "trackName": a.track_name,
        "strandName": a.strand_name,
        "sectionName": a.section_name,
        "subjectName": a.subject_name,
        "gradeLevel": a.grade_level,
        "termId": a.term_id,
        "schoolYear": a.school_year,
        "termName": a.term_name,
        "quarterName": a.quarter_name,
        "status": a.status,
    })
}

fn assignment_key(a: &FacultyAssignmentRow) -> AssignmentKey {
    AssignmentKey {
        faculty_id: a.faculty_id.clone(),
        subject_name: a.subject_name.clone(),
        section_name: a.section_name.clone(),
        school_year: a.school_year.clone(),
        term_name: a.term_name.clone(),
        term_id: a.term_id.clone(),
    }
}

fn conflict_err(c: conflict::AssignmentConflict) -> HandlerErr {
    HandlerErr::with_details(
        "assignment_conflict",
        format!(
            "faculty {} already teaches {} to section {} in this quarter",
            c.faculty_id, c.subject_name, c.section_name
        ),
        json!({
            "conflictId": c.assignment_id,
            "facultyId": c.faculty_id,
            "subjectName": c.subject_name,
            "sectionName": c.section_name,
        }),
    )
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_opt_str(&req.params, "facultyId");
    let term_id = get_opt_str(&req.params, "termId");
    let school_year = get_opt_str(&req.params, "schoolYear");

    let mut sql = String::from(
        "SELECT id, faculty_id, track_name, strand_name, section_name, subject_name,
                grade_level, term_id, school_year, term_name, quarter_name, status
         FROM faculty_assignments WHERE 1=1",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(f) = faculty_id.as_ref() {
        sql.push_str(" AND faculty_id = ?");
        params.push(f);
    }
    if let Some(t) = term_id.as_ref() {
        sql.push_str(" AND term_id = ?");
        params.push(t);
    }
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    sql.push_str(" ORDER BY subject_name, section_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(FacultyAssignmentRow {
                id: r.get(0)?,
                faculty_id: r.get(1)?,
                track_name: r.get(2)?,
                strand_name: r.get(3)?,
                section_name: r.get(4)?,
                subject_name: r.get(5)?,
                grade_level: r.get(6)?,
                term_id: r.get(7)?,
                school_year: r.get(8)?,
                term_name: r.get(9)?,
                quarter_name: r.get(10)?,
                status: r.get(11)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let assignments: Vec<serde_json::Value> = rows.iter().map(to_json).collect();
    Ok(ok(&req.id, json!({ "facultyAssignments": assignments })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let track_name = get_required_str(&req.params, "trackName")?;
    let strand_name = get_required_str(&req.params, "strandName")?;
    let section_name = get_required_str(&req.params, "sectionName")?;
    let subject_name = get_required_str(&req.params, "subjectName")?;
    let grade_level = get_required_str(&req.params, "gradeLevel")?;
    let term_id = get_required_str(&req.params, "termId")?;
    let quarter_name = get_opt_str(&req.params, "quarterName");

    if !validate::is_valid_grade_level(&grade_level) {
        return Err(HandlerErr::bad_params(format!(
            "gradeLevel must be one of: {}",
            validate::GRADE_LEVELS.join(", ")
        )));
    }

    let (school_year, term_name): (String, String) = conn
        .query_row(
            "SELECT school_year, term_name FROM terms WHERE id = ?",
            [&term_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "term not found"))?;

    let policy = ConflictPolicy::from_settings(conn);
    match conflict::validate_faculty_assignment(
        conn,
        &faculty_id,
        &subject_name,
        &section_name,
        &school_year,
        &term_name,
        quarter_name.as_deref(),
        None,
        policy,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        Outcome::Conflict(c) => return Err(conflict_err(c)),
        Outcome::Valid | Outcome::FailedOpen => {}
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO faculty_assignments(id, faculty_id, track_name, strand_name,
                                         section_name, subject_name, grade_level, term_id,
                                         school_year, term_name, quarter_name, status,
                                         created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        rusqlite::params![
            &id,
            &faculty_id,
            &track_name,
            &strand_name,
            &section_name,
            &subject_name,
            &grade_level,
            &term_id,
            &school_year,
            &term_name,
            &quarter_name,
            &stamp,
            &stamp,
        ],
    )
    .map_err(|e| map_write_err(e, "faculty assignment", "db_insert_failed"))?;

    let assignment = fetch(conn, &id)?;

    // Synthesis failure never fails the assignment write.
    let synthesized = match roster::synthesize_class(conn, &assignment_key(&assignment)) {
        Ok(class) => Some(class.to_json()),
        Err(e) => {
            eprintln!(
                "registrard: auto-class synthesis failed for assignment {}: {}",
                assignment.id, e
            );
            None
        }
    };

    Ok(ok(
        &req.id,
        json!({ "facultyAssignment": to_json(&assignment), "class": synthesized }),
    ))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = get_required_str(&req.params, "facultyAssignmentId")?;
    let old = fetch(conn, &assignment_id)?;

    let subject_name =
        get_opt_str(&req.params, "subjectName").unwrap_or_else(|| old.subject_name.clone());
    let section_name =
        get_opt_str(&req.params, "sectionName").unwrap_or_else(|| old.section_name.clone());
    let quarter_name = match get_opt_str(&req.params, "quarterName") {
        Some(q) => Some(q),
        None => old.quarter_name.clone(),
    };
    let status = match get_opt_str(&req.params, "status") {
        Some(s) => {
            if !validate::is_valid_status(&s) {
                return Err(HandlerErr::bad_params("invalid status"));
            }
            s
        }
        None => old.status.clone(),
    };

    let policy = ConflictPolicy::from_settings(conn);
    match conflict::validate_faculty_assignment(
        conn,
        &old.faculty_id,
        &subject_name,
        &section_name,
        &old.school_year,
        &old.term_name,
        quarter_name.as_deref(),
        Some(&old.id),
        policy,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        Outcome::Conflict(c) => return Err(conflict_err(c)),
        Outcome::Valid | Outcome::FailedOpen => {}
    }

    let stamp = db::now_iso();
    conn.execute(
        "UPDATE faculty_assignments SET subject_name = ?, section_name = ?, quarter_name = ?,
                                        status = ?, updated_at = ?
         WHERE id = ?",
        (
            &subject_name,
            &section_name,
            &quarter_name,
            &status,
            &stamp,
            &assignment_id,
        ),
    )
    .map_err(|e| map_write_err(e, "faculty assignment", "db_update_failed"))?;

    let assignment = fetch(conn, &assignment_id)?;

    // Re-synthesis after an edit is idempotent: an existing class for the
    // tuple is returned as-is, a re-scoped assignment gets a fresh one.
    let synthesized = match roster::synthesize_class(conn, &assignment_key(&assignment)) {
        Ok(class) => Some(class.to_json()),
        Err(e) => {
            eprintln!(
                "registrard: auto-class synthesis failed for assignment {}: {}",
                assignment.id, e
            );
            None
        }
    };

    Ok(ok(
        &req.id,
        json!({ "facultyAssignment": to_json(&assignment), "class": synthesized }),
    ))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = get_required_str(&req.params, "facultyAssignmentId")?;
    let assignment = fetch(conn, &assignment_id)?;

    // Class cleanup is best-effort; the assignment goes away regardless.
    let removed_class = match roster::remove_auto_class(conn, &assignment_key(&assignment)) {
        Ok(n) => n > 0,
        Err(e) => {
            eprintln!(
                "registrard: auto-class cleanup failed for assignment {}: {}",
                assignment.id, e
            );
            false
        }
    };

    conn.execute(
        "DELETE FROM faculty_assignments WHERE id = ?",
        [&assignment.id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;

    Ok(ok(
        &req.id,
        json!({ "ok": true, "removedAutoClass": removed_class }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "facultyAssignments.list" => list(state, req),
        "facultyAssignments.create" => create(state, req),
        "facultyAssignments.update" => update(state, req),
        "facultyAssignments.delete" => delete(state, req),
        "facultyAssignments.bulkStatus" => {
            super::tracks::bulk_status(state, req, "faculty_assignments")
        }
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
