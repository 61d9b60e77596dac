use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, map_write_err, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn resolve_term(conn: &Connection, term_id: &str) -> Result<(String, String), HandlerErr> {
    conn.query_row(
        "SELECT school_year, term_name FROM terms WHERE id = ?",
        [term_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "term not found"))
}

fn row_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let student_id: Option<String> = r.get(1)?;
    let first_name: Option<String> = r.get(2)?;
    let last_name: Option<String> = r.get(3)?;
    let student_school_id: Option<String> = r.get(4)?;
    let track_name: String = r.get(5)?;
    let strand_name: String = r.get(6)?;
    let section_name: String = r.get(7)?;
    let grade_level: String = r.get(8)?;
    let term_id: String = r.get(9)?;
    let school_year: String = r.get(10)?;
    let term_name: String = r.get(11)?;
    let quarter_name: Option<String> = r.get(12)?;
    let status: String = r.get(13)?;
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "firstName": first_name,
        "lastName": last_name,
        "studentSchoolId": student_school_id,
        "trackName": track_name,
        "strandName": strand_name,
        "sectionName": section_name,
        "gradeLevel": grade_level,
        "termId": term_id,
        "schoolYear": school_year,
        "termName": term_name,
        "quarterName": quarter_name,
        "status": status,
    }))
}

const SELECT_COLS: &str = "SELECT id, student_id, first_name, last_name, student_school_id,
        track_name, strand_name, section_name, grade_level, term_id, school_year,
        term_name, quarter_name, status FROM student_assignments";

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_name = get_opt_str(&req.params, "sectionName");
    let term_id = get_opt_str(&req.params, "termId");
    let school_year = get_opt_str(&req.params, "schoolYear");

    let mut sql = format!("{} WHERE 1=1", SELECT_COLS);
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(s) = section_name.as_ref() {
        sql.push_str(" AND section_name = ?");
        params.push(s);
    }
    if let Some(t) = term_id.as_ref() {
        sql.push_str(" AND term_id = ?");
        params.push(t);
    }
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(&req.id, json!({ "studentAssignments": rows })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_name = get_required_str(&req.params, "trackName")?;
    let strand_name = get_required_str(&req.params, "strandName")?;
    let section_name = get_required_str(&req.params, "sectionName")?;
    let grade_level = get_required_str(&req.params, "gradeLevel")?;
    let term_id = get_required_str(&req.params, "termId")?;
    let quarter_name = get_opt_str(&req.params, "quarterName");
    let status = get_opt_str(&req.params, "status").unwrap_or_else(|| "active".to_string());

    if !validate::is_valid_grade_level(&grade_level) {
        return Err(HandlerErr::bad_params(format!(
            "gradeLevel must be one of: {}",
            validate::GRADE_LEVELS.join(", ")
        )));
    }
    if !validate::is_valid_student_assignment_status(&status) {
        return Err(HandlerErr::bad_params("invalid status"));
    }

    let (school_year, term_name) = resolve_term(conn, &term_id)?;

    // Linked entries reference a user row; manual entries carry the student's
    // name and school id inline.
    let student_id = get_opt_str(&req.params, "studentId");
    let first_name = get_opt_str(&req.params, "firstName");
    let last_name = get_opt_str(&req.params, "lastName");
    let student_school_id = get_opt_str(&req.params, "studentSchoolId");
    if student_id.is_none() && (last_name.is_none() || student_school_id.is_none()) {
        return Err(HandlerErr::bad_params(
            "either studentId or lastName + studentSchoolId is required",
        ));
    }

    if let Some(sid) = student_id.as_ref() {
        if let Some(conflict) = validate::student_assignment_conflict(
            conn,
            sid,
            &school_year,
            &term_name,
            quarter_name.as_deref(),
            None,
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        {
            return Err(HandlerErr::with_details(
                "duplicate_in_scope",
                format!(
                    "student already assigned to section {} in this term",
                    conflict.name
                ),
                json!({ "conflictId": conflict.id }),
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO student_assignments(id, student_id, first_name, last_name,
                                         student_school_id, track_name, strand_name,
                                         section_name, grade_level, term_id, school_year,
                                         term_name, quarter_name, status,
                                         created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &student_id,
            &first_name,
            &last_name,
            &student_school_id,
            &track_name,
            &strand_name,
            &section_name,
            &grade_level,
            &term_id,
            &school_year,
            &term_name,
            &quarter_name,
            &status,
            &stamp,
            &stamp,
        ],
    )
    .map_err(|e| map_write_err(e, "student assignment", "db_insert_failed"))?;

    Ok(ok(&req.id, json!({ "studentAssignmentId": id })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = get_required_str(&req.params, "studentAssignmentId")?;

    let existing: Option<(Option<String>, String, String, Option<String>, String)> = conn
        .query_row(
            "SELECT student_id, school_year, term_name, quarter_name, status
             FROM student_assignments WHERE id = ?",
            [&assignment_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((student_id, school_year, term_name, old_quarter, old_status)) = existing else {
        return Err(HandlerErr::new("not_found", "student assignment not found"));
    };

    let quarter_name = match get_opt_str(&req.params, "quarterName") {
        Some(q) => Some(q),
        None => old_quarter,
    };
    let status = get_opt_str(&req.params, "status").unwrap_or(old_status);
    if !validate::is_valid_student_assignment_status(&status) {
        return Err(HandlerErr::bad_params("invalid status"));
    }

    if let Some(sid) = student_id.as_ref() {
        if let Some(conflict) = validate::student_assignment_conflict(
            conn,
            sid,
            &school_year,
            &term_name,
            quarter_name.as_deref(),
            Some(&assignment_id),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        {
            return Err(HandlerErr::with_details(
                "duplicate_in_scope",
                format!(
                    "student already assigned to section {} in this term",
                    conflict.name
                ),
                json!({ "conflictId": conflict.id }),
            ));
        }
    }

    let stamp = db::now_iso();
    conn.execute(
        "UPDATE student_assignments SET quarter_name = ?, status = ?, updated_at = ?
         WHERE id = ?",
        (&quarter_name, &status, &stamp, &assignment_id),
    )
    .map_err(|e| map_write_err(e, "student assignment", "db_update_failed"))?;

    Ok(ok(&req.id, json!({ "ok": true })))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let assignment_id = get_required_str(&req.params, "studentAssignmentId")?;
    let deleted = conn
        .execute(
            "DELETE FROM student_assignments WHERE id = ?",
            [&assignment_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "student assignment not found"));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "studentAssignments.list" => list(state, req),
        "studentAssignments.create" => create(state, req),
        "studentAssignments.update" => update(state, req),
        "studentAssignments.delete" => delete(state, req),
        "studentAssignments.bulkStatus" => {
            super::tracks::bulk_status(state, req, "student_assignments")
        }
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
