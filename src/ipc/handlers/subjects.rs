use crate::cascade;
use crate::db;
use crate::guard;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_bool, get_opt_str, get_required_str, map_write_err, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct SubjectRow {
    id: String,
    subject_name: String,
    track_name: String,
    strand_name: String,
    grade_level: String,
    school_year: String,
    term_name: String,
    quarter_name: Option<String>,
    status: String,
}

fn fetch(conn: &Connection, subject_id: &str) -> Result<SubjectRow, HandlerErr> {
    conn.query_row(
        "SELECT id, subject_name, track_name, strand_name, grade_level, school_year,
                term_name, quarter_name, status
         FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                subject_name: r.get(1)?,
                track_name: r.get(2)?,
                strand_name: r.get(3)?,
                grade_level: r.get(4)?,
                school_year: r.get(5)?,
                term_name: r.get(6)?,
                quarter_name: r.get(7)?,
                status: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "subject not found"))
}

fn to_json(s: &SubjectRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "subjectName": s.subject_name,
        "trackName": s.track_name,
        "strandName": s.strand_name,
        "gradeLevel": s.grade_level,
        "schoolYear": s.school_year,
        "termName": s.term_name,
        "quarterName": s.quarter_name,
        "status": s.status,
    })
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_name = get_opt_str(&req.params, "trackName");
    let strand_name = get_opt_str(&req.params, "strandName");
    let school_year = get_opt_str(&req.params, "schoolYear");
    let term_name = get_opt_str(&req.params, "termName");

    let mut sql = String::from(
        "SELECT id, subject_name, track_name, strand_name, grade_level, school_year,
                term_name, quarter_name, status
         FROM subjects WHERE 1=1",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(t) = track_name.as_ref() {
        sql.push_str(" AND track_name = ?");
        params.push(t);
    }
    if let Some(s) = strand_name.as_ref() {
        sql.push_str(" AND strand_name = ?");
        params.push(s);
    }
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    if let Some(tn) = term_name.as_ref() {
        sql.push_str(" AND term_name = ?");
        params.push(tn);
    }
    sql.push_str(" ORDER BY subject_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                subject_name: r.get(1)?,
                track_name: r.get(2)?,
                strand_name: r.get(3)?,
                grade_level: r.get(4)?,
                school_year: r.get(5)?,
                term_name: r.get(6)?,
                quarter_name: r.get(7)?,
                status: r.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let subjects: Vec<serde_json::Value> = rows.iter().map(to_json).collect();
    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_name = get_required_str(&req.params, "subjectName")?;
    let track_name = get_required_str(&req.params, "trackName")?;
    let strand_name = get_required_str(&req.params, "strandName")?;
    let grade_level = get_required_str(&req.params, "gradeLevel")?;
    let school_year = get_required_str(&req.params, "schoolYear")?;
    let term_name = get_required_str(&req.params, "termName")?;
    let quarter_name = get_opt_str(&req.params, "quarterName");

    if !validate::is_valid_grade_level(&grade_level) {
        return Err(HandlerErr::bad_params(format!(
            "gradeLevel must be one of: {}",
            validate::GRADE_LEVELS.join(", ")
        )));
    }

    if let Some(conflict) = validate::subject_conflict(
        conn,
        &subject_name,
        &track_name,
        &strand_name,
        &grade_level,
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
                "subject {} already exists under {} / {}",
                conflict.name, track_name, strand_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO subjects(id, subject_name, track_name, strand_name, grade_level,
                              school_year, term_name, quarter_name, status,
                              created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        (
            &id,
            &subject_name,
            &track_name,
            &strand_name,
            &grade_level,
            &school_year,
            &term_name,
            &quarter_name,
            &stamp,
            &stamp,
        ),
    )
    .map_err(|e| map_write_err(e, "subject", "db_insert_failed"))?;

    let subject = fetch(conn, &id)?;
    Ok(ok(&req.id, json!({ "subject": to_json(&subject) })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let old = fetch(conn, &subject_id)?;

    let subject_name =
        get_opt_str(&req.params, "subjectName").unwrap_or_else(|| old.subject_name.clone());
    let grade_level =
        get_opt_str(&req.params, "gradeLevel").unwrap_or_else(|| old.grade_level.clone());
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
    if !validate::is_valid_grade_level(&grade_level) {
        return Err(HandlerErr::bad_params(format!(
            "gradeLevel must be one of: {}",
            validate::GRADE_LEVELS.join(", ")
        )));
    }

    if let Some(conflict) = validate::subject_conflict(
        conn,
        &subject_name,
        &old.track_name,
        &old.strand_name,
        &grade_level,
        &old.school_year,
        &old.term_name,
        quarter_name.as_deref(),
        Some(&old.id),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "subject {} already exists under {} / {}",
                conflict.name, old.track_name, old.strand_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let stamp = db::now_iso();
    tx.execute(
        "UPDATE subjects SET subject_name = ?, grade_level = ?, quarter_name = ?, status = ?,
                             updated_at = ?
         WHERE id = ?",
        (
            &subject_name,
            &grade_level,
            &quarter_name,
            &status,
            &stamp,
            &subject_id,
        ),
    )
    .map_err(|e| map_write_err(e, "subject", "db_update_failed"))?;

    let counts = cascade::propagate_subject_rename(
        &tx,
        &old.track_name,
        &old.strand_name,
        &old.subject_name,
        &subject_name,
        &old.school_year,
        &old.term_name,
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let subject = fetch(conn, &subject_id)?;
    Ok(ok(
        &req.id,
        json!({ "subject": to_json(&subject), "cascade": counts.to_json() }),
    ))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let confirm = get_bool(&req.params, "confirmCascade");
    let subject = fetch(conn, &subject_id)?;

    let deps = guard::subject_dependencies(
        conn,
        &subject.subject_name,
        &subject.track_name,
        &subject.strand_name,
        &subject.school_year,
        &subject.term_name,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let total = deps.total();
    if !confirm && total > 0 {
        return Err(HandlerErr::with_details(
            "dependency_conflict",
            format!(
                "subject {} has {} dependent records; pass confirmCascade to delete them",
                subject.subject_name, total
            ),
            json!({ "dependencyCount": total }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM faculty_assignments
         WHERE subject_name = ? AND track_name = ? AND strand_name = ?
           AND school_year = ? AND term_name = ?",
        (
            &subject.subject_name,
            &subject.track_name,
            &subject.strand_name,
            &subject.school_year,
            &subject.term_name,
        ),
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&subject.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true, "deletedDependents": total })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "subjects.list" => list(state, req),
        "subjects.create" => create(state, req),
        "subjects.update" => update(state, req),
        "subjects.delete" => delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
