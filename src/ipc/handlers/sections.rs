use crate::cascade::{self, SectionIdentity};
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

struct SectionRow {
    id: String,
    section_name: String,
    section_code: String,
    track_name: String,
    strand_name: String,
    grade_level: String,
    school_year: String,
    term_name: String,
    quarter_name: Option<String>,
    status: String,
}

fn fetch(conn: &Connection, section_id: &str) -> Result<SectionRow, HandlerErr> {
    conn.query_row(
        "SELECT id, section_name, section_code, track_name, strand_name, grade_level,
                school_year, term_name, quarter_name, status
         FROM sections WHERE id = ?",
        [section_id],
        |r| {
            Ok(SectionRow {
                id: r.get(0)?,
                section_name: r.get(1)?,
                section_code: r.get(2)?,
                track_name: r.get(3)?,
                strand_name: r.get(4)?,
                grade_level: r.get(5)?,
                school_year: r.get(6)?,
                term_name: r.get(7)?,
                quarter_name: r.get(8)?,
                status: r.get(9)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "section not found"))
}

fn to_json(s: &SectionRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "sectionName": s.section_name,
        "sectionCode": s.section_code,
        "trackName": s.track_name,
        "strandName": s.strand_name,
        "gradeLevel": s.grade_level,
        "schoolYear": s.school_year,
        "termName": s.term_name,
        "quarterName": s.quarter_name,
        "status": s.status,
    })
}

/// Section codes come from the name's initials and are globally unique;
/// collisions take a numeric suffix ("SA", "SA1", "SA2", ...).
fn generate_section_code(conn: &Connection, section_name: &str) -> Result<String, HandlerErr> {
    let base = crate::roster::initials(section_name);
    let mut candidate = base.clone();
    let mut suffix = 0u32;
    loop {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sections WHERE section_code = ?",
                [&candidate],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if taken.is_none() {
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{}{}", base, suffix);
    }
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_name = get_opt_str(&req.params, "trackName");
    let strand_name = get_opt_str(&req.params, "strandName");
    let school_year = get_opt_str(&req.params, "schoolYear");
    let term_name = get_opt_str(&req.params, "termName");

    let mut sql = String::from(
        "SELECT id, section_name, section_code, track_name, strand_name, grade_level,
                school_year, term_name, quarter_name, status
         FROM sections WHERE 1=1",
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
    sql.push_str(" ORDER BY section_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(SectionRow {
                id: r.get(0)?,
                section_name: r.get(1)?,
                section_code: r.get(2)?,
                track_name: r.get(3)?,
                strand_name: r.get(4)?,
                grade_level: r.get(5)?,
                school_year: r.get(6)?,
                term_name: r.get(7)?,
                quarter_name: r.get(8)?,
                status: r.get(9)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let sections: Vec<serde_json::Value> = rows.iter().map(to_json).collect();
    Ok(ok(&req.id, json!({ "sections": sections })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_name = get_required_str(&req.params, "sectionName")?;
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

    if let Some(conflict) = validate::section_conflict(
        conn,
        &section_name,
        &track_name,
        &strand_name,
        &school_year,
        &term_name,
        None,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "section {} already exists under {} / {}",
                conflict.name, track_name, strand_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let section_code = generate_section_code(conn, &section_name)?;
    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO sections(id, section_name, section_code, track_name, strand_name,
                              grade_level, school_year, term_name, quarter_name, status,
                              created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        (
            &id,
            &section_name,
            &section_code,
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
    .map_err(|e| map_write_err(e, "section", "db_insert_failed"))?;

    let section = fetch(conn, &id)?;
    Ok(ok(&req.id, json!({ "section": to_json(&section) })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let old = fetch(conn, &section_id)?;

    let section_name =
        get_opt_str(&req.params, "sectionName").unwrap_or_else(|| old.section_name.clone());
    let track_name =
        get_opt_str(&req.params, "trackName").unwrap_or_else(|| old.track_name.clone());
    let strand_name =
        get_opt_str(&req.params, "strandName").unwrap_or_else(|| old.strand_name.clone());
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

    if let Some(conflict) = validate::section_conflict(
        conn,
        &section_name,
        &track_name,
        &strand_name,
        &old.school_year,
        &old.term_name,
        Some(&old.id),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "section {} already exists under {} / {}",
                conflict.name, track_name, strand_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let stamp = db::now_iso();
    tx.execute(
        "UPDATE sections SET section_name = ?, track_name = ?, strand_name = ?,
                             grade_level = ?, quarter_name = ?, status = ?, updated_at = ?
         WHERE id = ?",
        (
            &section_name,
            &track_name,
            &strand_name,
            &grade_level,
            &quarter_name,
            &status,
            &stamp,
            &section_id,
        ),
    )
    .map_err(|e| map_write_err(e, "section", "db_update_failed"))?;

    // Assignments copy all four identity fields, so any of them changing
    // triggers the rewrite, not just the name.
    let old_identity = SectionIdentity {
        section_name: old.section_name.clone(),
        track_name: old.track_name.clone(),
        strand_name: old.strand_name.clone(),
        grade_level: old.grade_level.clone(),
    };
    let new_identity = SectionIdentity {
        section_name: section_name.clone(),
        track_name: track_name.clone(),
        strand_name: strand_name.clone(),
        grade_level: grade_level.clone(),
    };
    let counts = cascade::propagate_section_update(
        &tx,
        &old_identity,
        &new_identity,
        &old.school_year,
        &old.term_name,
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let section = fetch(conn, &section_id)?;
    Ok(ok(
        &req.id,
        json!({ "section": to_json(&section), "cascade": counts.to_json() }),
    ))
}

fn dependencies(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let section = fetch(conn, &section_id)?;

    let deps = guard::section_dependencies(
        conn,
        &section.section_name,
        &section.track_name,
        &section.strand_name,
        &section.school_year,
        &section.term_name,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(
        &req.id,
        json!({
            "section": to_json(&section),
            "studentAssignments": deps.student_assignments,
            "facultyAssignments": deps.faculty_assignments,
            "totalConnections": deps.total(),
        }),
    ))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let confirm = get_bool(&req.params, "confirmCascade");
    let section = fetch(conn, &section_id)?;

    let deps = guard::section_dependencies(
        conn,
        &section.section_name,
        &section.track_name,
        &section.strand_name,
        &section.school_year,
        &section.term_name,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let total = deps.total();
    if !confirm && total > 0 {
        return Err(HandlerErr::with_details(
            "dependency_conflict",
            format!(
                "section {} has {} dependent records; pass confirmCascade to delete them",
                section.section_name, total
            ),
            json!({ "dependencyCount": total }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    guard::delete_section_dependents(
        &tx,
        &section.section_name,
        &section.track_name,
        &section.strand_name,
        &section.school_year,
        &section.term_name,
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM sections WHERE id = ?", [&section.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true, "deletedDependents": total })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "sections.list" => list(state, req),
        "sections.create" => create(state, req),
        "sections.update" => update(state, req),
        "sections.dependencies" => dependencies(state, req),
        "sections.delete" => delete(state, req),
        "sections.bulkStatus" => super::tracks::bulk_status(state, req, "sections"),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
