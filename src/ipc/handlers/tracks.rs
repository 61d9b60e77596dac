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

struct TrackRow {
    id: String,
    track_name: String,
    school_year: String,
    term_name: String,
    quarter_name: Option<String>,
    status: String,
}

fn fetch(conn: &Connection, track_id: &str) -> Result<TrackRow, HandlerErr> {
    conn.query_row(
        "SELECT id, track_name, school_year, term_name, quarter_name, status
         FROM tracks WHERE id = ?",
        [track_id],
        |r| {
            Ok(TrackRow {
                id: r.get(0)?,
                track_name: r.get(1)?,
                school_year: r.get(2)?,
                term_name: r.get(3)?,
                quarter_name: r.get(4)?,
                status: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "track not found"))
}

fn to_json(t: &TrackRow) -> serde_json::Value {
    json!({
        "id": t.id,
        "trackName": t.track_name,
        "schoolYear": t.school_year,
        "termName": t.term_name,
        "quarterName": t.quarter_name,
        "status": t.status,
    })
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let term_name = get_opt_str(&req.params, "termName");
    let term_id = get_opt_str(&req.params, "termId");
    let school_year = get_opt_str(&req.params, "schoolYear");

    // Listing by termId resolves through the terms table; tracks themselves
    // are keyed by the copied scope names.
    let resolved_scope = match term_id {
        Some(tid) => {
            let found: Option<(String, String)> = conn
                .query_row(
                    "SELECT school_year, term_name FROM terms WHERE id = ?",
                    [&tid],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            let Some((sy, tn)) = found else {
                return Err(HandlerErr::new("not_found", "term not found"));
            };
            Some((Some(sy), Some(tn)))
        }
        None => None,
    };
    let (school_year, term_name) = match resolved_scope {
        Some((sy, tn)) => (sy, tn),
        None => (school_year, term_name),
    };

    let mut sql = String::from(
        "SELECT id, track_name, school_year, term_name, quarter_name, status
         FROM tracks WHERE 1=1",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    if let Some(tn) = term_name.as_ref() {
        sql.push_str(" AND term_name = ?");
        params.push(tn);
    }
    sql.push_str(" ORDER BY track_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(TrackRow {
                id: r.get(0)?,
                track_name: r.get(1)?,
                school_year: r.get(2)?,
                term_name: r.get(3)?,
                quarter_name: r.get(4)?,
                status: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let tracks: Vec<serde_json::Value> = rows.iter().map(to_json).collect();
    Ok(ok(&req.id, json!({ "tracks": tracks })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_name = get_required_str(&req.params, "trackName")?;
    let school_year = get_required_str(&req.params, "schoolYear")?;
    let term_name = get_required_str(&req.params, "termName")?;
    let quarter_name = get_opt_str(&req.params, "quarterName");

    if let Some(conflict) =
        validate::track_conflict(conn, &track_name, &school_year, &term_name, None)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "track {} already exists for {} {}",
                conflict.name, school_year, term_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO tracks(id, track_name, school_year, term_name, quarter_name, status,
                            created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?, ?)",
        (&id, &track_name, &school_year, &term_name, &quarter_name, &stamp, &stamp),
    )
    .map_err(|e| map_write_err(e, "track", "db_insert_failed"))?;

    let track = fetch(conn, &id)?;
    Ok(ok(&req.id, json!({ "track": to_json(&track) })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_id = get_required_str(&req.params, "trackId")?;
    let old = fetch(conn, &track_id)?;

    let new_name = get_opt_str(&req.params, "trackName").unwrap_or_else(|| old.track_name.clone());
    let school_year =
        get_opt_str(&req.params, "schoolYear").unwrap_or_else(|| old.school_year.clone());
    let term_name = get_opt_str(&req.params, "termName").unwrap_or_else(|| old.term_name.clone());
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

    if let Some(conflict) =
        validate::track_conflict(conn, &new_name, &school_year, &term_name, Some(&old.id))
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "track {} already exists for {} {}",
                conflict.name, school_year, term_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let stamp = db::now_iso();
    tx.execute(
        "UPDATE tracks SET track_name = ?, school_year = ?, term_name = ?, quarter_name = ?,
                           status = ?, updated_at = ?
         WHERE id = ?",
        (
            &new_name,
            &school_year,
            &term_name,
            &quarter_name,
            &status,
            &stamp,
            &track_id,
        ),
    )
    .map_err(|e| map_write_err(e, "track", "db_update_failed"))?;

    // Dependents copied the old name within the old scope; rewrite them in
    // the same transaction so the rename can never commit half-applied.
    let counts = cascade::propagate_track_rename(
        &tx,
        &old.track_name,
        &new_name,
        &old.school_year,
        &old.term_name,
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let track = fetch(conn, &track_id)?;
    Ok(ok(
        &req.id,
        json!({ "track": to_json(&track), "cascade": counts.to_json() }),
    ))
}

fn dependencies(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_id = get_required_str(&req.params, "trackId")?;
    let track = fetch(conn, &track_id)?;

    let deps = guard::track_dependencies(conn, &track.track_name, &track.school_year, &track.term_name)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(
        &req.id,
        json!({
            "track": to_json(&track),
            "strands": deps.strands,
            "sections": deps.sections,
            "subjects": deps.subjects,
            "studentAssignments": deps.student_assignments,
            "facultyAssignments": deps.faculty_assignments,
            "totalConnections": deps.total(),
        }),
    ))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_id = get_required_str(&req.params, "trackId")?;
    let confirm = get_bool(&req.params, "confirmCascade");
    let track = fetch(conn, &track_id)?;

    let deps = guard::track_dependencies(conn, &track.track_name, &track.school_year, &track.term_name)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let total = deps.total();
    if !confirm && total > 0 {
        return Err(HandlerErr::with_details(
            "dependency_conflict",
            format!(
                "track {} has {} dependent records; pass confirmCascade to delete them",
                track.track_name, total
            ),
            json!({ "dependencyCount": total }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    guard::delete_track_dependents(&tx, &track.track_name, &track.school_year, &track.term_name)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM tracks WHERE id = ?", [&track.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true, "deletedDependents": total })))
}

pub fn bulk_status(
    state: &AppState,
    req: &Request,
    table: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quarter_name = get_required_str(&req.params, "quarterName")?;
    let school_year = get_required_str(&req.params, "schoolYear")?;
    let status = get_required_str(&req.params, "status")?;
    let valid = if table == "student_assignments" {
        validate::is_valid_student_assignment_status(&status)
    } else {
        validate::is_valid_status(&status)
    };
    if !valid {
        return Err(HandlerErr::bad_params("invalid status"));
    }

    let stamp = db::now_iso();
    let sql = format!(
        "UPDATE {} SET status = ?, updated_at = ? WHERE quarter_name = ? AND school_year = ?",
        table
    );
    let modified = conn
        .execute(&sql, (&status, &stamp, &quarter_name, &school_year))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(ok(&req.id, json!({ "modifiedCount": modified })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "tracks.list" => list(state, req),
        "tracks.create" => create(state, req),
        "tracks.update" => update(state, req),
        "tracks.dependencies" => dependencies(state, req),
        "tracks.delete" => delete(state, req),
        "tracks.bulkStatus" => bulk_status(state, req, "tracks"),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
