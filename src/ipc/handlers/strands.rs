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

struct StrandRow {
    id: String,
    strand_name: String,
    track_name: String,
    school_year: String,
    term_name: String,
    quarter_name: Option<String>,
    status: String,
}

fn fetch(conn: &Connection, strand_id: &str) -> Result<StrandRow, HandlerErr> {
    conn.query_row(
        "SELECT id, strand_name, track_name, school_year, term_name, quarter_name, status
         FROM strands WHERE id = ?",
        [strand_id],
        |r| {
            Ok(StrandRow {
                id: r.get(0)?,
                strand_name: r.get(1)?,
                track_name: r.get(2)?,
                school_year: r.get(3)?,
                term_name: r.get(4)?,
                quarter_name: r.get(5)?,
                status: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "strand not found"))
}

fn to_json(s: &StrandRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "strandName": s.strand_name,
        "trackName": s.track_name,
        "schoolYear": s.school_year,
        "termName": s.term_name,
        "quarterName": s.quarter_name,
        "status": s.status,
    })
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let track_name = get_opt_str(&req.params, "trackName");
    let school_year = get_opt_str(&req.params, "schoolYear");
    let term_name = get_opt_str(&req.params, "termName");

    let mut sql = String::from(
        "SELECT id, strand_name, track_name, school_year, term_name, quarter_name, status
         FROM strands WHERE 1=1",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(t) = track_name.as_ref() {
        sql.push_str(" AND track_name = ?");
        params.push(t);
    }
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    if let Some(tn) = term_name.as_ref() {
        sql.push_str(" AND term_name = ?");
        params.push(tn);
    }
    sql.push_str(" ORDER BY strand_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(StrandRow {
                id: r.get(0)?,
                strand_name: r.get(1)?,
                track_name: r.get(2)?,
                school_year: r.get(3)?,
                term_name: r.get(4)?,
                quarter_name: r.get(5)?,
                status: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let strands: Vec<serde_json::Value> = rows.iter().map(to_json).collect();
    Ok(ok(&req.id, json!({ "strands": strands })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let strand_name = get_required_str(&req.params, "strandName")?;
    let track_name = get_required_str(&req.params, "trackName")?;
    let school_year = get_required_str(&req.params, "schoolYear")?;
    let term_name = get_required_str(&req.params, "termName")?;
    let quarter_name = get_opt_str(&req.params, "quarterName");

    if let Some(conflict) = validate::strand_conflict(
        conn,
        &strand_name,
        &track_name,
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
                "strand {} already exists under track {}",
                conflict.name, track_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO strands(id, strand_name, track_name, school_year, term_name, quarter_name,
                             status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        (
            &id,
            &strand_name,
            &track_name,
            &school_year,
            &term_name,
            &quarter_name,
            &stamp,
            &stamp,
        ),
    )
    .map_err(|e| map_write_err(e, "strand", "db_insert_failed"))?;

    let strand = fetch(conn, &id)?;
    Ok(ok(&req.id, json!({ "strand": to_json(&strand) })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let strand_id = get_required_str(&req.params, "strandId")?;
    let old = fetch(conn, &strand_id)?;

    let new_name =
        get_opt_str(&req.params, "strandName").unwrap_or_else(|| old.strand_name.clone());
    let track_name =
        get_opt_str(&req.params, "trackName").unwrap_or_else(|| old.track_name.clone());
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

    if let Some(conflict) = validate::strand_conflict(
        conn,
        &new_name,
        &track_name,
        &school_year,
        &term_name,
        quarter_name.as_deref(),
        Some(&old.id),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!(
                "strand {} already exists under track {}",
                conflict.name, track_name
            ),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let stamp = db::now_iso();
    tx.execute(
        "UPDATE strands SET strand_name = ?, track_name = ?, school_year = ?, term_name = ?,
                            quarter_name = ?, status = ?, updated_at = ?
         WHERE id = ?",
        (
            &new_name,
            &track_name,
            &school_year,
            &term_name,
            &quarter_name,
            &status,
            &stamp,
            &strand_id,
        ),
    )
    .map_err(|e| map_write_err(e, "strand", "db_update_failed"))?;

    let counts = cascade::propagate_strand_rename(
        &tx,
        &old.track_name,
        &old.strand_name,
        &new_name,
        &old.school_year,
        &old.term_name,
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let strand = fetch(conn, &strand_id)?;
    Ok(ok(
        &req.id,
        json!({ "strand": to_json(&strand), "cascade": counts.to_json() }),
    ))
}

fn dependencies(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let strand_id = get_required_str(&req.params, "strandId")?;
    let strand = fetch(conn, &strand_id)?;

    let deps = guard::strand_dependencies(
        conn,
        &strand.strand_name,
        &strand.track_name,
        &strand.school_year,
        &strand.term_name,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(
        &req.id,
        json!({
            "strand": to_json(&strand),
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
    let strand_id = get_required_str(&req.params, "strandId")?;
    let confirm = get_bool(&req.params, "confirmCascade");
    let strand = fetch(conn, &strand_id)?;

    let deps = guard::strand_dependencies(
        conn,
        &strand.strand_name,
        &strand.track_name,
        &strand.school_year,
        &strand.term_name,
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let total = deps.total();
    if !confirm && total > 0 {
        return Err(HandlerErr::with_details(
            "dependency_conflict",
            format!(
                "strand {} has {} dependent records; pass confirmCascade to delete them",
                strand.strand_name, total
            ),
            json!({ "dependencyCount": total }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    guard::delete_strand_dependents(
        &tx,
        &strand.strand_name,
        &strand.track_name,
        &strand.school_year,
        &strand.term_name,
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM strands WHERE id = ?", [&strand.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true, "deletedDependents": total })))
}

/// Clones a strand into other quarters of its term scope. Quarters where the
/// strand name already exists are skipped, not overwritten.
fn copy_to_quarters(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let strand_id = get_required_str(&req.params, "strandId")?;
    let Some(targets) = req.params.get("quarterNames").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing quarterNames"));
    };
    let strand = fetch(conn, &strand_id)?;

    let mut created = Vec::new();
    let mut skipped = Vec::new();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for target in targets {
        let Some(quarter_name) = target.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            let _ = tx.rollback();
            return Err(HandlerErr::bad_params("quarterNames must be strings"));
        };
        if !validate::is_valid_quarter_name(quarter_name) {
            let _ = tx.rollback();
            return Err(HandlerErr::bad_params(format!(
                "unknown quarter: {}",
                quarter_name
            )));
        }

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM strands
                 WHERE strand_name = ? AND track_name = ? AND school_year = ? AND term_name = ?
                   AND quarter_name IS ?",
                (
                    &strand.strand_name,
                    &strand.track_name,
                    &strand.school_year,
                    &strand.term_name,
                    quarter_name,
                ),
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        if exists.is_some() {
            skipped.push(quarter_name.to_string());
            continue;
        }

        let id = Uuid::new_v4().to_string();
        let stamp = db::now_iso();
        tx.execute(
            "INSERT INTO strands(id, strand_name, track_name, school_year, term_name,
                                 quarter_name, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, 'active', ?, ?)",
            (
                &id,
                &strand.strand_name,
                &strand.track_name,
                &strand.school_year,
                &strand.term_name,
                quarter_name,
                &stamp,
                &stamp,
            ),
        )
        .map_err(|e| map_write_err(e, "strand", "db_insert_failed"))?;
        created.push(json!({ "strandId": id, "quarterName": quarter_name }));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "created": created, "skipped": skipped })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "strands.list" => list(state, req),
        "strands.create" => create(state, req),
        "strands.update" => update(state, req),
        "strands.dependencies" => dependencies(state, req),
        "strands.delete" => delete(state, req),
        "strands.copyToQuarters" => copy_to_quarters(state, req),
        "strands.bulkStatus" => super::tracks::bulk_status(state, req, "strands"),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
