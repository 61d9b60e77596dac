use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_bool, get_required_i64, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn row_json(r: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let start_year: i64 = r.get(1)?;
    let end_year: i64 = r.get(2)?;
    let status: String = r.get(3)?;
    Ok(json!({
        "id": id,
        "startYear": start_year,
        "endYear": end_year,
        "label": format!("{}-{}", start_year, end_year),
        "status": status,
    }))
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, start_year, end_year, status FROM school_years
             ORDER BY start_year DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(&req.id, json!({ "schoolYears": rows })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let start_year = get_required_i64(&req.params, "startYear")?;
    let end_year = get_required_i64(&req.params, "endYear")?;
    if end_year <= start_year {
        return Err(HandlerErr::bad_params("endYear must be after startYear"));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    let activate = get_bool(&req.params, "activate");
    conn.execute(
        "INSERT INTO school_years(id, start_year, end_year, status, created_at, updated_at)
         VALUES(?, ?, ?, 'inactive', ?, ?)",
        (&id, start_year, end_year, &stamp, &stamp),
    )
    .map_err(|e| crate::ipc::helpers::map_write_err(e, "school year", "db_insert_failed"))?;

    if activate {
        lifecycle::activate_school_year(conn, &id)
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }

    Ok(ok(
        &req.id,
        json!({
            "schoolYearId": id,
            "label": format!("{}-{}", start_year, end_year),
            "status": if activate { "active" } else { "inactive" },
        }),
    ))
}

fn activate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "schoolYearId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM school_years WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "school year not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    lifecycle::activate_school_year(&tx, &id).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "schoolYears.list" => list(state, req),
        "schoolYears.create" => create(state, req),
        "schoolYears.activate" => activate(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
