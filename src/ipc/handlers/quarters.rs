use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, map_write_err, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let school_year = get_opt_str(&req.params, "schoolYear");
    let term_name = get_opt_str(&req.params, "termName");

    let mut sql = String::from(
        "SELECT id, quarter_name, school_year, term_name, start_date, end_date, status
         FROM quarters WHERE 1=1",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(sy) = school_year.as_ref() {
        sql.push_str(" AND school_year = ?");
        params.push(sy);
    }
    if let Some(t) = term_name.as_ref() {
        sql.push_str(" AND term_name = ?");
        params.push(t);
    }
    sql.push_str(" ORDER BY quarter_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            let id: String = r.get(0)?;
            let quarter_name: String = r.get(1)?;
            let school_year: String = r.get(2)?;
            let term_name: String = r.get(3)?;
            let start_date: String = r.get(4)?;
            let end_date: String = r.get(5)?;
            let status: String = r.get(6)?;
            Ok(json!({
                "id": id,
                "quarterName": quarter_name,
                "schoolYear": school_year,
                "termName": term_name,
                "startDate": start_date,
                "endDate": end_date,
                "status": status,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(&req.id, json!({ "quarters": rows })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quarter_name = get_required_str(&req.params, "quarterName")?;
    let school_year = get_required_str(&req.params, "schoolYear")?;
    let term_name = get_required_str(&req.params, "termName")?;
    let start_raw = get_required_str(&req.params, "startDate")?;
    let end_raw = get_required_str(&req.params, "endDate")?;

    if !validate::is_valid_quarter_name(&quarter_name) {
        return Err(HandlerErr::bad_params(format!(
            "quarterName must be one of: {}",
            validate::QUARTER_NAMES.join(", ")
        )));
    }
    if !validate::quarter_belongs_to_term(&quarter_name, &term_name) {
        return Err(HandlerErr::bad_params(format!(
            "{} does not belong to {}",
            quarter_name, term_name
        )));
    }
    let start = validate::parse_date(&start_raw).map_err(HandlerErr::bad_params)?;
    let end = validate::parse_date(&end_raw).map_err(HandlerErr::bad_params)?;
    if end <= start {
        return Err(HandlerErr::bad_params("endDate must be after startDate"));
    }

    if let Some(conflict) =
        validate::quarter_conflict(conn, &quarter_name, &school_year, &term_name, None)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
    {
        return Err(HandlerErr::with_details(
            "duplicate_in_scope",
            format!("{} already exists for {} {}", conflict.name, school_year, term_name),
            json!({ "conflictId": conflict.id }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO quarters(id, quarter_name, school_year, term_name, start_date, end_date,
                              status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        (
            &id,
            &quarter_name,
            &school_year,
            &term_name,
            &start_raw,
            &end_raw,
            &stamp,
            &stamp,
        ),
    )
    .map_err(|e| map_write_err(e, "quarter", "db_insert_failed"))?;

    Ok(ok(&req.id, json!({ "quarterId": id, "quarterName": quarter_name })))
}

fn update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quarter_id = get_required_str(&req.params, "quarterId")?;

    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT start_date, end_date FROM quarters WHERE id = ?",
            [&quarter_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((old_start, old_end)) = existing else {
        return Err(HandlerErr::new("not_found", "quarter not found"));
    };

    let start_raw = get_opt_str(&req.params, "startDate").unwrap_or(old_start);
    let end_raw = get_opt_str(&req.params, "endDate").unwrap_or(old_end);
    let start = validate::parse_date(&start_raw).map_err(HandlerErr::bad_params)?;
    let end = validate::parse_date(&end_raw).map_err(HandlerErr::bad_params)?;
    if end <= start {
        return Err(HandlerErr::bad_params("endDate must be after startDate"));
    }

    let status = get_opt_str(&req.params, "status");
    if let Some(s) = status.as_ref() {
        if !validate::is_valid_status(s) {
            return Err(HandlerErr::bad_params("invalid status"));
        }
    }

    let stamp = db::now_iso();
    match status {
        Some(s) => conn.execute(
            "UPDATE quarters SET start_date = ?, end_date = ?, status = ?, updated_at = ?
             WHERE id = ?",
            (&start_raw, &end_raw, &s, &stamp, &quarter_id),
        ),
        None => conn.execute(
            "UPDATE quarters SET start_date = ?, end_date = ?, updated_at = ? WHERE id = ?",
            (&start_raw, &end_raw, &stamp, &quarter_id),
        ),
    }
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true })))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quarter_id = get_required_str(&req.params, "quarterId")?;
    let deleted = conn
        .execute("DELETE FROM quarters WHERE id = ?", [&quarter_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "quarter not found"));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "quarters.list" => list(state, req),
        "quarters.create" => create(state, req),
        "quarters.update" => update(state, req),
        "quarters.delete" => delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
