use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, map_write_err, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 4] = ["student", "faculty", "admin", "principal"];

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let role = get_opt_str(&req.params, "role");

    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match role.as_ref() {
        Some(r) => (
            "SELECT id, user_code, school_id, last_name, first_name, role, is_temporary
             FROM users WHERE role = ? ORDER BY last_name, first_name",
            vec![r],
        ),
        None => (
            "SELECT id, user_code, school_id, last_name, first_name, role, is_temporary
             FROM users ORDER BY last_name, first_name",
            vec![],
        ),
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            let id: String = r.get(0)?;
            let user_code: String = r.get(1)?;
            let school_id: Option<String> = r.get(2)?;
            let last_name: String = r.get(3)?;
            let first_name: String = r.get(4)?;
            let role: String = r.get(5)?;
            let is_temporary: i64 = r.get(6)?;
            Ok(json!({
                "id": id,
                "userCode": user_code,
                "schoolId": school_id,
                "lastName": last_name,
                "firstName": first_name,
                "role": role,
                "isTemporary": is_temporary != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(&req.id, json!({ "users": rows })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let user_code = get_required_str(&req.params, "userCode")?;
    let last_name = get_required_str(&req.params, "lastName")?;
    let first_name = get_required_str(&req.params, "firstName")?;
    let role = get_required_str(&req.params, "role")?;
    let school_id = get_opt_str(&req.params, "schoolId");
    let is_temporary = req
        .params
        .get("isTemporary")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "role must be one of: {}",
            ROLES.join(", ")
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, user_code, school_id, last_name, first_name, role, is_temporary)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &user_code,
            &school_id,
            &last_name,
            &first_name,
            &role,
            is_temporary as i64,
        ],
    )
    .map_err(|e| map_write_err(e, "user", "db_insert_failed"))?;

    Ok(ok(&req.id, json!({ "userId": id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "users.list" => list(state, req),
        "users.create" => create(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
