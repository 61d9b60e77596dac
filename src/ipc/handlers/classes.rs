use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

// The class collection is owned by the host application; this surface exists
// so synthesized rosters can be read back and confirmed.

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let faculty_id = get_opt_str(&req.params, "facultyId");

    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match faculty_id.as_ref() {
        Some(f) => (
            "SELECT id, class_id, class_code, class_name, members, faculty_id, section_name,
                    academic_year, term_name, is_auto_created, needs_confirmation
             FROM classes WHERE faculty_id = ? ORDER BY class_name",
            vec![f],
        ),
        None => (
            "SELECT id, class_id, class_code, class_name, members, faculty_id, section_name,
                    academic_year, term_name, is_auto_created, needs_confirmation
             FROM classes ORDER BY class_name",
            vec![],
        ),
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            let id: String = r.get(0)?;
            let class_id: String = r.get(1)?;
            let class_code: String = r.get(2)?;
            let class_name: String = r.get(3)?;
            let members_raw: String = r.get(4)?;
            let faculty_id: String = r.get(5)?;
            let section_name: String = r.get(6)?;
            let academic_year: String = r.get(7)?;
            let term_name: String = r.get(8)?;
            let is_auto_created: i64 = r.get(9)?;
            let needs_confirmation: i64 = r.get(10)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "classCode": class_code,
                "className": class_name,
                "members": serde_json::from_str::<Vec<String>>(&members_raw)
                    .unwrap_or_default(),
                "facultyId": faculty_id,
                "sectionName": section_name,
                "academicYear": academic_year,
                "termName": term_name,
                "isAutoCreated": is_auto_created != 0,
                "needsConfirmation": needs_confirmation != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(ok(&req.id, json!({ "classes": rows })))
}

/// Faculty confirmation clears the pending flag and pins the roster, so a
/// later assignment delete no longer removes the class.
fn confirm(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_row_id = get_required_str(&req.params, "id")?;
    let stamp = db::now_iso();
    let updated = conn
        .execute(
            "UPDATE classes SET needs_confirmation = 0, is_auto_created = 0, updated_at = ?
             WHERE id = ?",
            (&stamp, &class_row_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "classes.list" => list(state, req),
        "classes.confirm" => confirm(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
