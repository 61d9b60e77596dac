use crate::db;
use crate::guard;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_bool, get_opt_str, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle;
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct TermRow {
    id: String,
    school_year: String,
    term_name: String,
    start_date: String,
    end_date: String,
    status: String,
}

fn fetch_term(conn: &Connection, term_id: &str) -> Result<TermRow, HandlerErr> {
    conn.query_row(
        "SELECT id, school_year, term_name, start_date, end_date, status
         FROM terms WHERE id = ?",
        [term_id],
        |r| {
            Ok(TermRow {
                id: r.get(0)?,
                school_year: r.get(1)?,
                term_name: r.get(2)?,
                start_date: r.get(3)?,
                end_date: r.get(4)?,
                status: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "term not found"))
}

fn term_json(t: &TermRow) -> serde_json::Value {
    json!({
        "id": t.id,
        "schoolYear": t.school_year,
        "termName": t.term_name,
        "startDate": t.start_date,
        "endDate": t.end_date,
        "status": t.status,
    })
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let school_year = get_opt_str(&req.params, "schoolYear");

    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match school_year.as_ref() {
        Some(sy) => (
            "SELECT id, school_year, term_name, start_date, end_date, status
             FROM terms WHERE school_year = ? ORDER BY rowid",
            vec![sy],
        ),
        None => (
            "SELECT id, school_year, term_name, start_date, end_date, status
             FROM terms ORDER BY school_year, rowid",
            vec![],
        ),
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(params.as_slice(), |r| {
            Ok(TermRow {
                id: r.get(0)?,
                school_year: r.get(1)?,
                term_name: r.get(2)?,
                start_date: r.get(3)?,
                end_date: r.get(4)?,
                status: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let terms: Vec<serde_json::Value> = rows.iter().map(term_json).collect();
    Ok(ok(&req.id, json!({ "terms": terms })))
}

fn create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let school_year_id = get_required_str(&req.params, "schoolYearId")?;
    let start_raw = get_required_str(&req.params, "startDate")?;
    let end_raw = get_required_str(&req.params, "endDate")?;

    let start = validate::parse_date(&start_raw).map_err(HandlerErr::bad_params)?;
    let end = validate::parse_date(&end_raw).map_err(HandlerErr::bad_params)?;
    if end <= start {
        return Err(HandlerErr::bad_params("endDate must be after startDate"));
    }

    let label: Option<(i64, i64)> = conn
        .query_row(
            "SELECT start_year, end_year FROM school_years WHERE id = ?",
            [&school_year_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((start_year, end_year)) = label else {
        return Err(HandlerErr::new("not_found", "school year not found"));
    };
    let school_year = format!("{}-{}", start_year, end_year);

    // The previous term must be archived before the next one opens.
    let still_active = lifecycle::latest_active_term(conn, &school_year)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(name) = still_active {
        return Err(HandlerErr::with_details(
            "bad_params",
            format!("{} is still active; archive it before creating a new term", name),
            json!({ "activeTerm": name }),
        ));
    }

    let offending = validate::overlapping_terms(conn, &school_year, start, end, None)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if !offending.is_empty() {
        return Err(HandlerErr::with_details(
            "bad_params",
            format!("date range overlaps: {}", offending.join(", ")),
            json!({ "overlappingTerms": offending }),
        ));
    }

    let term_name = lifecycle::next_term_name(conn, &school_year)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let id = Uuid::new_v4().to_string();
    let stamp = db::now_iso();
    conn.execute(
        "INSERT INTO terms(id, school_year, term_name, start_date, end_date, status,
                           created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?, ?)",
        (&id, &school_year, &term_name, &start_raw, &end_raw, &stamp, &stamp),
    )
    .map_err(|e| crate::ipc::helpers::map_write_err(e, "term", "db_insert_failed"))?;

    let term = fetch_term(conn, &id)?;
    Ok(ok(&req.id, json!({ "term": term_json(&term) })))
}

fn activate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let term_id = get_required_str(&req.params, "termId")?;
    let term = fetch_term(conn, &term_id)?;
    if term.status == "archived" {
        // Archived terms are terminal; a new sequential term replaces them.
        return Err(HandlerErr::bad_params(
            "archived terms cannot be re-activated; create a new term",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    lifecycle::activate_term(&tx, &term.id, &term.school_year)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true })))
}

fn archive(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let term_id = get_required_str(&req.params, "termId")?;
    let term = fetch_term(conn, &term_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let (students, faculty) = lifecycle::archive_term(&tx, &term.id)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(
        &req.id,
        json!({
            "ok": true,
            "archivedStudentAssignments": students,
            "archivedFacultyAssignments": faculty,
        }),
    ))
}

fn delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let term_id = get_required_str(&req.params, "termId")?;
    let confirm = get_bool(&req.params, "confirmCascade");
    let term = fetch_term(conn, &term_id)?;

    let count_sql = |sql: &str, params: &[&dyn rusqlite::ToSql]| -> Result<i64, HandlerErr> {
        conn.query_row(sql, params, |r| r.get(0))
            .map_err(|e| HandlerErr::db("db_query_failed", e))
    };
    let scope: &[&dyn rusqlite::ToSql] = &[&term.school_year, &term.term_name];
    let taxonomy = count_sql(
        "SELECT
           (SELECT COUNT(*) FROM tracks WHERE school_year = ?1 AND term_name = ?2) +
           (SELECT COUNT(*) FROM strands WHERE school_year = ?1 AND term_name = ?2) +
           (SELECT COUNT(*) FROM sections WHERE school_year = ?1 AND term_name = ?2) +
           (SELECT COUNT(*) FROM subjects WHERE school_year = ?1 AND term_name = ?2)",
        scope,
    )?;
    let assignments = count_sql(
        "SELECT
           (SELECT COUNT(*) FROM student_assignments WHERE term_id = ?1) +
           (SELECT COUNT(*) FROM faculty_assignments WHERE term_id = ?1)",
        &[&term.id],
    )?;
    let total = taxonomy + assignments;

    if !confirm && total > 0 {
        return Err(HandlerErr::with_details(
            "dependency_conflict",
            format!(
                "{} has {} dependent records; pass confirmCascade to delete them",
                term.term_name, total
            ),
            json!({ "dependencyCount": total }),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    guard::delete_term_dependents(&tx, &term.id, &term.school_year, &term.term_name)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM terms WHERE id = ?", [&term.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(ok(&req.id, json!({ "ok": true, "deletedDependents": total })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "terms.list" => list(state, req),
        "terms.create" => create(state, req),
        "terms.activate" => activate(state, req),
        "terms.archive" => archive(state, req),
        "terms.delete" => delete(state, req),
        _ => return None,
    };
    Some(resp.unwrap_or_else(|e| e.response(&req.id)))
}
