use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn required_f64(req: &Request, key: &str) -> Result<f64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn require_course(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "course not found"));
    }
    Ok(())
}

fn validate_component_fields(name: &str, max_mark: f64, weight: f64) -> Result<(), HandlerErr> {
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    if max_mark <= 0.0 {
        return Err(HandlerErr::with_details(
            "bad_params",
            "maxMark must be greater than 0",
            json!({ "maxMark": max_mark }),
        ));
    }
    if weight < 0.0 {
        return Err(HandlerErr::with_details(
            "bad_params",
            "weight must not be negative",
            json!({ "weight": weight }),
        ));
    }
    Ok(())
}

fn components_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    require_course(conn, course_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, name, type, max_mark, weight
         FROM mark_components
         WHERE course_id = ?
         ORDER BY name",
    )?;
    let components = stmt
        .query_map([course_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let kind: String = r.get(2)?;
            let max_mark: f64 = r.get(3)?;
            let weight: f64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "type": kind,
                "maxMark": max_mark,
                "weight": weight
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "components": components }))
}

fn components_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let name = required_str(req, "name")?.trim().to_string();
    let kind = required_str(req, "type")?.to_string();
    let max_mark = required_f64(req, "maxMark")?;
    let weight = required_f64(req, "weight")?;

    require_course(conn, course_id)?;
    validate_component_fields(&name, max_mark, weight)?;

    let component_id = Uuid::new_v4().to_string();
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO mark_components(id, course_id, name, type, max_mark, weight,
                                     created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (&component_id, course_id, &name, &kind, max_mark, weight, &now, &now),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "componentId": component_id }))
}

fn components_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let component_id = required_str(req, "componentId")?;
    let name = required_str(req, "name")?.trim().to_string();
    let kind = required_str(req, "type")?.to_string();
    let max_mark = required_f64(req, "maxMark")?;
    let weight = required_f64(req, "weight")?;

    validate_component_fields(&name, max_mark, weight)?;

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let changed = conn
        .execute(
            "UPDATE mark_components
             SET name = ?, type = ?, max_mark = ?, weight = ?, updated_at = ?
             WHERE course_id = ? AND id = ?",
            (&name, &kind, max_mark, weight, &now, course_id, component_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    if changed == 0 {
        return Err(HandlerErr::new(
            "not_found",
            "component not found for this course",
        ));
    }
    Ok(json!({ "componentId": component_id }))
}

fn components_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let component_id = required_str(req, "componentId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM mark_components WHERE course_id = ? AND id = ?",
            (course_id, component_id),
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "component not found for this course",
        ));
    }

    // Deletion is unrestricted even when scored marks or remark requests
    // reference the component; dependents go first (no ON DELETE CASCADE).
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let steps = [
        ("student_marks", "DELETE FROM student_marks WHERE component_id = ?"),
        ("remark_requests", "DELETE FROM remark_requests WHERE component_id = ?"),
        ("mark_components", "DELETE FROM mark_components WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [component_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": table }),
            ));
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "components.list" => components_list(state, req),
        "components.create" => components_create(state, req),
        "components.update" => components_update(state, req),
        "components.delete" => components_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
