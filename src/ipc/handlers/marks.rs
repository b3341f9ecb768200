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

fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn require_lecturer_course(
    conn: &Connection,
    lecturer_id: &str,
    course_id: &str,
) -> Result<(), HandlerErr> {
    let owned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM courses WHERE id = ? AND lecturer_id = ? AND is_active = 1",
            (course_id, lecturer_id),
            |r| r.get(0),
        )
        .optional()?;
    if owned.is_none() {
        return Err(HandlerErr::new(
            "forbidden",
            "lecturer not assigned to this course, or course inactive",
        ));
    }
    Ok(())
}

fn require_enrollment(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<(), HandlerErr> {
    let enrolled: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE student_id = ? AND course_id = ? AND status = 'enrolled'",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    if enrolled.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "student is not enrolled in this course",
        ));
    }
    Ok(())
}

fn resolve_component_max(
    conn: &Connection,
    component_id: &str,
    course_id: &str,
) -> Result<f64, HandlerErr> {
    let max_mark: Option<f64> = conn
        .query_row(
            "SELECT max_mark FROM mark_components WHERE id = ? AND course_id = ?",
            (component_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    max_mark.ok_or_else(|| {
        HandlerErr::new("not_found", "component not found for this course")
    })
}

// Clearing a mark sends null, which is "ungraded", not zero.
fn resolve_new_mark(req: &Request, max_mark: f64) -> Result<Option<f64>, HandlerErr> {
    match req.params.get("mark") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let mark = v.as_f64().ok_or_else(|| {
                HandlerErr::new(
                    "bad_params",
                    format!("mark must be a number between 0 and {}", max_mark),
                )
            })?;
            if mark < 0.0 || mark > max_mark {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    format!("mark must be between 0 and {}", max_mark),
                    json!({ "mark": mark, "maxMark": max_mark }),
                ));
            }
            Ok(Some(mark))
        }
    }
}

fn marks_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let lecturer_id = required_str(req, "lecturerId")?;
    let course_id = required_str(req, "courseId")?;
    let student_id = required_str(req, "studentId")?;
    let component_id = required_str(req, "componentId")?;

    require_lecturer_course(conn, lecturer_id, course_id)?;
    require_enrollment(conn, student_id, course_id)?;
    let max_mark = resolve_component_max(conn, component_id, course_id)?;
    let mark = resolve_new_mark(req, max_mark)?;

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM student_marks WHERE student_id = ? AND component_id = ?",
            (student_id, component_id),
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(mark_id) => {
            conn.execute(
                "UPDATE student_marks SET mark = ?, updated_at = ? WHERE id = ?",
                (mark, &now, &mark_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        None => {
            let mark_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO student_marks(id, student_id, component_id, mark, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&mark_id, student_id, component_id, mark, &now, &now),
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        }
    }

    Ok(json!({
        "studentId": student_id,
        "componentId": component_id,
        "mark": mark
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.update" => marks_update(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
