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

// "assignment" -> "Assignment" for the display name, as the records page
// has always shown it.
fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn format_mark(mark: f64) -> String {
    if mark.fract() == 0.0 {
        format!("{}", mark as i64)
    } else {
        format!("{}", mark)
    }
}

fn format_current_mark(current: Option<f64>, max_mark: f64) -> String {
    match current {
        Some(mark) => format!("{}/{}", format_mark(mark), format_mark(max_mark)),
        None => "N/A".to_string(),
    }
}

/// "YYYY-MM-DD HH:MM:SS" -> "YYYY-MM-DD HH:MM" for list views.
fn minute_precision(ts: &str) -> String {
    ts.get(..16).unwrap_or(ts).to_string()
}

fn remarks_submit(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let course_id = required_str(req, "courseId")?;
    let component_id = required_str(req, "componentId")?;
    let justification = required_str(req, "justification")?;
    if justification.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "justification must not be empty"));
    }

    require_enrollment(conn, student_id, course_id)?;
    let component: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM mark_components WHERE id = ? AND course_id = ?",
            (component_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    if component.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "component not found for this course",
        ));
    }

    // Snapshot the mark as it stands at submission time; it stays on the
    // request even if the live mark changes later.
    let current_mark: Option<f64> = conn
        .query_row(
            "SELECT mark FROM student_marks WHERE student_id = ? AND component_id = ?",
            (student_id, component_id),
            |r| r.get(0),
        )
        .optional()?
        .flatten();

    let remark_id = Uuid::new_v4().to_string();
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO remark_requests(id, student_id, course_id, component_id, current_mark,
                                     justification, status, requested_at)
         VALUES(?, ?, ?, ?, ?, ?, 'pending', ?)",
        (
            &remark_id,
            student_id,
            course_id,
            component_id,
            current_mark,
            justification,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "remarkId": remark_id, "currentMark": current_mark }))
}

fn remarks_list_for_student(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;

    let mut stmt = conn.prepare(
        "SELECT rr.id, rr.course_id, rr.component_id, rr.current_mark, rr.justification,
                rr.status, rr.lecturer_response, rr.requested_at, rr.responded_at,
                c.course_code, c.course_name, mc.name, mc.type, mc.max_mark
         FROM remark_requests rr
         JOIN courses c ON c.id = rr.course_id
         JOIN mark_components mc ON mc.id = rr.component_id
         WHERE rr.student_id = ?
         ORDER BY rr.requested_at DESC",
    )?;
    let requests = stmt
        .query_map([student_id], |r| {
            let id: String = r.get(0)?;
            let course_id: String = r.get(1)?;
            let component_id: String = r.get(2)?;
            let current_mark: Option<f64> = r.get(3)?;
            let justification: String = r.get(4)?;
            let status: String = r.get(5)?;
            let lecturer_response: Option<String> = r.get(6)?;
            let requested_at: String = r.get(7)?;
            let responded_at: Option<String> = r.get(8)?;
            let course_code: String = r.get(9)?;
            let course_name: String = r.get(10)?;
            let component_name: String = r.get(11)?;
            let component_type: String = r.get(12)?;
            let max_mark: f64 = r.get(13)?;
            Ok(json!({
                "id": id,
                "dateSubmitted": minute_precision(&requested_at),
                "course": format!("{} - {}", course_code, course_name),
                "component": format!("{} ({})", component_name, ucfirst(&component_type)),
                "currentMark": format_current_mark(current_mark, max_mark),
                "status": status,
                "responseDate": responded_at.as_deref().map(minute_precision),
                "justification": justification,
                "lecturerResponse": lecturer_response,
                "courseId": course_id,
                "componentId": component_id,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "requests": requests }))
}

fn remarks_list_for_course(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let lecturer_id = required_str(req, "lecturerId")?;
    require_lecturer_course(conn, lecturer_id, course_id)?;

    // Pending first, newest within each status.
    let mut stmt = conn.prepare(
        "SELECT rr.id, s.name, s.matric_no, mc.name, mc.type, mc.max_mark,
                rr.component_id, rr.current_mark, rr.justification, rr.status,
                rr.lecturer_response, rr.requested_at, rr.responded_at
         FROM remark_requests rr
         JOIN students s ON s.id = rr.student_id
         JOIN mark_components mc ON mc.id = rr.component_id
         WHERE rr.course_id = ?
         ORDER BY CASE WHEN rr.status = 'pending' THEN 0 ELSE 1 END, rr.requested_at DESC",
    )?;
    let requests = stmt
        .query_map([course_id], |r| {
            let id: String = r.get(0)?;
            let student_name: String = r.get(1)?;
            let matric_no: String = r.get(2)?;
            let component_name: String = r.get(3)?;
            let component_type: String = r.get(4)?;
            let max_mark: f64 = r.get(5)?;
            let component_id: String = r.get(6)?;
            let current_mark: Option<f64> = r.get(7)?;
            let justification: String = r.get(8)?;
            let status: String = r.get(9)?;
            let lecturer_response: Option<String> = r.get(10)?;
            let requested_at: String = r.get(11)?;
            let responded_at: Option<String> = r.get(12)?;
            Ok(json!({
                "remarkId": id,
                "studentName": student_name,
                "matricNo": matric_no,
                "component": format!("{} ({})", component_name, ucfirst(&component_type)),
                "componentId": component_id,
                "currentMark": format_current_mark(current_mark, max_mark),
                "justification": justification,
                "status": status,
                "lecturerResponse": lecturer_response,
                "requestedAt": requested_at,
                "respondedAt": responded_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "requests": requests }))
}

fn remarks_respond(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let remark_id = required_str(req, "remarkId")?;
    let lecturer_id = required_str(req, "lecturerId")?;
    let status = required_str(req, "status")?;
    let lecturer_response = required_str(req, "lecturerResponse")?;

    if status != "approved" && status != "rejected" {
        return Err(HandlerErr::with_details(
            "bad_params",
            "status must be 'approved' or 'rejected'",
            json!({ "status": status }),
        ));
    }

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT rr.status, rr.course_id
             FROM remark_requests rr
             WHERE rr.id = ?",
            [remark_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((current_status, course_id)) = row else {
        return Err(HandlerErr::new("not_found", "remark request not found"));
    };

    require_lecturer_course(conn, lecturer_id, &course_id)?;

    // Responded requests are immutable.
    if current_status != "pending" {
        return Err(HandlerErr::new(
            "conflict",
            "only pending remark requests can be updated",
        ));
    }

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "UPDATE remark_requests
         SET status = ?, lecturer_response = ?, responded_at = ?
         WHERE id = ?",
        (status, lecturer_response, &now, remark_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "remarkId": remark_id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "remarks.submit" => remarks_submit(state, req),
        "remarks.listForStudent" => remarks_list_for_student(state, req),
        "remarks.listForCourse" => remarks_list_for_course(state, req),
        "remarks.respond" => remarks_respond(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
