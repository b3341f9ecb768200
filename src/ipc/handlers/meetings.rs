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

fn required_i64(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn require_advisee(
    conn: &Connection,
    advisor_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND advisor_id = ?",
            (student_id, advisor_id),
            |r| r.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(HandlerErr::new(
            "not_found",
            "student not found or not under this advisor",
        ));
    }
    Ok(())
}

/// List views show at most 100 characters of the special notes.
fn truncate_notes(notes: &str) -> String {
    if notes.chars().count() > 100 {
        let head: String = notes.chars().take(100).collect();
        format!("{}...", head)
    } else {
        notes.to_string()
    }
}

fn meetings_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let advisor_id = required_str(req, "advisorId")?;
    let student_id = required_str(req, "studentId")?;
    let meeting_date = required_str(req, "meetingDate")?;
    let meeting_duration = required_i64(req, "meetingDuration")?;
    let meeting_type = required_str(req, "meetingType")?;
    let meeting_location = required_str(req, "meetingLocation")?;
    let meeting_summary = required_str(req, "meetingSummary")?;
    let special_notes = optional_str(req, "meetingSpecialNotes");

    require_advisee(conn, advisor_id, student_id)?;

    let meeting_id = Uuid::new_v4().to_string();
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO meeting_notes(id, advisor_id, student_id, meeting_date, meeting_duration,
                                   meeting_type, meeting_location, meeting_summary,
                                   meeting_special_notes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &meeting_id,
            advisor_id,
            student_id,
            meeting_date,
            meeting_duration,
            meeting_type,
            meeting_location,
            meeting_summary,
            special_notes,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "meetingId": meeting_id }))
}

fn meetings_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let advisor_id = required_str(req, "advisorId")?;

    let mut stmt = conn.prepare(
        "SELECT mn.id, mn.meeting_date, mn.meeting_duration, mn.meeting_type,
                mn.meeting_location, mn.meeting_summary, mn.meeting_special_notes,
                mn.created_at, mn.updated_at,
                s.id, s.name, s.matric_no, s.program, s.year_of_study
         FROM meeting_notes mn
         JOIN students s ON s.id = mn.student_id
         WHERE mn.advisor_id = ?
         ORDER BY mn.meeting_date DESC",
    )?;
    let meetings = stmt
        .query_map([advisor_id], |r| {
            let id: String = r.get(0)?;
            let meeting_date: String = r.get(1)?;
            let meeting_duration: Option<i64> = r.get(2)?;
            let meeting_type: String = r.get(3)?;
            let meeting_location: Option<String> = r.get(4)?;
            let meeting_summary: String = r.get(5)?;
            let special_notes: Option<String> = r.get(6)?;
            let created_at: Option<String> = r.get(7)?;
            let updated_at: Option<String> = r.get(8)?;
            let student_id: String = r.get(9)?;
            let student_name: String = r.get(10)?;
            let matric_no: String = r.get(11)?;
            let program: Option<String> = r.get(12)?;
            let year_of_study: Option<i64> = r.get(13)?;
            Ok(json!({
                "meetingId": id,
                "student": {
                    "studentId": student_id,
                    "name": student_name,
                    "matricNo": matric_no,
                    "program": program,
                    "yearOfStudy": year_of_study,
                },
                "meetingDate": meeting_date,
                "meetingDuration": meeting_duration,
                "meetingType": meeting_type,
                "meetingLocation": meeting_location,
                "meetingSummary": meeting_summary,
                "meetingSpecialNotes": special_notes,
                "meetingSpecialNotesTruncated":
                    special_notes.as_deref().map(truncate_notes),
                "createdAt": created_at,
                "updatedAt": updated_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "meetings": meetings }))
}

fn meetings_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let meeting_id = required_str(req, "meetingId")?;
    let advisor_id = required_str(req, "advisorId")?;
    let student_id = required_str(req, "studentId")?;
    let meeting_date = required_str(req, "meetingDate")?;
    let meeting_duration = required_i64(req, "meetingDuration")?;
    let meeting_type = required_str(req, "meetingType")?;
    let meeting_location = required_str(req, "meetingLocation")?;
    let meeting_summary = required_str(req, "meetingSummary")?;
    let special_notes = optional_str(req, "meetingSpecialNotes");

    require_advisee(conn, advisor_id, student_id)?;

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let changed = conn
        .execute(
            "UPDATE meeting_notes
             SET student_id = ?, meeting_date = ?, meeting_duration = ?, meeting_type = ?,
                 meeting_location = ?, meeting_summary = ?, meeting_special_notes = ?,
                 updated_at = ?
             WHERE id = ? AND advisor_id = ?",
            (
                student_id,
                meeting_date,
                meeting_duration,
                meeting_type,
                meeting_location,
                meeting_summary,
                special_notes,
                &now,
                meeting_id,
                advisor_id,
            ),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    if changed == 0 {
        return Err(HandlerErr::new(
            "not_found",
            "meeting note not found for this advisor",
        ));
    }
    Ok(json!({ "meetingId": meeting_id }))
}

fn meetings_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let meeting_id = required_str(req, "meetingId")?;
    let advisor_id = required_str(req, "advisorId")?;

    let deleted = conn
        .execute(
            "DELETE FROM meeting_notes WHERE id = ? AND advisor_id = ?",
            (meeting_id, advisor_id),
        )
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;

    if deleted == 0 {
        return Err(HandlerErr::new(
            "not_found",
            "meeting note not found for this advisor",
        ));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "meetings.create" => meetings_create(state, req),
        "meetings.list" => meetings_list(state, req),
        "meetings.update" => meetings_update(state, req),
        "meetings.delete" => meetings_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
