use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::students::gpa_block;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

struct AdviseeInfo {
    id: String,
    name: String,
    matric_no: String,
    program: Option<String>,
    year_of_study: Option<i64>,
}

fn require_advisee(
    conn: &Connection,
    advisor_id: &str,
    student_id: &str,
) -> Result<AdviseeInfo, HandlerErr> {
    let info: Option<AdviseeInfo> = conn
        .query_row(
            "SELECT id, name, matric_no, program, year_of_study
             FROM students
             WHERE id = ? AND advisor_id = ?",
            (student_id, advisor_id),
            |r| {
                Ok(AdviseeInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    matric_no: r.get(2)?,
                    program: r.get(3)?,
                    year_of_study: r.get(4)?,
                })
            },
        )
        .optional()?;
    info.ok_or_else(|| {
        HandlerErr::new("not_found", "student not found or not under this advisor")
    })
}

fn student_info_json(info: &AdviseeInfo) -> serde_json::Value {
    json!({
        "studentId": info.id,
        "name": info.name,
        "matricNo": info.matric_no,
        "program": info.program,
        "yearOfStudy": info.year_of_study,
    })
}

fn advisors_advisees(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let advisor_id = required_str(req, "advisorId")?;

    let mut stmt = conn.prepare(
        "SELECT id, name, matric_no FROM students WHERE advisor_id = ? ORDER BY name",
    )?;
    let advisees = stmt
        .query_map([advisor_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let matric_no: String = r.get(2)?;
            Ok(json!({
                "studentId": id,
                "name": name,
                "matricNo": matric_no,
                "displayName": format!("{} ({})", name, matric_no),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "advisees": advisees }))
}

fn advisors_advisee_gpa(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let advisor_id = required_str(req, "advisorId")?;
    let student_id = required_str(req, "studentId")?;

    let info = require_advisee(conn, advisor_id, student_id)?;
    let mut result = gpa_block(conn, student_id)?;
    result["student"] = student_info_json(&info);
    Ok(result)
}

fn advisors_consultation_report(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let advisor_id = required_str(req, "advisorId")?;
    let student_id = required_str(req, "studentId")?;

    let info = require_advisee(conn, advisor_id, student_id)?;

    let mut courses_stmt = conn.prepare(
        "SELECT c.course_code, c.course_name, c.credit_hours
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ? AND e.status = 'enrolled'
         ORDER BY c.course_code",
    )?;
    let enrolled_courses = courses_stmt
        .query_map([student_id], |r| {
            let course_code: String = r.get(0)?;
            let course_name: String = r.get(1)?;
            let credit_hours: i64 = r.get(2)?;
            Ok(json!({
                "courseCode": course_code,
                "courseName": course_name,
                "creditHours": credit_hours,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut meetings_stmt = conn.prepare(
        "SELECT id, meeting_date, meeting_duration, meeting_type, meeting_location,
                meeting_summary, meeting_special_notes
         FROM meeting_notes
         WHERE advisor_id = ? AND student_id = ?
         ORDER BY meeting_date DESC",
    )?;
    let mut physical = 0_usize;
    let mut video_call = 0_usize;
    let mut phone_call = 0_usize;
    let meetings = meetings_stmt
        .query_map((advisor_id, student_id), |r| {
            let id: String = r.get(0)?;
            let meeting_date: String = r.get(1)?;
            let meeting_duration: Option<i64> = r.get(2)?;
            let meeting_type: String = r.get(3)?;
            let meeting_location: Option<String> = r.get(4)?;
            let meeting_summary: String = r.get(5)?;
            let special_notes: Option<String> = r.get(6)?;
            Ok((
                meeting_type.clone(),
                json!({
                    "meetingId": id,
                    "meetingDate": meeting_date,
                    "meetingDuration": meeting_duration,
                    "meetingType": meeting_type,
                    "meetingLocation": meeting_location,
                    "meetingSummary": meeting_summary,
                    "meetingSpecialNotes": special_notes,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?
        .into_iter()
        .map(|(meeting_type, row)| {
            // Free-form type; only the three known buckets are tallied.
            match meeting_type.as_str() {
                "Physical" => physical += 1,
                "Video Call" => video_call += 1,
                "Phone Call" => phone_call += 1,
                _ => {}
            }
            row
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "studentInfo": student_info_json(&info),
        "enrolledCourses": enrolled_courses,
        "totalMeetings": meetings.len(),
        "meetingsSummary": {
            "physical": physical,
            "videoCall": video_call,
            "phoneCall": phone_call,
        },
        "meetings": meetings,
        "generatedAt": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "advisors.advisees" => advisors_advisees(state, req),
        "advisors.adviseeGpa" => advisors_advisee_gpa(state, req),
        "advisors.consultationReport" => advisors_consultation_report(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
