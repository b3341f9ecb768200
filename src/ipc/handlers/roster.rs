use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterSnapshot {
    #[serde(default)]
    advisors: Vec<AdvisorRow>,
    #[serde(default)]
    lecturers: Vec<LecturerRow>,
    #[serde(default)]
    students: Vec<StudentRow>,
    #[serde(default)]
    courses: Vec<CourseRow>,
    #[serde(default)]
    enrollments: Vec<EnrollmentRow>,
    #[serde(default)]
    components: Vec<ComponentRow>,
    #[serde(default)]
    marks: Vec<MarkRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisorRow {
    id: Option<String>,
    name: String,
    department: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LecturerRow {
    id: Option<String>,
    name: String,
    staff_no: Option<String>,
    department: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentRow {
    id: Option<String>,
    name: String,
    matric_no: String,
    program: Option<String>,
    year_of_study: Option<i64>,
    advisor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseRow {
    id: Option<String>,
    course_code: String,
    course_name: String,
    credit_hours: i64,
    lecturer_id: Option<String>,
    academic_year: Option<String>,
    semester: Option<String>,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentRow {
    student_id: String,
    course_id: String,
    #[serde(default = "default_enrollment_status")]
    status: String,
    enrollment_date: Option<String>,
}

fn default_enrollment_status() -> String {
    "enrolled".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentRow {
    id: Option<String>,
    course_id: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    max_mark: f64,
    weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkRow {
    student_id: String,
    component_id: String,
    mark: Option<f64>,
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

fn require_ref(
    conn: &Connection,
    sql: &str,
    id: &str,
    section: &str,
    field: &str,
) -> Result<(), HandlerErr> {
    if row_exists(conn, sql, id)? {
        return Ok(());
    }
    Err(HandlerErr::with_details(
        "bad_import",
        format!("{} references unknown {}", section, field),
        json!({ "section": section, field: id }),
    ))
}

fn roster_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let path = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr::new("bad_params", "missing params.path"))?;

    let text = std::fs::read_to_string(&path).map_err(|e| {
        HandlerErr::with_details(
            "bad_import",
            e.to_string(),
            json!({ "path": path.to_string_lossy() }),
        )
    })?;
    let snapshot: RosterSnapshot = serde_json::from_str(&text).map_err(|e| {
        HandlerErr::with_details(
            "bad_import",
            format!("malformed roster snapshot: {}", e),
            json!({ "path": path.to_string_lossy() }),
        )
    })?;

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let result = import_snapshot(&tx, &snapshot, &now);
    match result {
        Ok(counts) => {
            tx.commit()
                .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
            tracing::info!(path = %path.display(), "roster snapshot imported");
            Ok(counts)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

fn import_snapshot(
    tx: &rusqlite::Transaction<'_>,
    snapshot: &RosterSnapshot,
    now: &str,
) -> Result<serde_json::Value, HandlerErr> {
    for a in &snapshot.advisors {
        let id = a.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO advisors(id, name, department) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, department = excluded.department",
            (&id, &a.name, &a.department),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for l in &snapshot.lecturers {
        let id = l.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO lecturers(id, name, staff_no, department) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               staff_no = excluded.staff_no,
               department = excluded.department",
            (&id, &l.name, &l.staff_no, &l.department),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for s in &snapshot.students {
        if let Some(advisor_id) = &s.advisor_id {
            require_ref(
                tx,
                "SELECT 1 FROM advisors WHERE id = ?",
                advisor_id,
                "students",
                "advisorId",
            )?;
        }
        let id = s.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO students(id, name, matric_no, program, year_of_study, advisor_id)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               matric_no = excluded.matric_no,
               program = excluded.program,
               year_of_study = excluded.year_of_study,
               advisor_id = excluded.advisor_id",
            (
                &id,
                &s.name,
                &s.matric_no,
                &s.program,
                &s.year_of_study,
                &s.advisor_id,
            ),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for c in &snapshot.courses {
        if let Some(lecturer_id) = &c.lecturer_id {
            require_ref(
                tx,
                "SELECT 1 FROM lecturers WHERE id = ?",
                lecturer_id,
                "courses",
                "lecturerId",
            )?;
        }
        let id = c.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO courses(id, course_code, course_name, credit_hours, lecturer_id,
                                 academic_year, semester, is_active)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               course_code = excluded.course_code,
               course_name = excluded.course_name,
               credit_hours = excluded.credit_hours,
               lecturer_id = excluded.lecturer_id,
               academic_year = excluded.academic_year,
               semester = excluded.semester,
               is_active = excluded.is_active",
            (
                &id,
                &c.course_code,
                &c.course_name,
                c.credit_hours,
                &c.lecturer_id,
                &c.academic_year,
                &c.semester,
                c.is_active as i64,
            ),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for e in &snapshot.enrollments {
        require_ref(
            tx,
            "SELECT 1 FROM students WHERE id = ?",
            &e.student_id,
            "enrollments",
            "studentId",
        )?;
        require_ref(
            tx,
            "SELECT 1 FROM courses WHERE id = ?",
            &e.course_id,
            "enrollments",
            "courseId",
        )?;
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO enrollments(id, student_id, course_id, status, enrollment_date)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO UPDATE SET
               status = excluded.status,
               enrollment_date = excluded.enrollment_date",
            (&id, &e.student_id, &e.course_id, &e.status, &e.enrollment_date),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for c in &snapshot.components {
        require_ref(
            tx,
            "SELECT 1 FROM courses WHERE id = ?",
            &c.course_id,
            "components",
            "courseId",
        )?;
        let id = c.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO mark_components(id, course_id, name, type, max_mark, weight,
                                         created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               type = excluded.type,
               max_mark = excluded.max_mark,
               weight = excluded.weight,
               updated_at = excluded.updated_at",
            (&id, &c.course_id, &c.name, &c.kind, c.max_mark, c.weight, now, now),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    for m in &snapshot.marks {
        require_ref(
            tx,
            "SELECT 1 FROM students WHERE id = ?",
            &m.student_id,
            "marks",
            "studentId",
        )?;
        require_ref(
            tx,
            "SELECT 1 FROM mark_components WHERE id = ?",
            &m.component_id,
            "marks",
            "componentId",
        )?;
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO student_marks(id, student_id, component_id, mark, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, component_id) DO UPDATE SET
               mark = excluded.mark,
               updated_at = excluded.updated_at",
            (&id, &m.student_id, &m.component_id, m.mark, now, now),
        )
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    Ok(json!({
        "advisors": snapshot.advisors.len(),
        "lecturers": snapshot.lecturers.len(),
        "students": snapshot.students.len(),
        "courses": snapshot.courses.len(),
        "enrollments": snapshot.enrollments.len(),
        "components": snapshot.components.len(),
        "marks": snapshot.marks.len(),
    }))
}

fn handle_roster_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    match roster_import(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.import" => Some(handle_roster_import(state, req)),
        _ => None,
    }
}
