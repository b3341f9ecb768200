use crate::calc;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct ComponentRow {
    id: String,
    name: String,
    kind: String,
    max_mark: f64,
    weight: f64,
}

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

fn load_components(conn: &Connection, course_id: &str) -> Result<Vec<ComponentRow>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, type, max_mark, weight
         FROM mark_components
         WHERE course_id = ?
         ORDER BY type, name",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(ComponentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                kind: r.get(2)?,
                max_mark: r.get(3)?,
                weight: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// Map of component id -> mark. A component with no row stays absent,
/// which reads back the same as a NULL mark: ungraded.
fn load_marks(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<HashMap<String, Option<f64>>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT sm.component_id, sm.mark
         FROM student_marks sm
         JOIN mark_components mc ON mc.id = sm.component_id
         WHERE sm.student_id = ? AND mc.course_id = ?",
    )?;
    let rows = stmt
        .query_map((student_id, course_id), |r| {
            let component_id: String = r.get(0)?;
            let mark: Option<f64> = r.get(1)?;
            Ok((component_id, mark))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows.into_iter().collect())
}

fn course_result(
    components: &[ComponentRow],
    marks: &HashMap<String, Option<f64>>,
) -> calc::CourseTotal {
    let parts: Vec<calc::WeightedPart> = components
        .iter()
        .map(|c| calc::WeightedPart {
            contribution: calc::normalize_mark(marks.get(&c.id).copied().flatten(), c.max_mark),
            weight: c.weight,
        })
        .collect();
    calc::course_total(&parts)
}

fn students_course_marks(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let course_id = required_str(req, "courseId")?;

    require_enrollment(conn, student_id, course_id)?;
    let components = load_components(conn, course_id)?;
    let marks = load_marks(conn, student_id, course_id)?;

    let rows: Vec<serde_json::Value> = components
        .iter()
        .map(|c| {
            let mark = marks.get(&c.id).copied().flatten();
            json!({
                "componentId": c.id,
                "name": c.name,
                "type": c.kind,
                "maxMark": c.max_mark,
                "weight": c.weight,
                "mark": mark,
                "percentage": calc::percentage_of_max(mark, c.max_mark),
            })
        })
        .collect();

    let total = course_result(&components, &marks);
    let grade = calc::Grade::from_total(total.total_mark);

    Ok(json!({
        "marks": rows,
        "totalMark": total.total_mark,
        "grade": grade.as_str(),
        "gpaPoint": grade.gpa_point(),
        "allMarksGiven": total.all_marks_given,
    }))
}

fn students_progress_summary(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;

    let (total, enrolled, completed, current_credits, completed_credits) = conn.query_row(
        "SELECT
            COUNT(DISTINCT c.id),
            COUNT(DISTINCT CASE WHEN e.status = 'enrolled' THEN c.id END),
            COUNT(DISTINCT CASE WHEN e.status = 'completed' THEN c.id END),
            COALESCE(SUM(CASE WHEN e.status = 'enrolled' THEN c.credit_hours ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN e.status = 'completed' THEN c.credit_hours ELSE 0 END), 0)
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ? AND c.is_active = 1",
        [student_id],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        },
    )?;

    Ok(json!({
        "totalCourses": total,
        "enrolledCourses": enrolled,
        "completedCourses": completed,
        "currentCreditHours": current_credits,
        "completedCreditHours": completed_credits,
    }))
}

struct EnrolledCourse {
    id: String,
    course_code: String,
    course_name: String,
    credit_hours: i64,
}

fn load_enrolled_courses(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<EnrolledCourse>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.course_code, c.course_name, c.credit_hours
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         WHERE e.student_id = ? AND e.status = 'enrolled' AND c.is_active = 1
         ORDER BY c.course_code",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(EnrolledCourse {
                id: r.get(0)?,
                course_code: r.get(1)?,
                course_name: r.get(2)?,
                credit_hours: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// GPA block shared with the advisor surface: each enrolled course's total
/// feeds the classifier, then credit-weighted averaging (zero credit hours
/// degrade to 0.00, never an error).
pub fn gpa_block(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let courses = load_enrolled_courses(conn, student_id)?;

    let mut per_course = Vec::with_capacity(courses.len());
    let mut points = Vec::with_capacity(courses.len());
    let mut total_credits = 0_i64;
    for course in &courses {
        let components = load_components(conn, &course.id)?;
        let marks = load_marks(conn, student_id, &course.id)?;
        let total = course_result(&components, &marks);
        let grade = calc::Grade::from_total(total.total_mark);

        total_credits += course.credit_hours;
        points.push((grade.gpa_point(), course.credit_hours as f64));
        per_course.push(json!({
            "courseCode": course.course_code,
            "courseName": course.course_name,
            "creditHours": course.credit_hours,
            "totalMark": total.total_mark,
            "grade": grade.as_str(),
            "gpaPoint": grade.gpa_point(),
        }));
    }

    Ok(json!({
        "gpa": calc::student_gpa(&points),
        "totalCreditHours": total_credits,
        "coursesEnrolled": per_course,
    }))
}

fn students_gpa(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    gpa_block(conn, student_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.courseMarks" => students_course_marks(state, req),
        "students.progressSummary" => students_progress_summary(state, req),
        "students.gpa" => students_gpa(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
