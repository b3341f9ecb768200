use crate::calc;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct ComponentRow {
    id: String,
    name: String,
    kind: String,
    max_mark: f64,
    weight: f64,
}

struct CohortStudent {
    id: String,
    name: String,
    matric_no: String,
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

fn load_cohort(conn: &Connection, course_id: &str) -> Result<Vec<CohortStudent>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.matric_no
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ? AND e.status = 'enrolled'
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(CohortStudent {
                id: r.get(0)?,
                name: r.get(1)?,
                matric_no: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// (student id, component id) -> mark for every mark row in the course.
/// Absent pairs are ungraded.
fn load_cohort_marks(
    conn: &Connection,
    course_id: &str,
) -> Result<HashMap<(String, String), Option<f64>>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT sm.student_id, sm.component_id, sm.mark
         FROM student_marks sm
         JOIN mark_components mc ON mc.id = sm.component_id
         WHERE mc.course_id = ?",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            let student_id: String = r.get(0)?;
            let component_id: String = r.get(1)?;
            let mark: Option<f64> = r.get(2)?;
            Ok(((student_id, component_id), mark))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows.into_iter().collect())
}

fn mark_of(
    marks: &HashMap<(String, String), Option<f64>>,
    student_id: &str,
    component_id: &str,
) -> Option<f64> {
    marks
        .get(&(student_id.to_string(), component_id.to_string()))
        .copied()
        .flatten()
}

fn student_total(
    components: &[ComponentRow],
    marks: &HashMap<(String, String), Option<f64>>,
    student_id: &str,
) -> calc::CourseTotal {
    let parts: Vec<calc::WeightedPart> = components
        .iter()
        .map(|c| calc::WeightedPart {
            contribution: calc::normalize_mark(mark_of(marks, student_id, &c.id), c.max_mark),
            weight: c.weight,
        })
        .collect();
    calc::course_total(&parts)
}

fn analytics_class_marks(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    require_course(conn, course_id)?;

    let components = load_components(conn, course_id)?;
    let cohort = load_cohort(conn, course_id)?;
    let marks = load_cohort_marks(conn, course_id)?;

    let header: Vec<serde_json::Value> = components
        .iter()
        .map(|c| {
            json!({
                "componentId": c.id,
                "name": c.name,
                "type": c.kind,
                "maxMark": c.max_mark,
                "weight": c.weight,
            })
        })
        .collect();

    let rows: Vec<serde_json::Value> = cohort
        .iter()
        .map(|s| {
            let per_component: serde_json::Map<String, serde_json::Value> = components
                .iter()
                .map(|c| (c.id.clone(), json!(mark_of(&marks, &s.id, &c.id))))
                .collect();
            let total = student_total(&components, &marks, &s.id);
            json!({
                "studentId": s.id,
                "name": s.name,
                "matricNo": s.matric_no,
                "marks": per_component,
                "totalMark": total.total_mark,
                "grade": calc::Grade::from_total(total.total_mark).as_str(),
            })
        })
        .collect();

    Ok(json!({ "components": header, "students": rows }))
}

fn analytics_class_analysis(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    require_course(conn, course_id)?;

    let components = load_components(conn, course_id)?;
    let cohort = load_cohort(conn, course_id)?;
    let marks = load_cohort_marks(conn, course_id)?;

    let mut totals = Vec::with_capacity(cohort.len());
    let mut grade_distribution: HashMap<&'static str, usize> = HashMap::new();
    let rows: Vec<serde_json::Value> = cohort
        .iter()
        .map(|s| {
            let total = student_total(&components, &marks, &s.id);
            let grade = calc::Grade::from_total(total.total_mark);
            totals.push(total.total_mark);
            *grade_distribution.entry(grade.as_str()).or_insert(0) += 1;
            json!({
                "studentId": s.id,
                "name": s.name,
                "matricNo": s.matric_no,
                "totalMark": total.total_mark,
                "grade": grade.as_str(),
                "gpaPoint": grade.gpa_point(),
                "allMarksGiven": total.all_marks_given,
            })
        })
        .collect();

    let class_average = if totals.is_empty() {
        0.0
    } else {
        calc::round1(totals.iter().sum::<f64>() / totals.len() as f64)
    };

    Ok(json!({
        "students": rows,
        "classAverage": class_average,
        "gradeDistribution": grade_distribution,
    }))
}

fn analytics_ranking(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let student_id = required_str(req, "studentId")?;
    require_course(conn, course_id)?;

    let components = load_components(conn, course_id)?;
    let cohort = load_cohort(conn, course_id)?;
    let marks = load_cohort_marks(conn, course_id)?;

    let cohort_totals: Vec<calc::CohortTotal> = cohort
        .iter()
        .map(|s| calc::CohortTotal {
            student_id: s.id.clone(),
            total_mark: student_total(&components, &marks, &s.id).total_mark,
        })
        .collect();

    let ordered = calc::rank_cohort(&cohort_totals);
    let summary = calc::ranking_summary(&ordered, student_id)
        .ok_or_else(|| HandlerErr::new("not_found", "student is not enrolled in this course"))?;

    let totals: Vec<f64> = ordered.iter().map(|r| r.total_mark).collect();
    let distribution = calc::distribution_bands(&totals);

    // Anonymized list: fresh opaque refs, no names or matric numbers.
    let rankings: Vec<serde_json::Value> = ordered
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            json!({
                "rank": idx + 1,
                "ref": Uuid::new_v4().to_string(),
                "totalMark": row.total_mark,
                "grade": calc::Grade::from_total(row.total_mark).as_str(),
                "isCurrentStudent": row.student_id == student_id,
            })
        })
        .collect();

    let grade = calc::Grade::from_total(summary.total_mark);
    Ok(json!({
        "position": summary.position,
        "positionText": summary.position_text,
        "totalStudents": summary.total_students,
        "aboveCount": summary.above_count,
        "belowCount": summary.below_count,
        "percentile": summary.percentile,
        "totalMark": summary.total_mark,
        "grade": grade.as_str(),
        "distribution": distribution,
        "rankings": rankings,
    }))
}

fn analytics_component_stats(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let course_id = required_str(req, "courseId")?;
    let student_id = required_str(req, "studentId")?;
    require_course(conn, course_id)?;

    let components = load_components(conn, course_id)?;
    let cohort = load_cohort(conn, course_id)?;
    if !cohort.iter().any(|s| s.id == student_id) {
        return Err(HandlerErr::new(
            "not_found",
            "student is not enrolled in this course",
        ));
    }
    let marks = load_cohort_marks(conn, course_id)?;

    // Class averages exclude ungraded students from the denominator; this
    // is intentionally not the course-total rule.
    let component_rows: Vec<serde_json::Value> = components
        .iter()
        .map(|c| {
            let cohort_marks: Vec<Option<f64>> = cohort
                .iter()
                .map(|s| mark_of(&marks, &s.id, &c.id))
                .collect();
            let average = calc::component_average(&cohort_marks);
            let student_mark = mark_of(&marks, student_id, &c.id);
            json!({
                "componentId": c.id,
                "name": c.name,
                "type": c.kind,
                "maxMark": c.max_mark,
                "weight": c.weight,
                "classAverageMark": average.map(|a| a.average_mark),
                "classAveragePercentage": average.and_then(|a| a.average_percentage(c.max_mark)),
                "studentMark": student_mark,
                "studentPercentage": calc::percentage_of_max(student_mark, c.max_mark),
            })
        })
        .collect();

    // The comparison view uses the renormalized rule: weights rescale to
    // the graded subset, so a half-graded student is not dragged to zero.
    let comparison: Vec<serde_json::Value> = cohort
        .iter()
        .map(|s| {
            let parts: Vec<(Option<f64>, f64)> = components
                .iter()
                .map(|c| {
                    (
                        calc::percentage_of_max(mark_of(&marks, &s.id, &c.id), c.max_mark),
                        c.weight,
                    )
                })
                .collect();
            let per_component: serde_json::Map<String, serde_json::Value> = components
                .iter()
                .map(|c| {
                    (
                        c.id.clone(),
                        json!(calc::percentage_of_max(
                            mark_of(&marks, &s.id, &c.id),
                            c.max_mark
                        )),
                    )
                })
                .collect();
            json!({
                "ref": Uuid::new_v4().to_string(),
                "isCurrentStudent": s.id == student_id,
                "overallPercentage": calc::renormalized_average(&parts),
                "componentPercentages": per_component,
            })
        })
        .collect();

    Ok(json!({
        "components": component_rows,
        "comparison": comparison,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "analytics.classMarks" => analytics_class_marks(state, req),
        "analytics.classAnalysis" => analytics_class_analysis(state, req),
        "analytics.ranking" => analytics_ranking(state, req),
        "analytics.componentStats" => analytics_component_stats(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
