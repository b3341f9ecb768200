use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response: {}",
        resp
    );
    resp.get("result").expect("result")
}

fn err_code(resp: &serde_json::Value) -> &str {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected an error response: {}",
        resp
    );
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

fn boot_with_fixture(
    prefix: &str,
) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    result(&selected);
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("term_snapshot.json");
    let imported = request(
        &mut stdin,
        &mut reader,
        "seed",
        "roster.import",
        json!({ "path": fixture.to_string_lossy() }),
    );
    result(&imported);
    (workspace, child, stdin, reader)
}

#[test]
fn course_marks_carry_totals_and_grades() {
    let (workspace, mut child, mut stdin, mut reader) = boot_with_fixture("gradebook-course-marks");

    // 80/100 at weight 40 plus an ungraded final: the missing component
    // contributes zero against the full weight.
    let marks = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.courseMarks",
        json!({ "studentId": "stu-1", "courseId": "crs-1" }),
    );
    let marks = result(&marks);
    let rows = marks.get("marks").and_then(|v| v.as_array()).expect("marks");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].get("name").and_then(|v| v.as_str()),
        Some("Assignment 1")
    );
    assert_eq!(rows[0].get("mark").and_then(|v| v.as_f64()), Some(80.0));
    assert_eq!(
        rows[0].get("percentage").and_then(|v| v.as_f64()),
        Some(80.0)
    );
    assert_eq!(
        rows[1].get("name").and_then(|v| v.as_str()),
        Some("Final Exam")
    );
    assert!(rows[1].get("mark").map(|v| v.is_null()).unwrap_or(false));
    assert!(rows[1]
        .get("percentage")
        .map(|v| v.is_null())
        .unwrap_or(false));
    assert_eq!(marks.get("totalMark").and_then(|v| v.as_f64()), Some(32.0));
    assert_eq!(marks.get("grade").and_then(|v| v.as_str()), Some("D-"));
    assert_eq!(marks.get("gpaPoint").and_then(|v| v.as_f64()), Some(0.67));
    assert_eq!(
        marks.get("allMarksGiven").and_then(|v| v.as_bool()),
        Some(false)
    );

    // A single full-weight component carries the total directly.
    let project = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.courseMarks",
        json!({ "studentId": "stu-1", "courseId": "crs-2" }),
    );
    let project = result(&project);
    assert_eq!(
        project.get("totalMark").and_then(|v| v.as_f64()),
        Some(92.0)
    );
    assert_eq!(project.get("grade").and_then(|v| v.as_str()), Some("A+"));
    assert_eq!(project.get("gpaPoint").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(
        project.get("allMarksGiven").and_then(|v| v.as_bool()),
        Some(true)
    );

    let not_enrolled = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.courseMarks",
        json!({ "studentId": "stu-2", "courseId": "crs-2" }),
    );
    assert_eq!(err_code(&not_enrolled), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn gpa_is_credit_weighted_over_enrolled_courses() {
    let (workspace, mut child, mut stdin, mut reader) = boot_with_fixture("gradebook-gpa");

    // stu-1: D- (0.67) over 3 credits plus A+ (4.00) over 4 credits.
    // (0.67*3 + 4.00*4) / 7 = 2.57.
    let gpa = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.gpa",
        json!({ "studentId": "stu-1" }),
    );
    let gpa = result(&gpa);
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(2.57));
    assert_eq!(
        gpa.get("totalCreditHours").and_then(|v| v.as_i64()),
        Some(7)
    );
    let courses = gpa
        .get("coursesEnrolled")
        .and_then(|v| v.as_array())
        .expect("coursesEnrolled");
    assert_eq!(courses.len(), 2);
    assert_eq!(
        courses[0].get("courseCode").and_then(|v| v.as_str()),
        Some("SECJ2154")
    );
    assert_eq!(courses[0].get("grade").and_then(|v| v.as_str()), Some("D-"));
    assert_eq!(
        courses[1].get("courseCode").and_then(|v| v.as_str()),
        Some("SECJ2203")
    );
    assert_eq!(courses[1].get("grade").and_then(|v| v.as_str()), Some("A+"));
    assert_eq!(
        courses[1].get("totalMark").and_then(|v| v.as_f64()),
        Some(92.0)
    );

    // stu-2 carries a single A+ course.
    let gpa = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.gpa",
        json!({ "studentId": "stu-2" }),
    );
    let gpa = result(&gpa);
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(
        gpa.get("totalCreditHours").and_then(|v| v.as_i64()),
        Some(3)
    );

    // No enrollments at all degrades to 0.00, never an error.
    let extension = workspace.join("fresh-student.json");
    std::fs::write(
        &extension,
        json!({
            "students": [
                { "id": "stu-new", "name": "Farid Osman", "matricNo": "A21005" }
            ]
        })
        .to_string(),
    )
    .expect("write extension snapshot");
    let imported = request(
        &mut stdin,
        &mut reader,
        "3",
        "roster.import",
        json!({ "path": extension.to_string_lossy() }),
    );
    result(&imported);
    let gpa = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.gpa",
        json!({ "studentId": "stu-new" }),
    );
    let gpa = result(&gpa);
    assert_eq!(gpa.get("gpa").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(
        gpa.get("totalCreditHours").and_then(|v| v.as_i64()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn progress_summary_splits_enrolled_and_completed() {
    let (workspace, mut child, mut stdin, mut reader) = boot_with_fixture("gradebook-progress");

    let summary = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.progressSummary",
        json!({ "studentId": "stu-1" }),
    );
    let summary = result(&summary);
    assert_eq!(summary.get("totalCourses").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        summary.get("enrolledCourses").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        summary.get("completedCourses").and_then(|v| v.as_i64()),
        Some(0)
    );
    assert_eq!(
        summary.get("currentCreditHours").and_then(|v| v.as_i64()),
        Some(7)
    );
    assert_eq!(
        summary.get("completedCreditHours").and_then(|v| v.as_i64()),
        Some(0)
    );

    // Mark stu-2's second course completed and the splits follow.
    let extension = workspace.join("completed-course.json");
    std::fs::write(
        &extension,
        json!({
            "enrollments": [
                { "studentId": "stu-2", "courseId": "crs-2", "status": "completed" }
            ]
        })
        .to_string(),
    )
    .expect("write extension snapshot");
    let imported = request(
        &mut stdin,
        &mut reader,
        "2",
        "roster.import",
        json!({ "path": extension.to_string_lossy() }),
    );
    result(&imported);

    let summary = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.progressSummary",
        json!({ "studentId": "stu-2" }),
    );
    let summary = result(&summary);
    assert_eq!(summary.get("totalCourses").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        summary.get("enrolledCourses").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        summary.get("completedCourses").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        summary.get("currentCreditHours").and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        summary.get("completedCreditHours").and_then(|v| v.as_i64()),
        Some(4)
    );

    // Completed courses stay out of the GPA view.
    let gpa = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.gpa",
        json!({ "studentId": "stu-2" }),
    );
    let gpa = result(&gpa);
    assert_eq!(
        gpa.get("coursesEnrolled")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(1)
    );
    assert_eq!(
        gpa.get("totalCreditHours").and_then(|v| v.as_i64()),
        Some(3)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
