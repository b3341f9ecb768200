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

// Fixture totals for SECJ2154, students ordered by name:
//   Aisyah  stu-1  32.0 (final ungraded)
//   Brandon stu-2  90.0
//   Chong   stu-3  70.0
//   Devi    stu-4  60.0

#[test]
fn class_marks_grid_lists_components_and_rows() {
    let (workspace, mut child, mut stdin, mut reader) = boot_with_fixture("gradebook-class-marks");

    let grid = request(
        &mut stdin,
        &mut reader,
        "1",
        "analytics.classMarks",
        json!({ "courseId": "crs-1" }),
    );
    let grid = result(&grid);

    let components = grid
        .get("components")
        .and_then(|v| v.as_array())
        .expect("components");
    assert_eq!(components.len(), 2);
    assert_eq!(
        components[0].get("name").and_then(|v| v.as_str()),
        Some("Assignment 1")
    );
    assert_eq!(
        components[0].get("weight").and_then(|v| v.as_f64()),
        Some(40.0)
    );
    assert_eq!(
        components[1].get("name").and_then(|v| v.as_str()),
        Some("Final Exam")
    );
    assert_eq!(
        components[1].get("maxMark").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let students = grid
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    let names: Vec<&str> = students
        .iter()
        .map(|s| s.get("name").and_then(|v| v.as_str()).expect("name"))
        .collect();
    assert_eq!(
        names,
        vec!["Aisyah Binti Karim", "Brandon Lee", "Chong Wei Ming", "Devi Nair"]
    );

    let aisyah = &students[0];
    let marks = aisyah.get("marks").expect("marks map");
    assert_eq!(marks.get("cmp-assign").and_then(|v| v.as_f64()), Some(80.0));
    assert!(marks
        .get("cmp-final")
        .map(|v| v.is_null())
        .unwrap_or(false));
    assert_eq!(aisyah.get("totalMark").and_then(|v| v.as_f64()), Some(32.0));
    assert_eq!(aisyah.get("grade").and_then(|v| v.as_str()), Some("D-"));

    let totals: Vec<f64> = students
        .iter()
        .map(|s| s.get("totalMark").and_then(|v| v.as_f64()).expect("total"))
        .collect();
    assert_eq!(totals, vec![32.0, 90.0, 70.0, 60.0]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_analysis_summarizes_average_and_grades() {
    let (workspace, mut child, mut stdin, mut reader) =
        boot_with_fixture("gradebook-class-analysis");

    let analysis = request(
        &mut stdin,
        &mut reader,
        "1",
        "analytics.classAnalysis",
        json!({ "courseId": "crs-1" }),
    );
    let analysis = result(&analysis);

    // (32 + 90 + 70 + 60) / 4
    assert_eq!(
        analysis.get("classAverage").and_then(|v| v.as_f64()),
        Some(63.0)
    );

    let distribution = analysis
        .get("gradeDistribution")
        .expect("gradeDistribution");
    assert_eq!(distribution.get("A+").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(distribution.get("B+").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(distribution.get("B-").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(distribution.get("D-").and_then(|v| v.as_u64()), Some(1));
    assert!(distribution.get("A").is_none());

    let students = analysis
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 4);
    let aisyah = &students[0];
    assert_eq!(
        aisyah.get("gpaPoint").and_then(|v| v.as_f64()),
        Some(0.67)
    );
    assert_eq!(
        aisyah.get("allMarksGiven").and_then(|v| v.as_bool()),
        Some(false)
    );
    let brandon = &students[1];
    assert_eq!(brandon.get("grade").and_then(|v| v.as_str()), Some("A+"));
    assert_eq!(
        brandon.get("allMarksGiven").and_then(|v| v.as_bool()),
        Some(true)
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.classAnalysis",
        json!({ "courseId": "crs-nope" }),
    );
    assert_eq!(err_code(&missing), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
