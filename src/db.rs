use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS advisors(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            staff_no TEXT,
            department TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            matric_no TEXT NOT NULL,
            program TEXT,
            year_of_study INTEGER,
            advisor_id TEXT,
            FOREIGN KEY(advisor_id) REFERENCES advisors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_advisor ON students(advisor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            credit_hours INTEGER NOT NULL,
            lecturer_id TEXT,
            academic_year TEXT,
            semester TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id)
        )",
        [],
    )?;
    ensure_courses_term_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_lecturer ON courses(lecturer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            status TEXT NOT NULL,
            enrollment_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mark_components(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            max_mark REAL NOT NULL,
            weight REAL NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mark_components_course ON mark_components(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            mark REAL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(component_id) REFERENCES mark_components(id),
            UNIQUE(student_id, component_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_marks_student ON student_marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_marks_component ON student_marks(component_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS remark_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            current_mark REAL,
            justification TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            lecturer_response TEXT,
            requested_at TEXT NOT NULL,
            responded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(component_id) REFERENCES mark_components(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_remark_requests_student ON remark_requests(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_remark_requests_course ON remark_requests(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_notes(
            id TEXT PRIMARY KEY,
            advisor_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            meeting_date TEXT NOT NULL,
            meeting_duration INTEGER,
            meeting_type TEXT NOT NULL,
            meeting_location TEXT,
            meeting_summary TEXT NOT NULL,
            meeting_special_notes TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(advisor_id) REFERENCES advisors(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_meeting_notes_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meeting_notes_advisor ON meeting_notes(advisor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meeting_notes_student ON meeting_notes(student_id)",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before term metadata existed lack these columns.
fn ensure_courses_term_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "courses", "academic_year")? {
        conn.execute("ALTER TABLE courses ADD COLUMN academic_year TEXT", [])?;
    }
    if !table_has_column(conn, "courses", "semester")? {
        conn.execute("ALTER TABLE courses ADD COLUMN semester TEXT", [])?;
    }
    Ok(())
}

fn ensure_meeting_notes_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "meeting_notes", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE meeting_notes ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
