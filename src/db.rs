use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "registrar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates the full schema idempotently. Taxonomy and assignment name columns
/// are COLLATE NOCASE so the compound unique indexes enforce the
/// case-insensitive scope rules even when a pre-check loses a race.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            start_year INTEGER NOT NULL,
            end_year INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'inactive',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(start_year, end_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(school_year, term_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_school_year ON terms(school_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quarters(
            id TEXT PRIMARY KEY,
            quarter_name TEXT NOT NULL COLLATE NOCASE,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(school_year, term_name, quarter_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracks(
            id TEXT PRIMARY KEY,
            track_name TEXT NOT NULL COLLATE NOCASE,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(track_name, school_year, term_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracks_scope ON tracks(school_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS strands(
            id TEXT PRIMARY KEY,
            strand_name TEXT NOT NULL COLLATE NOCASE,
            track_name TEXT NOT NULL COLLATE NOCASE,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    // NULL quarters must still collide, so the unique index coalesces them.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_strands_scope
         ON strands(strand_name, track_name, school_year, term_name,
                    COALESCE(quarter_name, '') COLLATE NOCASE)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_strands_track ON strands(track_name, school_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            section_name TEXT NOT NULL COLLATE NOCASE,
            section_code TEXT NOT NULL UNIQUE,
            track_name TEXT NOT NULL COLLATE NOCASE,
            strand_name TEXT NOT NULL COLLATE NOCASE,
            grade_level TEXT NOT NULL,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(section_name, track_name, strand_name, school_year, term_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_strand
         ON sections(track_name, strand_name, school_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL COLLATE NOCASE,
            track_name TEXT NOT NULL COLLATE NOCASE,
            strand_name TEXT NOT NULL COLLATE NOCASE,
            grade_level TEXT NOT NULL,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_subjects_scope
         ON subjects(subject_name, track_name, strand_name, grade_level,
                     term_name, school_year, COALESCE(quarter_name, '') COLLATE NOCASE)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_strand
         ON subjects(track_name, strand_name, school_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_assignments(
            id TEXT PRIMARY KEY,
            student_id TEXT,
            first_name TEXT,
            last_name TEXT,
            student_school_id TEXT,
            track_name TEXT NOT NULL COLLATE NOCASE,
            strand_name TEXT NOT NULL COLLATE NOCASE,
            section_name TEXT NOT NULL COLLATE NOCASE,
            grade_level TEXT NOT NULL,
            term_id TEXT NOT NULL,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(student_id, track_name, strand_name, section_name,
                   school_year, term_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_section
         ON student_assignments(section_name, term_id, school_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_assignments_term ON student_assignments(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_assignments(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            track_name TEXT NOT NULL COLLATE NOCASE,
            strand_name TEXT NOT NULL COLLATE NOCASE,
            section_name TEXT NOT NULL COLLATE NOCASE,
            subject_name TEXT NOT NULL COLLATE NOCASE,
            grade_level TEXT NOT NULL,
            term_id TEXT NOT NULL,
            school_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            quarter_name TEXT COLLATE NOCASE,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_faculty_assignments_scope
         ON faculty_assignments(faculty_id, track_name, strand_name, section_name,
                                subject_name, school_year, term_name,
                                COALESCE(quarter_name, '') COLLATE NOCASE)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faculty_assignments_term ON faculty_assignments(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_faculty_assignments_faculty
         ON faculty_assignments(faculty_id, school_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            user_code TEXT NOT NULL UNIQUE,
            school_id TEXT,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            role TEXT NOT NULL,
            is_temporary INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_school_id ON users(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            class_code TEXT NOT NULL,
            class_name TEXT NOT NULL COLLATE NOCASE,
            members TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            section_name TEXT NOT NULL COLLATE NOCASE,
            academic_year TEXT NOT NULL,
            term_name TEXT NOT NULL COLLATE NOCASE,
            is_auto_created INTEGER NOT NULL DEFAULT 0,
            needs_confirmation INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_faculty
         ON classes(faculty_id, academic_year, term_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Existing workspaces may predate these columns. Add if needed.
    ensure_users_is_temporary(conn)?;
    ensure_classes_needs_confirmation(conn)?;

    // Early workspaces stored "no quarter" as an empty string, which made the
    // scoped unique indexes treat '' and NULL as distinct scopes.
    migrate_empty_quarter_names(conn)?;

    Ok(())
}

fn ensure_users_is_temporary(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "is_temporary")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE users ADD COLUMN is_temporary INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Backfill from the TEMP user-code convention used before the flag existed.
    conn.execute(
        "UPDATE users SET is_temporary = 1 WHERE user_code LIKE 'TEMP%'",
        [],
    )?;
    Ok(())
}

fn ensure_classes_needs_confirmation(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "needs_confirmation")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN needs_confirmation INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute(
        "UPDATE classes SET needs_confirmation = 1 WHERE is_auto_created = 1",
        [],
    )?;
    Ok(())
}

fn migrate_empty_quarter_names(conn: &Connection) -> anyhow::Result<()> {
    for table in [
        "tracks",
        "strands",
        "sections",
        "subjects",
        "student_assignments",
        "faculty_assignments",
    ] {
        let sql = format!(
            "UPDATE {} SET quarter_name = NULL WHERE quarter_name = ''",
            table
        );
        conn.execute(&sql, [])?;
    }
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// True when the failure is a unique-index violation. The scoped-uniqueness
/// pre-checks are a UX layer; this is the authoritative guard on insert.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
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
