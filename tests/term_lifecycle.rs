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
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
}

impl Harness {
    fn start(workspace: &PathBuf) -> Self {
        let (child, stdin, reader) = spawn_sidecar();
        let mut h = Harness {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        h.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        h
    }

    fn raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        raw_request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.raw(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "request failed: {}",
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn create_school_year(h: &mut Harness, start: i64, end: i64) -> String {
    let sy = h.ok(
        "schoolYears.create",
        json!({ "startYear": start, "endYear": end }),
    );
    sy.get("schoolYearId")
        .and_then(|v| v.as_str())
        .expect("schoolYearId")
        .to_string()
}

#[test]
fn creating_a_term_while_the_last_one_is_active_is_rejected() {
    let workspace = temp_dir("registrar-term-active");
    let mut h = Harness::start(&workspace);
    let sy_id = create_school_year(&mut h, 2024, 2025);

    h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );

    let rejected = h.raw(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2025-01-06",
            "endDate": "2025-05-30"
        }),
    );
    assert_eq!(rejected.get("ok").and_then(|v| v.as_bool()), Some(false));
    let message = rejected
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert!(message.contains("Term 1"), "message was: {}", message);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn archived_terms_are_terminal_and_stop_blocking_new_ranges() {
    let workspace = temp_dir("registrar-term-overlap");
    let mut h = Harness::start(&workspace);
    let sy_id = create_school_year(&mut h, 2024, 2025);

    let term = h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );
    let term_id = term
        .get("term")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_str())
        .expect("term id")
        .to_string();
    h.ok("terms.archive", json!({ "termId": term_id }));

    // archived terms cannot be revived; the next sequential term replaces them
    let revived = h.raw("terms.activate", json!({ "termId": term_id }));
    assert_eq!(revived.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        revived
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    // the archived range no longer counts against new terms, even overlapping
    let overlapping = h.raw(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-11-01",
            "endDate": "2025-03-30"
        }),
    );
    assert_eq!(overlapping.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        overlapping
            .get("result")
            .and_then(|r| r.get("term"))
            .and_then(|t| t.get("termName"))
            .and_then(|v| v.as_str()),
        Some("Term 2")
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn activation_demotes_sibling_terms() {
    let workspace = temp_dir("registrar-term-exclusive");
    let mut h = Harness::start(&workspace);
    let sy_id = create_school_year(&mut h, 2024, 2025);

    let term1 = h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );
    let term1_id = term1
        .get("term")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_str())
        .expect("term id")
        .to_string();
    h.ok("terms.archive", json!({ "termId": term1_id }));
    h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2025-01-06",
            "endDate": "2025-05-30"
        }),
    );

    let terms = h.ok("terms.list", json!({ "schoolYear": "2024-2025" }));
    let rows = terms.get("terms").and_then(|v| v.as_array()).expect("terms");
    let active: Vec<&str> = rows
        .iter()
        .filter(|t| t.get("status").and_then(|v| v.as_str()) == Some("active"))
        .filter_map(|t| t.get("termName").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(active, vec!["Term 2"]);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn archiving_a_term_cascades_status_to_its_assignments() {
    let workspace = temp_dir("registrar-term-archive");
    let mut h = Harness::start(&workspace);
    let sy_id = create_school_year(&mut h, 2024, 2025);

    let term = h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );
    let term_id = term
        .get("term")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_str())
        .expect("term id")
        .to_string();

    h.ok(
        "studentAssignments.create",
        json!({
            "studentSchoolId": "2024-0001",
            "lastName": "Reyes",
            "firstName": "Ana",
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "gradeLevel": "Grade 11",
            "termId": term_id
        }),
    );
    h.ok(
        "facultyAssignments.create",
        json!({
            "facultyId": "FAC-001",
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "subjectName": "General Math",
            "gradeLevel": "Grade 11",
            "termId": term_id
        }),
    );

    let archived = h.ok("terms.archive", json!({ "termId": term_id }));
    assert_eq!(
        archived
            .get("archivedStudentAssignments")
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        archived
            .get("archivedFacultyAssignments")
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    let rows = h.ok("studentAssignments.list", json!({ "termId": term_id }));
    let statuses: Vec<&str> = rows
        .get("studentAssignments")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .filter_map(|r| r.get("status").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(statuses, vec!["archived"]);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn one_active_school_year_system_wide() {
    let workspace = temp_dir("registrar-sy-exclusive");
    let mut h = Harness::start(&workspace);

    let first = h.ok(
        "schoolYears.create",
        json!({ "startYear": 2023, "endYear": 2024, "activate": true }),
    );
    let first_id = first
        .get("schoolYearId")
        .and_then(|v| v.as_str())
        .expect("schoolYearId")
        .to_string();
    let second = h.ok(
        "schoolYears.create",
        json!({ "startYear": 2024, "endYear": 2025, "activate": true }),
    );
    let _ = second;

    let years = h.ok("schoolYears.list", json!({}));
    let rows = years
        .get("schoolYears")
        .and_then(|v| v.as_array())
        .expect("schoolYears");
    let active: Vec<&str> = rows
        .iter()
        .filter(|y| y.get("status").and_then(|v| v.as_str()) == Some("active"))
        .filter_map(|y| y.get("label").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(active, vec!["2024-2025"]);

    // promoting the old one back flips the invariant, never widens it
    h.ok("schoolYears.activate", json!({ "schoolYearId": first_id }));
    let years = h.ok("schoolYears.list", json!({}));
    let active_count = years
        .get("schoolYears")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter(|y| y.get("status").and_then(|v| v.as_str()) == Some("active"))
                .count()
        })
        .unwrap_or(0);
    assert_eq!(active_count, 1);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_year_bounds_and_dates_are_rejected() {
    let workspace = temp_dir("registrar-term-validate");
    let mut h = Harness::start(&workspace);

    let bad_year = h.raw(
        "schoolYears.create",
        json!({ "startYear": 2025, "endYear": 2025 }),
    );
    assert_eq!(bad_year.get("ok").and_then(|v| v.as_bool()), Some(false));

    let sy_id = {
        let sy = h.ok(
            "schoolYears.create",
            json!({ "startYear": 2024, "endYear": 2025 }),
        );
        sy.get("schoolYearId")
            .and_then(|v| v.as_str())
            .expect("schoolYearId")
            .to_string()
    };
    let bad_dates = h.raw(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-12-20",
            "endDate": "2024-08-01"
        }),
    );
    assert_eq!(bad_dates.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad_dates
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
