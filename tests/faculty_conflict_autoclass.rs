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

fn seed_term(h: &mut Harness) -> String {
    let sy = h.ok(
        "schoolYears.create",
        json!({ "startYear": 2024, "endYear": 2025, "activate": true }),
    );
    let sy_id = sy
        .get("schoolYearId")
        .and_then(|v| v.as_str())
        .expect("schoolYearId")
        .to_string();
    let term = h.ok(
        "terms.create",
        json!({
            "schoolYearId": sy_id,
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );
    term.get("term")
        .and_then(|t| t.get("id"))
        .and_then(|v| v.as_str())
        .expect("term id")
        .to_string()
}

fn faculty_assignment_params(term_id: &str, quarter: &str) -> serde_json::Value {
    json!({
        "facultyId": "FAC-001",
        "trackName": "STEM",
        "strandName": "STEM-A",
        "sectionName": "S1",
        "subjectName": "General Math",
        "gradeLevel": "Grade 11",
        "termId": term_id,
        "quarterName": quarter
    })
}

#[test]
fn same_subject_section_quarter_conflicts_and_names_the_faculty() {
    let workspace = temp_dir("registrar-conflict");
    let mut h = Harness::start(&workspace);
    let term_id = seed_term(&mut h);

    h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );

    let rejected = h.raw(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );
    assert_eq!(rejected.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = rejected.get("error").expect("error object");
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("assignment_conflict")
    );
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("facultyId"))
            .and_then(|v| v.as_str()),
        Some("FAC-001")
    );

    // the same pairing in the next quarter is allowed
    h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 2"),
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn differing_track_copies_do_not_hide_the_conflict() {
    let workspace = temp_dir("registrar-conflict-track");
    let mut h = Harness::start(&workspace);
    let term_id = seed_term(&mut h);

    h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );

    // same faculty, subject, section, quarter, but a different track/strand
    let mut params = faculty_assignment_params(&term_id, "Quarter 1");
    params["trackName"] = json!("TVL");
    params["strandName"] = json!("ICT");
    let rejected = h.raw("facultyAssignments.create", params);
    assert_eq!(rejected.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        rejected
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("assignment_conflict")
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn synthesized_roster_deduplicates_both_identity_paths() {
    let workspace = temp_dir("registrar-autoclass-roster");
    let mut h = Harness::start(&workspace);
    let term_id = seed_term(&mut h);

    for (code, school_id, last) in [
        ("STU-001", "2024-0001", "Reyes"),
        ("STU-002", "2024-0002", "Cruz"),
    ] {
        h.ok(
            "users.create",
            json!({
                "userCode": code,
                "schoolId": school_id,
                "lastName": last,
                "firstName": "Kid",
                "role": "student"
            }),
        );
    }
    // a temporary account that must never appear in a roster
    h.ok(
        "users.create",
        json!({
            "userCode": "TEMP-003",
            "schoolId": "2024-0003",
            "lastName": "Diaz",
            "firstName": "Temp",
            "role": "student",
            "isTemporary": true
        }),
    );
    let users = h.ok("users.list", json!({ "role": "student" }));
    let linked_id = users
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|a| {
            a.iter().find(|u| {
                u.get("schoolId").and_then(|v| v.as_str()) == Some("2024-0001")
            })
        })
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .expect("linked user id")
        .to_string();

    // two by raw school id, one linked row duplicating the first student,
    // and one temp account
    for (i, params) in [
        json!({
            "studentSchoolId": "2024-0001",
            "lastName": "Reyes",
            "firstName": "Kid",
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "gradeLevel": "Grade 11",
            "termId": term_id
        }),
        json!({
            "studentSchoolId": "2024-0002",
            "lastName": "Cruz",
            "firstName": "Kid",
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "gradeLevel": "Grade 11",
            "termId": term_id,
            "quarterName": "Quarter 1"
        }),
        json!({
            "studentId": linked_id,
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "gradeLevel": "Grade 11",
            "termId": term_id,
            "quarterName": "Quarter 2",
            "status": "pending"
        }),
        json!({
            "studentSchoolId": "2024-0003",
            "lastName": "Diaz",
            "firstName": "Temp",
            "trackName": "STEM",
            "strandName": "STEM-A",
            "sectionName": "S1",
            "gradeLevel": "Grade 11",
            "termId": term_id,
            "quarterName": "Quarter 1"
        }),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = h.raw("studentAssignments.create", params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "assignment {} failed: {}",
            i,
            resp
        );
    }

    let created = h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );
    let class = created.get("class").expect("synthesized class");
    assert_eq!(class.get("created").and_then(|v| v.as_bool()), Some(true));
    let members = class
        .get("members")
        .and_then(|v| v.as_array())
        .expect("members");
    let mut ids: Vec<&str> = members.iter().filter_map(|m| m.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["2024-0001", "2024-0002"]);

    let code = class
        .get("classCode")
        .and_then(|v| v.as_str())
        .expect("classCode");
    assert!(code.starts_with("GM-S-25-"), "unexpected code {}", code);

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn synthesis_is_idempotent_and_delete_removes_the_auto_class() {
    let workspace = temp_dir("registrar-autoclass-idem");
    let mut h = Harness::start(&workspace);
    let term_id = seed_term(&mut h);

    let first = h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );
    let first_class_id = first
        .get("class")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();
    let fa1 = first
        .get("facultyAssignment")
        .and_then(|a| a.get("id"))
        .and_then(|v| v.as_str())
        .expect("assignment id")
        .to_string();

    // a second assignment for the same identity tuple in another quarter
    // reuses the class instead of duplicating it
    let second = h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 2"),
    );
    let second_class = second.get("class").expect("class");
    assert_eq!(
        second_class.get("created").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        second_class.get("id").and_then(|v| v.as_str()),
        Some(first_class_id.as_str())
    );

    let classes = h.ok("classes.list", json!({ "facultyId": "FAC-001" }));
    assert_eq!(
        classes
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let deleted = h.ok(
        "facultyAssignments.delete",
        json!({ "facultyAssignmentId": fa1 }),
    );
    assert_eq!(
        deleted.get("removedAutoClass").and_then(|v| v.as_bool()),
        Some(true)
    );
    let classes = h.ok("classes.list", json!({ "facultyId": "FAC-001" }));
    assert_eq!(
        classes
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn confirmed_classes_survive_assignment_deletion() {
    let workspace = temp_dir("registrar-autoclass-confirm");
    let mut h = Harness::start(&workspace);
    let term_id = seed_term(&mut h);

    let created = h.ok(
        "facultyAssignments.create",
        faculty_assignment_params(&term_id, "Quarter 1"),
    );
    let class_id = created
        .get("class")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();
    let fa_id = created
        .get("facultyAssignment")
        .and_then(|a| a.get("id"))
        .and_then(|v| v.as_str())
        .expect("assignment id")
        .to_string();

    h.ok("classes.confirm", json!({ "id": class_id }));
    let deleted = h.ok(
        "facultyAssignments.delete",
        json!({ "facultyAssignmentId": fa_id }),
    );
    assert_eq!(
        deleted.get("removedAutoClass").and_then(|v| v.as_bool()),
        Some(false)
    );
    let classes = h.ok("classes.list", json!({ "facultyId": "FAC-001" }));
    assert_eq!(
        classes
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    h.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
