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
    let exe = env!("CARGO_BIN_EXE_reviewdeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reviewdeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn seed_group(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed",
        "roster.importGroups",
        json!({
            "groups": [{
                "groupId": "BIA-02",
                "projectTitle": "Crop Disease Classifier",
                "guideName": "Prof Meera Joshi",
                "members": [
                    { "rollNo": "B1", "studentName": "Ravi Patil" },
                    { "rollNo": "B2", "studentName": "Sara Dsouza" }
                ]
            }]
        }),
    );
}

#[test]
fn absence_locks_cells_and_toggling_back_restores_editable_empty_state() {
    let workspace = temp_dir("reviewdesk-absence");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "grid.open",
        json!({ "groupId": "BIA-02", "reviewNo": 3 }),
    );
    let generation = opened.get("generation").and_then(|v| v.as_u64()).expect("generation");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "grid.setCell",
        json!({
            "generation": generation,
            "rollNo": "B2",
            "criteriaId": "testing_coverage",
            "value": 8
        }),
    );

    // Marking absent forces the row and zeroes the total.
    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "abs",
        "grid.setAttendance",
        json!({ "generation": generation, "rollNo": "B2", "present": false }),
    );
    assert_eq!(toggled.get("total").and_then(|v| v.as_f64()), Some(0.0));
    let cells = toggled.get("cells").and_then(|v| v.as_array()).expect("cells");
    for cell in cells {
        assert_eq!(cell.get("locked").and_then(|v| v.as_bool()), Some(true));
        let criteria_id = cell.get("criteriaId").and_then(|v| v.as_str()).unwrap();
        let expected = if criteria_id == "test_report_submitted" { "N" } else { "0" };
        assert_eq!(cell.get("value").and_then(|v| v.as_str()), Some(expected));
    }

    // The flag persisted immediately, ahead of any marks save.
    let members = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "members.list",
        json!({ "groupId": "BIA-02", "reviewNo": 3 }),
    );
    let b2 = members
        .get("members")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|m| m.get("rollNo").and_then(|v| v.as_str()) == Some("B2"))
                .cloned()
        })
        .expect("B2");
    assert_eq!(b2.get("attendance").and_then(|v| v.as_bool()), Some(false));

    // Locked cells reject edits until explicitly overridden.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "c2",
        "grid.setCell",
        json!({
            "generation": generation,
            "rollNo": "B2",
            "criteriaId": "testing_coverage",
            "value": 5
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("cell_locked"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ov",
        "grid.overrideCell",
        json!({
            "generation": generation,
            "rollNo": "B2",
            "criteriaId": "testing_coverage"
        }),
    );
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "c3",
        "grid.setCell",
        json!({
            "generation": generation,
            "rollNo": "B2",
            "criteriaId": "testing_coverage",
            "value": 5
        }),
    );
    assert_eq!(set.get("total").and_then(|v| v.as_f64()), Some(5.0));

    // Back to present: editable empty cells, not the pre-absence values.
    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "pres",
        "grid.setAttendance",
        json!({ "generation": generation, "rollNo": "B2", "present": true }),
    );
    assert_eq!(toggled.get("total").and_then(|v| v.as_f64()), Some(0.0));
    for cell in toggled.get("cells").and_then(|v| v.as_array()).expect("cells") {
        assert!(cell.get("value").map(|v| v.is_null()).unwrap_or(false));
        assert_eq!(cell.get("locked").and_then(|v| v.as_bool()), Some(false));
    }
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "c4",
        "grid.setCell",
        json!({
            "generation": generation,
            "rollNo": "B2",
            "criteriaId": "testing_coverage",
            "value": 6
        }),
    );
    assert_eq!(set.get("value").and_then(|v| v.as_str()), Some("6"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reopening_the_grid_invalidates_stale_generations() {
    let workspace = temp_dir("reviewdesk-stale-gen");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "open1",
        "grid.open",
        json!({ "groupId": "BIA-02", "reviewNo": 1 }),
    );
    let stale = first.get("generation").and_then(|v| v.as_u64()).expect("generation");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "open2",
        "grid.open",
        json!({ "groupId": "BIA-02", "reviewNo": 1 }),
    );
    let current = second.get("generation").and_then(|v| v.as_u64()).expect("generation");
    assert!(current > stale);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "stale",
        "grid.setCell",
        json!({
            "generation": stale,
            "rollNo": "B1",
            "criteriaId": "requirement_analysis",
            "value": 9
        }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("stale_grid"));
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("currentGeneration"))
            .and_then(|v| v.as_u64()),
        Some(current)
    );

    // The discarded edit left the live grid untouched.
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "fresh",
        "grid.setCell",
        json!({
            "generation": current,
            "rollNo": "B1",
            "criteriaId": "requirement_analysis",
            "value": 9
        }),
    );
    assert_eq!(set.get("total").and_then(|v| v.as_f64()), Some(9.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
