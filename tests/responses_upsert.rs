use rusqlite::Connection;
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
                "groupId": "BIA-11",
                "projectTitle": "Traffic Density Estimator",
                "members": [
                    { "rollNo": "D1", "studentName": "Pooja Nair" }
                ]
            }]
        }),
    );
}

#[test]
fn saving_twice_keeps_one_record_and_reports_updated() {
    let workspace = temp_dir("reviewdesk-responses");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    // No submission yet: not_found is the blank-form state, not a failure.
    let missing = request_raw(
        &mut stdin,
        &mut reader,
        "get0",
        "responses.get",
        json!({ "groupId": "BIA-11", "reviewNo": 3 }),
    );
    assert_eq!(missing.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        missing
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save1",
        "responses.save",
        json!({
            "groupId": "BIA-11",
            "reviewNo": 3,
            "date": "2026-03-14",
            "comments": "Coverage thin on the scheduler module.",
            "responses": [
                { "questionCode": "que_3.1.1", "responseValue": "y" },
                { "questionCode": "que_3.2.1", "responseValue": 4 },
                { "questionCode": "que_9.9.9", "responseValue": "Y" },
                { "questionCode": "que_3.1.2", "responseValue": "MAYBE" }
            ]
        }),
    );
    assert_eq!(saved.get("action").and_then(|v| v.as_str()), Some("created"));
    assert_eq!(saved.get("answersSaved").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        saved.get("dropped").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "save2",
        "responses.save",
        json!({
            "groupId": "BIA-11",
            "reviewNo": 3,
            "date": "2026-03-15",
            "comments": "Re-reviewed after fixes.",
            "responses": [
                { "questionCode": "que_3.1.1", "responseValue": "N" }
            ]
        }),
    );
    assert_eq!(saved.get("action").and_then(|v| v.as_str()), Some("updated"));

    let db_path = workspace.join("reviewdesk.sqlite3");
    let conn = Connection::open(&db_path).expect("open db");
    let record_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM review_responses WHERE group_id = 'BIA-11' AND review_no = 3",
            [],
            |r| r.get(0),
        )
        .expect("count");
    assert_eq!(record_count, 1, "upsert must keep a single record");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get1",
        "responses.get",
        json!({ "groupId": "BIA-11", "reviewNo": 3 }),
    );
    assert_eq!(
        fetched.get("submissionDate").and_then(|v| v.as_str()),
        Some("2026-03-15")
    );
    assert_eq!(
        fetched.get("comments").and_then(|v| v.as_str()),
        Some("Re-reviewed after fixes.")
    );
    let responses = fetched.get("responses").expect("responses map");
    assert_eq!(responses.get("que_3.1.1").and_then(|v| v.as_str()), Some("N"));
    assert_eq!(responses.get("que_3.2.1").and_then(|v| v.as_str()), Some("4"));
    assert!(responses.get("que_9.9.9").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_dates_are_rejected_before_any_write() {
    let workspace = temp_dir("reviewdesk-responses-date");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "bad",
        "responses.save",
        json!({
            "groupId": "BIA-11",
            "reviewNo": 1,
            "date": "14/03/2026",
            "responses": []
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let db_path = workspace.join("reviewdesk.sqlite3");
    let conn = Connection::open(&db_path).expect("open db");
    let record_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM review_responses", [], |r| r.get(0))
        .expect("count");
    assert_eq!(record_count, 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
