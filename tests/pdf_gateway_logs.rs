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
                "groupId": "BIA-05",
                "projectTitle": "Library Seat Tracker",
                "guideName": "Prof Leena Thomas",
                "members": [
                    { "rollNo": "F1", "studentName": "Manav Desai" },
                    { "rollNo": "F2", "studentName": "Ishita Bose" }
                ]
            }]
        }),
    );
}

#[test]
fn generation_requires_responses_and_logs_each_run() {
    let workspace = temp_dir("reviewdesk-pdf");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    // Responses gate the review sheet PDF.
    let refused = request_raw(
        &mut stdin,
        &mut reader,
        "gen0",
        "pdf.generate",
        json!({ "groupId": "BIA-05", "reviewNo": 1 }),
    );
    assert_eq!(refused.get("ok").and_then(|v| v.as_bool()), Some(false));
    let message = refused
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert!(message.contains("responses"), "unexpected message: {}", message);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "resp",
        "responses.save",
        json!({
            "groupId": "BIA-05",
            "reviewNo": 1,
            "date": "2025-10-08",
            "comments": "Plan approved.",
            "responses": [
                { "questionCode": "que_1.1.1", "responseValue": "Y" }
            ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "marks",
        "marks.save",
        json!({
            "reviewNo": 1,
            "marks": [
                { "groupId": "BIA-05", "rollNo": "F1", "requirement_analysis": 9, "srs_submitted": "Y" }
            ]
        }),
    );

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "gen1",
        "pdf.generate",
        json!({ "groupId": "BIA-05", "reviewNo": 1, "generatedBy": "panel1" }),
    );
    assert_eq!(
        generated.get("downloadUrl").and_then(|v| v.as_str()),
        Some("/pdf/download/1/BIA-05")
    );
    let report_path = generated
        .get("reportPath")
        .and_then(|v| v.as_str())
        .expect("reportPath");
    let report_text = std::fs::read_to_string(report_path).expect("report file");
    let report: serde_json::Value = serde_json::from_str(&report_text).expect("report json");
    assert_eq!(
        report
            .get("project")
            .and_then(|p| p.get("projectTitle"))
            .and_then(|v| v.as_str()),
        Some("Library Seat Tracker")
    );
    assert_eq!(
        report
            .get("marks")
            .and_then(|m| m.get("F1"))
            .and_then(|m| m.get("total"))
            .and_then(|v| v.as_f64()),
        Some(9.0)
    );
    assert_eq!(
        report
            .get("responses")
            .and_then(|r| r.get("submissionDate"))
            .and_then(|v| v.as_str()),
        Some("2025-10-08")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "gen2",
        "pdf.generate",
        json!({ "groupId": "BIA-05", "reviewNo": 1 }),
    );

    let db_path = workspace.join("reviewdesk.sqlite3");
    let conn = Connection::open(&db_path).expect("open db");
    let log_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pdf_generation_logs WHERE group_id = 'BIA-05' AND review_no = 1",
            [],
            |r| r.get(0),
        )
        .expect("log count");
    assert_eq!(log_count, 2, "each generation appends one log row");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "pdf.listAvailable",
        json!({}),
    );
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn review_five_builds_the_final_sheet_model() {
    let workspace = temp_dir("reviewdesk-pdf-final");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    seed_group(&mut stdin, &mut reader, &workspace);

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "gen5",
        "pdf.generate",
        json!({ "groupId": "BIA-05", "reviewNo": 5 }),
    );
    assert_eq!(
        generated.get("downloadUrl").and_then(|v| v.as_str()),
        Some("/pdf/download/5/BIA-05")
    );
    let report_path = generated
        .get("reportPath")
        .and_then(|v| v.as_str())
        .expect("reportPath");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).expect("report file"))
            .expect("report json");
    assert_eq!(
        report.get("title").and_then(|v| v.as_str()),
        Some("Final Summary Sheet")
    );
    assert_eq!(
        report
            .get("summary")
            .and_then(|s| s.get("rows"))
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
