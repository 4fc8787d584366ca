use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{valid_group_id, valid_review_no, valid_roll_no};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn db_err(e: impl std::fmt::Display, code: &'static str) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

pub fn get_group_review(params: &serde_json::Value) -> Result<(String, i64), HandlerErr> {
    let group_id = params
        .get("groupId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| bad_params("missing groupId"))?;
    if !valid_group_id(&group_id) {
        return Err(bad_params(format!("invalid groupId format: {}", group_id)));
    }
    let review_no = params
        .get("reviewNo")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing reviewNo"))?;
    if !valid_review_no(review_no, false) {
        return Err(bad_params(format!("invalid reviewNo: {}", review_no)));
    }
    Ok((group_id, review_no))
}

pub fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM projects WHERE group_id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err(e, "db_query_failed"))
}

/// Members of a group with the attendance flag for one review. Missing
/// attendance rows read as present.
pub fn list_members_with_attendance(
    conn: &Connection,
    group_id: &str,
    review_no: i64,
) -> Result<Vec<(String, String, bool)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT m.roll_no, m.student_name, COALESCE(a.present, 1)
             FROM members m
             LEFT JOIN review_attendance a
               ON a.group_id = m.group_id AND a.roll_no = m.roll_no AND a.review_no = ?
             WHERE m.group_id = ?
             ORDER BY m.roll_no",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    stmt.query_map((review_no, group_id), |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, i64>(2)? != 0,
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err(e, "db_query_failed"))
}

pub fn upsert_attendance_flag(
    conn: &Connection,
    group_id: &str,
    roll_no: &str,
    review_no: i64,
    present: bool,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO review_attendance(group_id, roll_no, review_no, present)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(group_id, roll_no, review_no) DO UPDATE SET
           present = excluded.present",
        (group_id, roll_no, review_no, present as i64),
    )
    .map_err(|e| db_err(e, "db_update_failed"))?;
    Ok(())
}

fn members_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (group_id, review_no) = get_group_review(params)?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "project not found".to_string(),
            details: Some(json!({ "groupId": group_id })),
        });
    }
    let members = list_members_with_attendance(conn, &group_id, review_no)?;
    let members_json: Vec<serde_json::Value> = members
        .iter()
        .map(|(roll_no, name, present)| {
            json!({
                "rollNo": roll_no,
                "name": name,
                "attendance": present,
            })
        })
        .collect();
    Ok(json!({ "members": members_json }))
}

fn attendance_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (group_id, review_no) = get_group_review(params)?;
    let Some(records) = params.get("attendance").and_then(|v| v.as_array()) else {
        return Err(bad_params("missing attendance[]"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(e, "db_tx_failed"))?;
    let mut updated = 0_usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for record in records {
        let Some(roll_no) = record.get("rollNo").and_then(|v| v.as_str()) else {
            skipped.push(json!({ "reason": "missing rollNo" }));
            continue;
        };
        if !valid_roll_no(roll_no) {
            skipped.push(json!({ "reason": "invalid rollNo", "rollNo": roll_no }));
            continue;
        }
        let member_exists = tx
            .query_row(
                "SELECT 1 FROM members WHERE group_id = ? AND roll_no = ?",
                (&group_id, roll_no),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| db_err(e, "db_query_failed"))?
            .is_some();
        if !member_exists {
            skipped.push(json!({ "reason": "unknown member", "rollNo": roll_no }));
            continue;
        }
        let present = record
            .get("present")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        tx.execute(
            "INSERT INTO review_attendance(group_id, roll_no, review_no, present)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(group_id, roll_no, review_no) DO UPDATE SET
               present = excluded.present",
            (&group_id, roll_no, review_no, present as i64),
        )
        .map_err(|e| db_err(e, "db_update_failed"))?;
        updated += 1;
    }
    tx.commit().map_err(|e| db_err(e, "db_commit_failed"))?;

    let mut result = json!({ "updated": updated });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    Ok(result)
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "members.list" => Some(with_conn(state, req, members_list)),
        "attendance.save" => Some(with_conn(state, req, attendance_save)),
        _ => None,
    }
}
