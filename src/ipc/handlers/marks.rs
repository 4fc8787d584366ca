use crate::config::{self, Criterion, InputKind};
use crate::grid::{format_mark, normalize_text_mark, validate_numeric};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{valid_group_id, valid_review_no, valid_roll_no};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

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

fn db_err(e: impl std::fmt::Display, code: &'static str) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

/// Normalize one submitted cell value for its criterion. Numeric entries
/// are silently clamped into `[0, max]` at 0.5 granularity (rejecting the
/// save is explicitly not the grading policy); text entries become one
/// upper-cased character. `None` clears the cell.
pub fn normalize_mark_value(criterion: &Criterion, raw: &serde_json::Value) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    match criterion.kind {
        InputKind::Numeric => {
            let text = match raw {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                _ => return None,
            };
            validate_numeric(&text, criterion.max_marks).map(format_mark)
        }
        InputKind::Text => raw.as_str().and_then(normalize_text_mark),
    }
}

/// Upsert (or clear, when `value` is `None`) one mark cell.
pub fn upsert_mark_cell(
    conn: &Connection,
    group_id: &str,
    roll_no: &str,
    review_no: i64,
    criterion: &Criterion,
    value: Option<&str>,
) -> Result<(), HandlerErr> {
    let Some(value) = value else {
        conn.execute(
            "DELETE FROM review_marks
             WHERE group_id = ? AND roll_no = ? AND review_no = ? AND criteria_id = ?",
            (group_id, roll_no, review_no, criterion.id),
        )
        .map_err(|e| db_err(e, "db_delete_failed"))?;
        return Ok(());
    };

    let (num_value, text_value) = match criterion.kind {
        InputKind::Numeric => (value.parse::<f64>().ok(), None),
        InputKind::Text => (None, Some(value)),
    };
    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO review_marks(id, group_id, roll_no, review_no, criteria_id, num_value, text_value)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(group_id, roll_no, review_no, criteria_id) DO UPDATE SET
           num_value = excluded.num_value,
           text_value = excluded.text_value",
        (
            &mark_id,
            group_id,
            roll_no,
            review_no,
            criterion.id,
            num_value,
            text_value,
        ),
    )
    .map_err(|e| db_err(e, "db_insert_failed"))?;
    Ok(())
}

/// Stored mark rows for a group at one review as
/// (criteria_id, roll_no, display value) triples.
pub fn load_mark_rows(
    conn: &Connection,
    group_id: &str,
    review_no: i64,
) -> Result<Vec<(String, String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT criteria_id, roll_no, num_value, text_value
             FROM review_marks
             WHERE group_id = ? AND review_no = ?
             ORDER BY roll_no",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map((group_id, review_no), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;

    Ok(rows
        .into_iter()
        .filter_map(|(criteria_id, roll_no, num_value, text_value)| {
            let value = match (num_value, text_value) {
                (Some(n), _) => Some(format_mark(n)),
                (None, Some(t)) => Some(t),
                (None, None) => None,
            };
            value.map(|v| (criteria_id, roll_no, v))
        })
        .collect())
}

fn parse_review_no(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let review_no = params
        .get("reviewNo")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing reviewNo".to_string(),
            details: None,
        })?;
    if !valid_review_no(review_no, false) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("invalid reviewNo: {}", review_no),
            details: None,
        });
    }
    Ok(review_no)
}

fn marks_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let review_no = parse_review_no(params)?;
    let milestone = config::milestone(review_no).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("review {} has no marks sheet", review_no),
        details: None,
    })?;
    let Some(entries) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "marks list is empty".to_string(),
            details: None,
        });
    };
    if entries.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "marks list is empty".to_string(),
            details: None,
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(e, "db_tx_failed"))?;
    let mut saved = 0_usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "mark entry must be an object",
            }));
            continue;
        };
        let group_id = obj.get("groupId").and_then(|v| v.as_str()).unwrap_or("");
        let roll_no = obj.get("rollNo").and_then(|v| v.as_str()).unwrap_or("");
        if !valid_group_id(group_id) || !valid_roll_no(roll_no) {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "each mark entry needs groupId and rollNo",
            }));
            continue;
        }
        let member_exists = tx
            .query_row(
                "SELECT 1 FROM members WHERE group_id = ? AND roll_no = ?",
                (group_id, roll_no),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| db_err(e, "db_query_failed"))?
            .is_some();
        if !member_exists {
            errors.push(json!({
                "index": i,
                "code": "not_found",
                "message": format!("member {} not in group {}", roll_no, group_id),
            }));
            continue;
        }

        for (key, raw) in obj {
            if key == "groupId" || key == "rollNo" {
                continue;
            }
            // Unknown keys are dropped, matching the sheet's behavior of
            // only persisting configured criteria columns.
            let Some(criterion) = milestone.criterion(key) else {
                continue;
            };
            let value = normalize_mark_value(criterion, raw);
            upsert_mark_cell(&tx, group_id, roll_no, review_no, criterion, value.as_deref())?;
        }
        saved += 1;
    }

    tx.commit().map_err(|e| db_err(e, "db_commit_failed"))?;

    let mut result = json!({ "saved": saved });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = json!(errors);
    }
    Ok(result)
}

fn marks_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let review_no = parse_review_no(params)?;
    let milestone = config::milestone(review_no).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("review {} has no marks sheet", review_no),
        details: None,
    })?;
    let group_id = params
        .get("groupId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing groupId".to_string(),
            details: None,
        })?;
    if !valid_group_id(group_id) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("invalid groupId format: {}", group_id),
            details: None,
        });
    }

    let rows = load_mark_rows(conn, group_id, review_no)?;

    // Group per student; an empty result is the normal "no marks yet" state.
    let mut per_student: BTreeMap<String, serde_json::Map<String, serde_json::Value>> =
        BTreeMap::new();
    for (criteria_id, roll_no, value) in rows {
        let Some(criterion) = milestone.criterion(&criteria_id) else {
            continue;
        };
        let cell = match criterion.kind {
            InputKind::Numeric => value
                .parse::<f64>()
                .map(|n| json!(n))
                .unwrap_or(serde_json::Value::Null),
            InputKind::Text => json!(value),
        };
        per_student.entry(roll_no).or_default().insert(criteria_id, cell);
    }

    let marks: Vec<serde_json::Value> = per_student
        .into_iter()
        .map(|(roll_no, cells)| {
            let total: f64 = milestone
                .criteria
                .iter()
                .filter(|c| c.kind == InputKind::Numeric)
                .filter_map(|c| cells.get(c.id).and_then(|v| v.as_f64()))
                .sum();
            json!({
                "rollNo": roll_no,
                "marks": cells,
                "total": crate::calc::round_to_1dp(total),
            })
        })
        .collect();

    Ok(json!({ "marks": marks }))
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
        "marks.save" => Some(with_conn(state, req, marks_save)),
        "marks.get" => Some(with_conn(state, req, marks_get)),
        _ => None,
    }
}
