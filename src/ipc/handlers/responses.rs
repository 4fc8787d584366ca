use chrono::NaiveDate;

use crate::config;
use crate::db::now_timestamp;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{valid_group_id, valid_review_no};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const COMMENTS_MAX_CHARS: usize = 1000;
const ANSWER_CHOICES: [&str; 4] = ["Y", "N", "NA", "NC"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
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

fn get_group_review(params: &serde_json::Value) -> Result<(String, i64), HandlerErr> {
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

/// Accepts one of the Y/N/NA/NC choices or a number; everything else is
/// dropped from the save.
fn normalize_answer(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => {
            let t = s.trim().to_ascii_uppercase();
            if ANSWER_CHOICES.contains(&t.as_str()) {
                Some(t)
            } else {
                s.trim().parse::<f64>().ok().map(|_| s.trim().to_string())
            }
        }
        _ => None,
    }
}

fn responses_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (group_id, review_no) = get_group_review(params)?;

    let header: Option<(String, Option<String>, String, String)> = conn
        .query_row(
            "SELECT submission_date, comments, created_at, updated_at
             FROM review_responses
             WHERE group_id = ? AND review_no = ?",
            (&group_id, review_no),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?;

    // Absent record is the blank/new state, reported as not_found so the
    // caller can leave the form empty without treating it as a failure.
    let Some((submission_date, comments, created_at, updated_at)) = header else {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("no submission found for group {} in review {}", group_id, review_no),
            details: None,
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT question_code, response_value
             FROM review_response_answers
             WHERE group_id = ? AND review_no = ?",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let answers = stmt
        .query_map((&group_id, review_no), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let mut responses = serde_json::Map::new();
    for (code, value) in answers {
        responses.insert(code, json!(value));
    }

    Ok(json!({
        "groupId": group_id,
        "submissionDate": submission_date,
        "comments": comments.unwrap_or_default(),
        "createdAt": created_at,
        "updatedAt": updated_at,
        "responses": responses,
    }))
}

fn responses_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (group_id, review_no) = get_group_review(params)?;
    let milestone = config::milestone(review_no)
        .ok_or_else(|| bad_params(format!("review {} has no questionnaire", review_no)))?;

    let date = params
        .get("date")
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad_params("missing date"))?;
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| bad_params(format!("date must be YYYY-MM-DD, got {}", date)))?
        .format("%Y-%m-%d")
        .to_string();

    let comments: Option<String> = params
        .get("comments")
        .and_then(|v| v.as_str())
        .map(|s| s.chars().take(COMMENTS_MAX_CHARS).collect::<String>())
        .filter(|s| !s.trim().is_empty());

    let group_exists = conn
        .query_row(
            "SELECT 1 FROM projects WHERE group_id = ?",
            [&group_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?
        .is_some();
    if !group_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "project not found".to_string(),
            details: Some(json!({ "groupId": group_id })),
        });
    }

    let existing = conn
        .query_row(
            "SELECT 1 FROM review_responses WHERE group_id = ? AND review_no = ?",
            (&group_id, review_no),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?
        .is_some();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(e, "db_tx_failed"))?;
    let now = now_timestamp();
    tx.execute(
        "INSERT INTO review_responses(
            group_id, review_no, submission_date, comments, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(group_id, review_no) DO UPDATE SET
           submission_date = excluded.submission_date,
           comments = excluded.comments,
           updated_at = excluded.updated_at",
        (&group_id, review_no, &date, &comments, &now, &now),
    )
    .map_err(|e| db_err(e, "db_insert_failed"))?;

    let mut answers_saved = 0_usize;
    let mut dropped: Vec<serde_json::Value> = Vec::new();
    if let Some(responses) = params.get("responses").and_then(|v| v.as_array()) {
        for resp in responses {
            let Some(code) = resp.get("questionCode").and_then(|v| v.as_str()) else {
                dropped.push(json!({ "reason": "missing questionCode" }));
                continue;
            };
            if milestone.question(code).is_none() {
                dropped.push(json!({ "reason": "unknown questionCode", "questionCode": code }));
                continue;
            }
            let Some(value) = resp.get("responseValue").and_then(normalize_answer) else {
                dropped.push(json!({
                    "reason": "invalid responseValue",
                    "questionCode": code,
                }));
                continue;
            };
            tx.execute(
                "INSERT INTO review_response_answers(group_id, review_no, question_code, response_value)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(group_id, review_no, question_code) DO UPDATE SET
                   response_value = excluded.response_value",
                (&group_id, review_no, code, &value),
            )
            .map_err(|e| db_err(e, "db_insert_failed"))?;
            answers_saved += 1;
        }
    }
    tx.commit().map_err(|e| db_err(e, "db_commit_failed"))?;

    let action = if existing { "updated" } else { "created" };
    let mut result = json!({
        "action": action,
        "groupId": group_id,
        "answersSaved": answers_saved,
    });
    if !dropped.is_empty() {
        result["dropped"] = json!(dropped);
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
        "responses.get" => Some(with_conn(state, req, responses_get)),
        "responses.save" => Some(with_conn(state, req, responses_save)),
        _ => None,
    }
}
