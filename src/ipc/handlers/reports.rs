use crate::config::{self, InputKind, FINAL_SHEET_REVIEW};
use crate::db::now_timestamp;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{attendance, final_sheet, marks};
use crate::ipc::helpers::{valid_group_id, valid_review_no};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

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

impl From<attendance::HandlerErr> for HandlerErr {
    fn from(e: attendance::HandlerErr) -> Self {
        HandlerErr {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

impl From<marks::HandlerErr> for HandlerErr {
    fn from(e: marks::HandlerErr) -> Self {
        HandlerErr {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

impl From<final_sheet::HandlerErr> for HandlerErr {
    fn from(e: final_sheet::HandlerErr) -> Self {
        HandlerErr {
            code: e.code,
            message: e.message,
            details: e.details,
        }
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
    if !valid_review_no(review_no, true) {
        return Err(bad_params(format!("invalid reviewNo: {}", review_no)));
    }
    Ok((group_id, review_no))
}

fn load_project(conn: &Connection, group_id: &str) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT division, project_domain, project_title, sponsor_company, guide_name,
                mentor_name, mentor_email, mentor_mobile, evaluator1_name, evaluator2_name
         FROM projects
         WHERE group_id = ?",
        [group_id],
        |r| {
            Ok(json!({
                "groupId": group_id,
                "division": r.get::<_, Option<String>>(0)?,
                "projectDomain": r.get::<_, Option<String>>(1)?,
                "projectTitle": r.get::<_, String>(2)?,
                "sponsorCompany": r.get::<_, Option<String>>(3)?,
                "guideName": r.get::<_, Option<String>>(4)?,
                "mentorName": r.get::<_, Option<String>>(5)?,
                "mentorEmail": r.get::<_, Option<String>>(6)?,
                "mentorMobile": r.get::<_, Option<String>>(7)?,
                "evaluator1Name": r.get::<_, Option<String>>(8)?,
                "evaluator2Name": r.get::<_, Option<String>>(9)?,
            }))
        },
    )
    .optional()
    .map_err(|e| db_err(e, "db_query_failed"))
}

/// Assemble the complete data model one review sheet renders from.
fn build_review_model(
    conn: &Connection,
    group_id: &str,
    review_no: i64,
) -> Result<serde_json::Value, HandlerErr> {
    if review_no == FINAL_SHEET_REVIEW {
        let summary = final_sheet::build_summary(conn, group_id)?.ok_or_else(|| HandlerErr {
            code: "not_found",
            message: format!("no data found for group {}", group_id),
            details: None,
        })?;
        let comments: Option<Option<String>> = conn
            .query_row(
                "SELECT overall_comments FROM final_sheet WHERE group_id = ?",
                [group_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| db_err(e, "db_query_failed"))?;
        return Ok(json!({
            "reviewNo": review_no,
            "title": "Final Summary Sheet",
            "summary": summary,
            "overallComments": comments.flatten().unwrap_or_default(),
        }));
    }

    let milestone = config::milestone(review_no)
        .ok_or_else(|| bad_params(format!("invalid reviewNo: {}", review_no)))?;
    let project = load_project(conn, group_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: format!("project not found for group {}", group_id),
        details: None,
    })?;

    let members = attendance::list_members_with_attendance(conn, group_id, review_no)?;
    let members_json: Vec<serde_json::Value> = members
        .iter()
        .map(|(roll_no, name, present)| {
            json!({ "rollNo": roll_no, "name": name, "attendance": present })
        })
        .collect();

    let mark_rows = marks::load_mark_rows(conn, group_id, review_no)?;
    let mut per_student: HashMap<String, serde_json::Map<String, serde_json::Value>> =
        HashMap::new();
    for (criteria_id, roll_no, value) in mark_rows {
        per_student.entry(roll_no).or_default().insert(criteria_id, json!(value));
    }
    let mut marks_json = serde_json::Map::new();
    for (roll_no, _, _) in &members {
        let cells = per_student.remove(roll_no).unwrap_or_default();
        let total: f64 = milestone
            .criteria
            .iter()
            .filter(|c| c.kind == InputKind::Numeric)
            .filter_map(|c| {
                cells
                    .get(c.id)
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse::<f64>().ok())
            })
            .sum();
        marks_json.insert(
            roll_no.clone(),
            json!({
                "cells": cells,
                "total": crate::calc::round_to_1dp(total),
            }),
        );
    }

    let responses: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT submission_date, comments
             FROM review_responses
             WHERE group_id = ? AND review_no = ?",
            (group_id, review_no),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let mut answers: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT question_code, response_value
             FROM review_response_answers
             WHERE group_id = ? AND review_no = ?",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let answer_rows = stmt
        .query_map((group_id, review_no), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;
    for (code, value) in answer_rows {
        answers.insert(code, value);
    }

    let questions_json: Vec<serde_json::Value> = milestone
        .questions
        .iter()
        .map(|q| {
            json!({
                "code": q.code,
                "section": q.section,
                "text": q.text,
                "answer": answers.get(q.code),
            })
        })
        .collect();

    Ok(json!({
        "reviewNo": review_no,
        "title": milestone.title,
        "project": project,
        "members": members_json,
        "criteria": milestone.criteria,
        "marks": marks_json,
        "deliverables": milestone.deliverables,
        "questions": questions_json,
        "responses": responses.map(|(submission_date, comments)| {
            json!({
                "submissionDate": submission_date,
                "comments": comments.unwrap_or_default(),
            })
        }),
    }))
}

/// Everything a PDF needs must exist before generation is attempted.
fn check_availability(
    conn: &Connection,
    group_id: &str,
    review_no: i64,
) -> Result<(), HandlerErr> {
    let project_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM projects WHERE group_id = ?",
            [group_id],
            |r| r.get(0),
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    if project_count == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("project not found for group {}", group_id),
            details: None,
        });
    }

    let member_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM members WHERE group_id = ?",
            [group_id],
            |r| r.get(0),
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    if member_count == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("no members found for group {}", group_id),
            details: None,
        });
    }

    if review_no != FINAL_SHEET_REVIEW {
        let response_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM review_responses WHERE group_id = ? AND review_no = ?",
                (group_id, review_no),
                |r| r.get(0),
            )
            .map_err(|e| db_err(e, "db_query_failed"))?;
        if response_count == 0 {
            return Err(HandlerErr {
                code: "not_found",
                message: format!(
                    "no review {} responses found for group {}",
                    review_no, group_id
                ),
                details: None,
            });
        }
    }
    Ok(())
}

fn handle_review_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (group_id, review_no) = match get_group_review(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match build_review_model(conn, &group_id, review_no) {
        Ok(model) => ok(&req.id, model),
        Err(e) => e.response(&req.id),
    }
}

fn handle_pdf_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (group_id, review_no) = match get_group_review(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let generated_by = req
        .params
        .get("generatedBy")
        .and_then(|v| v.as_str())
        .map(|s| s.chars().take(100).collect::<String>());

    if let Err(e) = check_availability(conn, &group_id, review_no) {
        return e.response(&req.id);
    }
    let model = match build_review_model(conn, &group_id, review_no) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };

    // The renderer is an external collaborator; it consumes the persisted
    // model and serves the download URL returned here.
    let reports_dir = workspace.join("reports");
    if let Err(e) = std::fs::create_dir_all(&reports_dir) {
        return err(&req.id, "report_write_failed", e.to_string(), None);
    }
    let report_path = reports_dir.join(format!("review{}_{}.json", review_no, group_id));
    let payload = match serde_json::to_string_pretty(&model) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "report_write_failed", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&report_path, payload) {
        return err(&req.id, "report_write_failed", e.to_string(), None);
    }

    let log_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO pdf_generation_logs(id, review_no, group_id, generated_by, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&log_id, review_no, &group_id, &generated_by, now_timestamp()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "pdf_generation_logs" })),
        );
    }

    ok(
        &req.id,
        json!({
            "success": true,
            "downloadUrl": format!("/pdf/download/{}/{}", review_no, group_id),
            "reportPath": report_path.to_string_lossy(),
        }),
    )
}

fn handle_pdf_list_available(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT r.group_id, r.review_no, r.created_at,
                p.project_title, p.guide_name, p.division, p.project_domain, p.mentor_name
         FROM review_responses r
         JOIN projects p ON p.group_id = r.group_id
         ORDER BY r.created_at DESC, r.group_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            let group_id: String = r.get(0)?;
            let review_no: i64 = r.get(1)?;
            Ok(json!({
                "groupId": group_id,
                "reviewNo": review_no,
                "createdAt": r.get::<_, String>(2)?,
                "projectTitle": r.get::<_, String>(3)?,
                "guideName": r.get::<_, Option<String>>(4)?,
                "division": r.get::<_, Option<String>>(5)?,
                "projectDomain": r.get::<_, Option<String>>(6)?,
                "mentorName": r.get::<_, Option<String>>(7)?,
                "downloadUrl": format!("/pdf/download/{}/{}", review_no, group_id),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => {
            let count = reports.len();
            ok(&req.id, json!({ "reports": reports, "count": count }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reviewSheet" => Some(handle_review_sheet(state, req)),
        "pdf.generate" => Some(handle_pdf_generate(state, req)),
        "pdf.listAvailable" => Some(handle_pdf_list_available(state, req)),
        _ => None,
    }
}
