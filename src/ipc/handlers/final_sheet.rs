use crate::calc::{self, FinalSheetMember, ReviewCell, FINAL_SHEET_REVIEWS};
use crate::db::now_timestamp;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::valid_group_id;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const OVERALL_COMMENTS_MAX_CHARS: usize = 2000;

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

fn get_group_id(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let group_id = params
        .get("groupId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing groupId".to_string(),
            details: None,
        })?;
    if !valid_group_id(&group_id) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("invalid groupId format: {}", group_id),
            details: None,
        });
    }
    Ok(group_id)
}

fn load_group_info(
    conn: &Connection,
    group_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    let project: Option<(
        Option<String>,
        Option<String>,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = conn
        .query_row(
            "SELECT division, project_domain, project_title, guide_name,
                    mentor_name, evaluator1_name, evaluator2_name
             FROM projects
             WHERE group_id = ?",
            [group_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let Some((division, domain, title, mut guide, mentor, eval1, eval2)) = project else {
        return Ok(None);
    };

    // Panel assignment reviewers take precedence over the imported names.
    let panel: Option<(Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT reviewer1, reviewer2, guide FROM panel_assignments WHERE group_id = ?",
            [group_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let (mut reviewer1, mut reviewer2) = (eval1, eval2);
    if let Some((r1, r2, panel_guide)) = panel {
        if r1.is_some() {
            reviewer1 = r1;
        }
        if r2.is_some() {
            reviewer2 = r2;
        }
        if panel_guide.is_some() {
            guide = panel_guide;
        }
    }

    Ok(Some(json!({
        "groupId": group_id,
        "division": division,
        "projectDomain": domain,
        "projectTitle": title,
        "guideName": guide,
        "mentorName": mentor,
        "reviewer1Name": reviewer1,
        "reviewer2Name": reviewer2,
    })))
}

fn load_members(conn: &Connection, group_id: &str) -> Result<Vec<FinalSheetMember>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT roll_no, student_name FROM members WHERE group_id = ? ORDER BY roll_no",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let base = stmt
        .query_map([group_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let mut att_stmt = conn
        .prepare(
            "SELECT roll_no, review_no, present
             FROM review_attendance
             WHERE group_id = ? AND review_no BETWEEN 1 AND 4",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let att_rows = att_stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let mut flags: HashMap<(String, i64), bool> = HashMap::new();
    for (roll, review, present) in att_rows {
        flags.insert((roll, review), present != 0);
    }

    Ok(base
        .into_iter()
        .map(|(roll_no, student_name)| {
            let mut attendance = [true; 4];
            for (i, review_no) in FINAL_SHEET_REVIEWS.iter().enumerate() {
                attendance[i] = flags
                    .get(&(roll_no.clone(), *review_no))
                    .copied()
                    .unwrap_or(true);
            }
            FinalSheetMember {
                roll_no,
                student_name,
                attendance,
            }
        })
        .collect())
}

fn load_totals_by_review(
    conn: &Connection,
    group_id: &str,
) -> Result<HashMap<i64, HashMap<String, f64>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT rm.review_no, rm.roll_no, SUM(COALESCE(rm.num_value, 0))
             FROM review_marks rm
             JOIN performance_criteria pc
               ON pc.review_no = rm.review_no AND pc.criteria_id = rm.criteria_id
             WHERE rm.group_id = ? AND pc.input_kind = 'numeric'
               AND rm.review_no BETWEEN 1 AND 4
             GROUP BY rm.review_no, rm.roll_no",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map([group_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let mut totals: HashMap<i64, HashMap<String, f64>> = HashMap::new();
    for (review_no, roll_no, total) in rows {
        totals.entry(review_no).or_default().insert(roll_no, total);
    }
    Ok(totals)
}

pub fn build_summary(
    conn: &Connection,
    group_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    let Some(group_info) = load_group_info(conn, group_id)? else {
        return Ok(None);
    };
    let members = load_members(conn, group_id)?;
    if members.is_empty() {
        return Ok(None);
    }
    let totals = load_totals_by_review(conn, group_id)?;
    let rows = calc::final_sheet_rows(&members, &totals);

    let mut review_marks = serde_json::Map::new();
    for review_no in FINAL_SHEET_REVIEWS {
        let per_roll = totals.get(&review_no).cloned().unwrap_or_default();
        review_marks.insert(format!("review{}", review_no), json!(per_roll));
    }

    let members_json: Vec<serde_json::Value> = members
        .iter()
        .map(|m| {
            json!({
                "rollNo": m.roll_no,
                "studentName": m.student_name,
                "attendance": m.attendance,
            })
        })
        .collect();
    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let cells: Vec<serde_json::Value> = row
                .cells
                .iter()
                .map(|cell| match cell {
                    ReviewCell::Absent => json!("Absent"),
                    ReviewCell::Score(v) => json!(v),
                })
                .collect();
            json!({
                "rollNo": row.roll_no,
                "studentName": row.student_name,
                "cells": cells,
                "grandTotal": row.grand_total,
            })
        })
        .collect();

    Ok(Some(json!({
        "groupInfo": group_info,
        "members": members_json,
        "reviewMarks": review_marks,
        "rows": rows_json,
    })))
}

fn summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_group_id(params)?;
    build_summary(conn, &group_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "no data found for this group".to_string(),
        details: Some(json!({ "groupId": group_id })),
    })
}

fn get_comments(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_group_id(params)?;
    let comments: Option<Option<String>> = conn
        .query_row(
            "SELECT overall_comments FROM final_sheet WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?;

    // A group without a final-sheet row simply has no comments yet.
    Ok(json!({
        "groupId": group_id,
        "comments": comments.flatten().unwrap_or_default(),
    }))
}

fn save_comments(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_group_id(params)?;
    let comments: Option<String> = params
        .get("comments")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().chars().take(OVERALL_COMMENTS_MAX_CHARS).collect::<String>())
        .filter(|s| !s.is_empty());

    conn.execute(
        "INSERT INTO final_sheet(group_id, overall_comments, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(group_id) DO UPDATE SET
           overall_comments = excluded.overall_comments,
           updated_at = excluded.updated_at",
        (&group_id, &comments, now_timestamp()),
    )
    .map_err(|e| db_err(e, "db_insert_failed"))?;

    Ok(json!({ "groupId": group_id, "ok": true }))
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
        "finalSheet.summary" => Some(with_conn(state, req, summary)),
        "finalSheet.getComments" => Some(with_conn(state, req, get_comments)),
        "finalSheet.saveComments" => Some(with_conn(state, req, save_comments)),
        _ => None,
    }
}
