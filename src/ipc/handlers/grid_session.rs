//! Adapter between IPC requests and the [`EvalGrid`] state container.
//!
//! One grid is open at a time. Every `grid.open` bumps a generation
//! counter and the mutating calls must echo it back; an edit issued
//! against an earlier load is discarded as stale instead of mutating
//! whichever grid happens to be open now.

use crate::config;
use crate::grid::{EvalGrid, GridMember};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::{attendance, marks};
use crate::ipc::types::{AppState, GridSession, Request};
use serde_json::json;

fn handle_grid_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (group_id, review_no) = match attendance::get_group_review(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(milestone) = config::milestone(review_no) else {
        return err(
            &req.id,
            "bad_params",
            format!("review {} has no marks sheet", review_no),
            None,
        );
    };
    match attendance::group_exists(conn, &group_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "project not found",
                Some(json!({ "groupId": group_id })),
            )
        }
        Err(e) => return e.response(&req.id),
    }

    let members = match attendance::list_members_with_attendance(conn, &group_id, review_no) {
        Ok(rows) => rows
            .into_iter()
            .map(|(roll_no, name, present)| GridMember {
                roll_no,
                name,
                present,
            })
            .collect::<Vec<_>>(),
        Err(e) => return e.response(&req.id),
    };
    if members.is_empty() {
        return err(
            &req.id,
            "not_found",
            format!("no members found for group {}", group_id),
            None,
        );
    }

    let mark_rows = match marks::load_mark_rows(conn, &group_id, review_no) {
        Ok(rows) => rows,
        Err(e) => return e.response(&req.id),
    };

    let mut grid = EvalGrid::new(&group_id, milestone, members);
    grid.load_marks(&mark_rows);

    state.grid_generation += 1;
    let generation = state.grid_generation;
    let mut snapshot = grid.snapshot();
    snapshot["generation"] = json!(generation);
    state.grid = Some(GridSession { generation, grid });

    ok(&req.id, snapshot)
}

/// Fetch the open session, enforcing the generation stamp.
fn session_for<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut GridSession, serde_json::Value> {
    let generation = req
        .params
        .get("generation")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing generation", None))?;
    let current = state.grid_generation;
    let session = state
        .grid
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_grid", "open a grid first", None))?;
    if session.generation != generation {
        return Err(err(
            &req.id,
            "stale_grid",
            "grid was reloaded since this edit was issued",
            Some(json!({ "currentGeneration": current })),
        ));
    }
    Ok(session)
}

fn handle_grid_set_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    let criteria_id = match req.params.get("criteriaId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing criteriaId", None),
    };
    let raw = match req.params.get("value") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(_) => return err(&req.id, "bad_params", "value must be a string or number", None),
    };

    let session = match session_for(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.grid.set_cell(&roll_no, &criteria_id, &raw) {
        Ok(value) => {
            let total = session.grid.total_for(&roll_no);
            ok(
                &req.id,
                json!({
                    "value": value,
                    "total": total,
                }),
            )
        }
        Err(e) => err(&req.id, e.code(), e.message(), None),
    }
}

fn handle_grid_set_attendance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    let Some(present) = req.params.get("present").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing present", None);
    };

    let session = match session_for(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    // Cascade into the grid first; the persisted flag follows. A failed
    // persist leaves the optimistic grid state in place and is reported.
    if let Err(e) = session.grid.set_attendance(&roll_no, present) {
        return err(&req.id, e.code(), e.message(), None);
    }
    let group_id = session.grid.group_id.clone();
    let review_no = session.grid.milestone.review_no;
    let cells: Vec<serde_json::Value> = session
        .grid
        .milestone
        .criteria
        .iter()
        .map(|c| {
            let cell = session.grid.cell(c.id, &roll_no);
            json!({
                "criteriaId": c.id,
                "value": cell.and_then(|cl| cl.value.clone()),
                "locked": cell.map(|cl| cl.locked).unwrap_or(false),
            })
        })
        .collect();
    let total = session.grid.total_for(&roll_no);

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = attendance::upsert_attendance_flag(conn, &group_id, &roll_no, review_no, present)
    {
        return e.response(&req.id);
    }

    ok(
        &req.id,
        json!({
            "rollNo": roll_no,
            "present": present,
            "cells": cells,
            "total": total,
        }),
    )
}

fn handle_grid_override_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let roll_no = match req.params.get("rollNo").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing rollNo", None),
    };
    let criteria_id = match req.params.get("criteriaId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing criteriaId", None),
    };

    let session = match session_for(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.grid.override_cell(&roll_no, &criteria_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, e.code(), e.message(), None),
    }
}

fn handle_grid_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match session_for(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let group_id = session.grid.group_id.clone();
    let review_no = session.grid.milestone.review_no;
    let milestone = session.grid.milestone;
    let rows = session.grid.mark_rows();

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut saved = 0_usize;
    for (criteria_id, roll_no, value) in &rows {
        let Some(criterion) = milestone.criterion(criteria_id) else {
            continue;
        };
        if let Err(e) =
            marks::upsert_mark_cell(&tx, &group_id, roll_no, review_no, criterion, value.as_deref())
        {
            return e.response(&req.id);
        }
        if value.is_some() {
            saved += 1;
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "saved": saved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.open" => Some(handle_grid_open(state, req)),
        "grid.setCell" => Some(handle_grid_set_cell(state, req)),
        "grid.setAttendance" => Some(handle_grid_set_attendance(state, req)),
        "grid.overrideCell" => Some(handle_grid_override_cell(state, req)),
        "grid.save" => Some(handle_grid_save(state, req)),
        _ => None,
    }
}
