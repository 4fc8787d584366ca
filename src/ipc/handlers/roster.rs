use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{valid_group_id, valid_roll_no};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
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

fn db_err(e: impl std::fmt::Display, code: &'static str) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

fn opt_str(obj: &serde_json::Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Loose name comparison used when excluding the guide from a panel:
/// case-insensitive, titles (Dr/Prof) and single-letter initials dropped.
fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .replace('.', " ")
        .split_whitespace()
        .filter(|w| !matches!(*w, "dr" | "prof" | "professor"))
        .filter(|w| w.len() > 1)
        .collect::<Vec<_>>()
        .join(" ")
}

fn import_groups(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(groups) = params.get("groups").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing groups[]".to_string(),
            details: None,
        });
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(e, "db_tx_failed"))?;
    let mut groups_imported = 0_usize;
    let mut members_imported = 0_usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();

    for (i, group) in groups.iter().enumerate() {
        let Some(group_id) = opt_str(group, "groupId") else {
            skipped.push(json!({ "index": i, "reason": "missing groupId" }));
            continue;
        };
        if !valid_group_id(&group_id) {
            skipped.push(json!({ "index": i, "reason": "invalid groupId", "groupId": group_id }));
            continue;
        }
        let Some(project_title) = opt_str(group, "projectTitle") else {
            skipped.push(json!({ "index": i, "reason": "missing projectTitle", "groupId": group_id }));
            continue;
        };

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO projects(
                    group_id, division, project_domain, project_title, sponsor_company,
                    guide_name, mentor_name, mentor_email, mentor_mobile,
                    evaluator1_name, evaluator2_name
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)",
                (
                    &group_id,
                    opt_str(group, "division"),
                    opt_str(group, "projectDomain"),
                    &project_title,
                    opt_str(group, "sponsorCompany"),
                    opt_str(group, "guideName"),
                    opt_str(group, "mentorName"),
                    opt_str(group, "mentorEmail"),
                    opt_str(group, "mentorMobile"),
                ),
            )
            .map_err(|e| db_err(e, "db_insert_failed"))?;
        groups_imported += inserted;

        let members = group
            .get("members")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for member in &members {
            let Some(roll_no) = opt_str(member, "rollNo") else {
                skipped.push(json!({ "index": i, "reason": "missing rollNo", "groupId": group_id }));
                continue;
            };
            if !valid_roll_no(&roll_no) {
                skipped.push(json!({ "index": i, "reason": "invalid rollNo", "rollNo": roll_no }));
                continue;
            }
            let Some(student_name) = opt_str(member, "studentName") else {
                skipped.push(json!({ "index": i, "reason": "missing studentName", "rollNo": roll_no }));
                continue;
            };
            let member_id = Uuid::new_v4().to_string();
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO members(id, group_id, roll_no, student_name, contact_details)
                     VALUES(?, ?, ?, ?, ?)",
                    (
                        &member_id,
                        &group_id,
                        &roll_no,
                        &student_name,
                        opt_str(member, "contactDetails"),
                    ),
                )
                .map_err(|e| db_err(e, "db_insert_failed"))?;
            members_imported += inserted;
        }
    }

    tx.commit().map_err(|e| db_err(e, "db_commit_failed"))?;

    let mut result = json!({
        "groupsImported": groups_imported,
        "membersImported": members_imported,
    });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    Ok(result)
}

fn assign_panel(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(group_id) = opt_str(params, "groupId") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing groupId".to_string(),
            details: None,
        });
    };
    let track = params.get("track").and_then(|v| v.as_i64());
    let location = opt_str(params, "location");
    let professors: Vec<String> = params
        .get("panelProfessors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| s.len() > 3)
                .collect()
        })
        .unwrap_or_default();
    if professors.len() < 2 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "panelProfessors needs at least two names".to_string(),
            details: None,
        });
    }

    let guide_name: Option<String> = conn
        .query_row(
            "SELECT guide_name FROM projects WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err(e, "db_query_failed"))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "project not found".to_string(),
            details: Some(json!({ "groupId": group_id })),
        })?;

    // The guide never evaluates their own group.
    let guide_norm = guide_name.as_deref().map(normalize_name).unwrap_or_default();
    let evaluators: Vec<&String> = professors
        .iter()
        .filter(|p| guide_norm.is_empty() || normalize_name(p) != guide_norm)
        .collect();
    let Some(reviewer1) = evaluators.first() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "no eligible evaluator after excluding the guide".to_string(),
            details: None,
        });
    };
    let reviewer2 = evaluators.get(1).map(|s| s.as_str());

    conn.execute(
        "INSERT INTO panel_assignments(
            group_id, track, panel_professors, location, guide, reviewer1, reviewer2, reviewer3
         ) VALUES(?, ?, ?, ?, ?, ?, ?, NULL)
         ON CONFLICT(group_id) DO UPDATE SET
           track = excluded.track,
           panel_professors = excluded.panel_professors,
           location = excluded.location,
           guide = excluded.guide,
           reviewer1 = excluded.reviewer1,
           reviewer2 = excluded.reviewer2",
        (
            &group_id,
            track,
            professors.join("\n"),
            location,
            &guide_name,
            reviewer1.as_str(),
            reviewer2,
        ),
    )
    .map_err(|e| db_err(e, "db_insert_failed"))?;

    conn.execute(
        "UPDATE projects SET evaluator1_name = ?, evaluator2_name = ? WHERE group_id = ?",
        (reviewer1.as_str(), reviewer2, &group_id),
    )
    .map_err(|e| db_err(e, "db_update_failed"))?;

    Ok(json!({
        "groupId": group_id,
        "reviewer1": reviewer1,
        "reviewer2": reviewer2,
    }))
}

fn list_groups(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT m.group_id, m.roll_no, m.student_name, m.contact_details
             FROM members m
             ORDER BY m.group_id, m.roll_no",
        )
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;

    let mut att_stmt = conn
        .prepare("SELECT roll_no, review_no, present FROM review_attendance")
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let att_rows = att_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(e, "db_query_failed"))?;
    let mut attendance: std::collections::HashMap<(String, i64), bool> =
        std::collections::HashMap::new();
    for (roll, review, present) in att_rows {
        attendance.insert((roll, review), present != 0);
    }

    let mut groups: Vec<serde_json::Value> = Vec::new();
    let mut current: Option<(String, Vec<serde_json::Value>)> = None;
    for (group_id, roll_no, student_name, contact_details) in rows {
        let flags: Vec<bool> = (0..crate::config::REVIEW_COUNT)
            .map(|review| {
                attendance
                    .get(&(roll_no.clone(), review))
                    .copied()
                    .unwrap_or(true)
            })
            .collect();
        let member = json!({
            "rollNo": roll_no,
            "studentName": student_name,
            "contactDetails": contact_details,
            "attendance": flags,
        });
        match &mut current {
            Some((gid, members)) if *gid == group_id => members.push(member),
            _ => {
                if let Some((gid, members)) = current.take() {
                    groups.push(json!({ "groupId": gid, "members": members }));
                }
                current = Some((group_id, vec![member]));
            }
        }
    }
    if let Some((gid, members)) = current.take() {
        groups.push(json!({ "groupId": gid, "members": members }));
    }

    Ok(json!({ "groups": groups }))
}

fn delete_project(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(group_id) = opt_str(params, "groupId") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing groupId".to_string(),
            details: None,
        });
    };

    // Dependent rows go with the project via ON DELETE CASCADE.
    let deleted = conn
        .execute("DELETE FROM projects WHERE group_id = ?", [&group_id])
        .map_err(|e| db_err(e, "db_delete_failed"))?;
    if deleted == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "project not found".to_string(),
            details: Some(json!({ "groupId": group_id })),
        });
    }
    Ok(json!({ "ok": true }))
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
        "roster.importGroups" => Some(with_conn(state, req, import_groups)),
        "roster.assignPanel" => Some(with_conn(state, req, assign_panel)),
        "roster.listGroups" => Some(with_conn(state, req, |c, _| list_groups(c))),
        "projects.delete" => Some(with_conn(state, req, delete_project)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_name;

    #[test]
    fn normalize_name_drops_titles_and_initials() {
        assert_eq!(normalize_name("Dr. A. P. Kulkarni"), "kulkarni");
        assert_eq!(normalize_name("Prof Meera Joshi"), "meera joshi");
        assert_eq!(normalize_name("MEERA JOSHI"), "meera joshi");
    }
}
