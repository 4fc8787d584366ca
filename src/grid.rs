//! Evaluation grid state container.
//!
//! Holds the criteria x member cell matrix for one (group, review) pair:
//! cell values, absence locks and per-member totals. All mutation goes
//! through the methods here and every mutation ends with a full totals
//! recompute; the IPC handlers are only an adapter on top of this state.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::json;

use crate::calc::round_to_1dp;
use crate::config::{InputKind, Milestone};

/// Forced display values for an absent member's cells.
pub const ABSENT_NUMERIC: &str = "0";
pub const ABSENT_TEXT: &str = "N";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    UnknownMember(String),
    UnknownCriterion(String),
    CellLocked(String),
}

impl GridError {
    pub fn code(&self) -> &'static str {
        match self {
            GridError::UnknownMember(_) => "not_found",
            GridError::UnknownCriterion(_) => "not_found",
            GridError::CellLocked(_) => "cell_locked",
        }
    }

    pub fn message(&self) -> String {
        match self {
            GridError::UnknownMember(roll) => format!("unknown roll number: {}", roll),
            GridError::UnknownCriterion(id) => format!("unknown criterion: {}", id),
            GridError::CellLocked(key) => {
                format!("cell {} is locked for an absent member", key)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridMember {
    pub roll_no: String,
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub value: Option<String>,
    pub locked: bool,
    pub overridden: bool,
}

#[derive(Debug, Clone)]
pub struct EvalGrid {
    pub group_id: String,
    pub milestone: &'static Milestone,
    pub members: Vec<GridMember>,
    cells: HashMap<String, Cell>,
    totals: HashMap<String, f64>,
}

/// Composite key used by the grid and by mark persistence.
pub fn cell_key(criteria_id: &str, roll_no: &str) -> String {
    format!("{}_{}", criteria_id, roll_no)
}

/// Clamp a raw numeric entry into `[0, max]` at 0.5 granularity.
///
/// Malformed input yields `None` (the cell resets to empty). Repeated
/// application of the result is a fixed point, so validating on every
/// keystroke never drifts the value.
pub fn validate_numeric(raw: &str, max: f64) -> Option<f64> {
    let parsed: f64 = raw.trim().parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    let clamped = parsed.clamp(0.0, max);
    Some((clamped * 2.0).round() / 2.0)
}

/// Single-character upper-cased code for text criteria.
pub fn normalize_text_mark(raw: &str) -> Option<String> {
    raw.trim()
        .chars()
        .next()
        .map(|ch| ch.to_ascii_uppercase().to_string())
}

/// Render a 0.5-granular mark the way the sheets display it.
pub fn format_mark(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

impl EvalGrid {
    /// Build the empty matrix and apply absence to members already marked
    /// absent. Building twice from the same inputs yields the same state.
    pub fn new(group_id: &str, milestone: &'static Milestone, members: Vec<GridMember>) -> Self {
        let mut grid = EvalGrid {
            group_id: group_id.to_string(),
            milestone,
            members,
            cells: HashMap::new(),
            totals: HashMap::new(),
        };
        for m in &grid.members {
            for c in grid.milestone.criteria {
                grid.cells.insert(cell_key(c.id, &m.roll_no), Cell::default());
            }
        }
        let absent: Vec<String> = grid
            .members
            .iter()
            .filter(|m| !m.present)
            .map(|m| m.roll_no.clone())
            .collect();
        for roll in absent {
            grid.force_absent_cells(&roll);
        }
        grid.recompute_totals();
        grid
    }

    /// Populate cells from stored mark rows. Cells without a stored value
    /// stay empty; locked cells keep their forced value (the absence value
    /// is authoritative until explicitly overridden).
    pub fn load_marks(&mut self, rows: &[(String, String, String)]) {
        for (criteria_id, roll_no, value) in rows {
            let key = cell_key(criteria_id, roll_no);
            match self.cells.get_mut(&key) {
                Some(cell) if !cell.locked => cell.value = Some(value.clone()),
                _ => {}
            }
        }
        self.recompute_totals();
    }

    /// Apply one edit. Returns the normalized value now held by the cell.
    pub fn set_cell(
        &mut self,
        roll_no: &str,
        criteria_id: &str,
        raw: &str,
    ) -> Result<Option<String>, GridError> {
        let criterion = self
            .milestone
            .criterion(criteria_id)
            .ok_or_else(|| GridError::UnknownCriterion(criteria_id.to_string()))?;
        if !self.members.iter().any(|m| m.roll_no == roll_no) {
            return Err(GridError::UnknownMember(roll_no.to_string()));
        }

        let key = cell_key(criteria_id, roll_no);
        let cell = self
            .cells
            .get_mut(&key)
            .ok_or_else(|| GridError::UnknownMember(roll_no.to_string()))?;
        if cell.locked {
            return Err(GridError::CellLocked(key));
        }

        cell.value = match criterion.kind {
            InputKind::Numeric => validate_numeric(raw, criterion.max_marks).map(format_mark),
            InputKind::Text => normalize_text_mark(raw),
        };
        let value = cell.value.clone();
        self.recompute_totals();
        Ok(value)
    }

    /// Attendance cascade. Absent forces every cell of the row to its
    /// placeholder value and locks it; returning to present clears the row
    /// back to editable empty cells, dropping any manual overrides.
    pub fn set_attendance(&mut self, roll_no: &str, present: bool) -> Result<(), GridError> {
        let member = self
            .members
            .iter_mut()
            .find(|m| m.roll_no == roll_no)
            .ok_or_else(|| GridError::UnknownMember(roll_no.to_string()))?;
        member.present = present;
        let roll = member.roll_no.clone();

        if present {
            for c in self.milestone.criteria {
                if let Some(cell) = self.cells.get_mut(&cell_key(c.id, &roll)) {
                    *cell = Cell::default();
                }
            }
        } else {
            self.force_absent_cells(&roll);
        }
        self.recompute_totals();
        Ok(())
    }

    /// The explicit double-click override: re-enables one locked cell of an
    /// absent member. The override lives only in this session.
    pub fn override_cell(&mut self, roll_no: &str, criteria_id: &str) -> Result<(), GridError> {
        if self.milestone.criterion(criteria_id).is_none() {
            return Err(GridError::UnknownCriterion(criteria_id.to_string()));
        }
        let key = cell_key(criteria_id, roll_no);
        let cell = self
            .cells
            .get_mut(&key)
            .ok_or_else(|| GridError::UnknownMember(roll_no.to_string()))?;
        cell.locked = false;
        cell.overridden = true;
        Ok(())
    }

    fn force_absent_cells(&mut self, roll_no: &str) {
        for c in self.milestone.criteria {
            if let Some(cell) = self.cells.get_mut(&cell_key(c.id, roll_no)) {
                cell.value = Some(match c.kind {
                    InputKind::Numeric => ABSENT_NUMERIC.to_string(),
                    InputKind::Text => ABSENT_TEXT.to_string(),
                });
                cell.locked = true;
                cell.overridden = false;
            }
        }
    }

    /// Full recompute over every member; numeric-kind cells only. Partial
    /// updates are never attempted, so totals cannot drift from stale sums.
    pub fn recompute_totals(&mut self) {
        self.totals.clear();
        for m in &self.members {
            let mut sum = 0.0;
            for c in self.milestone.criteria {
                if c.kind != InputKind::Numeric {
                    continue;
                }
                if let Some(cell) = self.cells.get(&cell_key(c.id, &m.roll_no)) {
                    if let Some(v) = cell.value.as_deref().and_then(|v| v.parse::<f64>().ok()) {
                        sum += v;
                    }
                }
            }
            self.totals.insert(m.roll_no.clone(), round_to_1dp(sum));
        }
    }

    pub fn total_for(&self, roll_no: &str) -> Option<f64> {
        self.totals.get(roll_no).copied()
    }

    pub fn cell(&self, criteria_id: &str, roll_no: &str) -> Option<&Cell> {
        self.cells.get(&cell_key(criteria_id, roll_no))
    }

    /// Non-empty cells as (criteria_id, roll_no, value) rows for persistence.
    pub fn mark_rows(&self) -> Vec<(&'static str, String, Option<String>)> {
        let mut rows = Vec::new();
        for m in &self.members {
            for c in self.milestone.criteria {
                let value = self
                    .cells
                    .get(&cell_key(c.id, &m.roll_no))
                    .and_then(|cell| cell.value.clone());
                rows.push((c.id, m.roll_no.clone(), value));
            }
        }
        rows
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let cells: serde_json::Map<String, serde_json::Value> = self
            .cells
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        json!({
            "groupId": self.group_id,
            "reviewNo": self.milestone.review_no,
            "title": self.milestone.title,
            "criteria": self.milestone.criteria,
            "members": self.members,
            "cells": cells,
            "totals": self.totals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::milestone;

    fn members() -> Vec<GridMember> {
        vec![
            GridMember {
                roll_no: "A1".into(),
                name: "Asha Rao".into(),
                present: true,
            },
            GridMember {
                roll_no: "A2".into(),
                name: "Kiran Shah".into(),
                present: true,
            },
        ]
    }

    fn review3_grid() -> EvalGrid {
        EvalGrid::new("BIA-01", milestone(3).unwrap(), members())
    }

    #[test]
    fn validate_numeric_clamps_rounds_and_is_idempotent() {
        assert_eq!(validate_numeric("12", 10.0), Some(10.0));
        assert_eq!(validate_numeric("3.3", 7.0), Some(3.5));
        assert_eq!(validate_numeric("-2", 10.0), Some(0.0));
        assert_eq!(validate_numeric("7.75", 10.0), Some(8.0));
        assert_eq!(validate_numeric("abc", 10.0), None);
        assert_eq!(validate_numeric("", 10.0), None);
        for raw in ["12", "3.3", "7.75", "0.5"] {
            let once = validate_numeric(raw, 10.0).unwrap();
            let twice = validate_numeric(&once.to_string(), 10.0).unwrap();
            assert_eq!(once, twice, "revalidating {} drifted", raw);
        }
    }

    #[test]
    fn totals_sum_numeric_cells_only() {
        let mut grid = review3_grid();
        assert_eq!(grid.set_cell("A1", "testing_coverage", "12").unwrap(), Some("10".into()));
        assert_eq!(grid.set_cell("A1", "test_cases", "3.3").unwrap(), Some("3.5".into()));
        assert_eq!(grid.set_cell("A1", "test_report_submitted", "y").unwrap(), Some("Y".into()));
        assert_eq!(grid.total_for("A1"), Some(13.5));
        assert_eq!(grid.total_for("A2"), Some(0.0));
    }

    #[test]
    fn malformed_entry_resets_cell_and_totals() {
        let mut grid = review3_grid();
        grid.set_cell("A1", "demo_quality", "6").unwrap();
        assert_eq!(grid.total_for("A1"), Some(6.0));
        assert_eq!(grid.set_cell("A1", "demo_quality", "6..5").unwrap(), None);
        assert_eq!(grid.cell("demo_quality", "A1").unwrap().value, None);
        assert_eq!(grid.total_for("A1"), Some(0.0));
    }

    #[test]
    fn absence_forces_and_locks_then_clears_to_empty() {
        let mut grid = review3_grid();
        grid.set_cell("A2", "testing_coverage", "8").unwrap();
        grid.set_attendance("A2", false).unwrap();

        let cell = grid.cell("testing_coverage", "A2").unwrap();
        assert_eq!(cell.value.as_deref(), Some(ABSENT_NUMERIC));
        assert!(cell.locked);
        assert_eq!(
            grid.cell("test_report_submitted", "A2").unwrap().value.as_deref(),
            Some(ABSENT_TEXT)
        );
        assert_eq!(grid.total_for("A2"), Some(0.0));
        assert!(matches!(
            grid.set_cell("A2", "testing_coverage", "5"),
            Err(GridError::CellLocked(_))
        ));

        // Returning to present restores editable empty cells, not the
        // pre-absence values.
        grid.set_attendance("A2", true).unwrap();
        let cell = grid.cell("testing_coverage", "A2").unwrap();
        assert_eq!(cell.value, None);
        assert!(!cell.locked);
        assert_eq!(grid.total_for("A2"), Some(0.0));
    }

    #[test]
    fn override_reenables_single_cell() {
        let mut grid = review3_grid();
        grid.set_attendance("A1", false).unwrap();
        grid.override_cell("A1", "test_cases").unwrap();
        assert_eq!(grid.set_cell("A1", "test_cases", "4").unwrap(), Some("4".into()));
        // Other cells of the row stay locked.
        assert!(matches!(
            grid.set_cell("A1", "testing_coverage", "4"),
            Err(GridError::CellLocked(_))
        ));
        assert_eq!(grid.total_for("A1"), Some(4.0));
        // Toggling attendance drops the override again.
        grid.set_attendance("A1", true).unwrap();
        assert!(!grid.cell("test_cases", "A1").unwrap().overridden);
    }

    #[test]
    fn load_marks_skips_locked_rows_and_missing_cells_stay_empty() {
        let mut members = members();
        members[1].present = false;
        let mut grid = EvalGrid::new("BIA-01", milestone(3).unwrap(), members);
        grid.load_marks(&[
            ("testing_coverage".into(), "A1".into(), "9".into()),
            ("testing_coverage".into(), "A2".into(), "7".into()),
        ]);
        assert_eq!(grid.cell("testing_coverage", "A1").unwrap().value.as_deref(), Some("9"));
        // A2 is absent: the forced value wins over the stored one.
        assert_eq!(
            grid.cell("testing_coverage", "A2").unwrap().value.as_deref(),
            Some(ABSENT_NUMERIC)
        );
        assert_eq!(grid.cell("test_cases", "A1").unwrap().value, None);
        assert_eq!(grid.total_for("A1"), Some(9.0));
    }
}
