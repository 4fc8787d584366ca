//! Pure aggregation helpers shared by the grid, the final sheet and the
//! report models.

use std::collections::HashMap;

/// 1-decimal rounding used everywhere a total is displayed.
pub fn round_to_1dp(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Review numbers that appear on the final sheet. Review 0 is the synopsis
/// checkpoint and is graded, but the consolidated sheet reports the four
/// assessed reviews only.
pub const FINAL_SHEET_REVIEWS: [i64; 4] = [1, 2, 3, 4];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewCell {
    /// Attendance flag for that review was false; excluded from the grand
    /// total.
    Absent,
    Score(f64),
}

#[derive(Debug, Clone)]
pub struct FinalSheetMember {
    pub roll_no: String,
    pub student_name: String,
    /// One presence flag per entry of [`FINAL_SHEET_REVIEWS`].
    pub attendance: [bool; 4],
}

#[derive(Debug, Clone)]
pub struct FinalSheetRow {
    pub roll_no: String,
    pub student_name: String,
    pub cells: [ReviewCell; 4],
    pub grand_total: f64,
}

/// Build the consolidated rows: one cell per assessed review, `Absent`
/// where the member missed that review, otherwise the stored total (0.0
/// when no marks were saved). Grand total sums non-absent cells only.
pub fn final_sheet_rows(
    members: &[FinalSheetMember],
    totals_by_review: &HashMap<i64, HashMap<String, f64>>,
) -> Vec<FinalSheetRow> {
    members
        .iter()
        .map(|m| {
            let mut cells = [ReviewCell::Score(0.0); 4];
            let mut grand_total = 0.0;
            for (i, review_no) in FINAL_SHEET_REVIEWS.iter().enumerate() {
                if !m.attendance[i] {
                    cells[i] = ReviewCell::Absent;
                    continue;
                }
                let total = totals_by_review
                    .get(review_no)
                    .and_then(|per_roll| per_roll.get(&m.roll_no))
                    .copied()
                    .unwrap_or(0.0);
                let total = round_to_1dp(total);
                cells[i] = ReviewCell::Score(total);
                grand_total += total;
            }
            FinalSheetRow {
                roll_no: m.roll_no.clone(),
                student_name: m.student_name.clone(),
                cells,
                grand_total: round_to_1dp(grand_total),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(entries: &[(i64, &str, f64)]) -> HashMap<i64, HashMap<String, f64>> {
        let mut out: HashMap<i64, HashMap<String, f64>> = HashMap::new();
        for (review, roll, total) in entries {
            out.entry(*review).or_default().insert((*roll).to_string(), *total);
        }
        out
    }

    #[test]
    fn round_to_1dp_handles_halves() {
        assert_eq!(round_to_1dp(13.5), 13.5);
        assert_eq!(round_to_1dp(35.6818), 35.7);
        assert_eq!(round_to_1dp(0.0), 0.0);
    }

    #[test]
    fn absent_review_is_excluded_from_grand_total() {
        let members = vec![FinalSheetMember {
            roll_no: "A2".into(),
            student_name: "Kiran Shah".into(),
            attendance: [true, false, true, true],
        }];
        let totals = totals(&[
            (1, "A2", 20.0),
            (2, "A2", 25.0),
            (3, "A2", 18.5),
            (4, "A2", 30.0),
        ]);
        let rows = final_sheet_rows(&members, &totals);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells[1], ReviewCell::Absent);
        // 20.0 + 18.5 + 30.0, the review-2 total never contributes.
        assert_eq!(rows[0].grand_total, 68.5);
    }

    #[test]
    fn missing_marks_read_as_zero_when_present() {
        let members = vec![FinalSheetMember {
            roll_no: "A1".into(),
            student_name: "Asha Rao".into(),
            attendance: [true, true, true, true],
        }];
        let rows = final_sheet_rows(&members, &totals(&[(3, "A1", 12.0)]));
        assert_eq!(rows[0].cells[0], ReviewCell::Score(0.0));
        assert_eq!(rows[0].cells[2], ReviewCell::Score(12.0));
        assert_eq!(rows[0].grand_total, 12.0);
    }
}
