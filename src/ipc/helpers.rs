//! Parameter validation shared across handlers. Formats follow the
//! portal's identifier rules: group ids like `BIA-01`, plain alphanumeric
//! roll numbers, snake_case criteria ids.

pub fn valid_group_id(group_id: &str) -> bool {
    !group_id.is_empty()
        && group_id.len() <= 20
        && group_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}

pub fn valid_roll_no(roll_no: &str) -> bool {
    !roll_no.is_empty() && roll_no.len() <= 15 && roll_no.chars().all(|ch| ch.is_ascii_alphanumeric())
}

pub fn valid_criteria_id(criteria_id: &str) -> bool {
    !criteria_id.is_empty()
        && criteria_id.len() <= 50
        && criteria_id
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch == '_')
}

/// Reviews 0..4 carry marks and responses; 5 is the final sheet and is only
/// valid where a caller explicitly allows it (PDF generation).
pub fn valid_review_no(review_no: i64, allow_final_sheet: bool) -> bool {
    (0..=4).contains(&review_no) || (allow_final_sheet && review_no == crate::config::FINAL_SHEET_REVIEW)
}
