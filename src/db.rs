use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

use crate::config;

pub const DB_FILE: &str = "reviewdesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            group_id TEXT PRIMARY KEY,
            division TEXT,
            project_domain TEXT,
            project_title TEXT NOT NULL,
            sponsor_company TEXT,
            guide_name TEXT,
            mentor_name TEXT,
            mentor_email TEXT,
            mentor_mobile TEXT,
            evaluator1_name TEXT,
            evaluator2_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            roll_no TEXT NOT NULL UNIQUE,
            student_name TEXT NOT NULL,
            contact_details TEXT,
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_members_group ON members(group_id)",
        [],
    )?;

    // One presence flag per (member, review); missing rows read as present.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_attendance(
            group_id TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            review_no INTEGER NOT NULL,
            present INTEGER NOT NULL,
            PRIMARY KEY(group_id, roll_no, review_no),
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Static configuration tables, keyed by review number instead of one
    // table family per review. Seeded below from the built-in milestones.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS performance_criteria(
            review_no INTEGER NOT NULL,
            criteria_id TEXT NOT NULL,
            criteria_text TEXT NOT NULL,
            max_marks REAL NOT NULL,
            input_kind TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            PRIMARY KEY(review_no, criteria_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_questions(
            review_no INTEGER NOT NULL,
            question_code TEXT NOT NULL,
            section TEXT NOT NULL,
            question_text TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            PRIMARY KEY(review_no, question_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_deliverables(
            review_no INTEGER NOT NULL,
            item_text TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            PRIMARY KEY(review_no, display_order)
        )",
        [],
    )?;

    // One row per cell. The legacy wide tables kept a generated `total`
    // column; with narrow rows the total is SUM(COALESCE(num_value, 0))
    // over numeric-kind criteria.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_marks(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            review_no INTEGER NOT NULL,
            criteria_id TEXT NOT NULL,
            num_value REAL,
            text_value TEXT,
            UNIQUE(group_id, roll_no, review_no, criteria_id),
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_review_marks_group ON review_marks(group_id, review_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_responses(
            group_id TEXT NOT NULL,
            review_no INTEGER NOT NULL,
            submission_date TEXT NOT NULL,
            comments TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(group_id, review_no),
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_response_answers(
            group_id TEXT NOT NULL,
            review_no INTEGER NOT NULL,
            question_code TEXT NOT NULL,
            response_value TEXT NOT NULL,
            PRIMARY KEY(group_id, review_no, question_code),
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS panel_assignments(
            group_id TEXT PRIMARY KEY,
            track INTEGER,
            panel_professors TEXT,
            location TEXT,
            guide TEXT,
            reviewer1 TEXT,
            reviewer2 TEXT,
            reviewer3 TEXT,
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pdf_generation_logs(
            id TEXT PRIMARY KEY,
            review_no INTEGER NOT NULL,
            group_id TEXT NOT NULL,
            generated_by TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pdf_logs_group ON pdf_generation_logs(group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_sheet(
            group_id TEXT PRIMARY KEY,
            overall_comments TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES projects(group_id) ON DELETE CASCADE
        )",
        [],
    )?;

    seed_review_config(&conn)?;

    Ok(conn)
}

/// Upsert the built-in milestone configuration so label or mark changes in
/// a newer binary propagate into existing workspaces.
fn seed_review_config(conn: &Connection) -> anyhow::Result<()> {
    for m in config::milestones() {
        for (order, c) in m.criteria.iter().enumerate() {
            conn.execute(
                "INSERT INTO performance_criteria(
                    review_no, criteria_id, criteria_text, max_marks, input_kind, display_order
                 ) VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(review_no, criteria_id) DO UPDATE SET
                   criteria_text = excluded.criteria_text,
                   max_marks = excluded.max_marks,
                   input_kind = excluded.input_kind,
                   display_order = excluded.display_order",
                (m.review_no, c.id, c.label, c.max_marks, c.kind.as_str(), order as i64),
            )?;
        }
        for (order, q) in m.questions.iter().enumerate() {
            conn.execute(
                "INSERT INTO review_questions(
                    review_no, question_code, section, question_text, display_order
                 ) VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(review_no, question_code) DO UPDATE SET
                   section = excluded.section,
                   question_text = excluded.question_text,
                   display_order = excluded.display_order",
                (m.review_no, q.code, q.section, q.text, order as i64),
            )?;
        }
        for (order, item) in m.deliverables.iter().enumerate() {
            conn.execute(
                "INSERT INTO review_deliverables(review_no, item_text, display_order)
                 VALUES(?, ?, ?)
                 ON CONFLICT(review_no, display_order) DO UPDATE SET
                   item_text = excluded.item_text",
                (m.review_no, item, order as i64),
            )?;
        }
    }
    Ok(())
}

pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
