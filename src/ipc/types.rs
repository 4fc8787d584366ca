use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::grid::EvalGrid;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The one open grid session, stamped with the generation it was created
/// under. Mutating calls must echo the generation back; a mismatch means
/// the caller is working against a stale load and is discarded.
pub struct GridSession {
    pub generation: u64,
    pub grid: EvalGrid,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub grid: Option<GridSession>,
    pub grid_generation: u64,
}
