use rusqlite::Connection;

use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats;

fn dashboard(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let d = stats::dashboard(conn).map_err(|e| HandlerErr::query(format!("{e:#}")))?;
    serde_json::to_value(d).map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.dashboard" => Some(with_db(state, req, dashboard)),
        _ => None,
    }
}
