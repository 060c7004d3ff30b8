use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::config::Settings;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_limit, get_optional_str, get_required_str, parse_optional, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::migration::{
    reconcile, ColumnMapping, ImportOptions, RecordStore, Row, RunContext, DEFAULT_LABEL,
};
use crate::source::{read_table, SourceError, SourceKind, Table};
use crate::store::SqliteStore;

const DEFAULT_HISTORY_LIMIT: i64 = 10;

impl From<SourceError> for HandlerErr {
    fn from(e: SourceError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

fn source_kind(params: &serde_json::Value) -> Result<SourceKind, HandlerErr> {
    let raw = get_optional_str(params, "type").unwrap_or_default();
    Ok(SourceKind::parse(&raw)?)
}

fn load_table(params: &serde_json::Value) -> Result<(PathBuf, SourceKind, Table), HandlerErr> {
    let path = PathBuf::from(get_required_str(params, "path")?);
    let kind = source_kind(params)?;
    let table = read_table(&path, kind)?;
    Ok((path, kind, table))
}

fn file_label(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

/// First rows of an uploaded file, for building the column mapping.
fn preview(settings: &Settings, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (_, kind, table) = load_table(params)?;
    let rows: Vec<serde_json::Value> = table
        .rows
        .iter()
        .take(settings.preview_limit)
        .map(Row::to_json)
        .collect();
    Ok(json!({
        "type": kind.as_str(),
        "columns": table.columns,
        "rows": rows,
        "total": table.rows.len(),
        "fingerprint": table.fingerprint,
    }))
}

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    match preview(&state.settings, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

struct ImportInput {
    rows: Vec<Row>,
    label: String,
    kind: SourceKind,
    fingerprint: Option<String>,
}

fn import_input(params: &serde_json::Value) -> Result<ImportInput, HandlerErr> {
    let label = get_optional_str(params, "label");
    // `data` is what older front ends post.
    let inline = ["rows", "data"]
        .into_iter()
        .find_map(|key| params.get(key).map(|v| (key, v)));
    if let Some((key, v)) = inline {
        let Some(items) = v.as_array() else {
            return Err(HandlerErr::bad_params(format!("{key} must be an array")));
        };
        return Ok(ImportInput {
            rows: items.iter().map(Row::from_json).collect(),
            label: label.unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            kind: source_kind(params)?,
            fingerprint: None,
        });
    }
    let (path, kind, table) = load_table(params)?;
    Ok(ImportInput {
        rows: table.rows,
        label: label
            .or_else(|| file_label(&path))
            .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        kind,
        fingerprint: Some(table.fingerprint),
    })
}

fn execute(
    conn: &Connection,
    settings: &Settings,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mapping: ColumnMapping = match params.get("mapping") {
        Some(v) if v.is_object() => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::bad_params(format!("invalid mapping: {}", e)))?,
        _ => return Err(HandlerErr::bad_params("missing mapping")),
    };
    let options: ImportOptions = parse_optional(params, "options")?;
    let input = import_input(params)?;

    let run = RunContext {
        run_id: Uuid::new_v4().to_string(),
        label: input.label,
        source_kind: input.kind.as_str().to_string(),
        actor: get_optional_str(params, "actor")
            .unwrap_or_else(|| settings.history_actor.clone()),
        fingerprint: input.fingerprint,
        default_year: settings.default_year(),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut store = SqliteStore::new(&tx);
    let existing = if options.skip_duplicates {
        match store.existing_emails() {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return Err(HandlerErr::query(format!("{e:#}")));
            }
        }
    } else {
        HashSet::new()
    };

    let result = reconcile(&mut store, &input.rows, &mapping, &options, existing, &run);

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    serde_json::to_value(&result).map_err(|e| HandlerErr::new("serialize_failed", e.to_string()))
}

fn handle_execute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match execute(conn, &state.settings, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = get_limit(params, DEFAULT_HISTORY_LIMIT)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, recorded_at, run_id, label, source_kind, fingerprint,
                    total, success, skipped, errors, actor
             FROM migration_history
             ORDER BY id DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let entries = stmt
        .query_map([limit], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "recordedAt": row.get::<_, String>(1)?,
                "runId": row.get::<_, Option<String>>(2)?,
                "label": row.get::<_, String>(3)?,
                "sourceKind": row.get::<_, String>(4)?,
                "fingerprint": row.get::<_, Option<String>>(5)?,
                "total": row.get::<_, i64>(6)?,
                "success": row.get::<_, i64>(7)?,
                "skipped": row.get::<_, i64>(8)?,
                "errors": row.get::<_, i64>(9)?,
                "actor": row.get::<_, String>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.preview" => Some(handle_preview(state, req)),
        "migration.execute" => Some(handle_execute(state, req)),
        "migration.history" => Some(with_db(state, req, history)),
        _ => None,
    }
}
