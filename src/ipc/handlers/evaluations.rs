use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::helpers::{get_required_f64, get_required_i64, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::recompute_subject_grade;

fn evaluations_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_i64(params, "subjectId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let grade = get_required_f64(params, "grade")?;
    let weight = get_required_i64(params, "weight")?;
    if weight < 0 {
        return Err(HandlerErr::bad_params("weight must not be negative")
            .with_details(json!({ "weight": weight })));
    }

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Err(e) = tx.execute(
        "INSERT INTO evaluations(subject_id, name, grade, weight) VALUES(?, ?, ?, ?)",
        (subject_id, &name, grade, weight),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "evaluations" })));
    }
    let evaluation_id = tx.last_insert_rowid();

    let final_grade = match recompute_subject_grade(&tx, subject_id) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_update_failed", format!("{e:#}"))
                .with_details(json!({ "table": "subjects" })));
        }
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "evaluationId": evaluation_id,
        "subjectId": subject_id,
        "finalGrade": final_grade,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.add" => Some(with_db(state, req, evaluations_add)),
        _ => None,
    }
}
