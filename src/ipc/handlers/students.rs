use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::helpers::{get_limit, get_required_i64, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::migration::Cell;
use crate::text::{normalize_email, strip_accents};

#[derive(Debug, Clone)]
struct StudentFields {
    first_name: String,
    last_name: String,
    birth_date: String,
    phone: String,
    email: String,
    career: String,
    semester: i64,
}

impl StudentFields {
    fn from_params(params: &serde_json::Value, base: Option<StudentFields>) -> Self {
        let text = |key: &str, fallback: Option<&String>| -> String {
            match params.get(key).and_then(|v| v.as_str()) {
                Some(s) => s.trim().to_string(),
                None => fallback.cloned().unwrap_or_default(),
            }
        };
        let b = base.as_ref();
        let semester = match params.get("semester") {
            Some(v) if !v.is_null() => Cell::from_json(v).integer_or(1),
            _ => b.map(|s| s.semester).unwrap_or(1),
        };
        Self {
            first_name: text("firstName", b.map(|s| &s.first_name)),
            last_name: text("lastName", b.map(|s| &s.last_name)),
            birth_date: text("birthDate", b.map(|s| &s.birth_date)),
            phone: text("phone", b.map(|s| &s.phone)),
            email: normalize_email(&text("email", b.map(|s| &s.email))),
            career: strip_accents(&text("career", b.map(|s| &s.career))),
            semester,
        }
    }

    fn validate(&self) -> Result<(), HandlerErr> {
        let missing: Vec<&str> = [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
            ("career", &self.career),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HandlerErr::bad_params("missing required fields")
                .with_details(json!({ "missing": missing })))
        }
    }
}

fn load_student(conn: &Connection, student_id: i64) -> Result<StudentFields, HandlerErr> {
    conn.query_row(
        "SELECT first_name, last_name, COALESCE(birth_date, ''), COALESCE(phone, ''),
                email, career, semester
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentFields {
                first_name: r.get(0)?,
                last_name: r.get(1)?,
                birth_date: r.get(2)?,
                phone: r.get(3)?,
                email: r.get(4)?,
                career: r.get(5)?,
                semester: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

/// Fails when another student already owns `email`.
fn ensure_email_free(conn: &Connection, email: &str, except: Option<i64>) -> Result<(), HandlerErr> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM students WHERE lower(trim(email)) = ? AND id != ? LIMIT 1",
            (email, except.unwrap_or(-1)),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match taken {
        Some(id) => Err(HandlerErr::new("duplicate_email", format!("email {} already exists", email))
            .with_details(json!({ "studentId": id }))),
        None => Ok(()),
    }
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let s = StudentFields::from_params(params, None);
    s.validate()?;
    ensure_email_free(conn, &s.email, None)?;

    conn.execute(
        "INSERT INTO students(first_name, last_name, birth_date, phone, email, career, semester)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &s.first_name,
            &s.last_name,
            &s.birth_date,
            &s.phone,
            &s.email,
            &s.career,
            s.semester,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "studentId": conn.last_insert_rowid() }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // SQLite treats a negative LIMIT as no limit.
    let limit = get_limit(params, -1)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, birth_date, phone, email, career, semester, created_at
             FROM students
             ORDER BY id DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([limit], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "birthDate": r.get::<_, Option<String>>(3)?,
                "phone": r.get::<_, Option<String>>(4)?,
                "email": r.get::<_, String>(5)?,
                "career": r.get::<_, String>(6)?,
                "semester": r.get::<_, i64>(7)?,
                "createdAt": r.get::<_, Option<String>>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students }))
}

fn evaluations_for(conn: &Connection, subject_id: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade, weight FROM evaluations WHERE subject_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map([subject_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, f64>(2)?,
                "weight": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn subjects_for(conn: &Connection, semester_id: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, final_grade FROM subjects WHERE semester_id = ? ORDER BY id",
    )?;
    let subjects = stmt
        .query_map([semester_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(subjects.len());
    for (id, name, final_grade) in subjects {
        out.push(json!({
            "id": id,
            "name": name,
            "finalGrade": final_grade,
            "evaluations": evaluations_for(conn, id)?,
        }));
    }
    Ok(out)
}

fn students_detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_i64(params, "studentId")?;
    let s = load_student(conn, student_id)?;

    let semesters: Vec<(i64, i64, i64, String)> = conn
        .prepare(
            "SELECT id, number, year, status FROM semesters
             WHERE student_id = ?
             ORDER BY year DESC, number DESC, id",
        )
        .and_then(|mut stmt| {
            let rows = stmt
                .query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                .collect();
            rows
        })
        .map_err(HandlerErr::query)?;

    let mut semesters_json = Vec::with_capacity(semesters.len());
    for (id, number, year, status) in semesters {
        let subjects = subjects_for(conn, id).map_err(HandlerErr::query)?;
        semesters_json.push(json!({
            "id": id,
            "number": number,
            "year": year,
            "status": status,
            "subjects": subjects,
        }));
    }

    Ok(json!({
        "student": {
            "id": student_id,
            "firstName": s.first_name,
            "lastName": s.last_name,
            "birthDate": s.birth_date,
            "phone": s.phone,
            "email": s.email,
            "career": s.career,
            "semester": s.semester,
        },
        "semesters": semesters_json,
    }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_i64(params, "studentId")?;
    let current = load_student(conn, student_id)?;
    let s = StudentFields::from_params(params, Some(current));
    s.validate()?;
    ensure_email_free(conn, &s.email, Some(student_id))?;

    conn.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, birth_date = ?, phone = ?,
             email = ?, career = ?, semester = ?
         WHERE id = ?",
        (
            &s.first_name,
            &s.last_name,
            &s.birth_date,
            &s.phone,
            &s.email,
            &s.career,
            s.semester,
            student_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "ok": true, "studentId": student_id }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_i64(params, "studentId")?;
    load_student(conn, student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Dependency order; the schema has no ON DELETE CASCADE.
    let steps: [(&str, &str); 4] = [
        (
            "evaluations",
            "DELETE FROM evaluations WHERE subject_id IN (
               SELECT sub.id FROM subjects sub
               JOIN semesters se ON se.id = sub.semester_id
               WHERE se.student_id = ?
             )",
        ),
        (
            "subjects",
            "DELETE FROM subjects WHERE semester_id IN (
               SELECT id FROM semesters WHERE student_id = ?
             )",
        ),
        ("semesters", "DELETE FROM semesters WHERE student_id = ?"),
        ("students", "DELETE FROM students WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [student_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": table })));
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn students_subjects(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_i64(params, "studentId")?;
    load_student(conn, student_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT sub.id, sub.name, sub.final_grade, se.number, se.year
             FROM subjects sub
             JOIN semesters se ON se.id = sub.semester_id
             WHERE se.student_id = ?
             ORDER BY se.year DESC, se.number DESC, sub.name",
        )
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([student_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "finalGrade": r.get::<_, Option<f64>>(2)?,
                "semester": r.get::<_, i64>(3)?,
                "year": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(with_db(state, req, students_create)),
        "students.list" => Some(with_db(state, req, students_list)),
        "students.detail" => Some(with_db(state, req, students_detail)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.subjects" => Some(with_db(state, req, students_subjects)),
        _ => None,
    }
}
