use std::collections::HashSet;

use anyhow::Context;
use rusqlite::Connection;

use crate::migration::{
    weighted_final_grade, EvaluationEntry, MigrationHistoryEntry, NewStudent, RecordStore,
};
use crate::text::normalize_email;

/// [`RecordStore`] over a workspace connection. The caller owns the outer
/// transaction; each student graph gets its own savepoint inside it.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RecordStore for SqliteStore<'_> {
    fn existing_emails(&mut self) -> anyhow::Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT email FROM students")?;
        let emails = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(|e| normalize_email(&e)))
            .collect::<Result<HashSet<_>, _>>()
            .context("load student emails")?;
        Ok(emails)
    }

    fn insert_student(&mut self, s: &NewStudent) -> anyhow::Result<i64> {
        self.conn
            .execute(
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
            .context("insert student")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_semester(
        &mut self,
        student_id: i64,
        number: i64,
        year: i64,
        status: &str,
    ) -> anyhow::Result<i64> {
        self.conn
            .execute(
                "INSERT INTO semesters(student_id, number, year, status) VALUES(?, ?, ?, ?)",
                (student_id, number, year, status),
            )
            .context("insert semester")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_subject(
        &mut self,
        semester_id: i64,
        name: &str,
        final_grade: Option<f64>,
    ) -> anyhow::Result<i64> {
        self.conn
            .execute(
                "INSERT INTO subjects(semester_id, name, final_grade) VALUES(?, ?, ?)",
                (semester_id, name, final_grade),
            )
            .context("insert subject")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_evaluation(
        &mut self,
        subject_id: i64,
        name: &str,
        grade: f64,
        weight: i64,
    ) -> anyhow::Result<i64> {
        self.conn
            .execute(
                "INSERT INTO evaluations(subject_id, name, grade, weight) VALUES(?, ?, ?, ?)",
                (subject_id, name, grade, weight),
            )
            .context("insert evaluation")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn append_history(&mut self, e: &MigrationHistoryEntry) -> anyhow::Result<()> {
        self.conn
            .execute(
                "INSERT INTO migration_history(
                   recorded_at, run_id, label, source_kind, fingerprint,
                   total, success, skipped, errors, actor
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &e.recorded_at,
                    &e.run_id,
                    &e.label,
                    &e.source_kind,
                    &e.fingerprint,
                    e.total as i64,
                    e.success as i64,
                    e.skipped as i64,
                    e.errors as i64,
                    &e.actor,
                ),
            )
            .context("append migration history")?;
        Ok(())
    }

    fn begin_student(&mut self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("SAVEPOINT student_graph")
            .context("open student savepoint")
    }

    fn commit_student(&mut self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("RELEASE student_graph")
            .context("release student savepoint")
    }

    fn rollback_student(&mut self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("ROLLBACK TO student_graph; RELEASE student_graph")
            .context("roll back student savepoint")
    }
}

/// Recomputes and stores the final grade of one subject from its current
/// evaluations. Returns the stored value.
pub fn recompute_subject_grade(conn: &Connection, subject_id: i64) -> anyhow::Result<Option<f64>> {
    let mut stmt = conn.prepare(
        "SELECT name, grade, weight FROM evaluations WHERE subject_id = ? ORDER BY id",
    )?;
    let entries = stmt
        .query_map([subject_id], |row| {
            Ok(EvaluationEntry {
                name: row.get(0)?,
                grade: row.get(1)?,
                weight: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("load evaluations")?;

    let final_grade = weighted_final_grade(&entries);
    conn.execute(
        "UPDATE subjects SET final_grade = ? WHERE id = ?",
        (final_grade, subject_id),
    )
    .context("update subject final grade")?;
    Ok(final_grade)
}
