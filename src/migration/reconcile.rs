use std::collections::HashSet;

use chrono::Local;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::grades::{weighted_final_grade, EvaluationEntry};
use super::issue::RowIssue;
use super::row::Row;
use super::store::{MigrationHistoryEntry, NewStudent, RecordStore};
use super::{
    ColumnMapping, Field, ImportOptions, ImportResult, MigrationMode, RunContext,
    SEMESTER_STATUS_ACTIVE,
};
use crate::text::{normalize_email, strip_accents};

/// Runs one import over `rows`.
///
/// `existing` holds the normalized emails already in the store; it grows as
/// the run inserts students so that later rows sharing an email are caught as
/// duplicates too. No row-level failure aborts the run. A history entry is
/// appended at the end on a best-effort basis.
pub fn reconcile(
    store: &mut dyn RecordStore,
    rows: &[Row],
    mapping: &ColumnMapping,
    options: &ImportOptions,
    existing: HashSet<String>,
    run: &RunContext,
) -> ImportResult {
    let mut result = ImportResult {
        ok: true,
        run_id: run.run_id.clone(),
        mode: options.migration_mode,
        total: rows.len(),
        ..Default::default()
    };
    let mut known = existing;

    info!(
        run_id = %run.run_id,
        rows = rows.len(),
        mode = ?options.migration_mode,
        known = known.len(),
        "migration started"
    );

    match options.migration_mode {
        MigrationMode::Basic => run_basic(store, rows, mapping, options, &mut known, &mut result),
        MigrationMode::Complete => run_complete(
            store,
            rows,
            mapping,
            options,
            run.default_year,
            &mut known,
            &mut result,
        ),
    }

    append_history(store, run, &result);

    info!(
        run_id = %run.run_id,
        success = result.success_count,
        skipped = result.skipped,
        errors = result.errors,
        "migration finished"
    );
    result
}

fn run_basic(
    store: &mut dyn RecordStore,
    rows: &[Row],
    mapping: &ColumnMapping,
    options: &ImportOptions,
    known: &mut HashSet<String>,
    result: &mut ImportResult,
) {
    for (idx, row) in rows.iter().enumerate() {
        let student = match classify_basic_row(row, mapping, options, known) {
            Ok(s) => s,
            Err(issue) => {
                debug!(row = idx, code = issue.code(), "row rejected: {issue}");
                result.record(Some(idx), None, &issue);
                continue;
            }
        };
        match store.insert_student(&student) {
            Ok(student_id) => {
                debug!(row = idx, student_id, "student inserted");
                known.insert(student.email);
                result.success_count += 1;
            }
            Err(e) => {
                warn!(row = idx, error = %format!("{e:#}"), "student insert failed");
                let issue = RowIssue::Store(format!("{e:#}"));
                result.record(Some(idx), Some(&student.email), &issue);
            }
        }
    }
}

/// Decides what basic mode does with one row: the student to insert, or the
/// reason it is rejected or skipped.
pub(super) fn classify_basic_row(
    row: &Row,
    mapping: &ColumnMapping,
    options: &ImportOptions,
    known: &HashSet<String>,
) -> Result<NewStudent, RowIssue> {
    let student = extract_student(row, mapping, options)?;
    validate_student(&student)?;
    if options.skip_duplicates && known.contains(&student.email) {
        return Err(RowIssue::Duplicate(student.email));
    }
    Ok(student)
}

fn read_text(row: &Row, mapping: &ColumnMapping, field: Field) -> Result<String, RowIssue> {
    mapping
        .cell(row, field)
        .text()
        .map_err(|source| RowIssue::Field {
            field: field.key(),
            source,
        })
}

fn read_trimmed(row: &Row, mapping: &ColumnMapping, field: Field) -> Result<String, RowIssue> {
    read_text(row, mapping, field).map(|s| s.trim().to_string())
}

fn extract_student(
    row: &Row,
    mapping: &ColumnMapping,
    options: &ImportOptions,
) -> Result<NewStudent, RowIssue> {
    if row.is_malformed() {
        return Err(RowIssue::NotAnObject);
    }
    // Names and career keep their spacing unless trimming was requested.
    let optional_trim = |field: Field| {
        if options.trim_spaces {
            read_trimmed(row, mapping, field)
        } else {
            read_text(row, mapping, field)
        }
    };

    Ok(NewStudent {
        first_name: optional_trim(Field::FirstName)?,
        last_name: optional_trim(Field::LastName)?,
        career: strip_accents(&optional_trim(Field::Career)?),
        birth_date: read_trimmed(row, mapping, Field::BirthDate)?,
        phone: read_trimmed(row, mapping, Field::Phone)?,
        email: normalize_email(&read_text(row, mapping, Field::Email)?),
        semester: mapping.cell(row, Field::Semester).integer_or(1),
    })
}

fn validate_student(s: &NewStudent) -> Result<(), RowIssue> {
    let mut missing = Vec::new();
    if s.first_name.is_empty() {
        missing.push(Field::FirstName.key());
    }
    if s.last_name.is_empty() {
        missing.push(Field::LastName.key());
    }
    if s.email.is_empty() {
        missing.push(Field::Email.key());
    }
    if s.career.is_empty() {
        missing.push(Field::Career.key());
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RowIssue::MissingRequired(missing))
    }
}

type SemesterKey = (i64, i64);
type SubjectGroups = IndexMap<String, Vec<EvaluationEntry>>;

struct StudentGroup {
    first_row: usize,
    student: NewStudent,
    semesters: IndexMap<SemesterKey, SubjectGroups>,
}

impl StudentGroup {
    fn add(&mut self, entry: AcademicEntry) {
        self.semesters
            .entry(entry.semester)
            .or_default()
            .entry(entry.subject)
            .or_default()
            .push(entry.evaluation);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct AcademicEntry {
    semester: SemesterKey,
    subject: String,
    evaluation: EvaluationEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct GroupedRow {
    email: String,
    /// Present only for the first row seen for `email`.
    student: Option<NewStudent>,
    entry: Option<AcademicEntry>,
}

/// Reads one row for complete mode. Identity fields are only read when
/// `is_new` reports the email has not been seen yet. A failure means the row
/// contributes nothing at all.
pub(super) fn classify_grouped_row(
    row: &Row,
    mapping: &ColumnMapping,
    options: &ImportOptions,
    default_year: i64,
    is_new: impl Fn(&str) -> bool,
) -> Result<GroupedRow, RowIssue> {
    if row.is_malformed() {
        return Err(RowIssue::NotAnObject);
    }
    let email = normalize_email(&read_text(row, mapping, Field::Email)?);
    if email.is_empty() {
        return Err(RowIssue::MissingEmail);
    }
    let student = if is_new(&email) {
        Some(extract_student(row, mapping, options)?)
    } else {
        None
    };
    let entry = extract_academic(row, mapping, default_year)?;
    Ok(GroupedRow {
        email,
        student,
        entry,
    })
}

fn extract_academic(
    row: &Row,
    mapping: &ColumnMapping,
    default_year: i64,
) -> Result<Option<AcademicEntry>, RowIssue> {
    let number = mapping.cell(row, Field::Semester).integer_or(1);
    let year = mapping
        .cell(row, Field::SemesterYear)
        .integer_or(default_year);
    let subject = read_trimmed(row, mapping, Field::Subject)?;
    let evaluation = read_trimmed(row, mapping, Field::Evaluation)?;
    let grade = mapping.cell(row, Field::Grade).number_or(0.0);
    let weight = mapping.cell(row, Field::Weight).integer_or(0);

    if subject.is_empty() || evaluation.is_empty() {
        return Ok(None);
    }
    Ok(Some(AcademicEntry {
        semester: (number, year),
        subject,
        evaluation: EvaluationEntry {
            name: evaluation,
            grade,
            weight,
        },
    }))
}

fn run_complete(
    store: &mut dyn RecordStore,
    rows: &[Row],
    mapping: &ColumnMapping,
    options: &ImportOptions,
    default_year: i64,
    known: &mut HashSet<String>,
    result: &mut ImportResult,
) {
    let mut groups: IndexMap<String, StudentGroup> = IndexMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let grouped = match classify_grouped_row(row, mapping, options, default_year, |email| {
            !groups.contains_key(email)
        }) {
            Ok(g) => g,
            Err(issue) => {
                debug!(row = idx, code = issue.code(), "row rejected: {issue}");
                result.record(Some(idx), None, &issue);
                continue;
            }
        };

        let GroupedRow {
            email,
            student,
            entry,
        } = grouped;
        if let Some(student) = student {
            groups.entry(email.clone()).or_insert_with(|| StudentGroup {
                first_row: idx,
                student,
                semesters: IndexMap::new(),
            });
        }
        if let (Some(entry), Some(group)) = (entry, groups.get_mut(&email)) {
            group.add(entry);
        }
    }

    debug!(students = groups.len(), "rows grouped");

    for (email, group) in groups {
        if let Err(issue) = validate_student(&group.student) {
            debug!(email = %email, "student rejected: {issue}");
            result.record(Some(group.first_row), Some(&email), &issue);
            continue;
        }
        if options.skip_duplicates && known.contains(&email) {
            result.record(
                Some(group.first_row),
                Some(&email),
                &RowIssue::Duplicate(email.clone()),
            );
            continue;
        }
        match write_student_graph(store, &group) {
            Ok(student_id) => {
                debug!(email = %email, student_id, "student graph inserted");
                known.insert(email);
                result.success_count += 1;
            }
            Err(e) => {
                warn!(email = %email, error = %format!("{e:#}"), "student graph insert failed");
                let issue = RowIssue::Store(format!("{e:#}"));
                result.record(Some(group.first_row), Some(&email), &issue);
            }
        }
    }
}

/// Writes one student and its academic records as a unit. On failure the
/// store is asked to roll back whatever part of the graph was written.
fn write_student_graph(store: &mut dyn RecordStore, group: &StudentGroup) -> anyhow::Result<i64> {
    store.begin_student()?;
    let outcome = insert_student_graph(store, group).and_then(|id| {
        store.commit_student()?;
        Ok(id)
    });
    if outcome.is_err() {
        if let Err(e) = store.rollback_student() {
            warn!(error = %format!("{e:#}"), "student rollback failed");
        }
    }
    outcome
}

fn insert_student_graph(store: &mut dyn RecordStore, group: &StudentGroup) -> anyhow::Result<i64> {
    let student_id = store.insert_student(&group.student)?;
    for ((number, year), subjects) in &group.semesters {
        let semester_id = store.insert_semester(student_id, *number, *year, SEMESTER_STATUS_ACTIVE)?;
        for (name, evaluations) in subjects {
            let final_grade = weighted_final_grade(evaluations);
            let subject_id = store.insert_subject(semester_id, name, final_grade)?;
            for ev in evaluations {
                store.insert_evaluation(subject_id, &ev.name, ev.grade, ev.weight)?;
            }
        }
    }
    Ok(student_id)
}

fn append_history(store: &mut dyn RecordStore, run: &RunContext, result: &ImportResult) {
    let entry = MigrationHistoryEntry {
        recorded_at: Local::now().format("%Y-%m-%d %H:%M").to_string(),
        run_id: run.run_id.clone(),
        label: run.label.clone(),
        source_kind: run.source_kind.clone(),
        fingerprint: run.fingerprint.clone(),
        total: result.total,
        success: result.success_count,
        skipped: result.skipped,
        errors: result.errors,
        actor: run.actor.clone(),
    };
    if let Err(e) = store.append_history(&entry) {
        warn!(run_id = %run.run_id, error = %format!("{e:#}"), "migration history append failed");
    }
}
