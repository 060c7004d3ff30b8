//! Spreadsheet-to-records import.
//!
//! A migration takes flat rows from an uploaded table, a mapping from
//! canonical field names to the table's columns, and a set of options, and
//! writes students (and, in complete mode, their semesters, subjects and
//! evaluations) through a [`RecordStore`].

mod grades;
mod issue;
mod reconcile;
mod row;
mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use issue::{IssueReport, RowIssue, Tally};

pub use grades::{round_2, weighted_final_grade, EvaluationEntry};
pub use reconcile::reconcile;
pub use row::{Cell, Row};
pub use store::{MigrationHistoryEntry, NewStudent, RecordStore};

pub const SEMESTER_STATUS_ACTIVE: &str = "active";
pub const DEFAULT_LABEL: &str = "Archivo importado";

/// Canonical fields a column mapping can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Career,
    Phone,
    BirthDate,
    Semester,
    SemesterYear,
    Subject,
    Evaluation,
    Grade,
    Weight,
}

impl Field {
    /// Key used for this field in a mapping declaration.
    pub fn key(self) -> &'static str {
        match self {
            Field::FirstName => "nombre",
            Field::LastName => "apellido",
            Field::Email => "correo",
            Field::Career => "carrera",
            Field::Phone => "telefono",
            Field::BirthDate => "fecha_nacimiento",
            Field::Semester => "semestre",
            Field::SemesterYear => "semestre_anio",
            Field::Subject => "materia",
            Field::Evaluation => "evaluacion",
            Field::Grade => "nota",
            Field::Weight => "porcentaje",
        }
    }
}

/// Canonical field name to source column name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(HashMap<String, String>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: Field, column: impl Into<String>) -> Self {
        self.0.insert(field.key().to_string(), column.into());
        self
    }

    pub fn column(&self, field: Field) -> Option<&str> {
        self.0
            .get(field.key())
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Cell supplying `field` in `row`; unmapped fields read as empty.
    pub fn cell<'r>(&self, row: &'r Row, field: Field) -> &'r Cell {
        static EMPTY: Cell = Cell::Empty;
        match self.column(field) {
            Some(col) => row.get(col),
            None => &EMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Students only.
    #[default]
    Basic,
    /// Students plus semesters, subjects and evaluations.
    Complete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default)]
    pub trim_spaces: bool,
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    #[serde(default)]
    pub migration_mode: MigrationMode,
}

fn default_true() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            trim_spaces: false,
            skip_duplicates: true,
            migration_mode: MigrationMode::Basic,
        }
    }
}

/// Caller-supplied context for one run, recorded in the history entry.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub label: String,
    pub source_kind: String,
    pub actor: String,
    pub fingerprint: Option<String>,
    /// Year used when a row has no parseable `semestre_anio`.
    pub default_year: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub ok: bool,
    pub run_id: String,
    pub mode: MigrationMode,
    pub total: usize,
    pub success_count: usize,
    pub skipped: usize,
    pub errors: usize,
    pub issues: Vec<IssueReport>,
}

impl ImportResult {
    fn record(&mut self, row: Option<usize>, email: Option<&str>, issue: &RowIssue) {
        match issue.tally() {
            Tally::Error => self.errors += 1,
            Tally::Skipped => self.skipped += 1,
            Tally::Uncounted => {}
        }
        self.issues.push(IssueReport::new(row, email, issue));
    }
}
