use serde::Serialize;
use thiserror::Error;

use super::row::CellError;

/// Why a row (basic mode) or a grouped student (complete mode) was not
/// inserted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowIssue {
    #[error("row is not an object")]
    NotAnObject,
    #[error("field `{field}` could not be read: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: CellError,
    },
    #[error("row has no email to group by")]
    MissingEmail,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequired(Vec<&'static str>),
    #[error("email {0} already exists")]
    Duplicate(String),
    #[error("store write failed: {0}")]
    Store(String),
}

impl RowIssue {
    pub fn code(&self) -> &'static str {
        match self {
            RowIssue::NotAnObject | RowIssue::Field { .. } => "extraction_failed",
            RowIssue::MissingEmail => "missing_email",
            RowIssue::MissingRequired(_) => "missing_required",
            RowIssue::Duplicate(_) => "duplicate_skipped",
            RowIssue::Store(_) => "store_write_failed",
        }
    }

    /// Duplicates are skipped and rows without a grouping email are dropped
    /// uncounted. Everything else counts as an error.
    pub fn tally(&self) -> Tally {
        match self {
            RowIssue::Duplicate(_) => Tally::Skipped,
            RowIssue::MissingEmail => Tally::Uncounted,
            _ => Tally::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Error,
    Skipped,
    Uncounted,
}

/// Serializable record of one rejected row or student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub code: &'static str,
    pub message: String,
}

impl IssueReport {
    pub fn new(row: Option<usize>, email: Option<&str>, issue: &RowIssue) -> Self {
        Self {
            row,
            email: email.map(str::to_string),
            code: issue.code(),
            message: issue.to_string(),
        }
    }
}
