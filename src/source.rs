//! Uploaded tables (CSV, spreadsheet or DBF) turned into migration rows.

use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::migration::{Cell, Row};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("failed to read dbf: {0}")]
    Dbf(String),
    #[error("file has no header row")]
    NoHeader,
}

impl SourceError {
    pub fn code(&self) -> &'static str {
        match self {
            SourceError::UnsupportedType(_) => "unsupported_type",
            SourceError::Io { .. } => "io_failed",
            SourceError::Csv(_)
            | SourceError::Spreadsheet(_)
            | SourceError::Dbf(_)
            | SourceError::NoHeader => "parse_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Excel,
    Dbf,
}

impl SourceKind {
    pub fn parse(s: &str) -> Result<Self, SourceError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => Ok(SourceKind::Csv),
            "excel" | "xlsx" | "xls" => Ok(SourceKind::Excel),
            "dbf" => Ok(SourceKind::Dbf),
            other => Err(SourceError::UnsupportedType(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Csv => "csv",
            SourceKind::Excel => "excel",
            SourceKind::Dbf => "dbf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Hex SHA-256 of the file bytes.
    pub fingerprint: String,
}

pub fn read_table(path: &Path, kind: SourceKind) -> Result<Table, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    let fingerprint = sha256_hex(&bytes);

    let (columns, rows) = match kind {
        SourceKind::Csv => parse_delimited(&decode_text(bytes))?,
        SourceKind::Excel => read_first_sheet(path)?,
        SourceKind::Dbf => read_dbf(path)?,
    };
    debug!(
        path = %path.to_string_lossy(),
        kind = kind.as_str(),
        columns = columns.len(),
        rows = rows.len(),
        "table read"
    );
    Ok(Table {
        columns,
        rows,
        fingerprint,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// UTF-8 first; anything else is taken to be Windows-1252, which is what
/// spreadsheet programs usually export.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            decoded.into_owned()
        }
    }
}

/// Picks the delimiter that splits the first lines into the most consistent,
/// widest records.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0usize;
    for &delim in candidates {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count();
        let score = consistent * target;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

fn header_names(raw: impl Iterator<Item = String>) -> Vec<String> {
    raw.enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("Unnamed: {i}")
            } else {
                h.to_string()
            }
        })
        .collect()
}

/// Parses delimited text whose first record is the header. Fields stay text;
/// numeric coercion happens where each field is read.
pub fn parse_delimited(content: &str) -> Result<(Vec<String>, Vec<Row>), SourceError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let delimiter = sniff_delimiter(content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut records = reader.records();

    let header = match records.next() {
        Some(r) => r?,
        None => return Err(SourceError::NoHeader),
    };
    let columns = header_names(header.iter().map(str::to_string));

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let mut row = Row::new();
        for (i, column) in columns.iter().enumerate() {
            let cell = match record.get(i) {
                Some(f) if !f.is_empty() => Cell::Text(f.to_string()),
                _ => Cell::Empty,
            };
            row.push(column.clone(), cell);
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

fn read_first_sheet(path: &Path) -> Result<(Vec<String>, Vec<Row>), SourceError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| SourceError::Spreadsheet(e.to_string()))?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Err(SourceError::NoHeader);
    };
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| SourceError::Spreadsheet(format!("sheet '{sheet}': {e}")))?;

    let mut sheet_rows = range.rows();
    let Some(header) = sheet_rows.next() else {
        return Err(SourceError::NoHeader);
    };
    let columns = header_names(
        header
            .iter()
            .map(|d| data_cell(d).text().unwrap_or_default()),
    );

    let mut rows = Vec::new();
    for data in sheet_rows {
        let cells: Vec<Cell> = data.iter().map(data_cell).collect();
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        let mut row = Row::new();
        for (i, column) in columns.iter().enumerate() {
            row.push(column.clone(), cells.get(i).cloned().unwrap_or(Cell::Empty));
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

fn data_cell(d: &Data) -> Cell {
    match d {
        Data::Empty => Cell::Empty,
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Float(n) => Cell::Number(*n),
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            excel_serial_date(serial)
                .map(Cell::Text)
                .unwrap_or(Cell::Number(serial))
        }
        Data::Error(e) => Cell::Text(format!("#{e:?}")),
    }
}

/// FoxPro tables carry Windows-1252 text regardless of the code page mark.
fn read_dbf(path: &Path) -> Result<(Vec<String>, Vec<Row>), SourceError> {
    let encoding = dbase::encoding::EncodingRs::from(encoding_rs::WINDOWS_1252);
    let mut reader = dbase::Reader::from_path_with_encoding(path, encoding)
        .map_err(|e| SourceError::Dbf(e.to_string()))?;
    let columns = header_names(reader.fields().iter().map(|f| f.name().to_string()));
    if columns.is_empty() {
        return Err(SourceError::NoHeader);
    }
    let records = reader.read().map_err(|e| SourceError::Dbf(e.to_string()))?;

    let mut rows = Vec::new();
    for record in records {
        let cells: Vec<Cell> = columns
            .iter()
            .map(|c| record.get(c).map(dbf_cell).unwrap_or(Cell::Empty))
            .collect();
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        let mut row = Row::new();
        for (column, cell) in columns.iter().zip(cells) {
            row.push(column.clone(), cell);
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

fn dbf_cell(value: &dbase::FieldValue) -> Cell {
    use dbase::FieldValue;
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
            let s = s.trim_end();
            if s.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.to_string())
            }
        }
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            Cell::Number(*n)
        }
        FieldValue::Float(Some(n)) => Cell::Number(f64::from(*n)),
        FieldValue::Integer(n) => Cell::Number(f64::from(*n)),
        FieldValue::Logical(Some(b)) => Cell::Text(b.to_string()),
        FieldValue::Date(Some(d)) => NaiveDate::from_ymd_opt(d.year() as i32, d.month(), d.day())
            .map(|d| Cell::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Cell::Empty),
        _ => Cell::Empty,
    }
}

/// 1900-system serial day to `YYYY-MM-DD`.
fn excel_serial_date(serial: f64) -> Option<String> {
    if !serial.is_finite() || serial.abs() > 1.0e7 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch
        .checked_add_signed(Duration::days(serial.trunc() as i64))
        .map(|d| d.format("%Y-%m-%d").to_string())
}
