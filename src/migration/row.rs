use serde_json::{Map, Value};
use thiserror::Error;

/// One loosely-typed value from an uploaded table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// An array or object where a scalar was expected. Kept so that the
    /// extraction site can report it instead of silently reading garbage.
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("expected a scalar value, found a nested structure")]
    Nested,
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    pub fn from_json(v: &Value) -> Cell {
        match v {
            Value::Null => Cell::Empty,
            Value::String(s) if s.is_empty() => Cell::Empty,
            Value::String(s) => Cell::Text(s.clone()),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            Value::Bool(b) => Cell::Text(b.to_string()),
            Value::Array(_) | Value::Object(_) => Cell::Nested,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Empty | Cell::Nested => Value::Null,
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text rendering of the cell. Integral numbers render without a
    /// decimal part so that a phone stored as 5551234.0 reads "5551234".
    pub fn text(&self) -> Result<String, CellError> {
        match self {
            Cell::Empty => Ok(String::new()),
            Cell::Text(s) => Ok(s.clone()),
            Cell::Number(n) => Ok(format_number(*n)),
            Cell::Nested => Err(CellError::Nested),
        }
    }

    /// Numeric reading of the cell; `None` when the cell is empty, nested,
    /// or text that does not parse to a finite number.
    pub fn number(&self) -> Option<f64> {
        let n = match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
            Cell::Empty | Cell::Nested => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Integer reading; fractional values truncate toward zero ("3.0" and
    /// "3.7" both read 3).
    pub fn integer(&self) -> Option<i64> {
        if let Cell::Text(s) = self {
            if let Ok(i) = s.trim().parse::<i64>() {
                return Some(i);
            }
        }
        self.number().map(|n| n.trunc() as i64)
    }

    pub fn integer_or(&self, default: i64) -> i64 {
        self.integer().unwrap_or(default)
    }

    pub fn number_or(&self, default: f64) -> f64 {
        self.number().unwrap_or(default)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Ordered column-name to cell mapping for one source row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, Cell)>,
    malformed: bool,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row from a JSON object. Anything other than an object yields
    /// a malformed row that the reconciler rejects on its own.
    pub fn from_json(v: &Value) -> Self {
        let Some(obj) = v.as_object() else {
            return Self {
                cells: Vec::new(),
                malformed: true,
            };
        };
        let cells = obj
            .iter()
            .map(|(k, v)| (k.clone(), Cell::from_json(v)))
            .collect();
        Self {
            cells,
            malformed: false,
        }
    }

    pub fn push(&mut self, column: impl Into<String>, cell: Cell) {
        self.cells.push((column.into(), cell));
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Cell for `column`; missing columns read as empty.
    pub fn get(&self, column: &str) -> &Cell {
        self.cells
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, c)| c)
            .unwrap_or(&EMPTY)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (k, c) in &self.cells {
            obj.insert(k.clone(), c.to_json());
        }
        Value::Object(obj)
    }
}
