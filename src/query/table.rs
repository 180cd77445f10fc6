//! Flattened experiment table
//!
//! One row per experiment: the metadata columns first, then the union of all
//! config keys in first-seen order. Keys missing from an experiment's config
//! are null in its row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::experiment::Experiment;

/// Metadata columns, in output order. Config keys with these names are dropped.
pub const METADATA_COLUMNS: [&str; 9] = [
    "id",
    "study",
    "status",
    "created_at",
    "updated_at",
    "git_sha",
    "command",
    "tags",
    "tracker_run_id",
];

/// A single typed value in the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text (timestamps, lists and maps are stored as text)
    Text(String),
}

impl Cell {
    /// Flatten a JSON value. Lists and maps become their JSON text.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::Text(value.to_string()),
        }
    }

    /// Whether the cell is NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL type name, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Text(_) => "text",
        }
    }

    /// Compare two non-null cells of compatible types.
    ///
    /// Returns `None` when either side is null or the types differ
    /// (numbers of either width compare with each other).
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

const NULL: Cell = Cell::Null;

/// Column-named rows of flattened experiments.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Flatten experiments into a table.
    #[must_use]
    pub fn from_experiments(experiments: &[Experiment]) -> Self {
        let mut table = Self::default();
        for name in METADATA_COLUMNS {
            table.add_column(name);
        }
        for experiment in experiments {
            for key in experiment.config().as_map().keys() {
                if !table.index.contains_key(key) {
                    table.add_column(key);
                }
            }
        }

        let width = table.columns.len();
        for experiment in experiments {
            let mut row = vec![Cell::Null; width];
            let metadata = [
                Cell::Text(experiment.slug().to_string()),
                Cell::Text(experiment.study().to_string()),
                Cell::Text(experiment.status().to_string()),
                timestamp(experiment.created_at()),
                timestamp(experiment.updated_at()),
                optional_text(experiment.git_sha()),
                optional_text(experiment.command()),
                Cell::Text(Value::from(experiment.tags().to_vec()).to_string()),
                optional_text(experiment.tracker_run_id()),
            ];
            for (slot, cell) in row.iter_mut().zip(metadata) {
                *slot = cell;
            }
            for (key, value) in experiment.config().iter() {
                if METADATA_COLUMNS.contains(&key.as_str()) {
                    continue;
                }
                if let Some(&col) = table.index.get(key) {
                    row[col] = Cell::from_json(value);
                }
            }
            table.rows.push(row);
        }
        table
    }

    fn add_column(&mut self, name: &str) {
        self.index.insert(name.to_string(), self.columns.len());
        self.columns.push(name.to_string());
    }

    /// Column names in output order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` in `column`; unknown columns read as NULL.
    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> &Cell {
        self.index
            .get(column)
            .and_then(|&col| self.rows.get(row).and_then(|r| r.get(col)))
            .unwrap_or(&NULL)
    }

    /// Serializable view of one row.
    #[must_use]
    pub const fn row(&self, index: usize) -> Row<'_> {
        Row { table: self, index }
    }
}

/// A borrowed table row that serializes as an object in column order.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    /// Cell in `column`.
    #[must_use]
    pub fn get(&self, column: &str) -> &'a Cell {
        self.table.cell(self.index, column)
    }
}

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cells = &self.table.rows[self.index];
        let mut map = serializer.serialize_map(Some(cells.len()))?;
        for (name, cell) in self.table.columns.iter().zip(cells) {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// Fixed-width fraction so text order matches chronological order.
fn timestamp(at: DateTime<Utc>) -> Cell {
    Cell::Text(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn optional_text(value: Option<&str>) -> Cell {
    value.map_or(Cell::Null, |s| Cell::Text(s.to_string()))
}
