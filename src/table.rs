//! Engine-independent descriptions of a table: its schema and a summary.

use std::collections::BTreeMap;
use std::fmt;

use arrow::datatypes::{DataType, Schema};
use serde::Serialize;

/// One column of a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    /// Type tag shown to users, e.g. `Int64` or `Utf8`.
    pub fn type_name(&self) -> String {
        self.data_type.to_string()
    }
}

/// Columns in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn from_arrow(schema: &Schema) -> Self {
        Self::new(
            schema
                .fields()
                .iter()
                .map(|field| Column {
                    name: field.name().clone(),
                    data_type: field.data_type().clone(),
                })
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// First difference between two schemas, described for an error message.
    pub fn difference(&self, other: &TableSchema) -> Option<String> {
        if self.len() != other.len() {
            return Some(format!(
                "expected {} columns {:?}, found {} columns {:?}",
                self.len(),
                self.names(),
                other.len(),
                other.names()
            ));
        }
        self.columns
            .iter()
            .zip(other.columns.iter())
            .enumerate()
            .find(|(_, (a, b))| a != b)
            .map(|(i, (a, b))| {
                format!(
                    "column {i}: expected {} ({}), found {} ({})",
                    a.name,
                    a.type_name(),
                    b.name,
                    b.type_name()
                )
            })
    }
}

/// A value in [`TableSummary::extra`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SummaryValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Sum of two numeric values; integers stay integers.
    pub fn add(&self, other: &SummaryValue) -> Option<SummaryValue> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(Self::Int(a + b)),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                Some(Self::Float(*a as f64 + b))
            }
            (Self::Float(a), Self::Float(b)) => Some(Self::Float(a + b)),
            _ => None,
        }
    }
}

impl fmt::Display for SummaryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for SummaryValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<String> for SummaryValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Format-specific facts, keyed by a display label.
pub type ExtraMetadata = BTreeMap<String, SummaryValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub file_size: u64,
    pub num_rows: usize,
    pub num_columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<ExtraMetadata>,
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File size: {} bytes", self.file_size)?;
        writeln!(f, "Rows: {}", self.num_rows)?;
        write!(f, "Columns: {}", self.num_columns)?;
        for (key, value) in self.extra.iter().flatten() {
            write!(f, "\n{key}: {value}")?;
        }
        Ok(())
    }
}
