//! The closed, vendor-agnostic row representation.
//!
//! Every Extractor adapter converts its driver's native row type into
//! [`Row`]s of [`Value`]s before handing them to the Transformer; every
//! Loader adapter converts [`Value`]s back into its driver's bound
//! parameter type. No component downstream of extraction ever matches on a
//! driver-specific type again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cell value, normalized across all five supported vendors.
///
/// This is a closed tagged variant, not an open `Box<dyn Any>` — every
/// component that consumes a `Value` can match exhaustively and the
/// compiler enforces it whenever a new variant is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// A short, stable name for the value's variant, used in
    /// `GetlError::TypeMismatch`/`BadConversion` messages and in row-hash
    /// formatting.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Int(_) => "Int",
            Value::Real(_) => "Real",
            Value::Bool(_) => "Bool",
            Value::Text(_) => "Text",
            Value::Bytes(_) => "Bytes",
            Value::Timestamp(_) => "Timestamp",
        }
    }

    /// Whether this value is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A deterministic textual rendering used by the Loader's value
    /// formatter and by the Scheduler's row-hash check. `NULL` renders as
    /// the literal `NULL` token (distinct from the empty string, so an
    /// empty `Text` value never collides with a `Null` value in the hash).
    pub fn format_for_hash(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b),
            Value::Timestamp(t) => t.to_rfc3339(),
        }
    }
}

/// A single row of data flowing through the pipeline: an ordered column
/// list paired with an equal-length, positionally-matched value list.
///
/// Column order is preserved from extraction through to loading; the
/// Transformer may add, drop, or rename columns, but it always keeps
/// `columns.len() == values.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    /// Builds a row from parallel column/value vectors.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Row {
        Row { columns, values }
    }

    /// Looks up a value by column name, or `None` if the column is absent.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Sets the value for an existing column, or appends a new
    /// column/value pair if the column is not already present.
    pub fn set(&mut self, column: &str, value: Value) {
        if let Some(i) = self.columns.iter().position(|c| c == column) {
            self.values[i] = value;
        } else {
            self.columns.push(column.to_string());
            self.values.push(value);
        }
    }

    /// Removes a column and its value, if present.
    pub fn remove(&mut self, column: &str) {
        if let Some(i) = self.columns.iter().position(|c| c == column) {
            self.columns.remove(i);
            self.values.remove(i);
        }
    }

    /// A deterministic concatenation of every value's hash rendering, in
    /// column order, used as the input to the Scheduler's row-hash check.
    pub fn format_for_hash(&self) -> String {
        let mut out = String::new();
        for value in &self.values {
            out.push_str(&value.format_for_hash());
            out.push('\u{1f}');
        }
        out
    }
}
