//! The normalized type vocabulary and destination vendor set.
//!
//! `NormalizedType` is the fixed interchange vocabulary between source
//! driver metadata and destination DDL. `Vendor` is the closed set of
//! destination databases the Type-Mapper, Schema-Synchronizer, and Loader
//! know how to target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized source column type token.
///
/// This is the closed vocabulary populated by the Extractor from driver
/// metadata (with fallback inference) and consumed by the Type-Mapper to
/// resolve a concrete destination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormalizedType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Date,
    #[serde(rename = "DATETIME")]
    DateTime,
    Timestamp,
    Number,
    Decimal,
    #[serde(rename = "VARCHAR")]
    VarChar,
    #[serde(rename = "VARCHAR2")]
    VarChar2,
    Clob,
    Float,
}

impl NormalizedType {
    /// All normalized tokens, in a fixed order. Used by the Type-Mapper's
    /// totality test.
    pub const ALL: [NormalizedType; 14] = [
        NormalizedType::Integer,
        NormalizedType::Real,
        NormalizedType::Text,
        NormalizedType::Blob,
        NormalizedType::Boolean,
        NormalizedType::Date,
        NormalizedType::DateTime,
        NormalizedType::Timestamp,
        NormalizedType::Number,
        NormalizedType::Decimal,
        NormalizedType::VarChar,
        NormalizedType::VarChar2,
        NormalizedType::Clob,
        NormalizedType::Float,
    ];

    /// Parses a normalized type from its driver-metadata token spelling.
    /// Unrecognized spellings fall back to `Text`, matching the Extractor's
    /// inference rule.
    pub fn from_token(token: &str) -> NormalizedType {
        match token.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "INT4" => NormalizedType::Integer,
            "REAL" => NormalizedType::Real,
            "TEXT" => NormalizedType::Text,
            "BLOB" => NormalizedType::Blob,
            "BOOLEAN" | "BOOL" => NormalizedType::Boolean,
            "DATE" => NormalizedType::Date,
            "DATETIME" => NormalizedType::DateTime,
            "TIMESTAMP" => NormalizedType::Timestamp,
            "NUMBER" => NormalizedType::Number,
            "DECIMAL" | "NUMERIC" => NormalizedType::Decimal,
            "VARCHAR" => NormalizedType::VarChar,
            "VARCHAR2" => NormalizedType::VarChar2,
            "CLOB" => NormalizedType::Clob,
            "FLOAT" | "DOUBLE" => NormalizedType::Float,
            _ => NormalizedType::Text,
        }
    }

    /// The canonical uppercase token spelling, as used in job descriptors
    /// and driver-metadata comparisons.
    pub fn as_token(&self) -> &'static str {
        match self {
            NormalizedType::Integer => "INTEGER",
            NormalizedType::Real => "REAL",
            NormalizedType::Text => "TEXT",
            NormalizedType::Blob => "BLOB",
            NormalizedType::Boolean => "BOOLEAN",
            NormalizedType::Date => "DATE",
            NormalizedType::DateTime => "DATETIME",
            NormalizedType::Timestamp => "TIMESTAMP",
            NormalizedType::Number => "NUMBER",
            NormalizedType::Decimal => "DECIMAL",
            NormalizedType::VarChar => "VARCHAR",
            NormalizedType::VarChar2 => "VARCHAR2",
            NormalizedType::Clob => "CLOB",
            NormalizedType::Float => "FLOAT",
        }
    }
}

impl fmt::Display for NormalizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// A supported relational database vendor.
///
/// This set is closed by design: the engine does not discover new vendors
/// at runtime, only at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Sqlite,
    Postgres,
    MySql,
    Oracle,
    SqlServer,
}

impl Vendor {
    /// All supported destination vendors, in a fixed order. Used by the
    /// Type-Mapper's totality test.
    pub const ALL: [Vendor; 5] = [
        Vendor::Sqlite,
        Vendor::Postgres,
        Vendor::MySql,
        Vendor::Oracle,
        Vendor::SqlServer,
    ];

    /// Parses a vendor from the job descriptor's `sourceType`/
    /// `destinationType` token. Accepts common driver-name aliases
    /// (`sqlite3`, `postgresql`, `mssql`) alongside the canonical spelling.
    pub fn from_token(token: &str) -> Option<Vendor> {
        match token.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Vendor::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(Vendor::Postgres),
            "mysql" => Some(Vendor::MySql),
            "oracle" => Some(Vendor::Oracle),
            "sqlserver" | "mssql" => Some(Vendor::SqlServer),
            _ => None,
        }
    }

    /// The canonical lowercase token spelling, as used in job descriptors.
    pub fn as_token(&self) -> &'static str {
        match self {
            Vendor::Sqlite => "sqlite",
            Vendor::Postgres => "postgres",
            Vendor::MySql => "mysql",
            Vendor::Oracle => "oracle",
            Vendor::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// An ordered mapping from column name to its normalized source type,
/// populated by the Extractor from driver metadata (with fallback
/// inference) and consumed by the Schema-Synchronizer via the Type-Mapper.
///
/// Order is insertion order (source column order), preserved so the
/// Schema-Synchronizer emits `CREATE TABLE` columns in the same order the
/// source reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTypeMap {
    entries: Vec<(String, NormalizedType)>,
}

impl ColumnTypeMap {
    pub fn new() -> ColumnTypeMap {
        ColumnTypeMap { entries: Vec::new() }
    }

    /// Inserts or overwrites the type for `column`, keeping its original
    /// position if already present.
    pub fn insert(&mut self, column: impl Into<String>, ty: NormalizedType) {
        let column = column.into();
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == column) {
            entry.1 = ty;
        } else {
            self.entries.push((column, ty));
        }
    }

    pub fn get(&self, column: &str) -> Option<NormalizedType> {
        self.entries.iter().find(|(c, _)| c == column).map(|(_, t)| *t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NormalizedType)> {
        self.entries.iter().map(|(c, t)| (c.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.entries.iter().map(|(c, _)| c.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_map_preserves_insertion_order() {
        let mut map = ColumnTypeMap::new();
        map.insert("id", NormalizedType::Integer);
        map.insert("name", NormalizedType::Text);
        map.insert("id", NormalizedType::Real);
        assert_eq!(map.column_names(), vec!["id", "name"]);
        assert_eq!(map.get("id"), Some(NormalizedType::Real));
    }

    #[test]
    fn normalized_type_round_trips_through_tokens() {
        for ty in NormalizedType::ALL {
            let token = ty.as_token();
            assert_eq!(NormalizedType::from_token(token), ty);
        }
    }

    #[test]
    fn unrecognized_token_falls_back_to_text() {
        assert_eq!(NormalizedType::from_token("XML"), NormalizedType::Text);
        assert_eq!(NormalizedType::from_token(""), NormalizedType::Text);
    }

    #[test]
    fn vendor_accepts_driver_aliases() {
        assert_eq!(Vendor::from_token("sqlite3"), Some(Vendor::Sqlite));
        assert_eq!(Vendor::from_token("postgresql"), Some(Vendor::Postgres));
        assert_eq!(Vendor::from_token("mssql"), Some(Vendor::SqlServer));
        assert_eq!(Vendor::from_token("bogus"), None);
    }
}
