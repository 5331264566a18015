//! The closed error taxonomy shared by every getl pipeline stage.
//!
//! Every fallible component in this crate family returns `Result<_,
//! GetlError>` rather than `anyhow::Error` — callers that need to branch on
//! error kind (e.g. retry `ConnectionFailed` but not `BadConfig`) get that
//! for free. Higher layers (the CLI binary, the scheduler) wrap these in
//! `anyhow::Context` at the boundary, matching the teacher's layering.

use thiserror::Error;

/// The complete error taxonomy for the getl synchronization engine.
///
/// Variant names mirror the kinds enumerated in the core specification
/// exactly, so a caller inspecting `GetlError::variant_name()` can surface
/// the same vocabulary an operator would read in a run log.
#[derive(Debug, Error)]
pub enum GetlError {
    /// Job descriptor is malformed or missing a required field.
    #[error("bad job config: {0}")]
    BadConfig(String),

    /// An unknown or unsupported File-Sink format was requested.
    #[error("bad output format: {0}")]
    BadFormat(String),

    /// The Type-Mapper could not resolve a normalized type for a vendor.
    #[error("unmapped type: {vendor} has no mapping for {normalized_type}")]
    UnmappedType {
        /// Destination vendor that failed to resolve the type.
        vendor: String,
        /// Normalized source type token that had no mapping.
        normalized_type: String,
    },

    /// The Query-Builder encountered an unknown join type.
    #[error("bad join type: {0}")]
    BadJoin(String),

    /// The Transformer encountered an operation it does not implement.
    #[error("unknown transformation operation: {0}")]
    UnknownOp(String),

    /// A transformation referenced a source field absent from the row.
    #[error("missing source field '{field}' required by transformation")]
    MissingSourceField {
        /// Field name the transformation expected to find.
        field: String,
    },

    /// A transformation's operation does not apply to the value's type.
    #[error("type mismatch in transformation on field '{field}': expected {expected}")]
    TypeMismatch {
        /// Field the transformation was applied to.
        field: String,
        /// Human-readable description of the expected value kind.
        expected: String,
    },

    /// A transformation's conversion (e.g. `toInt`) could not parse its input.
    #[error("bad conversion for field '{field}': {reason}")]
    BadConversion {
        /// Field the transformation was applied to.
        field: String,
        /// Description of why the conversion failed.
        reason: String,
    },

    /// Failed to open a connection to a source or destination database.
    #[error("connection failed ({vendor}): {source}")]
    ConnectionFailed {
        /// The vendor whose driver raised the error.
        vendor: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A query failed to execute against a source database.
    #[error("query failed ({vendor}): {source} (query: {query_fragment})")]
    QueryFailed {
        /// The vendor whose driver raised the error.
        vendor: String,
        /// The SQL text (or a truncated fragment of it) that failed.
        query_fragment: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A row could not be scanned out of a result set.
    #[error("scan failed ({vendor}) on column '{column}': {source}")]
    ScanFailed {
        /// The vendor whose driver raised the error.
        vendor: String,
        /// The column being scanned when the failure occurred.
        column: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A DDL or DML statement failed to execute against the destination.
    #[error("exec failed ({vendor}): {source} (statement: {statement_fragment})")]
    ExecFailed {
        /// The vendor whose driver raised the error.
        vendor: String,
        /// The statement text (or a truncated fragment) that failed.
        statement_fragment: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A transaction failed to commit.
    #[error("commit failed ({vendor}): {source}")]
    CommitFailed {
        /// The vendor whose driver raised the error.
        vendor: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A file I/O operation (state file, file sink) failed.
    #[error("io failed on '{path}': {source}")]
    IoFailed {
        /// Path of the file being read or written.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The load succeeded but the state write afterward failed: data moved,
    /// the watermark did not advance, and the next run must re-deliver at
    /// least the last batch.
    #[error("partial failure: load succeeded ({records_loaded} records) but state write failed: {reason}")]
    PartialFailure {
        /// Number of records the Loader committed before the state write failed.
        records_loaded: usize,
        /// Description of why the state write failed.
        reason: String,
    },
}

impl GetlError {
    /// Returns the taxonomy kind name, matching the vocabulary in the core
    /// specification's error-handling design (e.g. for structured logging
    /// fields or CLI exit-code mapping).
    pub fn kind(&self) -> &'static str {
        match self {
            GetlError::BadConfig(_) => "BadConfig",
            GetlError::BadFormat(_) => "BadFormat",
            GetlError::UnmappedType { .. } => "UnmappedType",
            GetlError::BadJoin(_) => "BadJoin",
            GetlError::UnknownOp(_) => "UnknownOp",
            GetlError::MissingSourceField { .. } => "MissingSourceField",
            GetlError::TypeMismatch { .. } => "TypeMismatch",
            GetlError::BadConversion { .. } => "BadConversion",
            GetlError::ConnectionFailed { .. } => "ConnectionFailed",
            GetlError::QueryFailed { .. } => "QueryFailed",
            GetlError::ScanFailed { .. } => "ScanFailed",
            GetlError::ExecFailed { .. } => "ExecFailed",
            GetlError::CommitFailed { .. } => "CommitFailed",
            GetlError::IoFailed { .. } => "IoFailed",
            GetlError::PartialFailure { .. } => "PartialFailure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy_name() {
        assert_eq!(GetlError::BadConfig("x".into()).kind(), "BadConfig");
        assert_eq!(
            GetlError::UnmappedType {
                vendor: "oracle".into(),
                normalized_type: "JSON".into()
            }
            .kind(),
            "UnmappedType"
        );
        assert_eq!(
            GetlError::PartialFailure {
                records_loaded: 3,
                reason: "disk full".into()
            }
            .kind(),
            "PartialFailure"
        );
    }

    #[test]
    fn messages_include_failing_subject() {
        let err = GetlError::QueryFailed {
            vendor: "postgres".into(),
            query_fragment: "SELECT * FROM users".into(),
            source: anyhow::anyhow!("connection reset"),
        };
        let msg = err.to_string();
        assert!(msg.contains("postgres"));
        assert!(msg.contains("SELECT * FROM users"));
    }
}
