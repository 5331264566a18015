//! Opens a source connection, executes the built query, and streams rows
//! alongside their column-type metadata.
//!
//! Per vendor adapter module implements [`RowSource`]; [`extract`] is the
//! dispatcher the pipeline driver calls, matching on the job's source
//! vendor. None of this crate's failures are retried at this layer — each
//! one is surfaced with the source vendor name and, where relevant, the
//! failing query fragment attached, per the core specification's §4.3/§7.

mod mysql;
mod oracle_source;
mod postgres;
mod sqlite;
mod sqlserver;

use async_trait::async_trait;
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};

/// The capability set every vendor adapter implements: open is folded into
/// construction (via [`extract`]), `next` advances the cursor one row at a
/// time, and `close` releases the connection. `cancel` is cooperative:
/// callers drop the source or stop calling `next` to cancel, and each
/// adapter checks for that between rows.
#[async_trait]
pub trait RowSource: Send {
    /// Fetches the next row, or `None` when the result set is exhausted.
    async fn next(&mut self) -> Result<Option<Row>, GetlError>;

    /// Releases the underlying connection/cursor. Safe to call more than
    /// once; safe to skip if the source was already exhausted by `next`.
    async fn close(&mut self) -> Result<(), GetlError>;
}

/// Opens a connection to `job`'s source, executes the built query, and
/// returns a [`RowSource`] the caller drives one row at a time, alongside
/// the column-type metadata resolved from driver metadata (with fallback
/// inference).
pub async fn extract(job: &Job) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let (sql, _params) = getl_query_builder::build(job, &job.fields)?;

    match job.source_type {
        Vendor::Sqlite => sqlite::open(job, &sql).await,
        Vendor::Postgres => postgres::open(job, &sql).await,
        Vendor::MySql => mysql::open(job, &sql).await,
        Vendor::Oracle => oracle_source::open(job, &sql).await,
        Vendor::SqlServer => sqlserver::open(job, &sql).await,
    }
}

/// Drains `source` fully into a `Vec<Row>`. Convenience for callers (tests,
/// small jobs) that don't need streaming; large jobs should drive
/// [`RowSource::next`] directly so the full result set is never
/// materialized at once.
pub async fn collect_all(mut source: Box<dyn RowSource>) -> Result<Vec<Row>, GetlError> {
    let mut rows = Vec::new();
    while let Some(row) = source.next().await? {
        rows.push(row);
    }
    source.close().await?;
    Ok(rows)
}

/// Infers a normalized type from a driver's reported scan-type token when
/// the driver's declared column type name is empty, per core specification
/// §4.3: `string→TEXT, int64→INTEGER, float64→REAL, bool→INTEGER,
/// bytes→BLOB`, else `TEXT`.
pub(crate) enum ScanType {
    String,
    Int64,
    Float64,
    Bool,
    Bytes,
    Other,
}

pub(crate) fn infer_from_scan_type(scan_type: ScanType) -> NormalizedType {
    match scan_type {
        ScanType::String => NormalizedType::Text,
        ScanType::Int64 => NormalizedType::Integer,
        ScanType::Float64 => NormalizedType::Real,
        ScanType::Bool => NormalizedType::Integer,
        ScanType::Bytes => NormalizedType::Blob,
        ScanType::Other => NormalizedType::Text,
    }
}

/// For the first three rows only, upgrades a column's declared type from
/// `TEXT` to `INTEGER`/`REAL`/`BLOB` when the actual value parses as such.
/// Called once per row index (0, 1, 2) by every vendor adapter; rows past
/// the third never change the map, per core specification §4.3.
pub(crate) fn upgrade_text_columns(columns: &mut ColumnTypeMap, row: &Row, row_index: usize) {
    if row_index >= 3 {
        return;
    }
    for (column, value) in row.columns.iter().zip(row.values.iter()) {
        if columns.get(column) != Some(NormalizedType::Text) {
            continue;
        }
        if let Some(upgraded) = upgraded_type_for_value(value) {
            columns.insert(column.clone(), upgraded);
        }
    }
}

fn upgraded_type_for_value(value: &Value) -> Option<NormalizedType> {
    match value {
        Value::Text(s) => {
            if s.parse::<i64>().is_ok() {
                Some(NormalizedType::Integer)
            } else if s.parse::<f64>().is_ok() {
                Some(NormalizedType::Real)
            } else {
                None
            }
        }
        Value::Bytes(_) => Some(NormalizedType::Blob),
        Value::Int(_) => Some(NormalizedType::Integer),
        Value::Real(_) => Some(NormalizedType::Real),
        _ => None,
    }
}
