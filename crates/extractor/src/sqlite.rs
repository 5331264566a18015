//! SQLite source adapter, via `rusqlite`.
//!
//! `rusqlite::Connection` is blocking, so the query runs on a dedicated
//! `std::thread` and rows are bridged to the async pipeline over a
//! `tokio::sync::mpsc` channel — the same blocking-to-async bridge shape
//! the teacher uses elsewhere in the workspace for blocking I/O.

use crate::{upgrade_text_columns, RowSource, ScanType};
use async_trait::async_trait;
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};
use std::collections::VecDeque;
use tokio::sync::mpsc;

pub(crate) async fn open(
    job: &Job,
    sql: &str,
) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let path = connection_path(&job.source_connection_string);
    let sql = sql.to_string();
    let (tx, mut rx) = mpsc::channel::<WorkerMsg>(32);

    std::thread::spawn(move || run_query(&path, &sql, tx));

    let mut columns = match rx.recv().await {
        Some(WorkerMsg::Schema(result)) => result?,
        _ => {
            return Err(GetlError::ConnectionFailed {
                vendor: Vendor::Sqlite.to_string(),
                source: anyhow::anyhow!("sqlite worker ended before reporting schema"),
            })
        }
    };

    // Peek the first three rows now so the TEXT->INTEGER/REAL/BLOB upgrade
    // rule is reflected in the column map handed back to the caller, the
    // same point at which the other vendor adapters apply it.
    let mut buffered = VecDeque::new();
    while buffered.len() < 3 {
        match rx.recv().await {
            Some(WorkerMsg::Row(Ok(row))) => {
                upgrade_text_columns(&mut columns, &row, buffered.len());
                buffered.push_back(row);
            }
            Some(WorkerMsg::Row(Err(e))) => return Err(e),
            Some(WorkerMsg::Schema(_)) => continue,
            None => break,
        }
    }

    Ok((
        Box::new(SqliteSource {
            rx,
            buffered,
            columns: columns.clone(),
            row_index: 0,
        }),
        columns,
    ))
}

fn connection_path(conn_str: &str) -> String {
    conn_str.strip_prefix("file:").unwrap_or(conn_str).to_string()
}

enum WorkerMsg {
    Schema(Result<ColumnTypeMap, GetlError>),
    Row(Result<Row, GetlError>),
}

/// Runs on a dedicated thread: prepares the statement, resolves column
/// types (falling back to the first row's storage class when SQLite
/// reports no declared type — its equivalent of an empty driver type
/// name), then streams the remaining rows.
fn run_query(path: &str, sql: &str, tx: mpsc::Sender<WorkerMsg>) {
    let conn = match rusqlite::Connection::open(path) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::ConnectionFailed {
                vendor: Vendor::Sqlite.to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::QueryFailed {
                vendor: Vendor::Sqlite.to_string(),
                query_fragment: sql.to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut columns = ColumnTypeMap::new();
    let mut needs_scan_type = vec![false; column_names.len()];
    for (i, name) in column_names.iter().enumerate() {
        match stmt.column_decltype(i) {
            Some(decl) if !decl.is_empty() => {
                columns.insert(name.clone(), NormalizedType::from_token(decl))
            }
            _ => {
                needs_scan_type[i] = true;
                columns.insert(name.clone(), NormalizedType::Text);
            }
        }
    }

    let mut rows = match stmt.query([]) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::QueryFailed {
                vendor: Vendor::Sqlite.to_string(),
                query_fragment: sql.to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    // Peek the first row (if any) to resolve scan-type fallback for
    // columns SQLite reported no declared type for, then send the final
    // schema frame before streaming that row and the rest.
    let first_row = match rows.next() {
        Ok(Some(row)) => match scan_row(&row, &column_names) {
            Ok(values) => {
                for (i, has_fallback) in needs_scan_type.iter().enumerate() {
                    if *has_fallback {
                        let ty = scan_type_of(&values[i]);
                        columns.insert(column_names[i].clone(), ty);
                    }
                }
                Some(Row::new(column_names.clone(), values))
            }
            Err(e) => {
                let _ = tx.blocking_send(WorkerMsg::Schema(Err(e)));
                return;
            }
        },
        Ok(None) => None,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::ScanFailed {
                vendor: Vendor::Sqlite.to_string(),
                column: "<row>".to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    if tx.blocking_send(WorkerMsg::Schema(Ok(columns))).is_err() {
        return;
    }

    if let Some(row) = first_row {
        if tx.blocking_send(WorkerMsg::Row(Ok(row))).is_err() {
            return;
        }
    } else {
        return;
    }

    loop {
        match rows.next() {
            Ok(Some(row)) => match scan_row(&row, &column_names) {
                Ok(values) => {
                    let row = Row::new(column_names.clone(), values);
                    if tx.blocking_send(WorkerMsg::Row(Ok(row))).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(WorkerMsg::Row(Err(e)));
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(WorkerMsg::Row(Err(GetlError::ScanFailed {
                    vendor: Vendor::Sqlite.to_string(),
                    column: "<row>".to_string(),
                    source: anyhow::anyhow!(e),
                })));
                return;
            }
        }
    }
}

fn scan_row(row: &rusqlite::Row<'_>, column_names: &[String]) -> Result<Vec<Value>, GetlError> {
    let mut values = Vec::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        let v = row.get_ref(i).map_err(|e| GetlError::ScanFailed {
            vendor: Vendor::Sqlite.to_string(),
            column: name.clone(),
            source: anyhow::anyhow!(e),
        })?;
        values.push(value_from_ref(v));
    }
    Ok(values)
}

fn scan_type_of(value: &Value) -> NormalizedType {
    let scan_type = match value {
        Value::Text(_) => ScanType::String,
        Value::Int(_) => ScanType::Int64,
        Value::Real(_) => ScanType::Float64,
        Value::Bytes(_) => ScanType::Bytes,
        Value::Bool(_) => ScanType::Bool,
        Value::Null | Value::Timestamp(_) => ScanType::Other,
    };
    crate::infer_from_scan_type(scan_type)
}

fn value_from_ref(r: rusqlite::types::ValueRef<'_>) -> Value {
    match r {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Int(i),
        rusqlite::types::ValueRef::Real(f) => Value::Real(f),
        rusqlite::types::ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

pub(crate) struct SqliteSource {
    rx: mpsc::Receiver<WorkerMsg>,
    buffered: VecDeque<Row>,
    columns: ColumnTypeMap,
    row_index: usize,
}

#[async_trait]
impl RowSource for SqliteSource {
    async fn next(&mut self) -> Result<Option<Row>, GetlError> {
        if let Some(row) = self.buffered.pop_front() {
            upgrade_text_columns(&mut self.columns, &row, self.row_index);
            self.row_index = self.row_index.saturating_add(1);
            return Ok(Some(row));
        }
        loop {
            match self.rx.recv().await {
                Some(WorkerMsg::Row(Ok(row))) => {
                    upgrade_text_columns(&mut self.columns, &row, self.row_index);
                    self.row_index = self.row_index.saturating_add(1);
                    return Ok(Some(row));
                }
                Some(WorkerMsg::Row(Err(e))) => return Err(e),
                Some(WorkerMsg::Schema(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), GetlError> {
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(path: &str) -> Job {
        serde_json::from_value(serde_json::json!({
            "sourceType": "sqlite",
            "sourceConnectionString": format!("file:{path}"),
            "destinationType": "sqlite",
            "destinationConnectionString": "file:dst.db",
            "sourceTable": "users",
            "destinationTable": "users"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn extracts_rows_with_inferred_types() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("src.db");
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
            .unwrap();
        conn.execute("INSERT INTO users VALUES (1, 'a'), (2, 'b')", [])
            .unwrap();
        drop(conn);

        let job = sample_job(db_path.to_str().unwrap());
        let (source, columns) = open(&job, "SELECT id, name FROM users").await.unwrap();
        assert_eq!(columns.get("id"), Some(NormalizedType::Integer));
        assert_eq!(columns.get("name"), Some(NormalizedType::Text));

        let rows = crate::collect_all(source).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn text_column_is_upgraded_before_open_returns() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("src.db");
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE codes (id INTEGER, code TEXT)", [])
            .unwrap();
        conn.execute("INSERT INTO codes VALUES (1, '100'), (2, '200')", [])
            .unwrap();
        drop(conn);

        let job = sample_job(db_path.to_str().unwrap());
        let (_source, columns) = open(&job, "SELECT id, code FROM codes").await.unwrap();
        assert_eq!(columns.get("code"), Some(NormalizedType::Integer));
    }

    #[tokio::test]
    async fn empty_result_set_reports_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("src.db");
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("CREATE TABLE users (id INTEGER, name TEXT)", [])
            .unwrap();
        drop(conn);

        let job = sample_job(db_path.to_str().unwrap());
        let (source, _columns) = open(&job, "SELECT id, name FROM users").await.unwrap();
        let rows = crate::collect_all(source).await.unwrap();
        assert!(rows.is_empty());
    }
}
