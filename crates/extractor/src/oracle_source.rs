//! Oracle source adapter, via the `oracle` crate.
//!
//! Like SQLite, the `oracle` crate's `Connection` is blocking, so the query
//! runs on a dedicated thread and rows are bridged to the async pipeline
//! over a `tokio::sync::mpsc` channel.

use crate::{upgrade_text_columns, RowSource};
use async_trait::async_trait;
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};
use oracle::sql_type::OracleType;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// `user/password@connect_string`, the conventional Oracle "easy connect"
/// triple packed into one connection string field.
fn parse_connection_string(conn_str: &str) -> Result<(String, String, String), GetlError> {
    let (credentials, connect_string) = conn_str.split_once('@').ok_or_else(|| {
        GetlError::BadConfig(format!(
            "oracle connection string '{conn_str}' is missing '@connect_string'"
        ))
    })?;
    let (user, password) = credentials.split_once('/').ok_or_else(|| {
        GetlError::BadConfig(format!(
            "oracle connection string '{conn_str}' is missing 'user/password'"
        ))
    })?;
    Ok((user.to_string(), password.to_string(), connect_string.to_string()))
}

pub(crate) async fn open(
    job: &Job,
    sql: &str,
) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let (user, password, connect_string) = parse_connection_string(&job.source_connection_string)?;
    let sql = sql.to_string();
    let (tx, mut rx) = mpsc::channel::<WorkerMsg>(32);

    std::thread::spawn(move || run_query(&user, &password, &connect_string, &sql, tx));

    let mut columns = match rx.recv().await {
        Some(WorkerMsg::Schema(result)) => result?,
        _ => {
            return Err(GetlError::ConnectionFailed {
                vendor: Vendor::Oracle.to_string(),
                source: anyhow::anyhow!("oracle worker ended before reporting schema"),
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
        Box::new(OracleSource {
            rx,
            buffered,
            columns: columns.clone(),
            row_index: 0,
        }),
        columns,
    ))
}

enum WorkerMsg {
    Schema(Result<ColumnTypeMap, GetlError>),
    Row(Result<Row, GetlError>),
}

fn run_query(
    user: &str,
    password: &str,
    connect_string: &str,
    sql: &str,
    tx: mpsc::Sender<WorkerMsg>,
) {
    let conn = match oracle::Connection::connect(user, password, connect_string) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::ConnectionFailed {
                vendor: Vendor::Oracle.to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    let result_set = match conn.query(sql, &[]) {
        Ok(rs) => rs,
        Err(e) => {
            let _ = tx.blocking_send(WorkerMsg::Schema(Err(GetlError::QueryFailed {
                vendor: Vendor::Oracle.to_string(),
                query_fragment: sql.to_string(),
                source: anyhow::anyhow!(e),
            })));
            return;
        }
    };

    let column_names: Vec<String> = result_set
        .column_info()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let mut columns = ColumnTypeMap::new();
    for col in result_set.column_info() {
        columns.insert(col.name().to_string(), normalize_oracle_type(col.oracle_type()));
    }

    if tx.blocking_send(WorkerMsg::Schema(Ok(columns))).is_err() {
        return;
    }

    for row_result in result_set {
        let row = match row_result {
            Ok(row) => row,
            Err(e) => {
                let _ = tx.blocking_send(WorkerMsg::Row(Err(GetlError::ScanFailed {
                    vendor: Vendor::Oracle.to_string(),
                    column: "<row>".to_string(),
                    source: anyhow::anyhow!(e),
                })));
                return;
            }
        };
        match scan_row(&row, &column_names) {
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
        }
    }
}

fn normalize_oracle_type(ty: &OracleType) -> NormalizedType {
    match ty {
        OracleType::Number(_, scale) if *scale == 0 => NormalizedType::Number,
        OracleType::Number(..) | OracleType::Float(_) | OracleType::BinaryDouble => {
            NormalizedType::Decimal
        }
        OracleType::BinaryFloat => NormalizedType::Float,
        OracleType::Varchar2(_) | OracleType::NVarchar2(_) | OracleType::Char(_) => {
            NormalizedType::VarChar2
        }
        OracleType::CLOB | OracleType::NCLOB => NormalizedType::Clob,
        OracleType::Raw(_) | OracleType::BLOB => NormalizedType::Blob,
        OracleType::Date => NormalizedType::Date,
        OracleType::Timestamp(_) => NormalizedType::DateTime,
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => NormalizedType::Timestamp,
        _ => NormalizedType::VarChar2,
    }
}

fn scan_row(row: &oracle::Row, column_names: &[String]) -> Result<Vec<Value>, GetlError> {
    let mut values = Vec::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        let sql_value = row.sql_value(i).map_err(|e| GetlError::ScanFailed {
            vendor: Vendor::Oracle.to_string(),
            column: name.clone(),
            source: anyhow::anyhow!(e),
        })?;
        values.push(convert_sql_value(sql_value, name)?);
    }
    Ok(values)
}

fn convert_sql_value(sql_value: &oracle::SqlValue, column: &str) -> Result<Value, GetlError> {
    let scan_err = |e: oracle::Error| GetlError::ScanFailed {
        vendor: Vendor::Oracle.to_string(),
        column: column.to_string(),
        source: anyhow::anyhow!(e),
    };

    if sql_value.is_null().unwrap_or(false) {
        return Ok(Value::Null);
    }

    match sql_value.oracle_type().map_err(scan_err)? {
        OracleType::Number(_, scale) if *scale == 0 => {
            Ok(Value::Int(sql_value.get::<i64>().map_err(scan_err)?))
        }
        OracleType::Number(..) | OracleType::Float(_) | OracleType::BinaryDouble
        | OracleType::BinaryFloat => Ok(Value::Real(sql_value.get::<f64>().map_err(scan_err)?)),
        OracleType::Raw(_) | OracleType::BLOB => {
            Ok(Value::Bytes(sql_value.get::<Vec<u8>>().map_err(scan_err)?))
        }
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => {
            let ts: chrono::DateTime<chrono::Utc> = sql_value.get().map_err(scan_err)?;
            Ok(Value::Timestamp(ts))
        }
        _ => Ok(Value::Text(sql_value.get::<String>().map_err(scan_err)?)),
    }
}

pub(crate) struct OracleSource {
    rx: mpsc::Receiver<WorkerMsg>,
    buffered: VecDeque<Row>,
    columns: ColumnTypeMap,
    row_index: usize,
}

#[async_trait]
impl RowSource for OracleSource {
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

    #[test]
    fn rejects_connection_string_without_at_sign() {
        let err = parse_connection_string("scott/tiger").unwrap_err();
        assert!(matches!(err, GetlError::BadConfig(_)));
    }

    #[test]
    fn rejects_connection_string_without_slash() {
        let err = parse_connection_string("scott@orcl").unwrap_err();
        assert!(matches!(err, GetlError::BadConfig(_)));
    }

    #[test]
    fn parses_well_formed_connection_string() {
        let (user, password, connect_string) =
            parse_connection_string("scott/tiger@orcl.example.com:1521/orcl").unwrap();
        assert_eq!(user, "scott");
        assert_eq!(password, "tiger");
        assert_eq!(connect_string, "orcl.example.com:1521/orcl");
    }
}
