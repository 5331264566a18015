//! MySQL source adapter, via `mysql_async`.

use crate::{upgrade_text_columns, RowSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};
use mysql_async::prelude::Queryable;
use mysql_async::Value as MyValue;

pub(crate) async fn open(
    job: &Job,
    sql: &str,
) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let pool = mysql_async::Pool::new(job.source_connection_string.as_str());
    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: Vendor::MySql.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let my_rows: Vec<mysql_async::Row> =
        conn.query(sql).await.map_err(|e| GetlError::QueryFailed {
            vendor: Vendor::MySql.to_string(),
            query_fragment: sql.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let column_names: Vec<String> = my_rows
        .first()
        .map(|r| {
            r.columns()
                .iter()
                .map(|c| c.name_str().to_string())
                .collect()
        })
        .unwrap_or_default();

    let mut columns = ColumnTypeMap::new();
    if let Some(first) = my_rows.first() {
        for col in first.columns_ref() {
            columns.insert(col.name_str().to_string(), normalize_mysql_type(col));
        }
    }

    let mut rows = Vec::with_capacity(my_rows.len());
    for my_row in my_rows {
        rows.push(convert_row(my_row, &column_names)?);
    }

    for (i, row) in rows.iter().enumerate().take(3) {
        upgrade_text_columns(&mut columns, row, i);
    }

    drop(conn);
    pool.disconnect().await.ok();

    Ok((Box::new(MaterializedSource { rows, index: 0 }), columns))
}

fn normalize_mysql_type(col: &mysql_async::Column) -> NormalizedType {
    use mysql_async::consts::ColumnType::*;
    match col.column_type() {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_LONGLONG
        | MYSQL_TYPE_INT24 | MYSQL_TYPE_YEAR => NormalizedType::Integer,
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => NormalizedType::Float,
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => NormalizedType::Decimal,
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => NormalizedType::Date,
        MYSQL_TYPE_DATETIME => NormalizedType::DateTime,
        MYSQL_TYPE_TIMESTAMP => NormalizedType::Timestamp,
        MYSQL_TYPE_BLOB | MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB
        | MYSQL_TYPE_LONG_BLOB => NormalizedType::Blob,
        MYSQL_TYPE_VARCHAR | MYSQL_TYPE_VAR_STRING => NormalizedType::VarChar,
        _ => NormalizedType::Text,
    }
}

fn convert_row(my_row: mysql_async::Row, column_names: &[String]) -> Result<Row, GetlError> {
    let mut values = Vec::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        let raw: &MyValue = my_row.as_ref(i).ok_or_else(|| GetlError::ScanFailed {
            vendor: Vendor::MySql.to_string(),
            column: name.clone(),
            source: anyhow::anyhow!("column index {i} out of range"),
        })?;
        values.push(convert_value(raw.clone()));
    }
    Ok(Row::new(column_names.to_vec(), values))
}

fn convert_value(raw: MyValue) -> Value {
    match raw {
        MyValue::NULL => Value::Null,
        MyValue::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => Value::Text(s),
            Err(_) => Value::Bytes(b),
        },
        MyValue::Int(i) => Value::Int(i),
        MyValue::UInt(u) => Value::Int(u as i64),
        MyValue::Float(f) => Value::Real(f as f64),
        MyValue::Double(f) => Value::Real(f),
        MyValue::Date(year, month, day, hour, minute, second, micro) => {
            let naive = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| {
                    d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micro)
                });
            match naive {
                Some(dt) => Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
                None => Value::Null,
            }
        }
        MyValue::Time(neg, days, hours, minutes, seconds, micros) => {
            let total_seconds = days as i64 * 86_400
                + hours as i64 * 3600
                + minutes as i64 * 60
                + seconds as i64;
            let total_seconds = if neg { -total_seconds } else { total_seconds };
            Value::Text(format!("{total_seconds}.{micros:06}"))
        }
    }
}

pub(crate) struct MaterializedSource {
    rows: Vec<Row>,
    index: usize,
}

#[async_trait]
impl RowSource for MaterializedSource {
    async fn next(&mut self) -> Result<Option<Row>, GetlError> {
        if self.index >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.index].clone();
        self.index += 1;
        Ok(Some(row))
    }

    async fn close(&mut self) -> Result<(), GetlError> {
        Ok(())
    }
}
