//! PostgreSQL source adapter, via `tokio-postgres`.

use crate::{upgrade_text_columns, RowSource};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};
use tokio_postgres::types::Type;
use tokio_postgres::NoTls;

pub(crate) async fn open(
    job: &Job,
    sql: &str,
) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let (client, connection) = tokio_postgres::connect(&job.source_connection_string, NoTls)
        .await
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: Vendor::Postgres.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection task ended with an error");
        }
    });

    let pg_rows = client
        .query(sql, &[])
        .await
        .map_err(|e| GetlError::QueryFailed {
            vendor: Vendor::Postgres.to_string(),
            query_fragment: sql.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let column_names: Vec<String> = pg_rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut rows = Vec::with_capacity(pg_rows.len());
    for pg_row in &pg_rows {
        rows.push(convert_row(pg_row, &column_names)?);
    }

    let mut columns = ColumnTypeMap::new();
    if let Some(first) = pg_rows.first() {
        for column in first.columns() {
            columns.insert(column.name().to_string(), normalize_pg_type(column.type_()));
        }
    }
    for (i, row) in rows.iter().enumerate().take(3) {
        upgrade_text_columns(&mut columns, row, i);
    }

    Ok((Box::new(MaterializedSource { rows, index: 0 }), columns))
}

fn normalize_pg_type(ty: &Type) -> NormalizedType {
    match *ty {
        Type::BOOL => NormalizedType::Boolean,
        Type::INT2 | Type::INT4 | Type::INT8 => NormalizedType::Integer,
        Type::FLOAT4 | Type::FLOAT8 => NormalizedType::Float,
        Type::NUMERIC => NormalizedType::Decimal,
        Type::DATE => NormalizedType::Date,
        Type::TIMESTAMP => NormalizedType::DateTime,
        Type::TIMESTAMPTZ => NormalizedType::Timestamp,
        Type::BYTEA => NormalizedType::Blob,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => NormalizedType::VarChar,
        _ => NormalizedType::Text,
    }
}

fn convert_row(row: &tokio_postgres::Row, column_names: &[String]) -> Result<Row, GetlError> {
    let mut values = Vec::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        values.push(convert_value(row, i, name)?);
    }
    Ok(Row::new(column_names.to_vec(), values))
}

fn convert_value(row: &tokio_postgres::Row, index: usize, column: &str) -> Result<Value, GetlError> {
    let ty = row.columns()[index].type_().clone();
    let scan_err = |e: tokio_postgres::Error| GetlError::ScanFailed {
        vendor: Vendor::Postgres.to_string(),
        column: column.to_string(),
        source: anyhow::anyhow!(e),
    };

    let value = match ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .map_err(scan_err)?
            .map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map_err(scan_err)?
            .map(|v| Value::Int(v as i64)),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map_err(scan_err)?
            .map(|v| Value::Int(v as i64)),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .map_err(scan_err)?
            .map(Value::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map_err(scan_err)?
            .map(|v| Value::Real(v as f64)),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)
            .map_err(scan_err)?
            .map(Value::Real),
        Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(index)
            .map_err(scan_err)?
            .map(|v| Value::Text(v.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map_err(scan_err)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map_err(scan_err)?
            .map(|dt| Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map_err(scan_err)?
            .map(Value::Timestamp),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)
            .map_err(scan_err)?
            .map(Value::Bytes),
        _ => row
            .try_get::<_, Option<String>>(index)
            .map_err(scan_err)?
            .map(Value::Text),
    };

    Ok(value.unwrap_or(Value::Null))
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
