//! SQL Server source adapter, via `tiberius`.
//!
//! `tiberius` drives its own TCP socket rather than bringing a Tokio
//! integration of its own, so the connection is bridged through
//! `tokio_util::compat` the way the workspace bridges other raw-socket
//! async drivers.

use crate::{upgrade_text_columns, RowSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getl_core::{ColumnTypeMap, GetlError, Job, NormalizedType, Row, Value, Vendor};
use tiberius::{Client, ColumnType};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;

pub(crate) async fn open(
    job: &Job,
    sql: &str,
) -> Result<(Box<dyn RowSource>, ColumnTypeMap), GetlError> {
    let config = tiberius::Config::from_ado_string(&job.source_connection_string).map_err(|e| {
        GetlError::BadConfig(format!("invalid sql server connection string: {e}"))
    })?;

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: Vendor::SqlServer.to_string(),
            source: anyhow::anyhow!(e),
        })?;
    tcp.set_nodelay(true).ok();

    let mut client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| GetlError::ConnectionFailed {
            vendor: Vendor::SqlServer.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let stream = client
        .query(sql, &[])
        .await
        .map_err(|e| GetlError::QueryFailed {
            vendor: Vendor::SqlServer.to_string(),
            query_fragment: sql.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let ms_rows = stream
        .into_first_result()
        .await
        .map_err(|e| GetlError::QueryFailed {
            vendor: Vendor::SqlServer.to_string(),
            query_fragment: sql.to_string(),
            source: anyhow::anyhow!(e),
        })?;

    let mut columns = ColumnTypeMap::new();
    if let Some(first) = ms_rows.first() {
        for col in first.columns() {
            columns.insert(col.name().to_string(), normalize_mssql_type(col.column_type()));
        }
    }

    let mut rows = Vec::with_capacity(ms_rows.len());
    for ms_row in &ms_rows {
        rows.push(convert_row(ms_row)?);
    }

    for (i, row) in rows.iter().enumerate().take(3) {
        upgrade_text_columns(&mut columns, row, i);
    }

    Ok((Box::new(MaterializedSource { rows, index: 0 }), columns))
}

fn normalize_mssql_type(ty: ColumnType) -> NormalizedType {
    match ty {
        ColumnType::Bit | ColumnType::Bitn => NormalizedType::Boolean,
        ColumnType::Int1 | ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8
        | ColumnType::Intn => NormalizedType::Integer,
        ColumnType::Float4 | ColumnType::Float8 | ColumnType::Floatn => NormalizedType::Float,
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money
        | ColumnType::Money4 => NormalizedType::Decimal,
        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetime4
        | ColumnType::Datetimen => NormalizedType::DateTime,
        ColumnType::Daten => NormalizedType::Date,
        ColumnType::DatetimeOffsetn => NormalizedType::Timestamp,
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => {
            NormalizedType::Blob
        }
        ColumnType::NVarchar | ColumnType::BigVarChar | ColumnType::NChar
        | ColumnType::BigChar => NormalizedType::VarChar,
        ColumnType::Text | ColumnType::NText => NormalizedType::Clob,
        _ => NormalizedType::Text,
    }
}

fn convert_row(ms_row: &tiberius::Row) -> Result<Row, GetlError> {
    let column_names: Vec<String> = ms_row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        values.push(convert_value(ms_row, i, name)?);
    }
    Ok(Row::new(column_names, values))
}

fn convert_value(ms_row: &tiberius::Row, index: usize, column: &str) -> Result<Value, GetlError> {
    let ty = ms_row.columns()[index].column_type();
    let scan_err = |e: tiberius::error::Error| GetlError::ScanFailed {
        vendor: Vendor::SqlServer.to_string(),
        column: column.to_string(),
        source: anyhow::anyhow!(e),
    };

    let value = match ty {
        ColumnType::Bit | ColumnType::Bitn => {
            ms_row.try_get::<bool, _>(index).map_err(scan_err)?.map(Value::Bool)
        }
        ColumnType::Int1 => ms_row
            .try_get::<u8, _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Int(v as i64)),
        ColumnType::Int2 => ms_row
            .try_get::<i16, _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Int(v as i64)),
        ColumnType::Int4 => ms_row
            .try_get::<i32, _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Int(v as i64)),
        ColumnType::Int8 | ColumnType::Intn => {
            ms_row.try_get::<i64, _>(index).map_err(scan_err)?.map(Value::Int)
        }
        ColumnType::Float4 => ms_row
            .try_get::<f32, _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Real(v as f64)),
        ColumnType::Float8 | ColumnType::Floatn => {
            ms_row.try_get::<f64, _>(index).map_err(scan_err)?.map(Value::Real)
        }
        ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime => ms_row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map_err(scan_err)?
            .map(|dt| Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))),
        ColumnType::DatetimeOffsetn => ms_row
            .try_get::<DateTime<Utc>, _>(index)
            .map_err(scan_err)?
            .map(Value::Timestamp),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => ms_row
            .try_get::<&[u8], _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Bytes(v.to_vec())),
        _ => ms_row
            .try_get::<&str, _>(index)
            .map_err(scan_err)?
            .map(|v| Value::Text(v.to_string())),
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
