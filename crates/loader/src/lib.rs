//! Writes rows into a destination table inside a single transaction.
//!
//! [`Loader`] wraps the [`getl_schema_sync::Destination`] handle
//! Schema-Synchronizer already opened and ensured the table against, so DDL
//! and DML share one connection and one set of driver defaults. The value
//! formatter in this module is the single place every vendor's text-built
//! `INSERT`/upsert statement goes through.

use async_trait::async_trait;
use getl_core::{GetlError, Row, Value, Vendor};
use getl_schema_sync::{run_oracle_blocking, run_sqlite_blocking, Destination};

/// The capability every destination adapter implements: `begin` opens a
/// transaction, `write` appends a batch of rows to it, `commit` finalizes
/// it, `rollback` discards it. The caller owns exactly one open
/// transaction at a time — `write` is never called before `begin` or after
/// `commit`/`rollback` in the pipeline driver's usage.
#[async_trait]
pub trait RowSink: Send {
    async fn begin(&mut self) -> Result<(), GetlError>;
    async fn write(&mut self, rows: &[Row]) -> Result<(), GetlError>;
    async fn commit(&mut self) -> Result<(), GetlError>;
    async fn rollback(&mut self) -> Result<(), GetlError>;
}

/// A destination table write target: the open connection, the table being
/// written to, and the optional upsert key.
pub struct Loader {
    destination: Destination,
    table: String,
    /// Column (or comma-joined column list) rows are upserted on. A plain
    /// append-only `INSERT` is used when absent.
    update_key: Option<String>,
}

impl Loader {
    pub fn new(destination: Destination, table: impl Into<String>, update_key: Option<String>) -> Loader {
        Loader {
            destination,
            table: table.into(),
            update_key,
        }
    }

    pub fn into_destination(self) -> Destination {
        self.destination
    }
}

#[async_trait]
impl RowSink for Loader {
    async fn begin(&mut self) -> Result<(), GetlError> {
        let vendor = self.destination.vendor();
        let begin_stmt = match vendor {
            Vendor::SqlServer => "BEGIN TRANSACTION",
            Vendor::MySql => "START TRANSACTION",
            _ => "BEGIN",
        };
        exec_control_statement(&mut self.destination, begin_stmt).await
    }

    async fn write(&mut self, rows: &[Row]) -> Result<(), GetlError> {
        if rows.is_empty() {
            return Ok(());
        }

        let vendor = self.destination.vendor();
        match vendor {
            Vendor::Postgres | Vendor::Sqlite | Vendor::MySql => {
                let stmt = build_batch_insert(vendor, &self.table, rows, self.update_key.as_deref())?;
                exec_control_statement(&mut self.destination, &stmt).await
            }
            Vendor::Oracle | Vendor::SqlServer => {
                for row in rows {
                    let stmt = match &self.update_key {
                        Some(key) => build_merge(vendor, &self.table, row, key)?,
                        None => build_single_row_insert(&self.table, row),
                    };
                    exec_control_statement(&mut self.destination, &stmt).await?;
                }
                Ok(())
            }
        }
    }

    async fn commit(&mut self) -> Result<(), GetlError> {
        let stmt = match self.destination.vendor() {
            Vendor::SqlServer => "COMMIT TRANSACTION",
            _ => "COMMIT",
        };
        exec_control_statement(&mut self.destination, stmt)
            .await
            .map_err(|e| GetlError::CommitFailed {
                vendor: self.destination.vendor().to_string(),
                source: anyhow::anyhow!(e),
            })
    }

    async fn rollback(&mut self) -> Result<(), GetlError> {
        let stmt = match self.destination.vendor() {
            Vendor::SqlServer => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        };
        exec_control_statement(&mut self.destination, stmt).await
    }
}

async fn exec_control_statement(destination: &mut Destination, sql: &str) -> Result<(), GetlError> {
    let vendor = destination.vendor();
    match destination {
        Destination::Sqlite(slot) => {
            let owned_sql = sql.to_string();
            let stmt = owned_sql.clone();
            run_sqlite_blocking(slot, move |conn| conn.execute_batch(&stmt))
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: vendor.to_string(),
                    statement_fragment: owned_sql,
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::Postgres(client) => {
            client
                .batch_execute(sql)
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: vendor.to_string(),
                    statement_fragment: sql.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::MySql(conn) => {
            use mysql_async::prelude::Queryable;
            conn.query_drop(sql)
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: vendor.to_string(),
                    statement_fragment: sql.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::Oracle(slot) => {
            let owned_sql = sql.to_string();
            let stmt = owned_sql.clone();
            run_oracle_blocking(slot, move |conn| conn.execute(&stmt, &[]))
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: vendor.to_string(),
                    statement_fragment: owned_sql,
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::SqlServer(client) => {
            client
                .execute(sql, &[])
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: vendor.to_string(),
                    statement_fragment: sql.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
        }
    }
    Ok(())
}

/// Renders one cell for inline SQL text: strings are single-quoted with
/// internal quotes doubled, bytes are base64-wrapped in quotes (no vendor
/// in this table has a portable literal blob syntax), timestamps render as
/// the quoted literal `YYYY-MM-DD HH:MM:SS` every destination in this table
/// accepts un-cast, booleans as bare `TRUE`/`FALSE`, and `NULL` as the bare
/// keyword.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(b) => {
            use base64::Engine;
            format!("'{}'", base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
    }
}

fn build_batch_insert(
    vendor: Vendor,
    table: &str,
    rows: &[Row],
    update_key: Option<&str>,
) -> Result<String, GetlError> {
    let columns = &rows[0].columns;
    let column_list = columns.join(", ");
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| format!("({})", row.values.iter().map(format_value).collect::<Vec<_>>().join(", ")))
        .collect();

    let mut stmt = format!(
        "INSERT INTO {table} ({column_list}) VALUES {}",
        value_rows.join(", ")
    );

    if let Some(key) = update_key {
        let update_cols: Vec<&String> = columns.iter().filter(|c| *c != key).collect();
        match vendor {
            Vendor::Postgres | Vendor::Sqlite => {
                if update_cols.is_empty() {
                    // The row has nothing besides the key; there's no column left to update.
                    stmt.push_str(&format!(" ON CONFLICT ({key}) DO NOTHING"));
                } else {
                    let set_clause = update_cols
                        .iter()
                        .map(|c| format!("{c} = EXCLUDED.{c}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    stmt.push_str(&format!(" ON CONFLICT ({key}) DO UPDATE SET {set_clause}"));
                }
            }
            Vendor::MySql => {
                if update_cols.is_empty() {
                    stmt.push_str(&format!(" ON DUPLICATE KEY UPDATE {key} = {key}"));
                } else {
                    let set_clause = update_cols
                        .iter()
                        .map(|c| format!("{c} = VALUES({c})"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    stmt.push_str(&format!(" ON DUPLICATE KEY UPDATE {set_clause}"));
                }
            }
            Vendor::Oracle | Vendor::SqlServer => {
                return Err(GetlError::BadConfig(
                    "batch upsert is not supported for this vendor; use the per-row merge path"
                        .to_string(),
                ))
            }
        }
    }

    Ok(stmt)
}

fn build_single_row_insert(table: &str, row: &Row) -> String {
    let column_list = row.columns.join(", ");
    let value_list = row.values.iter().map(format_value).collect::<Vec<_>>().join(", ");
    format!("INSERT INTO {table} ({column_list}) VALUES ({value_list})")
}

/// Builds a single-row `MERGE` statement for vendors without a portable
/// batched upsert syntax (Oracle, SQL Server).
fn build_merge(vendor: Vendor, table: &str, row: &Row, update_key: &str) -> Result<String, GetlError> {
    if !row.columns.iter().any(|c| c == update_key) {
        return Err(GetlError::BadConfig(format!(
            "update key '{update_key}' is not a column of the row being loaded into '{table}'"
        )));
    }

    let select_list: Vec<String> = row
        .columns
        .iter()
        .zip(row.values.iter())
        .map(|(c, v)| format!("{} AS {c}", format_value(v)))
        .collect();

    let update_clause = row
        .columns
        .iter()
        .filter(|c| *c != update_key)
        .map(|c| format!("t.{c} = s.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let insert_cols = row.columns.join(", ");
    let insert_vals = row
        .columns
        .iter()
        .map(|c| format!("s.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let source = match vendor {
        Vendor::Oracle => format!("(SELECT {} FROM dual)", select_list.join(", ")),
        _ => format!("(SELECT {})", select_list.join(", ")),
    };

    Ok(format!(
        "MERGE INTO {table} t USING {source} s ON (t.{update_key} = s.{update_key}) \
         WHEN MATCHED THEN UPDATE SET {update_clause} \
         WHEN NOT MATCHED THEN INSERT ({insert_cols}) VALUES ({insert_vals})"
    ))
}
