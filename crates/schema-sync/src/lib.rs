//! Opens a destination connection and ensures a table exists before the
//! Loader writes to it.
//!
//! [`Destination`] is the connection-holding type the Loader reuses
//! directly rather than reconnecting: `ensure` and every subsequent write
//! in a run share the same handle, so DDL and DML observe the same
//! transaction-isolation defaults.

use getl_core::{ColumnTypeMap, GetlError, Job, Vendor};
use tokio_util::compat::TokioAsyncWriteCompatExt;

/// An open destination connection, one variant per supported vendor.
///
/// `rusqlite::Connection` and `oracle::Connection` are blocking, and the
/// destination handle is held across many short calls in sequence rather
/// than streamed through once like an Extractor result set. Each is kept
/// behind an `Option` so [`run_sqlite_blocking`]/[`run_oracle_blocking`]
/// can move the connection onto a `spawn_blocking` thread and back; the
/// slot is only ever empty for the duration of one blocking call.
pub enum Destination {
    Sqlite(Option<rusqlite::Connection>),
    Postgres(tokio_postgres::Client),
    MySql(mysql_async::Conn),
    Oracle(Option<oracle::Connection>),
    SqlServer(tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>),
}

impl Destination {
    pub fn vendor(&self) -> Vendor {
        match self {
            Destination::Sqlite(_) => Vendor::Sqlite,
            Destination::Postgres(_) => Vendor::Postgres,
            Destination::MySql(_) => Vendor::MySql,
            Destination::Oracle(_) => Vendor::Oracle,
            Destination::SqlServer(_) => Vendor::SqlServer,
        }
    }
}

/// Runs a blocking closure against the SQLite connection held in `slot` on
/// the blocking thread pool, putting the connection back once it returns.
///
/// `block_in_place` would panic under a current-thread runtime (the
/// default for `#[tokio::test]`); `spawn_blocking` works regardless of the
/// calling runtime's flavor.
pub async fn run_sqlite_blocking<T, F>(
    slot: &mut Option<rusqlite::Connection>,
    f: F,
) -> Result<T, rusqlite::Error>
where
    F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = slot.take().expect("sqlite destination connection missing from its slot");
    let (conn, result) = tokio::task::spawn_blocking(move || {
        let result = f(&conn);
        (conn, result)
    })
    .await
    .expect("sqlite blocking task panicked");
    *slot = Some(conn);
    result
}

/// Runs a blocking closure against the Oracle connection held in `slot` on
/// the blocking thread pool, putting the connection back once it returns.
pub async fn run_oracle_blocking<T, F>(
    slot: &mut Option<oracle::Connection>,
    f: F,
) -> Result<T, oracle::Error>
where
    F: FnOnce(&oracle::Connection) -> Result<T, oracle::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = slot.take().expect("oracle destination connection missing from its slot");
    let (conn, result) = tokio::task::spawn_blocking(move || {
        let result = f(&conn);
        (conn, result)
    })
    .await
    .expect("oracle blocking task panicked");
    *slot = Some(conn);
    result
}

/// Opens a connection to `job`'s destination.
pub async fn connect(job: &Job) -> Result<Destination, GetlError> {
    match job.destination_type {
        Vendor::Sqlite => {
            let path = job
                .destination_connection_string
                .strip_prefix("file:")
                .unwrap_or(&job.destination_connection_string)
                .to_string();
            let conn = tokio::task::spawn_blocking(move || rusqlite::Connection::open(&path))
                .await
                .expect("sqlite open task panicked")
                .map_err(|e| GetlError::ConnectionFailed {
                    vendor: Vendor::Sqlite.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
            Ok(Destination::Sqlite(Some(conn)))
        }
        Vendor::Postgres => {
            let (client, connection) =
                tokio_postgres::connect(&job.destination_connection_string, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| GetlError::ConnectionFailed {
                        vendor: Vendor::Postgres.to_string(),
                        source: anyhow::anyhow!(e),
                    })?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(error = %e, "postgres destination connection task ended with an error");
                }
            });
            Ok(Destination::Postgres(client))
        }
        Vendor::MySql => {
            let pool = mysql_async::Pool::new(job.destination_connection_string.as_str());
            let conn = pool.get_conn().await.map_err(|e| GetlError::ConnectionFailed {
                vendor: Vendor::MySql.to_string(),
                source: anyhow::anyhow!(e),
            })?;
            Ok(Destination::MySql(conn))
        }
        Vendor::Oracle => {
            let (user, password, connect_string) =
                parse_oracle_connection_string(&job.destination_connection_string)?;
            let conn = tokio::task::spawn_blocking(move || {
                oracle::Connection::connect(&user, &password, &connect_string)
            })
            .await
            .expect("oracle connect task panicked")
            .map_err(|e| GetlError::ConnectionFailed {
                vendor: Vendor::Oracle.to_string(),
                source: anyhow::anyhow!(e),
            })?;
            Ok(Destination::Oracle(Some(conn)))
        }
        Vendor::SqlServer => {
            let config = tiberius::Config::from_ado_string(&job.destination_connection_string)
                .map_err(|e| {
                    GetlError::BadConfig(format!("invalid sql server connection string: {e}"))
                })?;
            let tcp = tokio::net::TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| GetlError::ConnectionFailed {
                    vendor: Vendor::SqlServer.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
            tcp.set_nodelay(true).ok();
            let client = tiberius::Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| GetlError::ConnectionFailed {
                    vendor: Vendor::SqlServer.to_string(),
                    source: anyhow::anyhow!(e),
                })?;
            Ok(Destination::SqlServer(client))
        }
    }
}

/// Default number of attempts for [`connect_with_retry`].
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
/// Default delay between attempts for [`connect_with_retry`], in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// Opens a connection to `job`'s destination, retrying transient failures up
/// to `max_attempts` times with a fixed `delay_secs` pause between them.
///
/// Not called by [`connect`] or the pipeline driver: resilience on top of the
/// core contract is opt-in, for callers (the Scheduler, a long-running
/// service) that want it.
pub async fn connect_with_retry(
    job: &Job,
    max_attempts: u32,
    delay_secs: u64,
) -> Result<Destination, GetlError> {
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match connect(job).await {
            Ok(destination) => {
                if attempt > 1 {
                    tracing::info!(attempt, "destination connection succeeded after retrying");
                }
                return Ok(destination);
            }
            Err(e) => {
                if attempt < max_attempts {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "destination connection failed, retrying in {delay_secs}s"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("max_attempts.max(1) guarantees at least one iteration"))
}

fn parse_oracle_connection_string(conn_str: &str) -> Result<(String, String, String), GetlError> {
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

/// Emits vendor-neutral `CREATE TABLE IF NOT EXISTS` DDL for `table` with
/// `columns`, through Type-Mapper resolution, and executes it against
/// `destination`. `update_key` is accepted into the signature so a future
/// vendor adapter can add a primary-key/unique constraint, but the current
/// DDL never adds one — destination DDL is create-if-missing only, per the
/// core specification's non-goals.
pub async fn ensure(
    destination: &mut Destination,
    table: &str,
    columns: &ColumnTypeMap,
    _update_key: Option<&str>,
) -> Result<(), GetlError> {
    let vendor = destination.vendor();
    let ddl = build_ddl(vendor, table, columns)?;
    tracing::debug!(table, vendor = %vendor, "ensuring destination table exists");

    match destination {
        Destination::Sqlite(slot) => {
            let stmt = ddl.clone();
            run_sqlite_blocking(slot, move |conn| conn.execute(&stmt, []))
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: Vendor::Sqlite.to_string(),
                    statement_fragment: ddl.clone(),
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::Postgres(client) => {
            client
                .batch_execute(&ddl)
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: Vendor::Postgres.to_string(),
                    statement_fragment: ddl.clone(),
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::MySql(conn) => {
            use mysql_async::prelude::Queryable;
            conn.query_drop(&ddl)
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: Vendor::MySql.to_string(),
                    statement_fragment: ddl.clone(),
                    source: anyhow::anyhow!(e),
                })?;
        }
        Destination::Oracle(slot) => {
            let stmt = ddl.clone();
            let result = run_oracle_blocking(slot, move |conn| conn.execute(&stmt, &[])).await;
            if let Err(e) = result {
                if !is_oracle_table_exists_error(&e) {
                    return Err(GetlError::ExecFailed {
                        vendor: Vendor::Oracle.to_string(),
                        statement_fragment: ddl.clone(),
                        source: anyhow::anyhow!(e),
                    });
                }
            }
        }
        Destination::SqlServer(client) => {
            client
                .execute(ddl.as_str(), &[])
                .await
                .map_err(|e| GetlError::ExecFailed {
                    vendor: Vendor::SqlServer.to_string(),
                    statement_fragment: ddl.clone(),
                    source: anyhow::anyhow!(e),
                })?;
        }
    }

    Ok(())
}

/// Oracle has no `CREATE TABLE IF NOT EXISTS`; ORA-00955 ("name is already
/// used by an existing object") is the driver's way of saying the table is
/// already there, which this function treats as success.
fn is_oracle_table_exists_error(err: &oracle::Error) -> bool {
    err.to_string().contains("ORA-00955")
}

fn build_ddl(vendor: Vendor, table: &str, columns: &ColumnTypeMap) -> Result<String, GetlError> {
    if columns.is_empty() {
        return Err(GetlError::BadConfig(format!(
            "cannot create table '{table}' with no columns"
        )));
    }

    let mut column_defs = Vec::with_capacity(columns.len());
    for (name, ty) in columns.iter() {
        let dst_type = getl_type_mapper::resolve(vendor, ty)?;
        column_defs.push(format!("{name} {dst_type}"));
    }

    let if_not_exists = match vendor {
        // Oracle's lack of IF NOT EXISTS is handled by catching ORA-00955
        // in `ensure` above, not here.
        Vendor::Oracle => "",
        _ => "IF NOT EXISTS ",
    };

    Ok(format!(
        "CREATE TABLE {if_not_exists}{table} ({})",
        column_defs.join(", ")
    ))
}
