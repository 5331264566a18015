//! Assembles a `SELECT` statement from a [`Job`].
//!
//! This is a pure function over already-validated configuration: no I/O,
//! no connection, no escaping of identifiers (joins/where/order-by are
//! configuration, not untrusted input, per the core specification's design
//! note in §4.2).

use getl_core::{GetlError, Job, Value};

/// Builds `(sql_text, bound_params)` for `job`.
///
/// If `job.sql_query` is set, it is returned unchanged with empty params.
/// Otherwise composes `SELECT <fields> FROM <source_table> [<join> JOIN
/// <table> ON <cond>]* [WHERE <clause>] [ORDER BY <clause>]`.
///
/// `fields` overrides `job.fields` when non-empty (the Extractor passes the
/// resolved column list here once source metadata is known); when both are
/// empty the query selects `*`.
pub fn build(job: &Job, fields: &[String]) -> Result<(String, Vec<Value>), GetlError> {
    if let Some(raw) = &job.sql_query {
        return Ok((raw.clone(), Vec::new()));
    }

    let selected = if !fields.is_empty() {
        fields.join(", ")
    } else if !job.fields.is_empty() {
        job.fields.join(", ")
    } else {
        "*".to_string()
    };

    let mut sql = format!("SELECT {selected} FROM {}", job.source_table);

    for join in &job.joins {
        let join_kw = match join.join_type.to_ascii_uppercase().as_str() {
            "INNER" => "INNER",
            "LEFT" => "LEFT",
            "RIGHT" => "RIGHT",
            other => {
                return Err(GetlError::BadJoin(format!(
                    "unknown join type '{other}'"
                )))
            }
        };
        sql.push_str(&format!(" {join_kw} JOIN {} ON {}", join.table, join.on));
    }

    if let Some(where_clause) = &job.where_clause {
        sql.push_str(&format!(" WHERE {where_clause}"));
    }

    if let Some(order_by) = &job.order_by {
        sql.push_str(&format!(" ORDER BY {order_by}"));
    }

    Ok((sql, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use getl_core::{Join, Vendor};

    fn base_job() -> Job {
        serde_json::from_value(serde_json::json!({
            "sourceType": "sqlite",
            "sourceConnectionString": "file:src.db",
            "destinationType": "sqlite",
            "destinationConnectionString": "file:dst.db",
            "sourceTable": "users",
            "destinationTable": "users"
        }))
        .unwrap()
    }

    #[test]
    fn raw_sql_query_passes_through_unchanged() {
        let mut job = base_job();
        job.sql_query = Some("SELECT id FROM users WHERE active = 1".to_string());
        let (sql, params) = build(&job, &[]).unwrap();
        assert_eq!(sql, "SELECT id FROM users WHERE active = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn composes_select_from_fields_joins_where_order() {
        let mut job = base_job();
        job.fields = vec!["id".into(), "name".into()];
        job.joins.push(Join {
            join_type: "left".into(),
            table: "profiles".into(),
            on: "users.id = profiles.user_id".into(),
        });
        job.where_clause = Some("users.active = 1".into());
        job.order_by = Some("users.id".into());

        let (sql, _) = build(&job, &[]).unwrap();
        assert_eq!(
            sql,
            "SELECT id, name FROM users LEFT JOIN profiles ON users.id = profiles.user_id \
             WHERE users.active = 1 ORDER BY users.id"
        );
    }

    #[test]
    fn unknown_join_type_fails() {
        let mut job = base_job();
        job.joins.push(Join {
            join_type: "outer".into(),
            table: "profiles".into(),
            on: "1=1".into(),
        });
        let err = build(&job, &[]).unwrap_err();
        assert_eq!(err.kind(), "BadJoin");
    }

    #[test]
    fn extractor_supplied_fields_take_precedence_over_job_fields() {
        let mut job = base_job();
        job.fields = vec!["id".into()];
        let (sql, _) = build(&job, &["id".to_string(), "name".to_string()]).unwrap();
        assert_eq!(sql, "SELECT id, name FROM users");
    }

    #[test]
    fn no_fields_selects_star() {
        let job = base_job();
        let vendor = job.source_type;
        assert_eq!(vendor, Vendor::Sqlite);
        let (sql, _) = build(&job, &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM users");
    }
}
