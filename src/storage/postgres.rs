//! PostgreSQL endpoints backed by one `sqlx` pool each.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use crate::connection::config::EndpointConfig;
use crate::connection::{ConnectionHandle, Connector, Executor, StorageResult};
use crate::core::{Row, Rows, StorageError, Value};

/// Opens a [`PgExecutor`] per endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Driver options for `endpoint`. Credentials are passed as-is, never
/// embedded in a URL.
fn connect_options(endpoint: &EndpointConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .username(&endpoint.user)
        .database(&endpoint.database)
        .ssl_mode(PgSslMode::Disable);
    if endpoint.password.is_empty() {
        options
    } else {
        options.password(&endpoint.password)
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, endpoint: &EndpointConfig) -> StorageResult<ConnectionHandle> {
        let pool = PgPoolOptions::new()
            .max_connections(endpoint.max_connections)
            .acquire_timeout(endpoint.connect_timeout)
            .connect_with(connect_options(endpoint))
            .await
            .map_err(|e| StorageError::Unreachable(format!("{}: {}", endpoint.to_url(), e)))?;

        debug!(endpoint = %endpoint.to_url(), max_connections = endpoint.max_connections, "pool opened");
        Ok(std::sync::Arc::new(PgExecutor::new(pool)))
    }
}

/// Pooled connection to one PostgreSQL server.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Executor for PgExecutor {
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> StorageResult<u64> {
        let result = bind_all(sqlx::query(sql), args)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> StorageResult<Option<Row>> {
        let row = bind_all(sqlx::query(sql), args)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn query_rows(&self, sql: &str, args: &[Value]) -> StorageResult<Rows> {
        let mut stream = bind_all(sqlx::query(sql), args).fetch(&self.pool);
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(decode_row(&row)?);
        }
        Ok(rows.into())
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Integer(i) => query.bind(*i),
            Value::Text(s) => query.bind(s.clone()),
            Value::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> StorageResult<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            if row.try_get_raw(index)?.is_null() {
                return Ok(Value::Null);
            }

            let value = match column.type_info().name() {
                "INT2" => Value::Integer(row.try_get::<i16, _>(index)? as i64),
                "INT4" => Value::Integer(row.try_get::<i32, _>(index)? as i64),
                "INT8" => Value::Integer(row.try_get::<i64, _>(index)?),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                    Value::Text(row.try_get::<String, _>(index)?)
                }
                "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
                "TIMESTAMP" => {
                    Value::Timestamp(row.try_get::<NaiveDateTime, _>(index)?.and_utc())
                }
                other => {
                    return Err(StorageError::Decode(format!(
                        "column '{}' has unsupported type {}",
                        column.name(),
                        other
                    )));
                }
            };
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_characters_in_password_keep_target() {
        let endpoint = EndpointConfig::new("app", "p@ss/w:rd#1?x=%")
            .host("db0.internal")
            .port(5440)
            .database("shard0");

        let options = connect_options(&endpoint);
        assert_eq!(options.get_host(), "db0.internal");
        assert_eq!(options.get_port(), 5440);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("shard0"));
    }

    #[test]
    fn test_reserved_characters_in_user_and_database() {
        let endpoint = EndpointConfig::new("svc@team", "")
            .port(5441)
            .database("shard/1");

        let options = connect_options(&endpoint);
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5441);
        assert_eq!(options.get_username(), "svc@team");
        assert_eq!(options.get_database(), Some("shard/1"));
    }
}
