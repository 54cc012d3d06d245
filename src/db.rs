//! Database access layer for PostgreSQL/TimescaleDB
//!
//! All persistence goes through [`Database`]: transactional execute,
//! per-record batched writes, COPY-based bulk loads and read-only fetches
//! over a bounded connection pool. Conflict resolution (upsert vs. ignore)
//! always lives in the statement itself, never in this layer.

use crate::config::DatabaseConfig;
use crate::error::{CollectorError, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{FromRow, Postgres};
use tracing::{debug, error, info};

/// A single parameter value for COPY-based bulk loads
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

impl SqlValue {
    /// Append this value in COPY text format (tab-delimited, `\N` for null)
    fn encode_copy(&self, buf: &mut String) {
        match self {
            SqlValue::Int(v) => buf.push_str(&v.to_string()),
            SqlValue::Float(v) => buf.push_str(&v.to_string()),
            SqlValue::Bool(v) => buf.push(if *v { 't' } else { 'f' }),
            SqlValue::Text(v) => {
                // Delimiter and line-end characters must be backslash-escaped
                for c in v.chars() {
                    match c {
                        '\\' => buf.push_str("\\\\"),
                        '\t' => buf.push_str("\\t"),
                        '\n' => buf.push_str("\\n"),
                        '\r' => buf.push_str("\\r"),
                        _ => buf.push(c),
                    }
                }
            }
            SqlValue::Timestamp(v) => {
                buf.push_str(&v.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string());
            }
            SqlValue::Null => buf.push_str("\\N"),
        }
    }
}

fn encode_copy_row(row: &[SqlValue], buf: &mut String) {
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            buf.push('\t');
        }
        value.encode_copy(buf);
    }
    buf.push('\n');
}

/// Pooled database handle.
///
/// Cloning is cheap and shares the underlying pool. A connection checked
/// out for an operation is returned to the pool on every exit path,
/// including query failures and transport errors.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Initialize the bounded connection pool described by `config`.
    ///
    /// Fails with a configuration error when settings are invalid or the
    /// initial connection cannot be established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_pool_size)
            .max_connections(config.max_pool_size)
            .acquire_timeout(config.request_timeout())
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to initialize database pool: {e}");
                CollectorError::config(format!(
                    "failed to initialize pool for {}@{}:{}: {e}",
                    config.database, config.host, config.port
                ))
            })?;

        info!(
            "Database pool initialized: {}@{}:{} ({}..{} connections)",
            config.database, config.host, config.port, config.min_pool_size, config.max_pool_size
        );

        Ok(Self { pool })
    }

    /// Run a single statement in its own transaction.
    ///
    /// Commits on success and returns rows affected; rolls back and returns
    /// a typed database error on failure.
    pub async fn execute(&self, query: Query<'_, Postgres, PgArguments>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = query.execute(&mut *tx).await.map_err(|e| {
            error!("Statement failed, rolling back: {e}");
            CollectorError::from(e)
        })?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Run a single statement on a pooled connection with no surrounding
    /// transaction, for statements PostgreSQL refuses inside a transaction
    /// block (e.g. `REFRESH MATERIALIZED VIEW CONCURRENTLY`).
    pub async fn execute_autocommit(&self, query: Query<'_, Postgres, PgArguments>) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let result = query.execute(&mut *conn).await.map_err(|e| {
            error!("Statement failed: {e}");
            CollectorError::from(e)
        })?;
        Ok(result.rows_affected())
    }

    /// Apply a statement once per record inside one transaction.
    ///
    /// `bind` builds the bound statement for each record; records are
    /// iterated in `batch_size` chunks purely to bound per-chunk logging
    /// and memory, never to change conflict semantics, which stay
    /// per-record in the statement itself. Returns the total rows affected
    /// across all records, which is how conflict-ignore writes report fewer
    /// rows than were submitted.
    pub async fn execute_many<'q, T, F>(
        &self,
        records: &'q [T],
        batch_size: usize,
        bind: F,
    ) -> Result<u64>
    where
        F: Fn(&'q T) -> Query<'q, Postgres, PgArguments>,
    {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut total_rows = 0u64;

        for chunk in records.chunks(batch_size.max(1)) {
            for record in chunk {
                let result = bind(record).execute(&mut *tx).await.map_err(|e| {
                    error!("Batched statement failed, rolling back: {e}");
                    CollectorError::from(e)
                })?;
                total_rows += result.rows_affected();
            }
            debug!("Applied batch of {} records", chunk.len());
        }

        tx.commit().await?;
        Ok(total_rows)
    }

    /// High-throughput load of `rows` into `table` via COPY, in one
    /// transaction, all-or-nothing. No conflict resolution is applied;
    /// duplicate keys abort the whole load.
    pub async fn bulk_insert(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let statement = format!("COPY {} ({}) FROM STDIN", table, columns.join(", "));
        let mut payload = String::new();
        for row in rows {
            encode_copy_row(row, &mut payload);
        }

        let mut tx = self.pool.begin().await?;
        let mut sink = tx.copy_in_raw(&statement).await.map_err(|e| {
            error!("COPY into {table} failed to start: {e}");
            CollectorError::from(e)
        })?;
        sink.send(payload.into_bytes()).await.map_err(|e| {
            error!("COPY into {table} failed, rolling back: {e}");
            CollectorError::from(e)
        })?;
        let copied = sink.finish().await.map_err(|e| {
            error!("COPY into {table} failed, rolling back: {e}");
            CollectorError::from(e)
        })?;
        tx.commit().await?;

        debug!("Bulk inserted {copied} rows into {table}");
        Ok(copied)
    }

    /// Fetch at most one row from a read-only query
    pub async fn fetch_one<T>(
        &self,
        query: QueryAs<'_, Postgres, T, PgArguments>,
    ) -> Result<Option<T>>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        Ok(query.fetch_optional(&self.pool).await?)
    }

    /// Fetch all rows from a read-only query
    pub async fn fetch_all<T>(&self, query: QueryAs<'_, Postgres, T, PgArguments>) -> Result<Vec<T>>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Check whether a table exists in the public schema
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let row: Option<(bool,)> = self
            .fetch_one(
                sqlx::query_as(
                    "SELECT EXISTS (
                        SELECT FROM information_schema.tables
                        WHERE table_schema = 'public' AND table_name = $1
                    )",
                )
                .bind(table_name),
            )
            .await?;
        Ok(row.is_some_and(|(exists,)| exists))
    }

    /// Count the rows currently in `table_name`
    pub async fn table_row_count(&self, table_name: &str) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {table_name}");
        let row: Option<(i64,)> = self.fetch_one(sqlx::query_as(&query)).await?;
        Ok(row.map_or(0, |(count,)| count))
    }

    /// Close every connection in the pool. Owned by the caller's shutdown
    /// path; operations started after this fail immediately.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(values: &[SqlValue]) -> String {
        let mut buf = String::new();
        encode_copy_row(values, &mut buf);
        buf
    }

    #[test]
    fn test_copy_row_basic_types() {
        let row = vec![
            SqlValue::Int(42),
            SqlValue::Float(3.5),
            SqlValue::Bool(true),
            SqlValue::Bool(false),
            SqlValue::Null,
        ];
        assert_eq!(encode(&row), "42\t3.5\tt\tf\t\\N\n");
    }

    #[test]
    fn test_copy_row_escapes_text() {
        let row = vec![SqlValue::Text("a\tb\nc\\d".to_string())];
        assert_eq!(encode(&row), "a\\tb\\nc\\\\d\n");
    }

    #[test]
    fn test_copy_row_timestamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let row = vec![SqlValue::Timestamp(ts)];
        assert_eq!(encode(&row), "2024-03-01 12:30:00.000000+00\n");
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from(7i32), SqlValue::Int(7));
        assert_eq!(SqlValue::from("dock"), SqlValue::Text("dock".to_string()));
        assert_eq!(SqlValue::from(None::<f64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(2.5f64)), SqlValue::Float(2.5));
    }

    #[test]
    fn test_float_encoding_keeps_integral_values_parseable() {
        // Postgres accepts "5" for a double precision column
        assert_eq!(encode(&[SqlValue::Float(5.0)]), "5\n");
        assert_eq!(encode(&[SqlValue::Float(-0.25)]), "-0.25\n");
    }
}
