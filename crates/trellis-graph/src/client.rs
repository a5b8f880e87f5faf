//! Pooled SQLite access with bounded retry.
//!
//! Every statement acquires a connection, runs once, and releases it before
//! any retry or error is surfaced. Pool acquisition and connection resets are
//! each retried a bounded number of times.

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use trellis_core::config::{DatabaseConfig, RetryConfig};
use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::types::TypeCode;

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Uuid(Uuid),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
}

impl From<Uuid> for Param {
    fn from(v: Uuid) -> Self {
        Param::Uuid(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<TypeCode> for Param {
    fn from(v: TypeCode) -> Self {
        Param::Int(i64::from(v))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Blob(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

/// An owned SQL statement with positional parameters.
///
/// Owned so the same statement can be re-bound on a fresh connection after a
/// reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn bind_all<P: Into<Param>>(mut self, params: impl IntoIterator<Item = P>) -> Self {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn query(&self) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = match param {
                Param::Uuid(v) => query.bind(*v),
                Param::Int(v) => query.bind(*v),
                Param::Float(v) => query.bind(*v),
                Param::Text(v) => query.bind(v.as_str()),
                Param::Blob(v) => query.bind(v.as_slice()),
                Param::Null => query.bind(None::<i64>),
            };
        }
        query
    }
}

/// `?, ?, ?` for `n` placeholders.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

enum Fetch {
    Execute,
    All,
    Optional,
}

enum Fetched {
    Affected(u64),
    Rows(Vec<SqliteRow>),
    Row(Option<SqliteRow>),
}

/// Thread-safe pooled client. Clone is cheap.
#[derive(Clone)]
pub struct StoreClient {
    pool: SqlitePool,
    retry: RetryConfig,
}

impl StoreClient {
    pub async fn connect(config: &DatabaseConfig, retry: RetryConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| TrellisError::Config(format!("Invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms));
        if is_in_memory(&config.url) {
            // Closing the only connection would drop the database.
            pool = pool.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool
            .connect_with(options)
            .await
            .map_err(|e| TrellisError::storage("Could not open database", Some(e.into())))?;

        tracing::info!(url = %config.url, "Connected to database");
        Ok(Self { pool, retry })
    }

    pub fn from_pool(pool: SqlitePool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TrellisError::storage("Migration failed", Some(e.into())))?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    /// Execute a write statement; returns rows affected.
    pub async fn run(&self, stmt: &Statement) -> Result<u64> {
        match self.dispatch(stmt, Fetch::Execute).await? {
            Fetched::Affected(n) => Ok(n),
            _ => Ok(0),
        }
    }

    /// Execute a read statement and collect all rows.
    pub async fn query_rows(&self, stmt: &Statement) -> Result<Vec<SqliteRow>> {
        match self.dispatch(stmt, Fetch::All).await? {
            Fetched::Rows(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    /// Execute a read statement and return the first row, if any.
    pub async fn query_one(&self, stmt: &Statement) -> Result<Option<SqliteRow>> {
        match self.dispatch(stmt, Fetch::Optional).await? {
            Fetched::Row(row) => Ok(row),
            _ => Ok(None),
        }
    }

    async fn dispatch(&self, stmt: &Statement, fetch: Fetch) -> Result<Fetched> {
        let mut resets = 0;
        loop {
            let mut conn = self.acquire().await?;
            let query = stmt.query();
            let outcome = match fetch {
                Fetch::Execute => query
                    .execute(&mut *conn)
                    .await
                    .map(|done| Fetched::Affected(done.rows_affected())),
                Fetch::All => query.fetch_all(&mut *conn).await.map(Fetched::Rows),
                Fetch::Optional => query.fetch_optional(&mut *conn).await.map(Fetched::Row),
            };

            match outcome {
                Ok(fetched) => return Ok(fetched),
                Err(e) if is_reset(&e) && resets < self.retry.reset_attempts => {
                    resets += 1;
                    tracing::warn!(attempt = resets, error = %e, "Connection reset, retrying statement");
                    // Keep the broken connection out of the pool.
                    drop(conn.detach());
                }
                Err(e) => {
                    drop(conn);
                    return Err(db_err(e, stmt.sql()));
                }
            }
        }
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        let attempts = self.retry.acquire_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, error = %e, "Failed to acquire connection, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => {
                    return Err(TrellisError::storage(
                        format!("Could not acquire a connection after {attempts} attempts"),
                        Some(e.into()),
                    ))
                }
            }
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn is_reset(err: &sqlx::Error) -> bool {
    use std::io::ErrorKind;
    match err {
        sqlx::Error::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}

/// Map a driver error onto the store taxonomy.
pub(crate) fn db_err(err: sqlx::Error, sql: &str) -> TrellisError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return TrellisError::conflict(
                "Duplicate entry",
                ErrorContext::new().with("detail", db.message()),
            );
        }
    }
    tracing::debug!(sql, error = %err, "Statement failed");
    TrellisError::storage("Statement failed", Some(err.into()))
}

/// Read one column, mapping decode failures to a storage error.
pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(name)
        .map_err(|e| TrellisError::storage(format!("Bad column {name}"), Some(e.into())))
}
