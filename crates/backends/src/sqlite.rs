//! SQLite backend
//!
//! SQLite has no advisory locks, so locking is a no-op. The backend exposes
//! discrete transaction primitives and gets its atomic step execution from
//! [`Transactional`].

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;

use stepwise_core::{BackendError, DiscreteBackend, Transactional};

use crate::error::BackendsResult;
use crate::ident::validate_identifier;
use crate::{boxed, version_from_row, DEFAULT_TABLE};

/// Where the version log lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Attached database name, `None` for the main database
    pub schema: Option<String>,
    pub table: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            schema: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl SqliteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        self.schema = (!schema.is_empty()).then_some(schema);
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !table.is_empty() {
            self.table = table;
        }
        self
    }

    /// `[schema.]table`
    pub fn table_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    pub fn validate(&self) -> BackendsResult<()> {
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.table)
    }
}

/// [`DiscreteBackend`] over a single SQLite connection
pub struct SqliteBackend {
    conn: Mutex<SqliteConnection>,
    table_name: String,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open `database_url`, creating the database file if it does not exist
    pub async fn connect(database_url: &str, config: SqliteConfig) -> BackendsResult<Self> {
        config.validate()?;
        let conn = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .connect()
            .await?;
        debug!(table = %config.table_name(), "Connected to SQLite");
        Ok(Self {
            conn: Mutex::new(conn),
            table_name: config.table_name(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub async fn close(self) -> BackendsResult<()> {
        self.conn.into_inner().close().await?;
        Ok(())
    }

    async fn execute_raw(&self, query: &str) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        (&mut *conn).execute(query).await.map_err(boxed)?;
        Ok(())
    }
}

/// Connect and wrap the backend so it can be handed to the runner
pub async fn connect(
    database_url: &str,
    config: SqliteConfig,
) -> BackendsResult<Transactional<SqliteBackend>> {
    Ok(Transactional::new(SqliteBackend::connect(database_url, config).await?))
}

#[async_trait]
impl DiscreteBackend for SqliteBackend {
    async fn lock(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn init(&self) -> Result<(), BackendError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id         INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    version    INTEGER NOT NULL,
    created_at TEXT NOT NULL
);",
            self.table_name
        );
        self.execute_raw(&query).await
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        self.execute_raw(&format!("DROP TABLE IF EXISTS {};", self.table_name))
            .await
    }

    async fn version(&self) -> Result<u32, BackendError> {
        let query = format!(
            "SELECT version FROM {} ORDER BY id DESC LIMIT 1;",
            self.table_name
        );
        let mut conn = self.conn.lock().await;
        let stored: Option<i64> = sqlx::query_scalar(&query)
            .fetch_optional(&mut *conn)
            .await
            .map_err(boxed)?;
        version_from_row(stored).map_err(boxed)
    }

    async fn begin(&self) -> Result<(), BackendError> {
        self.execute_raw("BEGIN;").await
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.execute_raw("COMMIT;").await
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.execute_raw("ROLLBACK;").await
    }

    async fn exec(&self, query: &str) -> Result<(), BackendError> {
        self.execute_raw(query).await
    }

    async fn set_version(&self, version: u32) -> Result<(), BackendError> {
        let query = format!(
            "INSERT INTO {} (version, created_at) VALUES (?, STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW'));",
            self.table_name
        );
        let mut conn = self.conn.lock().await;
        sqlx::query(&query)
            .bind(i64::from(version))
            .execute(&mut *conn)
            .await
            .map_err(boxed)?;
        Ok(())
    }
}
