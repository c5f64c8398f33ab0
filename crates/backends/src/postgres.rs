//! PostgreSQL backend
//!
//! Runs every call on one dedicated connection, since advisory locks belong
//! to the session that took them. Each step executes its query and appends a
//! row to the version log in a single transaction unless the step opts out.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stepwise_core::{Backend, BackendError, Step};

use crate::error::{BackendsError, BackendsResult};
use crate::ident::validate_identifier;
use crate::{boxed, fnv1_64, version_from_row, DEFAULT_TABLE};

pub const DEFAULT_SCHEMA: &str = "public";

/// Where the version log lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub schema: String,
    pub table: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl PostgresConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty values fall back to the defaults
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        self.schema = if schema.is_empty() {
            DEFAULT_SCHEMA.to_string()
        } else {
            schema
        };
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.table = if table.is_empty() {
            DEFAULT_TABLE.to_string()
        } else {
            table
        };
        self
    }

    /// Qualified `schema.table` name
    pub fn table_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Advisory lock key derived from the qualified table name
    pub fn lock_key(&self) -> i64 {
        fnv1_64(self.table_name().as_bytes()) as i64
    }

    pub fn validate(&self) -> BackendsResult<()> {
        validate_identifier(&self.schema)?;
        validate_identifier(&self.table)
    }
}

/// [`Backend`] over a single PostgreSQL connection
pub struct PostgresBackend {
    conn: Mutex<PgConnection>,
    config: PostgresConfig,
    table_name: String,
    lock_key: i64,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("table_name", &self.table_name)
            .field("lock_key", &self.lock_key)
            .finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Open a dedicated connection to `database_url`
    pub async fn connect(database_url: &str, config: PostgresConfig) -> BackendsResult<Self> {
        config.validate()?;
        let conn = PgConnection::connect(database_url).await?;
        debug!(table = %config.table_name(), "Connected to PostgreSQL");
        Self::from_connection(conn, config)
    }

    /// Take over an already open connection
    pub fn from_connection(conn: PgConnection, config: PostgresConfig) -> BackendsResult<Self> {
        config.validate()?;
        Ok(Self {
            conn: Mutex::new(conn),
            table_name: config.table_name(),
            lock_key: config.lock_key(),
            config,
        })
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    /// Close the underlying connection gracefully
    pub async fn close(self) -> BackendsResult<()> {
        self.conn.into_inner().close().await?;
        Ok(())
    }

    async fn exec_and_record(
        conn: &mut PgConnection,
        table_name: &str,
        step: &Step,
    ) -> Result<(), sqlx::Error> {
        (&mut *conn).execute(step.query.as_str()).await?;

        let insert = format!(
            "INSERT INTO {} (version, created_at) VALUES ($1, NOW());",
            table_name
        );
        sqlx::query(&insert)
            .bind(i64::from(step.version))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn lock(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        sqlx::query("SELECT pg_advisory_lock($1);")
            .bind(self.lock_key)
            .execute(&mut *conn)
            .await
            .map_err(boxed)?;
        Ok(())
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1);")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await
            .map_err(boxed)?;
        if !released {
            warn!(lock_key = self.lock_key, "Advisory lock was not held by this session");
        }
        Ok(())
    }

    async fn init(&self) -> Result<(), BackendError> {
        let query = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
CREATE TABLE IF NOT EXISTS {table} (
    version    BIGINT NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL
);",
            schema = self.config.schema,
            table = self.table_name,
        );
        let mut conn = self.conn.lock().await;
        (&mut *conn).execute(query.as_str()).await.map_err(boxed)?;
        Ok(())
    }

    async fn drop_storage(&self) -> Result<(), BackendError> {
        let query = format!("DROP TABLE IF EXISTS {};", self.table_name);
        let mut conn = self.conn.lock().await;
        (&mut *conn).execute(query.as_str()).await.map_err(boxed)?;
        Ok(())
    }

    async fn version(&self) -> Result<u32, BackendError> {
        let query = format!(
            "SELECT version FROM {} ORDER BY created_at DESC LIMIT 1;",
            self.table_name
        );
        let mut conn = self.conn.lock().await;
        let stored: Option<i64> = sqlx::query_scalar(&query)
            .fetch_optional(&mut *conn)
            .await
            .map_err(boxed)?;
        version_from_row(stored).map_err(boxed)
    }

    async fn do_step(&self, step: &Step) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;

        if step.disable_tx {
            return Self::exec_and_record(&mut conn, &self.table_name, step)
                .await
                .map_err(boxed);
        }

        let mut tx = conn.begin().await.map_err(boxed)?;
        match Self::exec_and_record(&mut tx, &self.table_name, step).await {
            Ok(()) => tx.commit().await.map_err(boxed),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(version = step.version, "Rollback failed: {}", rollback_err);
                }
                Err(boxed(BackendsError::from(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_and_lock_key() {
        let config = PostgresConfig::default();
        assert_eq!(config.table_name(), "public._stepwise_log");
        assert_eq!(config.lock_key(), -440770992838246654);
    }

    #[test]
    fn test_custom_schema_and_table() {
        let config = PostgresConfig::new()
            .with_schema("test_schema")
            .with_table("test_table");
        assert_eq!(config.table_name(), "test_schema.test_table");
        assert_eq!(config.lock_key(), 4631047095544292572);

        let config = PostgresConfig::new().with_table("test_table");
        assert_eq!(config.table_name(), "public.test_table");
        assert_eq!(config.lock_key(), 8592189678091584965);
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config = PostgresConfig::new().with_schema("").with_table("");
        assert_eq!(config, PostgresConfig::default());
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let config = PostgresConfig::new().with_table("log; DROP TABLE users");
        assert!(matches!(
            config.validate(),
            Err(BackendsError::InvalidIdentifier { .. })
        ));
    }
}
