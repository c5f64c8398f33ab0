//! MySQL backend
//!
//! Locking uses named user locks (`GET_LOCK` / `RELEASE_LOCK`), which are
//! held by the session, so all calls share one dedicated connection. Steps run
//! in a transaction unless they opt out, but MySQL commits implicitly around
//! DDL, so only the data-changing part of a step is atomic with its log row.

use async_trait::async_trait;
use sqlx::{Connection, Executor, MySqlConnection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stepwise_core::{Backend, BackendError, Step};

use crate::error::{BackendsError, BackendsResult};
use crate::ident::validate_identifier;
use crate::{boxed, fnv1_64, version_from_row, DEFAULT_TABLE};

/// Seconds `GET_LOCK` waits before giving up
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 10;

/// Where the version log lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    /// Database holding the log table, `None` for the connection's database
    pub schema: Option<String>,
    pub table: String,
    /// Negative waits forever
    pub lock_timeout_secs: i64,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            schema: None,
            table: DEFAULT_TABLE.to_string(),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl MySqlConfig {
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

    pub fn with_lock_timeout(mut self, secs: i64) -> Self {
        self.lock_timeout_secs = secs;
        self
    }

    /// `[schema.]table`
    pub fn table_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    /// User lock name, kept under MySQL's 64 character limit
    pub fn lock_name(&self) -> String {
        format!("stepwise_{:016x}", fnv1_64(self.table_name().as_bytes()))
    }

    pub fn validate(&self) -> BackendsResult<()> {
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&self.table)
    }
}

/// [`Backend`] over a single MySQL connection
pub struct MySqlBackend {
    conn: Mutex<MySqlConnection>,
    config: MySqlConfig,
    table_name: String,
    lock_name: String,
}

impl std::fmt::Debug for MySqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlBackend")
            .field("table_name", &self.table_name)
            .field("lock_name", &self.lock_name)
            .finish_non_exhaustive()
    }
}

impl MySqlBackend {
    pub async fn connect(database_url: &str, config: MySqlConfig) -> BackendsResult<Self> {
        config.validate()?;
        let conn = MySqlConnection::connect(database_url).await?;
        debug!(table = %config.table_name(), "Connected to MySQL");
        Self::from_connection(conn, config)
    }

    pub fn from_connection(conn: MySqlConnection, config: MySqlConfig) -> BackendsResult<Self> {
        config.validate()?;
        Ok(Self {
            conn: Mutex::new(conn),
            table_name: config.table_name(),
            lock_name: config.lock_name(),
            config,
        })
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    pub async fn close(self) -> BackendsResult<()> {
        self.conn.into_inner().close().await?;
        Ok(())
    }

    async fn exec_and_record(
        conn: &mut MySqlConnection,
        table_name: &str,
        step: &Step,
    ) -> Result<(), sqlx::Error> {
        (&mut *conn).execute(step.query.as_str()).await?;

        let insert = format!(
            "INSERT INTO {} (version, created_at) VALUES (?, NOW(6));",
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
impl Backend for MySqlBackend {
    async fn lock(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?);")
            .bind(self.lock_name.as_str())
            .bind(self.config.lock_timeout_secs)
            .fetch_one(&mut *conn)
            .await
            .map_err(boxed)?;
        match acquired {
            Some(1) => Ok(()),
            _ => Err(boxed(BackendsError::LockUnavailable {
                name: self.lock_name.clone(),
            })),
        }
    }

    async fn unlock(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        let released: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?);")
            .bind(self.lock_name.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(boxed)?;
        if released != Some(1) {
            warn!(lock_name = %self.lock_name, "User lock was not held by this session");
        }
        Ok(())
    }

    async fn init(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.lock().await;
        if let Some(schema) = &self.config.schema {
            let query = format!("CREATE DATABASE IF NOT EXISTS {};", schema);
            (&mut *conn).execute(query.as_str()).await.map_err(boxed)?;
        }
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id         BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    version    BIGINT NOT NULL,
    created_at TIMESTAMP(6) NOT NULL
);",
            self.table_name
        );
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
