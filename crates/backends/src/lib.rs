//! # stepwise-backends
//!
//! sqlx implementations of the `stepwise-core` backend traits.
//!
//! - [`postgres::PostgresBackend`]: advisory locking, atomic steps in native
//!   transactions
//! - [`mysql::MySqlBackend`]: named user locks, steps in native transactions
//! - [`sqlite::SqliteBackend`]: no-op locking, discrete primitives wrapped in
//!   [`Transactional`](stepwise_core::Transactional)
//!
//! [`connect`] picks the backend from the database URL scheme.

pub mod error;
pub mod ident;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{BackendsError, BackendsResult};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlBackend, MySqlConfig};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresBackend, PostgresConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteConfig};

use stepwise_core::{Backend, BackendError};

/// Version log table used when none is configured
pub const DEFAULT_TABLE: &str = "_stepwise_log";

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a database URL scheme
    pub fn from_url(url: &str) -> BackendsResult<Self> {
        let scheme = url.split_once(':').map(|(scheme, _)| scheme).unwrap_or("");
        scheme.parse().map_err(|_| BackendsError::UnsupportedUrl {
            url: url.to_string(),
        })
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Where the version log lives, for whichever backend the URL selects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTable {
    /// Schema (PostgreSQL), database (MySQL) or attached database (SQLite).
    /// Empty means default.
    pub schema: String,
    /// Empty means [`DEFAULT_TABLE`]
    pub table: String,
}

/// Connect to `database_url` with the backend its scheme names
pub async fn connect(database_url: &str, log_table: &LogTable) -> BackendsResult<Box<dyn Backend>> {
    match DatabaseBackendType::from_url(database_url)? {
        #[cfg(feature = "postgres")]
        DatabaseBackendType::PostgreSQL => {
            let config = PostgresConfig::new()
                .with_schema(log_table.schema.as_str())
                .with_table(log_table.table.as_str());
            Ok(Box::new(PostgresBackend::connect(database_url, config).await?))
        }
        #[cfg(feature = "mysql")]
        DatabaseBackendType::MySQL => {
            let config = MySqlConfig::new()
                .with_schema(log_table.schema.as_str())
                .with_table(log_table.table.as_str());
            Ok(Box::new(MySqlBackend::connect(database_url, config).await?))
        }
        #[cfg(feature = "sqlite")]
        DatabaseBackendType::SQLite => {
            let config = SqliteConfig::new()
                .with_schema(log_table.schema.as_str())
                .with_table(log_table.table.as_str());
            Ok(Box::new(sqlite::connect(database_url, config).await?))
        }
        #[allow(unreachable_patterns)]
        _ => Err(BackendsError::UnsupportedUrl {
            url: database_url.to_string(),
        }),
    }
}

pub(crate) fn boxed<E: Into<BackendsError>>(err: E) -> BackendError {
    Box::new(err.into())
}

/// 64-bit FNV-1 hash
#[cfg(any(feature = "postgres", feature = "mysql"))]
pub(crate) fn fnv1_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(PRIME) ^ u64::from(*byte)
    })
}

/// Map the newest log row to a version, 0 when the log is empty
pub(crate) fn version_from_row(stored: Option<i64>) -> BackendsResult<u32> {
    match stored {
        None => Ok(0),
        Some(stored) => {
            u32::try_from(stored).map_err(|_| BackendsError::VersionOutOfRange { stored })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_from_url() {
        assert_eq!(
            DatabaseBackendType::from_url("postgres://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("postgresql://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendType::from_url("sqlite::memory:").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert_eq!(
            DatabaseBackendType::from_url("mysql://root@localhost/app").unwrap(),
            DatabaseBackendType::MySQL
        );
        assert!(DatabaseBackendType::from_url("oracle://localhost/app").is_err());
        assert!(DatabaseBackendType::from_url("no-scheme").is_err());
    }

    #[test]
    fn test_backend_type_display_round_trips() {
        for ty in [
            DatabaseBackendType::PostgreSQL,
            DatabaseBackendType::MySQL,
            DatabaseBackendType::SQLite,
        ] {
            assert_eq!(ty.to_string().parse::<DatabaseBackendType>().unwrap(), ty);
        }
    }

    #[cfg(any(feature = "postgres", feature = "mysql"))]
    #[test]
    fn test_fnv1_known_values() {
        assert_eq!(fnv1_64(b"") as i64, -3750763034362895579);
        assert_eq!(fnv1_64(b"a") as i64, -5808590958014384194);
    }

    #[test]
    fn test_version_from_row() {
        assert_eq!(version_from_row(None).unwrap(), 0);
        assert_eq!(version_from_row(Some(7)).unwrap(), 7);
        assert!(version_from_row(Some(-1)).is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_connect_sqlite_by_url() {
        let backend = connect("sqlite::memory:", &LogTable::default()).await.unwrap();
        backend.init().await.unwrap();
        assert_eq!(backend.version().await.unwrap(), 0);
    }
}
