//! Layered configuration: defaults, then `stepwise.toml`, then environment,
//! then command-line flags.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use stepwise_backends::LogTable;
use stepwise_core::{Mode, RunConfig};

use crate::cli::GlobalArgs;
use crate::logging::{LogFormat, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "stepwise.toml";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File system error: {message}")]
    FileSystemError { message: String },

    #[error("Parsing error: {message}")]
    ParsingError { message: String },
}

/// Contents of `stepwise.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub dir: Option<PathBuf>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub timeout_secs: Option<u64>,
    pub no_lock: Option<bool>,
    pub disable_tx: Option<bool>,
    pub force: Option<bool>,
    pub zig_zag: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileSystemError {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParsingError {
            message: format!("{}: {}", path.display(), e),
        })
    }
}

/// Fully resolved CLI configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub database_url: Option<String>,
    pub dir: PathBuf,
    /// Empty means the backend default
    pub schema: String,
    /// Empty means the backend default
    pub table: String,
    /// 0 disables the per-step timeout
    pub timeout_secs: u64,
    pub no_lock: bool,
    pub disable_tx: bool,
    pub force: bool,
    pub zig_zag: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            schema: String::new(),
            table: String::new(),
            timeout_secs: 0,
            no_lock: false,
            disable_tx: false,
            force: false,
            zig_zag: false,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl CliConfig {
    /// Resolve every layer for the given flags
    ///
    /// An explicit `--config` file must exist; the default `stepwise.toml`
    /// is only read when present.
    pub fn load(args: &GlobalArgs) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match &args.config {
            Some(path) => config.apply_file(FileConfig::from_path(path)?),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    config.apply_file(FileConfig::from_path(path)?);
                }
            }
        }

        config.apply_env()?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if file.database_url.is_some() {
            self.database_url = file.database_url;
        }
        if let Some(dir) = file.dir {
            self.dir = dir;
        }
        if let Some(schema) = file.schema {
            self.schema = schema;
        }
        if let Some(table) = file.table {
            self.table = table;
        }
        if let Some(timeout_secs) = file.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        self.no_lock = file.no_lock.unwrap_or(self.no_lock);
        self.disable_tx = file.disable_tx.unwrap_or(self.disable_tx);
        self.force = file.force.unwrap_or(self.force);
        self.zig_zag = file.zig_zag.unwrap_or(self.zig_zag);
        if let Some(log_level) = file.log_level {
            self.log_level = log_level;
        }
        if let Some(log_format) = file.log_format {
            self.log_format = log_format;
        }
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(dir) = env::var("STEPWISE_DIR") {
            self.dir = PathBuf::from(dir);
        }
        if let Ok(schema) = env::var("STEPWISE_SCHEMA") {
            self.schema = schema;
        }
        if let Ok(table) = env::var("STEPWISE_TABLE") {
            self.table = table;
        }
        if let Ok(timeout_str) = env::var("STEPWISE_TIMEOUT_SECS") {
            self.timeout_secs = timeout_str.parse().map_err(|_| ConfigError::InvalidValue {
                field: "timeout_secs".to_string(),
                value: timeout_str,
                expected: "a whole number of seconds".to_string(),
            })?;
        }
        if let Ok(log_level) = env::var("STEPWISE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(format_str) = env::var("STEPWISE_LOG_FORMAT") {
            self.log_format = format_str.parse().map_err(|_| ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: format_str,
                expected: "text, pretty or json".to_string(),
            })?;
        }
        Ok(())
    }

    pub fn apply_args(&mut self, args: &GlobalArgs) {
        if let Some(url) = &args.database_url {
            self.database_url = Some(url.clone());
        }
        if let Some(dir) = &args.dir {
            self.dir = dir.clone();
        }
        if let Some(schema) = &args.schema {
            self.schema = schema.clone();
        }
        if let Some(table) = &args.table {
            self.table = table.clone();
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        // boolean flags can only switch behaviour on
        self.no_lock |= args.no_lock;
        self.disable_tx |= args.disable_tx;
        self.force |= args.force;
        self.zig_zag |= args.zig_zag;
        if let Some(log_level) = &args.log_level {
            self.log_level = log_level.clone();
        }
        if let Some(log_format) = args.log_format {
            self.log_format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level".to_string(),
                value: self.log_level.clone(),
                expected: format!("one of: {}", VALID_LOG_LEVELS.join(", ")),
            });
        }
        if matches!(&self.database_url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: String::new(),
                expected: "a non-empty database URL".to_string(),
            });
        }
        Ok(())
    }

    /// Database URL, required by every command that talks to the database
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "database_url".to_string(),
                hint: "Set DATABASE_URL, pass --database-url or add it to stepwise.toml".to_string(),
            })
    }

    pub fn log_table(&self) -> LogTable {
        LogTable {
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig::new(self.log_level.clone(), self.log_format)
    }

    /// Run options for `mode`, without hooks
    pub fn run_config(&self, mode: Mode) -> RunConfig {
        let mut config = RunConfig::new(mode)
            .with_disable_tx(self.disable_tx)
            .with_force(self.force)
            .with_zig_zag(self.zig_zag)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if self.no_lock {
            config = config.without_lock();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 7] = [
        "DATABASE_URL",
        "STEPWISE_DIR",
        "STEPWISE_SCHEMA",
        "STEPWISE_TABLE",
        "STEPWISE_TIMEOUT_SECS",
        "STEPWISE_LOG_LEVEL",
        "STEPWISE_LOG_FORMAT",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_file_config_parses_toml() {
        let file: FileConfig = toml::from_str(
            r#"
            database_url = "postgres://localhost/app"
            dir = "db/migrations"
            timeout_secs = 30
            zig_zag = true
            log_format = "json"
            "#,
        )
        .unwrap();

        let mut config = CliConfig::default();
        config.apply_file(file);

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(config.dir, PathBuf::from("db/migrations"));
        assert_eq!(config.timeout_secs, 30);
        assert!(config.zig_zag);
        assert!(!config.force);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("databse_url = \"x\"").is_err());
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(matches!(
            CliConfig::load(&args),
            Err(ConfigError::FileSystemError { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_and_flags_override_env() {
        clear_env();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("stepwise.toml");
        fs::write(&path, "database_url = \"sqlite://file.db\"\ntable = \"from_file\"\n").unwrap();

        env::set_var("DATABASE_URL", "sqlite://env.db");
        env::set_var("STEPWISE_TIMEOUT_SECS", "15");

        let args = GlobalArgs {
            config: Some(path),
            table: Some("from_flag".to_string()),
            force: true,
            ..Default::default()
        };
        let config = CliConfig::load(&args).unwrap();
        clear_env();

        assert_eq!(config.database_url.as_deref(), Some("sqlite://env.db"));
        assert_eq!(config.table, "from_flag");
        assert_eq!(config.timeout_secs, 15);
        assert!(config.force);
    }

    #[test]
    #[serial]
    fn test_invalid_env_values() {
        clear_env();
        env::set_var("STEPWISE_TIMEOUT_SECS", "soon");
        let err = CliConfig::default().apply_env().unwrap_err();
        clear_env();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "timeout_secs"));

        env::set_var("STEPWISE_LOG_FORMAT", "xml");
        let err = CliConfig::default().apply_env().unwrap_err();
        clear_env();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "log_format"));
    }

    #[test]
    fn test_validate_log_level() {
        let config = CliConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CliConfig::default().validate().is_ok());
    }

    #[test]
    fn test_require_database_url() {
        assert!(matches!(
            CliConfig::default().require_database_url(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_run_config_mirrors_flags() {
        let config = CliConfig {
            timeout_secs: 5,
            no_lock: true,
            zig_zag: true,
            ..Default::default()
        };
        let run = config.run_config(Mode::ApplyAll);

        assert_eq!(run.step_timeout(), Some(Duration::from_secs(5)));
        assert!(run.no_database_lock);
        assert!(run.zig_zag);
        assert!(!run.disable_tx);

        assert_eq!(CliConfig::default().run_config(Mode::Redo).step_timeout(), None);
    }
}
