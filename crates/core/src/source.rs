//! Migration sources
//!
//! A [`Source`] produces the raw, possibly unordered list of migrations.
//! Ordering and sequence checks happen later in the runner.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::BackendError;
use crate::migration::Migration;

/// Provider of the full set of known migrations
pub trait Source: Send + Sync {
    fn load(&self) -> Result<Vec<Migration>, BackendError>;
}

impl<S: Source + ?Sized> Source for std::sync::Arc<S> {
    fn load(&self) -> Result<Vec<Migration>, BackendError> {
        (**self).load()
    }
}

/// Matches `<digits>_<anything>.sql`
fn migration_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)_.+\.sql$").expect("valid migration file pattern"))
}

/// Parse the leading id out of a migration file name
///
/// Returns `Ok(None)` for names that are not migration files at all.
pub fn parse_file_name(file_name: &str) -> Result<Option<u32>, BackendError> {
    let Some(caps) = migration_file_pattern().captures(file_name) else {
        return Ok(None);
    };
    let digits = &caps[1];
    let id = digits
        .parse::<u32>()
        .map_err(|e| format!("invalid migration number '{}' in {}: {}", digits, file_name, e))?;
    Ok(Some(id))
}

/// Migrations held in memory
#[derive(Debug, Clone, Default)]
pub struct SliceSource {
    migrations: Vec<Migration>,
}

impl SliceSource {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    pub fn add_migration(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }
}

impl Source for SliceSource {
    fn load(&self) -> Result<Vec<Migration>, BackendError> {
        Ok(self.migrations.clone())
    }
}

/// Loads `.sql` migration files from a directory on disk
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Source for DirSource {
    fn load(&self) -> Result<Vec<Migration>, BackendError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            format!(
                "failed to read migrations directory {}: {}",
                self.dir.display(),
                e
            )
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(id) = parse_file_name(file_name)? else {
                continue;
            };

            let body = fs::read_to_string(entry.path())?;
            migrations.push(Migration::parse(id, file_name, &body));
        }

        Ok(migrations)
    }
}

/// Migrations compiled into the binary
///
/// ```rust
/// use stepwise_core::EmbeddedSource;
///
/// static FILES: &[(&str, &str)] = &[
///     ("migrations/0001_users.sql", "CREATE TABLE users (id INT);"),
/// ];
///
/// let source = EmbeddedSource::new(FILES).with_prefix("migrations/");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    files: &'static [(&'static str, &'static str)],
    prefix: &'static str,
}

impl EmbeddedSource {
    pub fn new(files: &'static [(&'static str, &'static str)]) -> Self {
        Self { files, prefix: "" }
    }

    /// Strip a directory prefix from every embedded file name
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = prefix;
        self
    }
}

impl Source for EmbeddedSource {
    fn load(&self) -> Result<Vec<Migration>, BackendError> {
        let mut migrations = Vec::with_capacity(self.files.len());
        for (path, body) in self.files {
            let file_name = path.strip_prefix(self.prefix).unwrap_or(path);
            // nested paths are subdirectories, which are skipped like on disk
            if file_name.contains('/') {
                continue;
            }
            if let Some(id) = parse_file_name(file_name)? {
                migrations.push(Migration::parse(id, file_name, body));
            }
        }
        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MIGRATION_DELIMITER;

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("0001_init.sql").unwrap(), Some(1));
        assert_eq!(parse_file_name("42_add_users.sql").unwrap(), Some(42));
        assert_eq!(parse_file_name("README.md").unwrap(), None);
        assert_eq!(parse_file_name("init.sql").unwrap(), None);
        assert_eq!(parse_file_name("0001_init.sql.bak").unwrap(), None);
        assert!(parse_file_name("99999999999_huge.sql").is_err());
    }

    #[test]
    fn test_slice_source_add_migration() {
        let mut source = SliceSource::default();
        source.add_migration(Migration::new(2, "two", "A2", "R2"));
        source.add_migration(Migration::new(1, "one", "A1", "R1"));

        let loaded = source.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 2);
    }

    #[test]
    fn test_dir_source_reads_matching_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let body = format!("CREATE TABLE a;\n{}\nDROP TABLE a;", MIGRATION_DELIMITER);
        fs::write(temp_dir.path().join("0001_create_a.sql"), &body).unwrap();
        fs::write(temp_dir.path().join("0002_seed.sql"), "INSERT INTO a VALUES (1);").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(temp_dir.path().join("0003_dir.sql")).unwrap();

        let mut loaded = DirSource::new(temp_dir.path()).load().unwrap();
        loaded.sort_by_key(|m| m.id);

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "0001_create_a.sql");
        assert_eq!(loaded[0].apply, "CREATE TABLE a;");
        assert_eq!(loaded[0].revert, "DROP TABLE a;");
        assert_eq!(loaded[1].id, 2);
        assert!(loaded[1].revert.is_empty());
    }

    #[test]
    fn test_dir_source_missing_directory_fails() {
        let err = DirSource::new("/definitely/not/here").load().unwrap_err();
        assert!(err.to_string().contains("failed to read migrations directory"));
    }

    #[test]
    fn test_embedded_source_strips_prefix_and_skips_nested() {
        static FILES: &[(&str, &str)] = &[
            ("sql/0001_a.sql", "SELECT 1;"),
            ("sql/0002_b.sql", "SELECT 2;"),
            ("sql/nested/0003_c.sql", "SELECT 3;"),
            ("sql/readme.md", "docs"),
        ];

        let loaded = EmbeddedSource::new(FILES).with_prefix("sql/").load().unwrap();
        let names: Vec<&str> = loaded.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["0001_a.sql", "0002_b.sql"]);
    }
}
