//! Migration records and sequence validation
//!
//! A [`Migration`] is one versioned unit of schema change. A loaded set is only
//! usable once [`sort_and_validate`] has confirmed its ids form `1..=N`.

use crate::error::{MigrateError, MigrateResult};
use crate::step::{Direction, Step};

/// Separates the apply body from the revert body inside a migration file
pub const MIGRATION_DELIMITER: &str = "--- apply above / revert below ---";

/// Represents a single versioned migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Position in the sequence, starting at 1
    pub id: u32,
    /// Human-readable label, used in error messages
    pub name: String,
    /// Statements moving the schema from `id - 1` to `id`
    pub apply: String,
    /// Statements moving the schema from `id` back to `id - 1`
    pub revert: String,
}

impl Migration {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        apply: impl Into<String>,
        revert: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            apply: apply.into(),
            revert: revert.into(),
        }
    }

    /// Build a migration from a file body split on [`MIGRATION_DELIMITER`]
    ///
    /// Text before the first delimiter is the apply body, text after it the
    /// revert body. Without a delimiter the revert body is empty.
    pub fn parse(id: u32, name: impl Into<String>, body: &str) -> Self {
        let (apply, revert) = match body.split_once(MIGRATION_DELIMITER) {
            Some((apply, revert)) => (apply.trim(), revert.trim()),
            None => (body.trim(), ""),
        };
        Self::new(id, name, apply, revert)
    }

    /// Turn this migration into an executable step in the given direction
    pub fn to_step(&self, direction: Direction, disable_tx: bool) -> Step {
        match direction {
            Direction::Apply => Step {
                version: self.id,
                query: self.apply.clone(),
                disable_tx,
            },
            Direction::Revert => Step {
                version: self.id.saturating_sub(1),
                query: self.revert.clone(),
                disable_tx,
            },
        }
    }
}

/// Sort migrations by id and check they form a dense `1..=N` sequence
///
/// The sort is stable, so when two records share an id the one reported is
/// the later of the two in source order.
pub fn sort_and_validate(mut migrations: Vec<Migration>) -> MigrateResult<Vec<Migration>> {
    migrations.sort_by_key(|m| m.id);

    for (index, migration) in migrations.iter().enumerate() {
        let want = index as u32 + 1;
        if migration.id < want {
            return Err(MigrateError::DuplicateMigration {
                id: migration.id,
                name: migration.name.clone(),
            });
        }
        if migration.id > want {
            return Err(MigrateError::MissingMigration {
                want,
                have: migration.id,
            });
        }
    }

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mig(id: u32, name: &str) -> Migration {
        Migration::new(id, name, format!("A{}", id), format!("R{}", id))
    }

    #[test]
    fn test_sorts_unordered_input() {
        let sorted = sort_and_validate(vec![mig(3, "c"), mig(1, "a"), mig(2, "b")]).unwrap();
        let ids: Vec<u32> = sorted.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_set_is_valid() {
        assert!(sort_and_validate(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_reports_later_occurrence() {
        let err = sort_and_validate(vec![mig(1, "a"), mig(2, "first"), mig(2, "second")])
            .unwrap_err();
        match err {
            MigrateError::DuplicateMigration { id, name } => {
                assert_eq!(id, 2);
                assert_eq!(name, "second");
            }
            other => panic!("Expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_reports_expected_and_found() {
        let err = sort_and_validate(vec![mig(1, "a"), mig(2, "b"), mig(4, "d")]).unwrap_err();
        match err {
            MigrateError::MissingMigration { want, have } => {
                assert_eq!(want, 3);
                assert_eq!(have, 4);
            }
            other => panic!("Expected missing error, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_must_start_at_one() {
        let err = sort_and_validate(vec![mig(2, "b"), mig(3, "c")]).unwrap_err();
        assert!(matches!(err, MigrateError::MissingMigration { want: 1, have: 2 }));
    }

    #[test]
    fn test_zero_id_is_a_duplicate() {
        let err = sort_and_validate(vec![mig(0, "zero"), mig(1, "a")]).unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateMigration { id: 0, .. }));
    }

    #[test]
    fn test_parse_splits_on_delimiter() {
        let body = format!(
            "CREATE TABLE users (id INT);\n{}\nDROP TABLE users;\n",
            MIGRATION_DELIMITER
        );
        let m = Migration::parse(1, "0001_users.sql", &body);
        assert_eq!(m.apply, "CREATE TABLE users (id INT);");
        assert_eq!(m.revert, "DROP TABLE users;");
    }

    #[test]
    fn test_parse_without_delimiter_has_empty_revert() {
        let m = Migration::parse(1, "0001_seed.sql", "  INSERT INTO t VALUES (1);  ");
        assert_eq!(m.apply, "INSERT INTO t VALUES (1);");
        assert!(m.revert.is_empty());
    }

    #[test]
    fn test_to_step_versions() {
        let m = mig(3, "c");
        let up = m.to_step(Direction::Apply, false);
        assert_eq!((up.version, up.query.as_str()), (3, "A3"));

        let down = m.to_step(Direction::Revert, true);
        assert_eq!((down.version, down.query.as_str()), (2, "R3"));
        assert!(down.disable_tx);
    }
}
