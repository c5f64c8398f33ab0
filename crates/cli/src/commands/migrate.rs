use anyhow::Context;
use tracing::{debug, info};

use stepwise_core::{run as run_migrations, DirSource, Mode, RunConfig, RunReport};

use crate::config::CliConfig;

/// Mode for `up`: everything pending, or only `num` migrations
pub fn up_mode(num: Option<usize>) -> Mode {
    match num {
        Some(n) => Mode::ApplyN(n),
        None => Mode::ApplyAll,
    }
}

/// Mode for `down`: one migration unless told otherwise
pub fn down_mode(num: Option<usize>, all: bool) -> Mode {
    if all {
        Mode::RevertAll
    } else {
        Mode::RevertN(num.unwrap_or(1))
    }
}

fn with_logging_hooks(config: RunConfig) -> RunConfig {
    config
        .before_step(|step| {
            info!(version = step.version, notx = step.disable_tx, "Running step");
        })
        .after_step(|step| {
            debug!(version = step.version, "Step done");
        })
}

pub async fn run(config: &CliConfig, mode: Mode) -> anyhow::Result<RunReport> {
    let url = config.require_database_url()?;
    let backend = stepwise_backends::connect(url, &config.log_table())
        .await
        .context("Failed to connect to database")?;
    let source = DirSource::new(&config.dir);

    let report = run_migrations(backend.as_ref(), &source, with_logging_hooks(config.run_config(mode)))
        .await
        .with_context(|| format!("Migration '{}' failed", mode))?;

    if report.steps == 0 {
        println!("Nothing to do, database is at version {}", report.to);
    } else {
        println!(
            "Migrated from version {} to {} in {} step(s) ({} ms)",
            report.from, report.to, report.steps, report.elapsed_ms
        );
    }
    if mode == Mode::Drop {
        println!("Version log table dropped");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_mode_selection() {
        assert_eq!(up_mode(None), Mode::ApplyAll);
        assert_eq!(up_mode(Some(2)), Mode::ApplyN(2));
        assert_eq!(down_mode(None, false), Mode::RevertN(1));
        assert_eq!(down_mode(Some(3), false), Mode::RevertN(3));
        assert_eq!(down_mode(None, true), Mode::RevertAll);
    }

    #[tokio::test]
    async fn test_up_then_down_against_sqlite_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join("0001_users.sql"),
            "CREATE TABLE users (id INT);\n--- apply above / revert below ---\nDROP TABLE users;\n",
        )
        .unwrap();
        fs::write(
            dir.join("0002_posts.sql"),
            "CREATE TABLE posts (id INT);\n--- apply above / revert below ---\nDROP TABLE posts;\n",
        )
        .unwrap();

        let config = CliConfig {
            database_url: Some(format!("sqlite://{}", temp_dir.path().join("app.db").display())),
            dir,
            ..Default::default()
        };

        let report = run(&config, up_mode(None)).await.unwrap();
        assert_eq!((report.from, report.to, report.steps), (0, 2, 2));

        let report = run(&config, down_mode(None, false)).await.unwrap();
        assert_eq!((report.from, report.to), (2, 1));

        let report = run(&config, Mode::Redo).await.unwrap();
        assert_eq!((report.from, report.to, report.steps), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_missing_database_url() {
        let err = run(&CliConfig::default(), Mode::ApplyAll).await.unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }
}
