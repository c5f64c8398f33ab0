use anyhow::Context;

use stepwise_core::{sort_and_validate, Backend, DirSource, Migration, Source};

use crate::config::CliConfig;

/// Snapshot of where the database stands relative to the migration directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub current: u32,
    pub known: usize,
    pub pending: Vec<String>,
}

impl Status {
    pub fn new(current: u32, migrations: &[Migration]) -> Self {
        let pending = migrations
            .iter()
            .filter(|m| m.id > current)
            .map(|m| m.name.clone())
            .collect();
        Self {
            current,
            known: migrations.len(),
            pending,
        }
    }
}

pub async fn collect(backend: &dyn Backend, source: &dyn Source) -> anyhow::Result<Status> {
    let migrations = source
        .load()
        .map_err(|e| anyhow::anyhow!("Failed to load migrations: {}", e))?;
    let migrations = sort_and_validate(migrations)?;

    backend
        .init()
        .await
        .map_err(|e| anyhow::anyhow!("init: {}", e))?;
    let current = backend
        .version()
        .await
        .map_err(|e| anyhow::anyhow!("get version: {}", e))?;

    Ok(Status::new(current, &migrations))
}

pub async fn run(config: &CliConfig) -> anyhow::Result<Status> {
    let url = config.require_database_url()?;
    let backend = stepwise_backends::connect(url, &config.log_table())
        .await
        .context("Failed to connect to database")?;
    let status = collect(backend.as_ref(), &DirSource::new(&config.dir)).await?;

    println!("Migration Status:");
    println!("================");
    println!("Current version: {}", status.current);
    println!("Known migrations: {}", status.known);
    if status.current as usize > status.known {
        println!("Warning: database is ahead of the migration directory");
    }
    if status.pending.is_empty() {
        println!("No pending migrations");
    } else {
        println!("Pending:");
        for name in &status.pending {
            println!("  {}", name);
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::SliceSource;
    use stepwise_testing::MockBackend;

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new(1, "0001_a.sql", "A1", "R1"),
            Migration::new(2, "0002_b.sql", "A2", "R2"),
            Migration::new(3, "0003_c.sql", "A3", "R3"),
        ]
    }

    #[tokio::test]
    async fn test_collect_lists_pending() {
        let backend = MockBackend::new().with_version(1);
        let status = collect(&backend, &SliceSource::new(migrations())).await.unwrap();

        assert_eq!(status.current, 1);
        assert_eq!(status.known, 3);
        assert_eq!(status.pending, vec!["0002_b.sql", "0003_c.sql"]);
        assert_eq!(backend.log(), vec!["init", "getversion"]);
    }

    #[tokio::test]
    async fn test_collect_rejects_gaps() {
        let mut migs = migrations();
        migs.remove(1);
        let backend = MockBackend::new();
        assert!(collect(&backend, &SliceSource::new(migs)).await.is_err());
        assert!(backend.recorder().is_empty());
    }
}
