use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use stepwise_core::source::parse_file_name;
use stepwise_core::MIGRATION_DELIMITER;

/// Reduce a free-form name to `[a-z0-9_]`
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Id following the highest one already present in `dir`
fn next_id(dir: &Path) -> anyhow::Result<u32> {
    let mut highest: u32 = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if let Some(id) = parse_file_name(&file_name).map_err(|e| anyhow::anyhow!(e))? {
            highest = highest.max(id);
        }
    }
    highest
        .checked_add(1)
        .context("Migration ids are exhausted")
}

pub fn create(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let slug = sanitize(name);
    if slug.is_empty() {
        anyhow::bail!("Migration name '{}' has no usable characters", name);
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let id = next_id(dir)?;
    let path = dir.join(format!("{:04}_{}.sql", id, slug));

    let template = format!(
        "-- Migration: {name}\n-- Created: {created}\n\n\n{delimiter}\n\n",
        name = slug,
        created = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        delimiter = MIGRATION_DELIMITER,
    );
    fs::write(&path, template).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created migration: {}", path.display());
    Ok(path)
}
