// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Init command - write a starter config

use super::project_dir;
use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::output::EXIT_OK;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Run init command
pub fn run(project: Option<&Path>, force: bool) -> Result<i32> {
    let dir = project_dir(project);
    let path = dir.join(DEFAULT_CONFIG_FILE);

    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = Config::with_defaults(".");
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    fs::write(&path, format!("{json}\n"))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    println!("  linters: {}", config.linters.iter().map(|l| l.name.as_str()).collect::<Vec<_>>().join(", "));
    Ok(EXIT_OK)
}
