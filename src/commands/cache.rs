// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Cache command - inspect or delete the persisted cache

use super::{load_config, report_config_error, GlobalOptions};
use crate::cache::ResultCache;
use crate::output::{EXIT_CONFIG, EXIT_OK};
use crate::types::Summary;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::Path;

/// `cache` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Print what the persisted cache holds
    Show,
    /// Delete the persisted cache file
    Clear,
}

/// Run cache command
pub fn run(action: CacheAction, project: Option<&Path>, global: &GlobalOptions) -> Result<i32> {
    let config = match load_config(global, project) {
        Ok(config) => config,
        Err(e) => {
            report_config_error(&e, global.color);
            return Ok(EXIT_CONFIG);
        }
    };
    let path = config.cache_file();

    match action {
        CacheAction::Show => {
            let cache = ResultCache::load(&path, config.max_cache_age());
            let summary = Summary::from_results(cache.results());
            if global.json {
                let out = json!({
                    "path": path,
                    "entries": cache.len(),
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Cache: {}", path.display());
                println!("  entries: {}", cache.len());
                println!("  {summary}");
                let mut files: Vec<_> = cache.iter().collect();
                files.sort_by(|a, b| a.0.cmp(b.0));
                for (file, entry) in files {
                    let issues: usize = entry.results.values().map(|r| r.issues.len()).sum();
                    println!(
                        "  {} ({} linter(s), {} issue(s), updated {})",
                        file.strip_prefix(&config.root_path).unwrap_or(file).display(),
                        entry.results.len(),
                        issues,
                        entry.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        CacheAction::Clear => {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                println!("Removed {}", path.display());
            } else {
                println!("No cache at {}", path.display());
            }
        }
    }
    Ok(EXIT_OK)
}
