// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Config command - validate or print the effective configuration

use super::{load_config, report_config_error, GlobalOptions};
use crate::output::{EXIT_CONFIG, EXIT_OK};
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

/// `config` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Validate and report problems
    Check,
    /// Print the effective config as JSON
    Show,
}

/// Run config command
pub fn run(action: ConfigAction, project: Option<&Path>, global: &GlobalOptions) -> Result<i32> {
    let config = match load_config(global, project).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) if global.json => {
            let out = json!({ "valid": false, "problems": e.problems() });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(EXIT_CONFIG);
        }
        Err(e) => {
            report_config_error(&e, global.color);
            return Ok(EXIT_CONFIG);
        }
    };

    match action {
        ConfigAction::Check if global.json => {
            let out = json!({ "valid": true, "linters": config.enabled_linters().count() });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        ConfigAction::Check => {
            println!(
                "Configuration OK: {} linter(s) enabled, root {}",
                config.enabled_linters().count(),
                config.root_path.display()
            );
        }
        ConfigAction::Show => {
            let out = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{out}");
        }
    }
    Ok(EXIT_OK)
}
