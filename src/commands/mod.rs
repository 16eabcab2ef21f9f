// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Command implementations
//!
//! Each command returns the process exit code; `main` only maps errors.

pub mod cache;
pub mod completions;
pub mod config;
pub mod init;
pub mod lint;

use crate::config::{resolve_config_path, Config};
use crate::error::ConfigError;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Explicit config file
    pub config: Option<PathBuf>,
    /// Machine-readable output
    pub json: bool,
    /// ANSI colors allowed
    pub color: bool,
}

/// Canonical project directory (current directory when absent)
#[must_use]
pub fn project_dir(project: Option<&Path>) -> PathBuf {
    let dir = project.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    std::fs::canonicalize(&dir).unwrap_or(dir)
}

/// Load the config for `project`
///
/// An explicitly named file must exist. Without one, a missing
/// `lintqueue.json` falls back to the built-in linter table. A config without
/// `rootPath` is rooted at the project directory.
pub fn load_config(global: &GlobalOptions, project: Option<&Path>) -> Result<Config, ConfigError> {
    let project = project_dir(project);
    let path = resolve_config_path(global.config.as_deref(), Some(&project));

    if global.config.is_none() && !path.exists() {
        debug!(project = %project.display(), "no config file, using built-in linters");
        return Ok(Config::with_defaults(project));
    }

    let mut config = Config::load(&path)?;
    if config.root_path.as_os_str().is_empty() {
        config.root_path = project;
    } else if let Ok(root) = std::fs::canonicalize(&config.root_path) {
        config.root_path = root;
    }
    debug!(path = %path.display(), root = %config.root_path.display(), "loaded config");
    Ok(config)
}

/// Print every configuration problem to stderr
pub fn report_config_error(err: &ConfigError, color: bool) {
    let header = "Configuration error:";
    if color {
        eprintln!("{}", header.red().bold());
    } else {
        eprintln!("{header}");
    }
    for problem in err.problems() {
        eprintln!("  - {problem}");
    }
}
