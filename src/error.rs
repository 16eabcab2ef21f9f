// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Error types callers are expected to match on

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be used
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON/TOML for the schema
    #[error("failed to parse config {}: {message}", path.display())]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The config parsed but violates one or more rules
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Every individual problem, one per line of user-facing output
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        match self {
            Self::Invalid(problems) => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}
