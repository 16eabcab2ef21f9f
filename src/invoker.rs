// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Linter invocation
//!
//! Runs one linter against one file as a subprocess and converts the outcome
//! into a [`LintResult`]. Invocation never returns an error: spawn failures,
//! timeouts and unreadable output all become a failed result carrying a
//! synthetic error issue.

use crate::config::LinterConfig;
use crate::parsers;
use crate::types::LintResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Something that can lint a file with a linter
///
/// The service only talks to linters through this trait so tests can swap in
/// a scripted runner.
#[async_trait]
pub trait LintRunner: Send + Sync {
    /// Run `linter` on `path` and report the outcome
    async fn run(&self, path: &Path, linter: &LinterConfig) -> LintResult;
}

/// Spawns real linter processes
#[derive(Debug, Clone)]
pub struct LinterInvoker {
    root: PathBuf,
    auto_fix: bool,
}

impl LinterInvoker {
    /// Invoker rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, auto_fix: bool) -> Self {
        Self {
            root: root.into(),
            auto_fix,
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Expand the argument template for `path`
    ///
    /// Each template element becomes exactly one argument. When no element
    /// mentions `{file}` or `{relative}` the absolute path is appended. Fix
    /// arguments go in front of the file argument when fixing is enabled.
    #[must_use]
    pub fn build_args(&self, path: &Path, linter: &LinterConfig) -> Vec<String> {
        let absolute = self.absolute(path);
        let relative = absolute
            .strip_prefix(&self.root)
            .map_or_else(|_| absolute.to_string_lossy(), Path::to_string_lossy)
            .into_owned();
        let file = absolute.to_string_lossy();
        let root = self.root.to_string_lossy();

        let mentions_file = linter
            .args
            .iter()
            .any(|a| a.contains("{file}") || a.contains("{relative}"));
        let fix: &[String] = if self.auto_fix { &linter.fix_args } else { &[] };

        let mut args = Vec::with_capacity(linter.args.len() + fix.len() + 1);
        let mut fix_placed = fix.is_empty();
        for template in &linter.args {
            let is_file_arg = template.contains("{file}") || template.contains("{relative}");
            if is_file_arg && !fix_placed {
                args.extend(fix.iter().cloned());
                fix_placed = true;
            }
            args.push(
                template
                    .replace("{file}", &file)
                    .replace("{relative}", &relative)
                    .replace("{root}", &root),
            );
        }
        if !fix_placed {
            args.extend(fix.iter().cloned());
        }
        if !mentions_file {
            args.push(file.into_owned());
        }
        args
    }

    fn working_dir(&self, linter: &LinterConfig) -> PathBuf {
        match &linter.working_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }
}

#[async_trait]
impl LintRunner for LinterInvoker {
    async fn run(&self, path: &Path, linter: &LinterConfig) -> LintResult {
        let started = Instant::now();
        let args = self.build_args(path, linter);
        debug!(linter = %linter.name, file = %path.display(), ?args, "spawning linter");

        let child = Command::new(&linter.command)
            .args(&args)
            .current_dir(self.working_dir(linter))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(linter = %linter.name, command = %linter.command, error = %e, "failed to spawn linter");
                return LintResult::failure(
                    path,
                    &linter.name,
                    format!("failed to spawn '{}': {e}", linter.command),
                    started.elapsed(),
                );
            }
        };

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(linter.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return LintResult::failure(
                    path,
                    &linter.name,
                    format!("failed to collect output of '{}': {e}", linter.command),
                    started.elapsed(),
                );
            }
            Err(_) => {
                warn!(linter = %linter.name, file = %path.display(), timeout_ms = linter.timeout, "linter timed out");
                return LintResult::failure(
                    path,
                    &linter.name,
                    format!("timed out after {}ms", linter.timeout),
                    started.elapsed(),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stdout.trim().is_empty() { &stderr } else { &stdout };
        let exit_ok = output.status.success();

        if exit_ok && text.trim().is_empty() {
            return LintResult::new(path, &linter.name, Vec::new(), started.elapsed());
        }

        match parsers::parse(linter.parser, text, path, &linter.name) {
            Ok(issues) if exit_ok || !issues.is_empty() => {
                LintResult::new(path, &linter.name, issues, started.elapsed())
            }
            Ok(_) => {
                let detail = stderr.lines().next().unwrap_or_default().trim();
                LintResult::failure(
                    path,
                    &linter.name,
                    format!("exited with {} and reported no issues: {detail}", output.status),
                    started.elapsed(),
                )
            }
            Err(e) => LintResult::failure(
                path,
                &linter.name,
                format!("could not parse output: {e:#}"),
                started.elapsed(),
            ),
        }
    }
}
