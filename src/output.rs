// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Rendering of lint results
//!
//! Renderers return strings so commands decide where they go. Colors are
//! only applied to the human formats.

use crate::config::OutputFormat;
use crate::types::{LintIssue, LintResult, Severity, Summary};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Exit code when no error-severity issue was found
pub const EXIT_OK: i32 = 0;
/// Exit code when at least one error-severity issue was found
pub const EXIT_ISSUES: i32 = 1;
/// Exit code for configuration problems
pub const EXIT_CONFIG: i32 = 2;

/// How to render
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Apply ANSI colors
    pub color: bool,
    /// Paths are shown relative to this directory when under it
    pub root: Option<PathBuf>,
}

impl RenderOptions {
    fn display_path(&self, path: &Path) -> String {
        self.root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Exit code for a finished run
#[must_use]
pub fn exit_code(results: &[LintResult]) -> i32 {
    if results.iter().any(LintResult::has_errors) {
        EXIT_ISSUES
    } else {
        EXIT_OK
    }
}

/// Render `results` in `format`
pub fn render(format: OutputFormat, results: &[LintResult], opts: &RenderOptions) -> Result<String> {
    let summary = Summary::from_results(results);
    match format {
        OutputFormat::Json => render_json(results, &summary),
        OutputFormat::Table => Ok(render_table(results, &summary, opts)),
        OutputFormat::Summary => Ok(render_summary(results, &summary, opts)),
        OutputFormat::Vscode => Ok(render_vscode(results, opts)),
    }
}

fn render_json(results: &[LintResult], summary: &Summary) -> Result<String> {
    serde_json::to_string_pretty(&json!({
        "results": results,
        "summary": summary,
    }))
    .context("Failed to serialize results")
}

fn severity_label(severity: Severity, color: bool) -> String {
    let label = severity.as_str();
    if !color {
        return label.to_string();
    }
    match severity {
        Severity::Error => label.red().bold().to_string(),
        Severity::Warning => label.yellow().bold().to_string(),
        Severity::Info => label.blue().to_string(),
        Severity::Hint => label.bright_black().to_string(),
    }
}

fn issues(results: &[LintResult]) -> impl Iterator<Item = &LintIssue> {
    results.iter().flat_map(|r| r.issues.iter())
}

fn summary_line(summary: &Summary, color: bool) -> String {
    let line = format!(
        "{summary} ({} errors, {} warnings, {} infos, {} hints)",
        summary.errors, summary.warnings, summary.infos, summary.hints
    );
    if color {
        line.bold().to_string()
    } else {
        line
    }
}

fn render_summary(results: &[LintResult], summary: &Summary, opts: &RenderOptions) -> String {
    let mut by_file: BTreeMap<&Path, Vec<&LintIssue>> = BTreeMap::new();
    for issue in issues(results) {
        by_file.entry(issue.file.as_path()).or_default().push(issue);
    }

    let mut out = String::new();
    for (file, file_issues) in &by_file {
        let name = opts.display_path(file);
        if opts.color {
            let _ = writeln!(out, "{}", name.bold());
        } else {
            let _ = writeln!(out, "{name}");
        }
        for issue in file_issues {
            let rule = issue
                .rule
                .as_deref()
                .map(|r| format!(" [{r}]"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {}:{}  {}  {}{rule}  ({})",
                issue.line,
                issue.column,
                severity_label(issue.severity, opts.color),
                issue.message,
                issue.linter
            );
        }
    }
    if !by_file.is_empty() {
        out.push('\n');
    }
    out.push_str(&summary_line(summary, opts.color));
    out.push('\n');
    out
}

fn render_table(results: &[LintResult], summary: &Summary, opts: &RenderOptions) -> String {
    let rows: Vec<[String; 5]> = issues(results)
        .map(|i| {
            [
                format!("{}:{}:{}", opts.display_path(&i.file), i.line, i.column),
                i.severity.as_str().to_string(),
                i.linter.clone(),
                i.rule.clone().unwrap_or_else(|| "-".to_string()),
                i.message.clone(),
            ]
        })
        .collect();

    let header = ["LOCATION", "SEVERITY", "LINTER", "RULE", "MESSAGE"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |cells: &[&str]| -> String {
        let mut s = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                s.push_str(cell);
            } else {
                let _ = write!(s, "{cell:<width$}  ", width = widths[i]);
            }
        }
        s.trim_end().to_string()
    };

    if rows.is_empty() {
        out.push_str("No issues found.\n");
    } else {
        let head = line(&header);
        if opts.color {
            let _ = writeln!(out, "{}", head.bold());
        } else {
            let _ = writeln!(out, "{head}");
        }
        for row in &rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            let _ = writeln!(out, "{}", line(&cells));
        }
    }
    out.push('\n');
    out.push_str(&summary_line(summary, opts.color));
    out.push('\n');
    out
}

/// `file:line:col: severity: message [rule]`, the shape editor problem
/// matchers expect
fn render_vscode(results: &[LintResult], opts: &RenderOptions) -> String {
    let mut out = String::new();
    for issue in issues(results) {
        let _ = write!(
            out,
            "{}:{}:{}: {}: {}",
            opts.display_path(&issue.file),
            issue.line,
            issue.column,
            issue.severity,
            issue.message
        );
        if let Some(rule) = &issue.rule {
            let _ = write!(out, " [{}/{rule}]", issue.linter);
        } else {
            let _ = write!(out, " [{}]", issue.linter);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn results() -> Vec<LintResult> {
        let a = Path::new("/repo/docs/a.md");
        vec![
            LintResult::new(
                a,
                "markdownlint",
                vec![
                    LintIssue::new(a, "markdownlint", Severity::Warning, 3, 1, "Trailing spaces")
                        .with_rule("MD009"),
                ],
                Duration::ZERO,
            ),
            LintResult::failure(Path::new("/repo/run.sh"), "shellcheck", "timed out after 10ms", Duration::ZERO),
        ]
    }

    fn plain() -> RenderOptions {
        RenderOptions {
            color: false,
            root: Some(PathBuf::from("/repo")),
        }
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&results()), EXIT_ISSUES);
        assert_eq!(exit_code(&results()[..1]), EXIT_OK);
        assert_eq!(exit_code(&[]), EXIT_OK);
    }

    #[test]
    fn test_vscode_lines() {
        let out = render(OutputFormat::Vscode, &results(), &plain()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "docs/a.md:3:1: warning: Trailing spaces [markdownlint/MD009]");
        assert!(lines[1].starts_with("run.sh:1:1: error: timed out"));
    }

    #[test]
    fn test_summary_groups_by_file() {
        let out = render(OutputFormat::Summary, &results(), &plain()).unwrap();
        assert!(out.contains("docs/a.md\n  3:1  warning  Trailing spaces [MD009]  (markdownlint)"));
        assert!(out.contains("2 files linted, 2 with issues, 1 invocation failures"));
    }

    #[test]
    fn test_table_and_empty() {
        let out = render(OutputFormat::Table, &results(), &plain()).unwrap();
        assert!(out.starts_with("LOCATION"));
        assert!(out.contains("MD009"));

        let empty = render(OutputFormat::Table, &[], &plain()).unwrap();
        assert!(empty.starts_with("No issues found."));
    }

    #[test]
    fn test_json_shape() {
        let out = render(OutputFormat::Json, &results(), &plain()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["summary"]["totalIssues"], 2);
        assert_eq!(value["results"][1]["success"], false);
        assert_eq!(value["results"][0]["issues"][0]["rule"], "MD009");
    }
}
