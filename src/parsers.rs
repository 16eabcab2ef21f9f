// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Linter output parsers
//!
//! Each parser turns a tool's report for a single file into [`LintIssue`]s.
//! Line-oriented parsers skip lines they do not recognize; JSON parsers fail
//! on malformed documents so the invoker can report the run as failed.

use crate::config::OutputParser;
use crate::types::{LintIssue, Severity, SuggestedFix};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Parse `text` produced by a linter run on `file`
pub fn parse(parser: OutputParser, text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    match parser {
        OutputParser::Eslint => parse_eslint(text, file, linter),
        OutputParser::Ruff => parse_ruff(text, file, linter),
        OutputParser::Markdownlint => parse_markdownlint(text, file, linter),
        OutputParser::Shellcheck => parse_shellcheck(text, file, linter),
        OutputParser::Json => parse_generic_json(text, file, linter),
        OutputParser::Mypy | OutputParser::Line => Ok(parse_lines(text, file, linter)),
    }
}

fn to_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// =============================================================================
// ESLint
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFile {
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    rule_id: Option<String>,
    #[serde(default)]
    severity: u8,
    message: String,
    #[serde(default)]
    line: u64,
    #[serde(default)]
    column: u64,
    end_line: Option<u64>,
    end_column: Option<u64>,
    fix: Option<EslintFix>,
    #[serde(default)]
    suggestions: Vec<EslintSuggestion>,
}

#[derive(Deserialize)]
struct EslintFix {
    text: String,
}

#[derive(Deserialize)]
struct EslintSuggestion {
    desc: String,
    fix: Option<EslintFix>,
}

fn parse_eslint(text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    let files: Vec<EslintFile> = serde_json::from_str(text).context("invalid ESLint JSON output")?;
    Ok(files
        .into_iter()
        .flat_map(|f| f.messages)
        .map(|m| {
            let severity = if m.severity >= 2 {
                Severity::Error
            } else {
                Severity::Warning
            };
            let mut fixes: Vec<SuggestedFix> = m
                .fix
                .map(|f| SuggestedFix {
                    description: "autofix".to_string(),
                    replacement: Some(f.text),
                })
                .into_iter()
                .collect();
            fixes.extend(m.suggestions.into_iter().map(|s| SuggestedFix {
                description: s.desc,
                replacement: s.fix.map(|f| f.text),
            }));

            let issue = LintIssue::new(file, linter, severity, to_u32(m.line), to_u32(m.column), m.message)
                .with_end(m.end_line.map(to_u32), m.end_column.map(to_u32))
                .with_fixes(fixes);
            match m.rule_id {
                Some(rule) => issue.with_rule(rule),
                None => issue,
            }
        })
        .collect())
}

// =============================================================================
// Ruff
// =============================================================================

#[derive(Deserialize)]
struct RuffLocation {
    row: u64,
    column: u64,
}

#[derive(Deserialize)]
struct RuffFix {
    message: Option<String>,
    #[serde(default)]
    edits: Vec<RuffEdit>,
}

#[derive(Deserialize)]
struct RuffEdit {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RuffDiagnostic {
    code: Option<String>,
    message: String,
    location: Option<RuffLocation>,
    end_location: Option<RuffLocation>,
    fix: Option<RuffFix>,
}

fn parse_ruff(text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    let diags: Vec<RuffDiagnostic> = serde_json::from_str(text).context("invalid Ruff JSON output")?;
    Ok(diags
        .into_iter()
        .map(|d| {
            let (line, column) = d.location.map_or((1, 1), |l| (to_u32(l.row), to_u32(l.column)));
            let end = d.end_location.map(|l| (to_u32(l.row), to_u32(l.column)));
            let fixes = d
                .fix
                .map(|f| SuggestedFix {
                    description: f.message.unwrap_or_else(|| "autofix".to_string()),
                    replacement: f.edits.into_iter().find_map(|e| e.content),
                })
                .into_iter()
                .collect();

            let issue = LintIssue::new(file, linter, Severity::Error, line, column, d.message)
                .with_end(end.map(|e| e.0), end.map(|e| e.1))
                .with_fixes(fixes);
            match d.code {
                Some(code) => issue.with_rule(code),
                None => issue,
            }
        })
        .collect())
}

// =============================================================================
// markdownlint
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkdownlintResult {
    line_number: u64,
    #[serde(default)]
    rule_names: Vec<String>,
    #[serde(default)]
    rule_description: String,
    error_detail: Option<String>,
    error_range: Option<Vec<u64>>,
    fix_info: Option<Value>,
}

fn parse_markdownlint(text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    let results: Vec<MarkdownlintResult> =
        serde_json::from_str(text).context("invalid markdownlint JSON output")?;
    Ok(results
        .into_iter()
        .map(|r| {
            let column = r
                .error_range
                .as_ref()
                .and_then(|range| range.first().copied())
                .map_or(1, to_u32);
            let message = match r.error_detail.filter(|d| !d.is_empty()) {
                Some(detail) => format!("{} [{detail}]", r.rule_description),
                None => r.rule_description,
            };
            let fixes = r
                .fix_info
                .map(|info| SuggestedFix {
                    description: "markdownlint fix".to_string(),
                    replacement: info
                        .get("insertText")
                        .and_then(Value::as_str)
                        .map(String::from),
                })
                .into_iter()
                .collect();

            LintIssue::new(file, linter, Severity::Warning, to_u32(r.line_number), column, message)
                .with_rule(r.rule_names.join("/"))
                .with_fixes(fixes)
        })
        .collect())
}

// =============================================================================
// shellcheck
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShellcheckComment {
    line: u64,
    end_line: Option<u64>,
    column: u64,
    end_column: Option<u64>,
    level: String,
    code: u64,
    message: String,
    fix: Option<ShellcheckFix>,
}

#[derive(Deserialize)]
struct ShellcheckFix {
    #[serde(default)]
    replacements: Vec<ShellcheckReplacement>,
}

#[derive(Deserialize)]
struct ShellcheckReplacement {
    replacement: String,
}

fn parse_shellcheck(text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    // json1 wraps the array in {"comments": [...]}
    let value: Value = serde_json::from_str(text).context("invalid shellcheck JSON output")?;
    let comments = match value {
        Value::Object(mut obj) => obj.remove("comments").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let comments: Vec<ShellcheckComment> =
        serde_json::from_value(comments).context("unexpected shellcheck JSON shape")?;

    Ok(comments
        .into_iter()
        .map(|c| {
            let severity = Severity::parse_loose(&c.level).unwrap_or(Severity::Warning);
            let fixes = c
                .fix
                .map(|f| SuggestedFix {
                    description: "shellcheck fix".to_string(),
                    replacement: f.replacements.into_iter().next().map(|r| r.replacement),
                })
                .into_iter()
                .collect();
            LintIssue::new(file, linter, severity, to_u32(c.line), to_u32(c.column), c.message)
                .with_end(c.end_line.map(to_u32), c.end_column.map(to_u32))
                .with_rule(format!("SC{}", c.code))
                .with_fixes(fixes)
        })
        .collect())
}

// =============================================================================
// Generic JSON
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericIssue {
    message: String,
    #[serde(default)]
    line: u64,
    #[serde(default)]
    column: u64,
    end_line: Option<u64>,
    end_column: Option<u64>,
    severity: Option<String>,
    #[serde(alias = "ruleId", alias = "code")]
    rule: Option<String>,
}

fn parse_generic_json(text: &str, file: &Path, linter: &str) -> Result<Vec<LintIssue>> {
    let value: Value = serde_json::from_str(text).context("invalid JSON output")?;
    let items = match value {
        Value::Object(mut obj) => obj.remove("issues").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let items: Vec<GenericIssue> =
        serde_json::from_value(items).context("expected an array of issue objects")?;

    Ok(items
        .into_iter()
        .map(|i| {
            let severity = i
                .severity
                .as_deref()
                .and_then(Severity::parse_loose)
                .unwrap_or(Severity::Warning);
            let issue = LintIssue::new(file, linter, severity, to_u32(i.line), to_u32(i.column), i.message)
                .with_end(i.end_line.map(to_u32), i.end_column.map(to_u32));
            match i.rule {
                Some(rule) => issue.with_rule(rule),
                None => issue,
            }
        })
        .collect())
}

// =============================================================================
// Line-oriented (mypy, gcc-style tools)
// =============================================================================

struct LineDiagnostic<'a> {
    line: u32,
    column: u32,
    severity: Option<Severity>,
    message: &'a str,
}

/// Find `<path>:<line>[:<col>]:` and split off an optional `severity:` word
fn parse_line(raw: &str) -> Option<LineDiagnostic<'_>> {
    let mut search = 0;
    while let Some(offset) = raw[search..].find(':') {
        let idx = search + offset;
        search = idx + 1;
        if idx == 0 {
            continue;
        }

        let rest = &raw[idx + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            continue;
        }
        let Ok(line) = rest[..digits].parse::<u32>() else {
            continue;
        };

        let mut tail = &rest[digits..];
        let mut column = 1;
        if let Some(after) = tail.strip_prefix(':') {
            let col_digits = after.bytes().take_while(u8::is_ascii_digit).count();
            if col_digits > 0 {
                column = after[..col_digits].parse().unwrap_or(1);
                tail = &after[col_digits..];
            }
        }

        let Some(body) = tail.strip_prefix(':') else {
            continue;
        };
        let body = body.trim();
        if body.is_empty() {
            continue;
        }

        let (severity, message) = match body.split_once(':') {
            Some((word, msg)) => match Severity::parse_loose(word) {
                Some(sev) if word.len() <= 12 => (Some(sev), msg.trim()),
                _ => (None, body),
            },
            None => (None, body),
        };

        return Some(LineDiagnostic {
            line,
            column,
            severity,
            message,
        });
    }
    None
}

/// Split a trailing `[rule]` off a message
fn split_rule(message: &str) -> (&str, Option<&str>) {
    let trimmed = message.trim_end();
    if let Some(stripped) = trimmed.strip_suffix(']') {
        if let Some(open) = stripped.rfind('[') {
            let rule = &stripped[open + 1..];
            if !rule.is_empty() && !rule.contains(char::is_whitespace) {
                return (stripped[..open].trim_end(), Some(rule));
            }
        }
    }
    (trimmed, None)
}

/// Parse `file:line[:col]: [severity:] message [rule]` lines
#[must_use]
pub fn parse_lines(text: &str, file: &Path, linter: &str) -> Vec<LintIssue> {
    text.lines()
        .filter_map(parse_line)
        .map(|d| {
            let (message, rule) = split_rule(d.message);
            let issue = LintIssue::new(
                file,
                linter,
                d.severity.unwrap_or(Severity::Warning),
                d.line,
                d.column,
                message,
            );
            match rule {
                Some(rule) => issue.with_rule(rule),
                None => issue,
            }
        })
        .collect()
}
