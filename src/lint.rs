//! Line based linters for stylesheets and scripts.
//!
//! Only diagnostics with [`Severity::Error`] fail a run, warnings are logged
//! and otherwise ignored.

use std::fmt::{Display, Formatter};
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: Utf8PathBuf,
    /// 1-based line number.
    pub line: usize,
    pub severity: Severity,
    pub rule: &'static str,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "{}:{}: {severity} [{}] {}",
            self.path, self.line, self.rule, self.message
        )
    }
}

/// All errors found in one lint run.
#[derive(Debug, Error)]
pub struct LintReport {
    pub errors: Vec<Diagnostic>,
}

impl Display for LintReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lint found {} error(s)", self.errors.len())?;
        for diagnostic in &self.errors {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

pub trait Lint: Send + Sync {
    fn lint(&self, path: &Utf8Path, source: &str) -> Vec<Diagnostic>;
}

static STRINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());
static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\s)//.*$").unwrap());
static EMPTY_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\s*\}").unwrap());
static DEBUGGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bdebugger\b").unwrap());
static CONSOLE_LOG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bconsole\.log\s*\(").unwrap());

/// Strips string literals and line comments so that rules only see code.
fn code_of(line: &str) -> String {
    let line = STRINGS.replace_all(line, "\"\"");
    LINE_COMMENT.replace(&line, "").into_owned()
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("//") || line.starts_with("/*") || line.starts_with('*')
}

fn diagnostic(
    path: &Utf8Path,
    line: usize,
    severity: Severity,
    rule: &'static str,
    message: impl Into<String>,
) -> Diagnostic {
    Diagnostic {
        path: path.to_path_buf(),
        line,
        severity,
        rule,
        message: message.into(),
    }
}

fn trailing_whitespace(path: &Utf8Path, n: usize, line: &str, out: &mut Vec<Diagnostic>) {
    if line.ends_with([' ', '\t']) {
        out.push(diagnostic(
            path,
            n,
            Severity::Warning,
            "trailing-whitespace",
            "trailing whitespace",
        ));
    }
}

/// Rules for SCSS sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct StyleLint;

impl Lint for StyleLint {
    fn lint(&self, path: &Utf8Path, source: &str) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        let mut depth: i64 = 0;
        let mut opened_at = Vec::new();

        for (i, line) in source.lines().enumerate() {
            let n = i + 1;
            trailing_whitespace(path, n, line, &mut out);

            if is_comment(line) {
                continue;
            }

            let code = code_of(line);

            for c in code.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened_at.push(n);
                    }
                    '}' => {
                        depth -= 1;
                        opened_at.pop();
                        if depth < 0 {
                            out.push(diagnostic(
                                path,
                                n,
                                Severity::Error,
                                "brace-balance",
                                "unexpected closing brace",
                            ));
                            depth = 0;
                        }
                    }
                    _ => {}
                }
            }

            if EMPTY_BLOCK.is_match(&code) {
                out.push(diagnostic(path, n, Severity::Warning, "no-empty-rulesets", "empty block"));
            }

            if code.contains("!important") {
                out.push(diagnostic(
                    path,
                    n,
                    Severity::Warning,
                    "no-important",
                    "avoid !important",
                ));
            }
        }

        if let Some(&line) = opened_at.first() {
            out.push(diagnostic(
                path,
                line,
                Severity::Error,
                "brace-balance",
                "block is never closed",
            ));
        }

        out
    }
}

/// Rules for JavaScript sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptLint;

impl Lint for ScriptLint {
    fn lint(&self, path: &Utf8Path, source: &str) -> Vec<Diagnostic> {
        let mut out = Vec::new();

        for (i, line) in source.lines().enumerate() {
            let n = i + 1;
            trailing_whitespace(path, n, line, &mut out);

            if is_comment(line) {
                continue;
            }

            let code = code_of(line);

            if DEBUGGER.is_match(&code) {
                out.push(diagnostic(
                    path,
                    n,
                    Severity::Error,
                    "no-debugger",
                    "unexpected 'debugger' statement",
                ));
            }

            if CONSOLE_LOG.is_match(&code) {
                out.push(diagnostic(path, n, Severity::Warning, "no-console", "unexpected console.log"));
            }
        }

        out
    }
}

/// Lints every file, logs warnings, and fails if any error was found.
pub fn lint_files(lint: &dyn Lint, paths: &[Utf8PathBuf]) -> Result<(), PipelineError> {
    let mut errors = Vec::new();

    for path in paths {
        let source = fs::read_to_string(path).map_err(PipelineError::io(path))?;

        for diagnostic in lint.lint(path, &source) {
            match diagnostic.severity {
                Severity::Warning => tracing::warn!("{diagnostic}"),
                Severity::Error => {
                    tracing::error!("{diagnostic}");
                    errors.push(diagnostic);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(LintReport { errors }.into())
    }
}
