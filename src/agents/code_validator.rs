//! Static code review heuristics.
//!
//! Nothing here parses the language. The checks are line-based and cheap,
//! meant as prompts for the learner rather than a linter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::models::{Project, ProjectNote};

pub const VALIDATE_CODE: &str = "validate-code";

const MAX_LINE_LENGTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One finding, tied to a 1-based line when it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub line: Option<usize>,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    fn at(line: usize, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            severity,
            message: message.into(),
        }
    }
}

/// Run every heuristic over `code`. `language` enables language-specific
/// checks.
pub fn analyze(code: &str, language: Option<&str>) -> Vec<Issue> {
    let language = language.map(|l| l.to_ascii_lowercase());
    let rust = matches!(language.as_deref(), Some("rust") | Some("rs"));
    let mut issues = check_delimiters(code, rust);

    for (idx, line) in code.lines().enumerate() {
        let n = idx + 1;
        if line.chars().count() > MAX_LINE_LENGTH {
            issues.push(Issue::at(
                n,
                Severity::Info,
                format!("line is longer than {MAX_LINE_LENGTH} characters"),
            ));
        }
        if line.ends_with(' ') || line.ends_with('\t') {
            issues.push(Issue::at(n, Severity::Info, "trailing whitespace"));
        }
        if line.contains("TODO") || line.contains("FIXME") {
            issues.push(Issue::at(n, Severity::Info, "unfinished work marker"));
        }

        match language.as_deref() {
            Some("python") | Some("py") => {
                if line.starts_with('\t') {
                    issues.push(Issue::at(n, Severity::Warning, "tab indentation"));
                }
                if line.trim() == "except:" {
                    issues.push(Issue::at(
                        n,
                        Severity::Warning,
                        "bare except hides every error",
                    ));
                }
            }
            Some("rust") | Some("rs") => {
                if line.contains(".unwrap()") {
                    issues.push(Issue::at(
                        n,
                        Severity::Warning,
                        "unwrap() panics on error, consider propagating with ?",
                    ));
                }
            }
            _ => {}
        }
    }

    issues.sort_by_key(|i| (i.line, std::cmp::Reverse(i.severity)));
    issues
}

/// Bracket balance, skipping string and char literals and line comments.
/// With `lifetimes`, a quote not followed by a char literal is a Rust
/// lifetime.
fn check_delimiters(code: &str, lifetimes: bool) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let n = idx + 1;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '`' => quote = Some(c),
                '\'' if !lifetimes || is_char_literal(chars.clone()) => quote = Some(c),
                '#' => break,
                '/' if chars.peek() == Some(&'/') => break,
                '(' | '[' | '{' => stack.push((c, n)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, line)) => {
                            issues.push(Issue::at(
                                n,
                                Severity::Error,
                                format!("'{c}' closes '{open}' opened on line {line}"),
                            ));
                        }
                        None => {
                            issues.push(Issue::at(n, Severity::Error, format!("unmatched '{c}'")));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    for (open, line) in stack {
        issues.push(Issue::at(line, Severity::Error, format!("'{open}' is never closed")));
    }
    issues
}

fn is_char_literal(mut rest: impl Iterator<Item = char>) -> bool {
    match rest.next() {
        Some('\\') => true,
        Some(_) => rest.next() == Some('\''),
        None => false,
    }
}

/// Code validator: stateless analysis, records a summary note.
pub struct CodeValidatorAgent;

#[derive(Deserialize)]
struct ValidateInput {
    code: String,
    language: Option<String>,
}

#[async_trait]
impl Agent for CodeValidatorAgent {
    fn name(&self) -> &'static str {
        "code-validator"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[VALIDATE_CODE]
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        let input: ValidateInput = request.parse()?;
        if input.code.trim().is_empty() {
            return Err(request.invalid("code must not be empty"));
        }

        let issues = analyze(&input.code, input.language.as_deref());
        let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
        let warnings = issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        let valid = errors == 0;

        let summary = format!(
            "Validated {} lines of {}: {} errors, {} warnings, {} notes",
            input.code.lines().count(),
            input.language.as_deref().unwrap_or("code"),
            errors,
            warnings,
            issues.len() - errors - warnings,
        );
        project.notes.push(ProjectNote::new(self.name(), summary));

        Ok(AgentOutcome::new(
            json!({ "valid": valid, "issues": issues }),
            project,
        ))
    }
}
