//! Review rules
//!
//! Each rule scans content line by line and reports at most one issue per
//! line. Line numbers are 1-based.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    CodeQuality,
    Maintainability,
    Documentation,
    Accessibility,
    Performance,
}

/// A finding reported by a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub rule_id: String,
    pub severity: Severity,
    pub category: IssueCategory,
    pub message: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default)]
    pub auto_fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

/// A check over review content
pub trait ReviewRule: Send + Sync {
    fn id(&self) -> &str;

    fn category(&self) -> IssueCategory;

    /// Suggestion surfaced once when the rule reports anything
    fn suggestion(&self) -> &str;

    fn check(&self, content: &str) -> Vec<ReviewIssue>;
}

/// Rule set used by `ReviewerAgent::new`, minus any disabled ids
pub fn default_rules(disabled: &[String]) -> Vec<Box<dyn ReviewRule>> {
    let rules: Vec<Box<dyn ReviewRule>> = vec![
        Box::new(DebugPrintRule),
        Box::new(TodoMarkerRule),
        Box::new(HardcodedSecretRule),
        Box::new(SqlInjectionRule),
        Box::new(UnsafeHtmlRule),
        Box::new(NestedLoopRule),
        Box::new(MissingAltTextRule),
    ];
    rules
        .into_iter()
        .filter(|rule| !disabled.iter().any(|id| id == rule.id()))
        .collect()
}

fn issue(
    rule: &dyn ReviewRule,
    severity: Severity,
    message: impl Into<String>,
    line: usize,
) -> ReviewIssue {
    ReviewIssue {
        rule_id: rule.id().to_string(),
        severity,
        category: rule.category(),
        message: message.into(),
        line,
        snippet: None,
        auto_fixable: false,
        fix: None,
    }
}

/// Issues for every line matching `pattern`
fn line_matches(
    rule: &dyn ReviewRule,
    content: &str,
    pattern: &Regex,
    severity: Severity,
    message: &str,
) -> Vec<ReviewIssue> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| pattern.is_match(line))
        .map(|(i, line)| {
            let mut found = issue(rule, severity, message, i + 1);
            found.snippet = Some(line.trim().to_string());
            found
        })
        .collect()
}

// ============================================================================
// Code quality / maintainability
// ============================================================================

static DEBUG_PRINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"console\.(log|debug|trace)\s*\(|\bdbg!\s*\(|\bprint\s*\(|System\.out\.print(ln)?\s*\(")
        .unwrap()
});

pub struct DebugPrintRule;

impl ReviewRule for DebugPrintRule {
    fn id(&self) -> &str {
        "debug-print"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::CodeQuality
    }

    fn suggestion(&self) -> &str {
        "Replace debug output with structured logging"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        line_matches(self, content, &DEBUG_PRINT, Severity::Low, "Debug output left in code")
            .into_iter()
            .map(|mut found| {
                found.auto_fixable = true;
                found.fix = Some("Remove the debug statement".into());
                found
            })
            .collect()
    }
}

static TODO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(TODO|FIXME|HACK|XXX)\b").unwrap());

pub struct TodoMarkerRule;

impl ReviewRule for TodoMarkerRule {
    fn id(&self) -> &str {
        "todo-marker"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Maintainability
    }

    fn suggestion(&self) -> &str {
        "Resolve or track outstanding TODO/FIXME markers"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        line_matches(self, content, &TODO_MARKER, Severity::Info, "Unresolved work marker")
    }
}

// ============================================================================
// Security
// ============================================================================

const SECRET_NAMES: &str = r"api[_-]?key|apikey|secret|password|passwd|pwd|token|access[_-]?key|private[_-]?key";

/// A secret name ends the identifier, or is followed by a `_suffix` or a
/// camel-case hump (`apiTokenValue`, `secretKey`); `tokenizer` is not one
static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)((?:{})(?:_\w+|(?-i:[A-Z][a-z])\w*)?\b["']?\s*[:=]\s*["'])([^"']{{3,}})(["'])"#,
        SECRET_NAMES
    ))
    .unwrap()
});

static SECRET_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(sk|pk|rk)_(live|test)_[A-Za-z0-9]+").unwrap());

static PRIVATE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap());

/// Line with every secret value replaced by `[REDACTED]`
pub fn redact(line: &str) -> String {
    if PRIVATE_KEY.is_match(line) {
        return "[REDACTED PRIVATE KEY]".to_string();
    }
    let redacted = SECRET_ASSIGNMENT.replace_all(line.trim(), "${1}[REDACTED]${3}");
    SECRET_TOKEN.replace_all(&redacted, "[REDACTED]").into_owned()
}

pub struct HardcodedSecretRule;

impl ReviewRule for HardcodedSecretRule {
    fn id(&self) -> &str {
        "hardcoded-secret"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Security
    }

    fn suggestion(&self) -> &str {
        "Load credentials from the environment or a secret manager"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                SECRET_ASSIGNMENT.is_match(line)
                    || SECRET_TOKEN.is_match(line)
                    || PRIVATE_KEY.is_match(line)
            })
            .map(|(i, line)| {
                let mut found = issue(self, Severity::Critical, "Hardcoded secret", i + 1);
                found.snippet = Some(redact(line));
                found
            })
            .collect()
    }
}

static SQL_INJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(select|insert|update|delete)\b.*(["'`]\s*\+|\+\s*["'`]|\$\{)"#).unwrap()
});

pub struct SqlInjectionRule;

impl ReviewRule for SqlInjectionRule {
    fn id(&self) -> &str {
        "sql-injection"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Security
    }

    fn suggestion(&self) -> &str {
        "Use parameterized queries instead of string building"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        line_matches(
            self,
            content,
            &SQL_INJECTION,
            Severity::High,
            "SQL statement built from interpolated input",
        )
    }
}

static UNSAFE_HTML: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"innerHTML\s*=|dangerouslySetInnerHTML|document\.write\s*\(|outerHTML\s*=|v-html").unwrap()
});

pub struct UnsafeHtmlRule;

impl ReviewRule for UnsafeHtmlRule {
    fn id(&self) -> &str {
        "unsafe-html"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Security
    }

    fn suggestion(&self) -> &str {
        "Render text content or sanitize HTML before inserting it"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        line_matches(self, content, &UNSAFE_HTML, Severity::High, "Unsanitized HTML injection point")
    }
}

// ============================================================================
// Performance / accessibility
// ============================================================================

static LOOP_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(for|while)\b|\.forEach\s*\(").unwrap());

pub struct NestedLoopRule;

impl ReviewRule for NestedLoopRule {
    fn id(&self) -> &str {
        "nested-loop"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Performance
    }

    fn suggestion(&self) -> &str {
        "Replace nested iteration with a lookup table or a single pass"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        // Indentation of the loops enclosing the current line
        let mut open: Vec<usize> = Vec::new();
        let mut issues = Vec::new();

        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            while open.last().is_some_and(|&outer| outer >= indent) {
                open.pop();
            }
            if LOOP_START.is_match(line) {
                if !open.is_empty() {
                    let mut found = issue(self, Severity::Medium, "Nested loop", i + 1);
                    found.snippet = Some(line.trim().to_string());
                    issues.push(found);
                }
                open.push(indent);
            }
        }
        issues
    }
}

static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").unwrap());
static ALT_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\balt\s*=").unwrap());

pub struct MissingAltTextRule;

impl ReviewRule for MissingAltTextRule {
    fn id(&self) -> &str {
        "missing-alt-text"
    }

    fn category(&self) -> IssueCategory {
        IssueCategory::Accessibility
    }

    fn suggestion(&self) -> &str {
        "Describe every image with alt text"
    }

    fn check(&self, content: &str) -> Vec<ReviewIssue> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| IMG_TAG.find_iter(line).any(|tag| !ALT_ATTR.is_match(tag.as_str())))
            .map(|(i, line)| {
                let mut found = issue(self, Severity::Medium, "Image without alt text", i + 1);
                found.snippet = Some(line.trim().to_string());
                found.auto_fixable = true;
                found.fix = Some(r#"Add an alt="..." attribute"#.into());
                found
            })
            .collect()
    }
}
