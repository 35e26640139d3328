//! Review scoring
//!
//! Score = weighted_sum([
//!     (security, 0.30),
//!     (code_quality, 0.20),
//!     (maintainability, 0.15),
//!     (documentation, 0.10),
//!     (accessibility, 0.10),
//!     (performance, 0.15),
//! ]) - 10 per critical issue - 5 per high issue, clamped to 0-100

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rules::{IssueCategory, ReviewIssue, Severity};

/// Per-category scores, each 0-100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetrics {
    pub security: f64,
    pub code_quality: f64,
    pub maintainability: f64,
    pub documentation: f64,
    pub accessibility: f64,
    pub performance: f64,
    /// Comment lines / non-empty lines
    pub comment_density: f64,
    /// Branching lines / non-empty lines
    pub branching_density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Grade::A,
            80..=89 => Grade::B,
            70..=79 => Grade::C,
            60..=69 => Grade::D,
            _ => Grade::F,
        }
    }
}

/// Overall risk reported by a security audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityRisk {
    None,
    Low,
    Medium,
    High,
    Critical,
}

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(//|#|/\*|\*|<!--|""")"#).unwrap());

static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(if|else|switch|case|match|for|while|catch)\b|&&|\|\||\?\s").unwrap()
});

fn clamp(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn count(issues: &[ReviewIssue], category: IssueCategory) -> usize {
    issues.iter().filter(|i| i.category == category).count()
}

/// Compute category metrics from issues and content shape
pub fn compute_metrics(content: &str, issues: &[ReviewIssue]) -> ReviewMetrics {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let total = lines.len();

    let (comment_density, branching_density, avg_line_length) = if total == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let comments = lines.iter().filter(|l| COMMENT.is_match(l)).count();
        let branches = lines.iter().filter(|l| BRANCH.is_match(l)).count();
        let chars: usize = lines.iter().map(|l| l.len()).sum();
        (
            comments as f64 / total as f64,
            branches as f64 / total as f64,
            chars as f64 / total as f64,
        )
    };

    let security_penalty: f64 = issues
        .iter()
        .filter(|i| i.category == IssueCategory::Security)
        .map(|i| match i.severity {
            Severity::Critical => 30.0,
            Severity::High => 20.0,
            Severity::Medium => 10.0,
            Severity::Low => 5.0,
            Severity::Info => 0.0,
        })
        .sum();

    let mut code_quality = 100.0 - 5.0 * count(issues, IssueCategory::CodeQuality) as f64;
    if branching_density > 0.2 {
        code_quality -= (branching_density - 0.2) * 50.0;
    }

    let mut maintainability = 100.0 - 3.0 * count(issues, IssueCategory::Maintainability) as f64;
    if avg_line_length > 100.0 {
        maintainability -= 10.0;
    }

    let documentation = if total == 0 || comment_density >= 0.1 {
        100.0
    } else {
        60.0 + 400.0 * comment_density
    };

    ReviewMetrics {
        security: clamp(100.0 - security_penalty),
        code_quality: clamp(code_quality),
        maintainability: clamp(maintainability),
        documentation: clamp(documentation),
        accessibility: clamp(100.0 - 15.0 * count(issues, IssueCategory::Accessibility) as f64),
        performance: clamp(100.0 - 15.0 * count(issues, IssueCategory::Performance) as f64),
        comment_density,
        branching_density,
    }
}

/// Weighted score with severity penalties, 0-100
pub fn overall_score(metrics: &ReviewMetrics, issues: &[ReviewIssue]) -> u32 {
    let weighted = metrics.security * 0.30
        + metrics.code_quality * 0.20
        + metrics.maintainability * 0.15
        + metrics.documentation * 0.10
        + metrics.accessibility * 0.10
        + metrics.performance * 0.15;

    let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count() as f64;
    let high = issues.iter().filter(|i| i.severity == Severity::High).count() as f64;

    clamp(weighted - 10.0 * critical - 5.0 * high).round() as u32
}

/// Audit risk from security issues
pub fn security_risk(issues: &[ReviewIssue]) -> SecurityRisk {
    let security: Vec<&ReviewIssue> = issues
        .iter()
        .filter(|i| i.category == IssueCategory::Security)
        .collect();
    let high = security.iter().filter(|i| i.severity == Severity::High).count();

    if security.iter().any(|i| i.severity == Severity::Critical) {
        SecurityRisk::Critical
    } else if high >= 3 {
        SecurityRisk::High
    } else if high >= 1 {
        SecurityRisk::Medium
    } else if !security.is_empty() {
        SecurityRisk::Low
    } else {
        SecurityRisk::None
    }
}
