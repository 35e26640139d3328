//! Reviewer agent - rule-based review, security audit, and failure feedback
//!
//! Operations (selected by task type):
//! - `review` (default): issues, metrics, score and grade
//! - `security` / `audit`: security issues only with a risk level
//! - `feedback`: map a failed result to a corrective task
//!
//! Review content is taken from `input.content`, `input.code`, a string
//! input, or else the text of `metadata.dependency_results`.

use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{failed_result, Agent};
use crate::config::ReviewerConfig;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::planner::retry_task;
use crate::task::{
    estimate_tokens, AgentProfile, AgentResult, AgentRole, AgentTask, Capability, ErrorKind,
    ResultMetrics,
};

pub mod rules;
pub mod scoring;

pub use rules::{default_rules, IssueCategory, ReviewIssue, ReviewRule, Severity};
pub use scoring::{compute_metrics, overall_score, security_risk, Grade, ReviewMetrics, SecurityRisk};

/// Outcome of reviewing one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub score: u32,
    pub grade: Grade,
    pub issues: Vec<ReviewIssue>,
    pub suggestions: Vec<String>,
    pub metrics: ReviewMetrics,
    pub passes_requirements: bool,
}

/// Findings of a security-only audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAudit {
    pub risk_level: SecurityRisk,
    pub score: f64,
    pub issues: Vec<ReviewIssue>,
    pub recommendations: Vec<String>,
}

/// Timeout used as the doubling base when a timed-out task had none
const FALLBACK_TIMEOUT_MS: u64 = 30_000;

/// Reference reviewer agent
pub struct ReviewerAgent {
    profile: AgentProfile,
    context: AgentContext,
    rules: Vec<Box<dyn ReviewRule>>,
    config: ReviewerConfig,
}

impl ReviewerAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: ReviewerConfig) -> Self {
        let profile = AgentProfile::new(id, name, AgentRole::Reviewer)
            .with_capability(Capability::new("review", "Score content against review rules"))
            .with_capability(Capability::new("security", "Audit content for security issues"))
            .with_capability(Capability::new("feedback", "Propose a corrective task for a failure"));

        Self {
            profile,
            context: AgentContext::new(),
            rules: default_rules(&config.disabled_rules),
            config,
        }
    }

    /// Add a caller-defined rule
    pub fn with_rule(mut self, rule: impl ReviewRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    fn issues(&self, content: &str) -> Vec<ReviewIssue> {
        let mut issues: Vec<ReviewIssue> = self.rules.iter().flat_map(|r| r.check(content)).collect();
        // stable: rule order is kept within a line
        issues.sort_by_key(|i| i.line);
        issues
    }

    fn suggestions(&self, issues: &[ReviewIssue]) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| issues.iter().any(|i| i.rule_id == rule.id()))
            .map(|rule| rule.suggestion().to_string())
            .collect()
    }

    /// Review content against the rule set and requirement keywords
    pub fn review(&self, content: &str, requirements: &[String]) -> ReviewResult {
        let issues = self.issues(content);
        let metrics = compute_metrics(content, &issues);
        let score = overall_score(&metrics, &issues);

        let lowered = content.to_lowercase();
        let passes_requirements = !issues.iter().any(|i| i.severity == Severity::Critical)
            && requirements
                .iter()
                .all(|req| lowered.contains(&req.to_lowercase()));

        ReviewResult {
            score,
            grade: Grade::from_score(score),
            suggestions: self.suggestions(&issues),
            issues,
            metrics,
            passes_requirements,
        }
    }

    /// Security-only view of a review
    pub fn audit(&self, content: &str) -> SecurityAudit {
        let issues: Vec<ReviewIssue> = self
            .issues(content)
            .into_iter()
            .filter(|i| i.category == IssueCategory::Security)
            .collect();
        let metrics = compute_metrics(content, &issues);

        SecurityAudit {
            risk_level: security_risk(&issues),
            score: metrics.security,
            recommendations: self.suggestions(&issues),
            issues,
        }
    }

    /// Corrective task for a failed result, with a short diagnosis
    pub fn feedback(&self, task: &AgentTask, result: &AgentResult) -> (Option<AgentTask>, String) {
        if result.success {
            return (None, "task succeeded".to_string());
        }

        let Some(mut next) = retry_task(task, result) else {
            return (None, "task succeeded".to_string());
        };
        let diagnosis = match result.error_kind {
            Some(ErrorKind::Timeout) => {
                let doubled = task.timeout_ms.unwrap_or(FALLBACK_TIMEOUT_MS).saturating_mul(2);
                next.timeout_ms = Some(doubled);
                format!("timed out; retrying with timeout {}ms", doubled)
            }
            Some(ErrorKind::SandboxRequired) => {
                return (None, "code execution needs a configured sandbox".to_string())
            }
            Some(ErrorKind::ToolNotFound) | Some(ErrorKind::ToolFailed) => {
                "tool failure; retrying with the previous error attached".to_string()
            }
            Some(ErrorKind::ValidationFailed) => "invalid input; parameters need correction".to_string(),
            Some(ErrorKind::MaxIterationsExceeded) | Some(ErrorKind::MaxToolCallsExceeded) => {
                next.description = format!("{} (reduce scope)", task.description);
                "limits exceeded; retrying with reduced scope".to_string()
            }
            _ => "execution failed; retrying".to_string(),
        };
        next.metadata.insert("diagnosis".into(), json!(diagnosis));
        (Some(next), diagnosis)
    }

    fn content(task: &AgentTask) -> String {
        if let Some(text) = task.input_str("content").or_else(|| task.input_str("code")) {
            return text.to_string();
        }
        if let Value::String(text) = &task.input {
            return text.clone();
        }
        match task.metadata.get("dependency_results") {
            Some(Value::Object(results)) => results
                .values()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        }
    }

    fn requirements(&self, task: &AgentTask) -> Result<Vec<String>, AgentError> {
        match task.input.get("requirements") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| AgentError::InvalidInput(format!("requirements: {}", e))),
            None => Ok(self.config.default_requirements.clone()),
        }
    }

    fn run(&mut self, task: &AgentTask) -> Result<Value> {
        let output = match task.task_type.as_str() {
            "security" | "audit" => {
                let audit = self.audit(&Self::content(task));
                tracing::info!(risk = ?audit.risk_level, issues = audit.issues.len(), "Security audit complete");
                serde_json::to_value(audit)?
            }
            "feedback" => {
                let original: AgentTask = serde_json::from_value(task.input["task"].clone())
                    .map_err(|e| AgentError::InvalidInput(format!("feedback task: {}", e)))?;
                let result: AgentResult = serde_json::from_value(task.input["result"].clone())
                    .map_err(|e| AgentError::InvalidInput(format!("feedback result: {}", e)))?;
                let (next_task, diagnosis) = self.feedback(&original, &result);
                json!({ "next_task": next_task, "diagnosis": diagnosis })
            }
            _ => {
                let requirements = self.requirements(task)?;
                let review = self.review(&Self::content(task), &requirements);
                tracing::info!(score = review.score, grade = ?review.grade, "Review complete");
                let value = serde_json::to_value(&review)?;
                self.context.remember("last_review", value.clone());
                value
            }
        };
        Ok(output)
    }
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn context(&self) -> &AgentContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.context
    }

    async fn execute(&mut self, task: &AgentTask) -> Result<AgentResult> {
        let started = Instant::now();
        match self.run(task) {
            Ok(output) => {
                let metrics = ResultMetrics {
                    duration_ms: started.elapsed().as_millis() as u64,
                    tokens_used: estimate_tokens(&[&task.input, &output]),
                    iterations: 1,
                    tool_calls: 0,
                };
                Ok(AgentResult::success(&task.id, &self.profile.id, output).with_metrics(metrics))
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Review failed");
                Ok(failed_result(task, &self.profile.id, &e, started))
            }
        }
    }
}
