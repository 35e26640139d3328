//! Configuration sections for the reference agents
//!
//! Each section deserializes from its own table in `.orchestrator.toml`
//! (`[planner]`, `[executor]`, `[reviewer]`) and falls back to defaults
//! field by field.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// Planner
// ============================================================================

/// Planner configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on decomposed steps
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Baseline duration of one step, used for estimates
    #[serde(default = "default_step_duration_ms")]
    pub step_duration_ms: u64,

    /// Discount applied to the serial estimate for parallel execution
    #[serde(default = "default_parallel_factor")]
    pub parallel_factor: f64,
}

fn default_max_steps() -> usize {
    10
}

fn default_step_duration_ms() -> u64 {
    300_000
}

fn default_parallel_factor() -> f64 {
    0.7
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            step_duration_ms: default_step_duration_ms(),
            parallel_factor: default_parallel_factor(),
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executor configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum planned steps per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum tool invocations per task (retries included)
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    /// Base directory relative file paths resolve against
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// JSON search endpoint for `web_search` (query passed as `q`)
    #[serde(default)]
    pub search_endpoint: Option<String>,

    /// Timeout applied to outbound HTTP tools
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_tool_calls() -> u32 {
    20
}

fn default_http_timeout_ms() -> u64 {
    15_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls: default_max_tool_calls(),
            workspace_root: None,
            search_endpoint: None,
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

// ============================================================================
// Reviewer
// ============================================================================

/// Reviewer configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewerConfig {
    /// Rule ids to leave out of the default rule set
    #[serde(default)]
    pub disabled_rules: Vec<String>,

    /// Requirement keywords applied when a task supplies none
    #[serde(default)]
    pub default_requirements: Vec<String>,
}
