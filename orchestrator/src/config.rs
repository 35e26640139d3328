//! Configuration loading for the orchestrator
//!
//! Reads `.orchestrator.toml`:
//! - Walks up from the current directory
//! - Falls back to `~/.config/orchestrator/.orchestrator.toml`
//!
//! Every section and field is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use agent::{ExecutorConfig, PlannerConfig, ReviewerConfig};

/// Config file name searched for
pub const CONFIG_FILE: &str = ".orchestrator.toml";

/// Find a config file by walking up the directory tree
///
/// Searches from current directory up to root, then checks global config.
pub fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("orchestrator").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

// ============================================================================
// [orchestrator]
// ============================================================================

/// Core orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Timeout applied when neither the task nor the agent sets one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Maximum steps dispatched per workflow wave
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Iteration cap used by the CLI's agentic loop
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_loop_iterations() -> usize {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            max_loop_iterations: default_max_loop_iterations(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }
}

// ============================================================================
// File config
// ============================================================================

/// Top-level configuration (from .orchestrator.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub reviewer: ReviewerConfig,
}

impl FileConfig {
    /// Load from the discovered config file, or defaults when none exists
    pub fn load() -> Result<Self> {
        match find_config_file(CONFIG_FILE) {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No {} found, using defaults", CONFIG_FILE);
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
