//! Per-agent private state
//!
//! Every agent owns exactly one `AgentContext`. The orchestrator only
//! touches it through the agent (for conversation history during
//! agent-to-agent messaging).

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    System,
    User,
    Assistant,
}

/// A single message in an agent's conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
    /// The other agent involved, when the message came from or went to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(role: ConversationRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            peer: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }
}

/// Optional limits an agent runs under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConstraints {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Tools the agent may call (None = all registered tools)
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

impl AgentConstraints {
    /// Check a tool name against the allow-list
    pub fn allows_tool(&self, tool: &str) -> bool {
        match &self.allowed_tools {
            Some(list) => list.iter().any(|t| t == tool),
            None => true,
        }
    }
}

/// Memory, history, tools and constraints owned by one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub memory: HashMap<String, Value>,
    pub history: Vec<ConversationEntry>,
    pub tools: BTreeSet<String>,
    pub constraints: Option<AgentConstraints>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraints(mut self, constraints: AgentConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn remember(&mut self, key: impl Into<String>, value: Value) {
        self.memory.insert(key.into(), value);
    }

    pub fn recall(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    pub fn push_message(&mut self, entry: ConversationEntry) {
        self.history.push(entry);
    }

    /// Timeout constraint, if one is set
    pub fn timeout_ms(&self) -> Option<u64> {
        self.constraints.as_ref().and_then(|c| c.timeout_ms)
    }

    /// Whether the agent may call the named tool
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.constraints
            .as_ref()
            .map(|c| c.allows_tool(tool))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_and_history() {
        let mut ctx = AgentContext::new();
        ctx.remember("answer", json!(42));
        ctx.push_message(ConversationEntry::new(ConversationRole::User, "hi").with_peer("other"));

        assert_eq!(ctx.recall("answer"), Some(&json!(42)));
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.history[0].peer.as_deref(), Some("other"));
    }

    #[test]
    fn test_tool_allow_list() {
        let ctx = AgentContext::new().with_constraints(AgentConstraints {
            allowed_tools: Some(vec!["read_file".to_string()]),
            timeout_ms: Some(500),
            ..Default::default()
        });

        assert!(ctx.allows_tool("read_file"));
        assert!(!ctx.allows_tool("write_file"));
        assert_eq!(ctx.timeout_ms(), Some(500));
        assert!(AgentContext::new().allows_tool("anything"));
    }
}
