//! Tool registry for the executor agent
//!
//! This module contains:
//! - The `Tool` trait every named operation implements
//! - `ToolRegistry`, the name -> tool map the executor owns
//! - Schema helpers that turn `schemars` output into compact JSON schemas

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::AgentError;

pub mod builtin;

pub use builtin::{
    default_tools, CodeSandbox, DatabaseQueryTool, ExecuteCodeTool, HttpRequestTool, Notification,
    NotificationTool, QueryBackend, ReadFileTool, TransformDataTool, WebSearchTool, WriteFileTool,
};

/// A named, schema-described operation the executor can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters
    fn parameters(&self) -> Value;

    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Serializable description of a registered tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Clean up a generated JSON schema
/// Removes $schema, title, and other fields consumers don't need
pub fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut cleaned = serde_json::Map::new();
            for (key, value) in obj {
                if key == "$schema" || key == "title" {
                    continue;
                }
                cleaned.insert(key.clone(), clean_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

/// Parameter schema for a params struct
pub fn schema_of<T: JsonSchema>() -> Value {
    clean_schema(&schemars::schema_for!(T).to_value())
}

/// Deserialize tool parameters, reporting which tool rejected them
pub fn parse_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T, AgentError> {
    serde_json::from_value(params)
        .map_err(|e| AgentError::InvalidInput(format!("{} parameters: {}", tool, e)))
}

/// Registry of tools keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Invoke a tool by name
    pub async fn call(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        tracing::info!(tool = name, "Executing tool");
        let output = tool.execute(params).await;
        match &output {
            Ok(_) => tracing::debug!(tool = name, "Tool completed"),
            Err(e) => tracing::warn!(tool = name, error = %e, "Tool failed"),
        }
        output
    }
}
