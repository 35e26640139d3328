//! Executor agent - tool orchestration
//!
//! For a generic task the executor:
//! 1. Derives an ordered step plan (explicit `input.steps`, else keyword
//!    matching against the description)
//! 2. Resolves `$name` / `{{name}}` placeholders against the variables
//!    accumulated so far
//! 3. Runs each step's tool or built-in action and stores the result under
//!    the step id
//! 4. Retries a failed tool step once before failing the task
//!
//! Direct operations (`tool`, `chain`, `parallel`, `conditional`) are
//! selected by the task type.

use std::sync::LazyLock;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{failed_result, Agent};
use crate::config::ExecutorConfig;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::task::{
    estimate_tokens, AgentProfile, AgentResult, AgentRole, AgentTask, Artifact, ArtifactKind,
    Capability, ResultMetrics,
};
use crate::tools::{default_tools, Tool, ToolRegistry};

pub mod resolve;

use resolve::{evaluate_condition, interpolate, resolve, truthy, Variables};

// ============================================================================
// Step Plan
// ============================================================================

/// Non-tool actions a step can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinAction {
    /// Store `params.value` under `params.name`
    Assign,
    /// Pick `params.then` or `params.else` by `params.condition`
    Condition,
    /// Collect `params.items` (optionally `sum` / `concat` / `count`)
    Aggregate,
    /// Render `params.template`
    Format,
    /// Generic pass-through used when nothing else matched
    Process,
}

/// One planned unit of executor work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<BuiltinAction>,
    #[serde(default)]
    pub params: Value,
}

impl ExecutionStep {
    pub fn tool(id: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            tool: Some(tool.into()),
            action: None,
            params,
        }
    }

    pub fn action(id: impl Into<String>, action: BuiltinAction, params: Value) -> Self {
        Self {
            id: id.into(),
            tool: None,
            action: Some(action),
            params,
        }
    }
}

/// Whole-word description keywords -> tool, in plan order
static INTENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bsearch(es)?\b", "web_search"),
        (r"\b(read|reads|load|loads)\b", "read_file"),
        (r"\b(write|writes|save|saves)\b", "write_file"),
        (r"\b(execute|executes|run|runs)\b", "execute_code"),
        (r"\b(api|apis|fetch|fetches)\b", "http_request"),
        (r"\b(transform|transforms|convert|converts)\b", "transform_data"),
        (r"\b(notify|notifies|send|sends|alert|alerts)\b", "send_notification"),
    ]
    .into_iter()
    .map(|(pattern, tool)| (Regex::new(pattern).unwrap(), tool))
    .collect()
});

/// Build the step plan for a generic task
pub fn plan_steps(task: &AgentTask) -> Result<Vec<ExecutionStep>, AgentError> {
    if let Some(steps) = task.input.get("steps") {
        return serde_json::from_value(steps.clone())
            .map_err(|e| AgentError::InvalidInput(format!("invalid steps: {}", e)));
    }

    let mut text = task.description.to_lowercase();
    if let Value::String(s) = &task.input {
        text.push(' ');
        text.push_str(&s.to_lowercase());
    }

    let has = |key: &str| task.input.get(key).is_some();
    let mut steps: Vec<ExecutionStep> = Vec::new();

    for (pattern, tool) in INTENTS.iter() {
        if !pattern.is_match(&text) {
            continue;
        }
        let previous_or = |fallback: Value| {
            if steps.is_empty() {
                fallback
            } else {
                json!("$previous")
            }
        };
        let params = match *tool {
            "web_search" => json!({
                "query": if has("query") { json!("$query") } else { json!("{{description}}") }
            }),
            "read_file" => json!({ "path": "$path" }),
            "write_file" => json!({
                "path": if has("output_path") { "$output_path" } else { "$path" },
                "content": if has("content") { json!("$content") } else { previous_or(json!("{{description}}")) },
            }),
            "execute_code" => json!({
                "code": if has("code") { json!("$code") } else { json!("{{description}}") },
                "language": task.input_str("language").unwrap_or("javascript"),
            }),
            "http_request" => json!({
                "url": "$url",
                "method": task.input_str("method").unwrap_or("GET"),
            }),
            "transform_data" => json!({
                "data": if has("data") { json!("$data") } else { previous_or(json!("$input")) },
                "operation": task.input_str("operation").unwrap_or("to_string"),
            }),
            _ => json!({
                "message": if has("message") { json!("$message") } else { json!("{{description}}") },
                "recipient": task.input.get("recipient").cloned().unwrap_or(Value::Null),
            }),
        };
        let id = format!("{}_{}", tool, steps.len() + 1);
        steps.push(ExecutionStep::tool(id, *tool, params));
    }

    if steps.is_empty() {
        steps.push(ExecutionStep::action(
            "process_1",
            BuiltinAction::Process,
            json!({ "description": "{{description}}", "input": "$input" }),
        ));
    }
    Ok(steps)
}

// ============================================================================
// Per-task run state
// ============================================================================

/// Counters and variables for one task execution
struct Run<'a> {
    tools: &'a ToolRegistry,
    context: &'a AgentContext,
    max_iterations: u32,
    max_tool_calls: u32,
    iterations: u32,
    tool_calls: u32,
    vars: Variables,
    artifacts: Vec<Artifact>,
}

impl<'a> Run<'a> {
    fn new(tools: &'a ToolRegistry, context: &'a AgentContext, config: &ExecutorConfig, task: &AgentTask) -> Self {
        let max_iterations = context
            .constraints
            .as_ref()
            .and_then(|c| c.max_iterations)
            .unwrap_or(config.max_iterations);

        let mut vars = Variables::new();
        if let Value::Object(map) = &task.input {
            for (key, value) in map {
                vars.insert(key.clone(), value.clone());
            }
        }
        vars.insert("input".into(), task.input.clone());
        vars.insert("description".into(), Value::String(task.description.clone()));
        vars.insert("task_id".into(), Value::String(task.id.clone()));

        Self {
            tools,
            context,
            max_iterations,
            max_tool_calls: config.max_tool_calls,
            iterations: 0,
            tool_calls: 0,
            vars,
            artifacts: Vec::new(),
        }
    }

    fn next_iteration(&mut self) -> Result<(), AgentError> {
        if self.iterations >= self.max_iterations {
            return Err(AgentError::MaxIterationsExceeded(self.max_iterations));
        }
        self.iterations += 1;
        Ok(())
    }

    fn reserve_tool_calls(&mut self, tool: &str, count: u32) -> Result<(), AgentError> {
        if !self.context.allows_tool(tool) {
            return Err(AgentError::ToolNotAllowed {
                tool: tool.to_string(),
            });
        }
        if !self.tools.contains(tool) {
            return Err(AgentError::ToolNotFound(tool.to_string()));
        }
        if self.tool_calls + count > self.max_tool_calls {
            return Err(AgentError::MaxToolCallsExceeded(self.max_tool_calls));
        }
        self.tool_calls += count;
        Ok(())
    }

    async fn call_tool(&mut self, tool: &str, params: Value) -> Result<Value> {
        self.reserve_tool_calls(tool, 1)?;
        let output = self.tools.call(tool, params).await?;
        if tool == "write_file" {
            let name = output["path"].as_str().unwrap_or("output").to_string();
            self.artifacts
                .push(Artifact::new(artifact_kind(&name), name, output.clone()));
        }
        Ok(output)
    }

    /// Call a tool, retrying once with the same parameters on failure
    async fn call_with_retry(&mut self, tool: &str, params: Value) -> Result<Value> {
        match self.call_tool(tool, params.clone()).await {
            Ok(output) => Ok(output),
            Err(first) => {
                if is_terminal(&first) {
                    return Err(first);
                }
                tracing::warn!(tool, error = %first, "Step failed, retrying once");
                self.call_tool(tool, params)
                    .await
                    .with_context(|| format!("{} failed after retry (first error: {})", tool, first))
            }
        }
    }

    fn store(&mut self, id: &str, output: &Value) {
        self.vars.insert(id.to_string(), output.clone());
        self.vars.insert("previous".into(), output.clone());
    }

    async fn run_steps(&mut self, steps: &[ExecutionStep]) -> Result<Value> {
        let mut outputs = Vec::with_capacity(steps.len());
        let mut last = Value::Null;

        for step in steps {
            self.next_iteration()?;
            let params = resolve(&step.params, &self.vars);
            tracing::debug!(step = %step.id, "Running executor step");

            let output = match (&step.tool, step.action) {
                (Some(tool), _) => self
                    .call_with_retry(tool, params)
                    .await
                    .with_context(|| format!("step '{}' failed", step.id))?,
                (None, Some(action)) => self.run_action(action, params)?,
                (None, None) => {
                    return Err(AgentError::InvalidInput(format!(
                        "step '{}' has neither a tool nor an action",
                        step.id
                    ))
                    .into())
                }
            };

            self.store(&step.id, &output);
            outputs.push(json!({ "id": step.id, "output": output }));
            last = output;
        }

        Ok(json!({ "steps": outputs, "result": last }))
    }

    fn run_action(&mut self, action: BuiltinAction, params: Value) -> Result<Value> {
        let out = match action {
            BuiltinAction::Assign => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AgentError::InvalidInput("assign requires a name".into()))?
                    .to_string();
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                self.vars.insert(name, value.clone());
                value
            }
            BuiltinAction::Condition => {
                let condition = params.get("condition").cloned().unwrap_or(Value::Null);
                let holds = evaluate_condition(&condition, &self.vars);
                let branch = if holds { "then" } else { "else" };
                json!({
                    "condition": holds,
                    "value": params.get(branch).cloned().unwrap_or(Value::Null),
                })
            }
            BuiltinAction::Aggregate => aggregate(&params)?,
            BuiltinAction::Format => {
                let template = params.get("template").and_then(Value::as_str).unwrap_or_default();
                Value::String(interpolate(template, &self.vars))
            }
            BuiltinAction::Process => json!({
                "processed": true,
                "description": params.get("description").cloned().unwrap_or(Value::Null),
                "input": params.get("input").cloned().unwrap_or(Value::Null),
            }),
        };
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Direct operations
    // ------------------------------------------------------------------------

    async fn run_single(&mut self, input: &Value) -> Result<Value> {
        self.next_iteration()?;
        let call: ToolCall = parse_call(input)?;
        let params = resolve(&call.params, &self.vars);
        self.call_tool(&call.tool, params).await
    }

    async fn run_chain(&mut self, input: &Value) -> Result<Value> {
        let calls: Vec<ToolCall> = parse_list(input, "steps")?;
        let mut results = Vec::with_capacity(calls.len());
        let mut previous = Value::Null;

        for (index, call) in calls.iter().enumerate() {
            self.next_iteration()?;
            self.vars.insert("previous".into(), previous.clone());
            let params = resolve(&call.params, &self.vars);
            let output = self
                .call_tool(&call.tool, params)
                .await
                .with_context(|| format!("chain step {} ({}) failed", index, call.tool))?;
            results.push(output.clone());
            previous = output;
        }

        Ok(json!({ "results": results, "output": previous }))
    }

    async fn run_parallel(&mut self, input: &Value) -> Result<(Value, bool)> {
        let calls: Vec<ToolCall> = parse_list(input, "calls")?;
        self.next_iteration()?;
        for call in &calls {
            self.reserve_tool_calls(&call.tool, 1)?;
        }

        let futures = calls.iter().map(|call| {
            let params = resolve(&call.params, &self.vars);
            self.tools.call(&call.tool, params)
        });
        let outcomes = futures_util::future::join_all(futures).await;

        let mut results = Vec::with_capacity(calls.len());
        let mut errors = Vec::new();
        for (index, (call, outcome)) in calls.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(output) => results.push(output),
                Err(e) => {
                    results.push(Value::Null);
                    errors.push(json!({ "index": index, "tool": call.tool, "error": format!("{:#}", e) }));
                }
            }
        }

        let any_succeeded = calls.is_empty() || errors.len() < calls.len();
        Ok((json!({ "results": results, "errors": errors }), any_succeeded))
    }

    async fn run_conditional(&mut self, input: &Value) -> Result<Value> {
        self.next_iteration()?;
        let condition = input.get("condition").cloned().unwrap_or(Value::Null);
        let holds = evaluate_condition(&condition, &self.vars);
        let branch = if holds { "then" } else { "else" };

        let output = match input.get(branch) {
            Some(spec) if spec.get("tool").is_some() => {
                let call: ToolCall = parse_call(spec)?;
                let params = resolve(&call.params, &self.vars);
                self.call_tool(&call.tool, params).await?
            }
            Some(value) => resolve(value, &self.vars),
            None => Value::Null,
        };

        Ok(json!({ "condition": holds, "branch": branch, "output": output }))
    }
}

/// Limit and sandbox failures are not worth retrying
fn is_terminal(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<AgentError>(),
        Some(
            AgentError::MaxToolCallsExceeded(_)
                | AgentError::ToolNotFound(_)
                | AgentError::ToolNotAllowed { .. }
                | AgentError::SandboxRequired
        )
    )
}

fn artifact_kind(path: &str) -> ArtifactKind {
    let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "sh" => ArtifactKind::Code,
        "md" | "txt" | "html" | "pdf" => ArtifactKind::Document,
        "json" | "csv" | "toml" | "yaml" | "yml" => ArtifactKind::Data,
        "png" | "jpg" | "jpeg" | "gif" | "svg" => ArtifactKind::Image,
        _ => ArtifactKind::Other,
    }
}

fn aggregate(params: &Value) -> Result<Value> {
    let items = match params.get("items") {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => return Ok(params.clone()),
    };

    let out = match params.get("operation").and_then(Value::as_str).unwrap_or("list") {
        "sum" => json!(items.iter().filter_map(Value::as_f64).sum::<f64>()),
        "count" => json!(items.iter().filter(|v| truthy(v)).count()),
        "concat" => {
            if items.iter().all(Value::is_array) {
                Value::Array(
                    items
                        .iter()
                        .filter_map(Value::as_array)
                        .flatten()
                        .cloned()
                        .collect(),
                )
            } else {
                Value::String(
                    items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect::<Vec<_>>()
                        .join(""),
                )
            }
        }
        "list" => Value::Array(items),
        other => {
            return Err(AgentError::InvalidInput(format!("unknown aggregate operation: {}", other)).into())
        }
    };
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    params: Value,
}

fn parse_call(value: &Value) -> Result<ToolCall, AgentError> {
    serde_json::from_value(value.clone())
        .map_err(|e| AgentError::InvalidInput(format!("invalid tool call: {}", e)))
}

fn parse_list(input: &Value, key: &str) -> Result<Vec<ToolCall>, AgentError> {
    let list = input
        .get(key)
        .cloned()
        .ok_or_else(|| AgentError::InvalidInput(format!("input.{} is required", key)))?;
    serde_json::from_value(list).map_err(|e| AgentError::InvalidInput(format!("invalid {}: {}", key, e)))
}

// ============================================================================
// Executor Agent
// ============================================================================

/// Reference agent that runs tasks against its tool registry
pub struct ExecutorAgent {
    profile: AgentProfile,
    context: AgentContext,
    tools: ToolRegistry,
    config: ExecutorConfig,
}

impl ExecutorAgent {
    /// Create an executor with the built-in tools
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: ExecutorConfig) -> Self {
        let tools = default_tools(&config);
        Self::with_tools(id, name, config, tools)
    }

    /// Create an executor with a caller-built tool registry
    pub fn with_tools(
        id: impl Into<String>,
        name: impl Into<String>,
        config: ExecutorConfig,
        tools: ToolRegistry,
    ) -> Self {
        let profile = AgentProfile::new(id, name, AgentRole::Executor)
            .with_capability(Capability::new("execute", "Plan and run tool steps for a task"))
            .with_capability(Capability::new("tool", "Invoke a single tool"))
            .with_capability(Capability::new("chain", "Run tools sequentially, piping $previous"))
            .with_capability(Capability::new("parallel", "Fan out tool calls concurrently"))
            .with_capability(Capability::new("conditional", "Branch on a condition"));

        let mut context = AgentContext::new();
        context.tools = tools.names().into_iter().collect();

        Self {
            profile,
            context,
            tools,
            config,
        }
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        let tools = self.tools.names();
        self.context = context;
        self.context.tools.extend(tools);
        self
    }

    /// Add or replace a tool
    pub fn register_tool(&mut self, tool: impl Tool + 'static) {
        self.context.tools.insert(tool.name().to_string());
        self.tools.register(tool);
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
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
        let mut run = Run::new(&self.tools, &self.context, &self.config, task);

        let outcome: Result<(Value, bool)> = match task.task_type.as_str() {
            "tool" => run.run_single(&task.input).await.map(|v| (v, true)),
            "chain" => run.run_chain(&task.input).await.map(|v| (v, true)),
            "parallel" => run.run_parallel(&task.input).await,
            "conditional" => run.run_conditional(&task.input).await.map(|v| (v, true)),
            _ => match plan_steps(task) {
                Ok(steps) => run.run_steps(&steps).await.map(|v| (v, true)),
                Err(e) => Err(e.into()),
            },
        };

        let metrics = |output: &Value, run: &Run<'_>| ResultMetrics {
            duration_ms: started.elapsed().as_millis() as u64,
            tokens_used: estimate_tokens(&[&task.input, output]),
            iterations: run.iterations,
            tool_calls: run.tool_calls,
        };

        let result = match outcome {
            Ok((output, success)) => {
                let mut result = if success {
                    AgentResult::success(&task.id, &self.profile.id, output.clone())
                } else {
                    AgentResult::failure(
                        &task.id,
                        &self.profile.id,
                        crate::task::ErrorKind::ToolFailed,
                        "every parallel call failed",
                    )
                    .with_output(output.clone())
                };
                result.metrics = metrics(&output, &run);
                result.artifacts = std::mem::take(&mut run.artifacts);
                result
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %format!("{:#}", e), "Executor task failed");
                let mut result = failed_result(task, &self.profile.id, &e, started);
                result.metrics = metrics(&Value::Null, &run);
                result
            }
        };
        drop(run);

        self.context.remember("last_task", json!(task.id));
        self.context.remember("last_output", result.output.clone());
        Ok(result)
    }
}
