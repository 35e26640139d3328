//! Built-in tools
//!
//! Tools that reach outside the process (search, HTTP, database, code
//! execution) delegate to a configured collaborator and fail with a clear
//! error when none is configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{parse_params, schema_of, Tool, ToolRegistry};
use crate::config::ExecutorConfig;
use crate::error::AgentError;

/// Registry with every built-in tool, configured from the executor section
///
/// Code execution and database queries stay fail-closed until the host
/// installs a sandbox or backend via `ExecuteCodeTool::with_sandbox` /
/// `DatabaseQueryTool::with_backend`.
pub fn default_tools(config: &ExecutorConfig) -> ToolRegistry {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()
        .unwrap_or_default();
    let root = config.workspace_root.clone();

    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool::new(client.clone(), config.search_endpoint.clone()));
    registry.register(ReadFileTool::new(root.clone()));
    registry.register(WriteFileTool::new(root));
    registry.register(ExecuteCodeTool::disabled());
    registry.register(HttpRequestTool::new(client));
    registry.register(TransformDataTool);
    registry.register(NotificationTool::new());
    registry.register(DatabaseQueryTool::unconfigured());
    registry
}

fn resolve_path(root: Option<&Path>, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    match root {
        Some(root) if candidate.is_relative() => root.join(candidate),
        _ => candidate,
    }
}

fn tool_failed(tool: &str, message: impl Into<String>) -> AgentError {
    AgentError::ToolFailed {
        tool: tool.to_string(),
        message: message.into(),
    }
}

// ============================================================================
// web_search
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchParams {
    /// Search query
    pub query: String,
    /// Maximum number of results
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Queries a JSON search endpoint (`GET {endpoint}?q=...&limit=...`)
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for a query"
    }

    fn parameters(&self) -> Value {
        schema_of::<WebSearchParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: WebSearchParams = parse_params(self.name(), params)?;
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| tool_failed(self.name(), "no search endpoint configured"))?;

        let limit = params.limit.unwrap_or(10).to_string();
        let response = self
            .client
            .get(endpoint)
            .query(&[("q", params.query.as_str()), ("limit", limit.as_str())])
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(tool_failed(self.name(), format!("search endpoint returned {}", status)).into());
        }

        let results: Value = response.json().await.context("search response was not JSON")?;
        Ok(json!({ "query": params.query, "results": results }))
    }
}

// ============================================================================
// read_file / write_file
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileParams {
    /// Path to read (relative paths resolve against the workspace root)
    pub path: String,
}

pub struct ReadFileTool {
    root: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file"
    }

    fn parameters(&self) -> Value {
        schema_of::<ReadFileParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ReadFileParams = parse_params(self.name(), params)?;
        let path = resolve_path(self.root.as_deref(), &params.path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes": content.len(),
            "content": content,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileParams {
    /// Path to write (parent directories are created)
    pub path: String,
    /// Content to write; non-string values are written as pretty JSON
    pub content: Value,
    /// Append instead of truncating
    #[serde(default)]
    pub append: bool,
}

pub struct WriteFileTool {
    root: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file"
    }

    fn parameters(&self) -> Value {
        schema_of::<WriteFileParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        use tokio::io::AsyncWriteExt;

        let params: WriteFileParams = parse_params(self.name(), params)?;
        let path = resolve_path(self.root.as_deref(), &params.path);
        let content = match params.content {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other)?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(params.append)
            .truncate(!params.append)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }
}

// ============================================================================
// execute_code
// ============================================================================

/// Isolated runtime for untrusted code
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn run(&self, language: &str, code: &str) -> Result<Value>;
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteCodeParams {
    /// Source language (e.g. "python", "javascript")
    #[serde(default = "default_language")]
    pub language: String,
    /// Code to run
    pub code: String,
}

fn default_language() -> String {
    "javascript".to_string()
}

/// Runs code inside a sandbox; refuses to run anything without one
pub struct ExecuteCodeTool {
    sandbox: Option<Arc<dyn CodeSandbox>>,
}

impl ExecuteCodeTool {
    pub fn disabled() -> Self {
        Self { sandbox: None }
    }

    pub fn with_sandbox(sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self {
            sandbox: Some(sandbox),
        }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute code in an isolated sandbox"
    }

    fn parameters(&self) -> Value {
        schema_of::<ExecuteCodeParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ExecuteCodeParams = parse_params(self.name(), params)?;
        let Some(sandbox) = &self.sandbox else {
            tracing::warn!(language = %params.language, "Refusing to execute code without a sandbox");
            return Err(AgentError::SandboxRequired.into());
        };
        sandbox.run(&params.language, &params.code).await
    }
}

// ============================================================================
// http_request
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HttpRequestParams {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON body (sent for non-GET requests)
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Perform an HTTP request and return status and body"
    }

    fn parameters(&self) -> Value {
        schema_of::<HttpRequestParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: HttpRequestParams = parse_params(self.name(), params)?;
        let method = reqwest::Method::from_bytes(params.method.to_uppercase().as_bytes())
            .map_err(|_| AgentError::InvalidInput(format!("unsupported method {}", params.method)))?;

        let mut request = self.client.request(method.clone(), &params.url);
        for (key, value) in &params.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &params.body {
            if method != reqwest::Method::GET {
                request = request.json(body);
            }
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, params.url))?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if status >= 400 {
            return Err(tool_failed(self.name(), format!("HTTP {}: {}", status, body)).into());
        }

        Ok(json!({ "status": status, "body": body }))
    }
}

// ============================================================================
// transform_data
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransformParams {
    /// Input data
    pub data: Value,
    /// One of: to_json, to_string, uppercase, lowercase, trim, keys, values, count, csv
    pub operation: String,
}

/// Converts data between shapes and formats
pub struct TransformDataTool;

impl TransformDataTool {
    fn apply(data: Value, operation: &str) -> Result<Value, AgentError> {
        let text = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let out = match operation {
            "to_json" | "parse" => match &data {
                Value::String(s) => serde_json::from_str(s)
                    .map_err(|e| AgentError::InvalidInput(format!("not valid JSON: {}", e)))?,
                other => other.clone(),
            },
            "to_string" | "stringify" => Value::String(text(&data)),
            "uppercase" => Value::String(text(&data).to_uppercase()),
            "lowercase" => Value::String(text(&data).to_lowercase()),
            "trim" => Value::String(text(&data).trim().to_string()),
            "keys" => match &data {
                Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
                _ => return Err(AgentError::InvalidInput("keys requires an object".into())),
            },
            "values" => match &data {
                Value::Object(map) => Value::Array(map.values().cloned().collect()),
                _ => return Err(AgentError::InvalidInput("values requires an object".into())),
            },
            "count" | "length" => match &data {
                Value::Array(items) => json!(items.len()),
                Value::Object(map) => json!(map.len()),
                Value::String(s) => json!(s.chars().count()),
                Value::Null => json!(0),
                _ => json!(1),
            },
            "csv" => Value::String(to_csv(&data)?),
            other => {
                return Err(AgentError::InvalidInput(format!(
                    "unknown transform operation: {}",
                    other
                )))
            }
        };
        Ok(out)
    }
}

fn to_csv(data: &Value) -> Result<String, AgentError> {
    let rows = data
        .as_array()
        .ok_or_else(|| AgentError::InvalidInput("csv requires an array of objects".into()))?;

    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        let obj = row
            .as_object()
            .ok_or_else(|| AgentError::InvalidInput("csv rows must be objects".into()))?;
        for key in obj.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let escape = |s: String| {
        if s.contains(',') || s.contains('"') || s.contains('\n') {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s
        }
    };

    let mut lines = vec![headers.join(",")];
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h) {
                Some(Value::String(s)) => escape(s.clone()),
                Some(Value::Null) | None => String::new(),
                Some(other) => escape(other.to_string()),
            })
            .collect();
        lines.push(cells.join(","));
    }
    Ok(lines.join("\n"))
}

#[async_trait]
impl Tool for TransformDataTool {
    fn name(&self) -> &str {
        "transform_data"
    }

    fn description(&self) -> &str {
        "Transform or convert data between formats"
    }

    fn parameters(&self) -> Value {
        schema_of::<TransformParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: TransformParams = parse_params(self.name(), params)?;
        Ok(Self::apply(params.data, &params.operation)?)
    }
}

// ============================================================================
// send_notification
// ============================================================================

/// A notification recorded by the notification tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub recipient: Option<String>,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NotificationParams {
    pub message: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

fn default_channel() -> String {
    "log".to_string()
}

/// Logs notifications and keeps them in an in-memory outbox
#[derive(Clone, Default)]
pub struct NotificationTool {
    outbox: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far
    pub async fn sent(&self) -> Vec<Notification> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl Tool for NotificationTool {
    fn name(&self) -> &str {
        "send_notification"
    }

    fn description(&self) -> &str {
        "Send a notification or alert"
    }

    fn parameters(&self) -> Value {
        schema_of::<NotificationParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: NotificationParams = parse_params(self.name(), params)?;
        tracing::info!(
            channel = %params.channel,
            recipient = ?params.recipient,
            "Notification: {}",
            params.message
        );

        let notification = Notification {
            channel: params.channel,
            recipient: params.recipient,
            message: params.message,
            sent_at: Utc::now(),
        };
        let value = serde_json::to_value(&notification)?;
        self.outbox.lock().await.push(notification);
        Ok(json!({ "sent": true, "notification": value }))
    }
}

// ============================================================================
// database_query
// ============================================================================

/// Database collaborator behind `database_query`
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, query: &str, params: &[Value]) -> Result<Value>;
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DatabaseQueryParams {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

pub struct DatabaseQueryTool {
    backend: Option<Arc<dyn QueryBackend>>,
}

impl DatabaseQueryTool {
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn name(&self) -> &str {
        "database_query"
    }

    fn description(&self) -> &str {
        "Run a parameterized database query"
    }

    fn parameters(&self) -> Value {
        schema_of::<DatabaseQueryParams>()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: DatabaseQueryParams = parse_params(self.name(), params)?;
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| tool_failed(self.name(), "no database backend configured"))?;
        let rows = backend.query(&params.query, &params.params).await?;
        Ok(json!({ "rows": rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tools_registered() {
        let registry = default_tools(&ExecutorConfig::default());
        for name in [
            "web_search",
            "read_file",
            "write_file",
            "execute_code",
            "http_request",
            "transform_data",
            "send_notification",
            "database_query",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_tools(&ExecutorConfig {
            workspace_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        let written = registry
            .call("write_file", json!({"path": "out/notes.txt", "content": "hello"}))
            .await
            .unwrap();
        assert_eq!(written["bytes_written"], 5);

        registry
            .call("write_file", json!({"path": "out/notes.txt", "content": " world", "append": true}))
            .await
            .unwrap();

        let read = registry
            .call("read_file", json!({"path": "out/notes.txt"}))
            .await
            .unwrap();
        assert_eq!(read["content"], "hello world");
    }

    #[tokio::test]
    async fn test_execute_code_fails_closed() {
        let tool = ExecuteCodeTool::disabled();
        let err = tool
            .execute(json!({"language": "python", "code": "print(1)"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::SandboxRequired)
        ));
    }

    struct EchoSandbox;

    #[async_trait]
    impl CodeSandbox for EchoSandbox {
        async fn run(&self, language: &str, code: &str) -> Result<Value> {
            Ok(json!({"language": language, "stdout": code}))
        }
    }

    #[tokio::test]
    async fn test_execute_code_with_sandbox() {
        let tool = ExecuteCodeTool::with_sandbox(Arc::new(EchoSandbox));
        let out = tool.execute(json!({"code": "1+1"})).await.unwrap();
        assert_eq!(out["stdout"], "1+1");
        assert_eq!(out["language"], "javascript");
    }

    #[test]
    fn test_transform_operations() {
        assert_eq!(
            TransformDataTool::apply(json!("{\"a\":1}"), "to_json").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(TransformDataTool::apply(json!("abc"), "uppercase").unwrap(), json!("ABC"));
        assert_eq!(TransformDataTool::apply(json!([1, 2, 3]), "count").unwrap(), json!(3));
        assert_eq!(
            TransformDataTool::apply(json!([{"a": 1, "b": "x,y"}, {"a": 2}]), "csv").unwrap(),
            json!("a,b\n1,\"x,y\"\n2,")
        );
        assert!(TransformDataTool::apply(json!(1), "explode").is_err());
    }

    #[tokio::test]
    async fn test_notification_outbox() {
        let tool = NotificationTool::new();
        tool.execute(json!({"message": "deploy finished", "recipient": "ops"}))
            .await
            .unwrap();

        let sent = tool.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "log");
        assert_eq!(sent[0].recipient.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_unconfigured_collaborators_fail() {
        let registry = default_tools(&ExecutorConfig::default());
        tokio_test::assert_err!(registry.call("database_query", json!({"query": "select 1"})).await);
        tokio_test::assert_err!(registry.call("web_search", json!({"query": "rust"})).await);
    }
}
