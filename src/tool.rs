//! Tools callable from tool nodes, and the registry that resolves them.
//!
//! A tool receives the node's assembled context as its only argument and
//! returns a JSON value. Tool authors report failure with `anyhow`; the node
//! attributes it to itself.

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A callable invoked by a tool node.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Run the tool against the node's context.
    async fn call(&self, context: &Map<String, Value>) -> anyhow::Result<Value>;
}

/// A [`Tool`] backed by a synchronous closure.
///
/// # Example
///
/// ```
/// use agent_pipeline::tool::FnTool;
/// use serde_json::json;
///
/// let word_count = FnTool(|ctx: &serde_json::Map<String, serde_json::Value>| {
///     let text = ctx.get("draft").and_then(|v| v.as_str()).unwrap_or("");
///     Ok(json!(text.split_whitespace().count()))
/// });
/// ```
pub struct FnTool<F>(pub F)
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync;

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, context: &Map<String, Value>) -> anyhow::Result<Value> {
        (self.0)(context)
    }
}

/// Writes the context it receives to a timestamped JSON file.
///
/// The file is `<dir>/log_<YYYYmmdd_HHMMSS>.json` containing
/// `{"timestamp": ..., "data": <context>}`. The tool never fails: I/O
/// problems are reported in the returned value as
/// `{"status": "error", "error": ...}`.
#[derive(Debug, Clone)]
pub struct FileLogger {
    dir: PathBuf,
}

impl FileLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write(&self, context: &Map<String, Value>) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = self.dir.join(format!("log_{}.json", timestamp));
        let record = json!({
            "timestamp": timestamp,
            "data": context,
        });
        let body = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

impl Default for FileLogger {
    fn default() -> Self {
        Self::new("logs")
    }
}

#[async_trait]
impl Tool for FileLogger {
    async fn call(&self, context: &Map<String, Value>) -> anyhow::Result<Value> {
        match self.write(context).await {
            Ok(path) => {
                tracing::info!(log_file = %path.display(), "logged context");
                Ok(json!({
                    "status": "success",
                    "log_file": path.display().to_string(),
                }))
            }
            Err(e) => {
                tracing::error!(error = %e, dir = %self.dir.display(), "error logging context");
                Ok(json!({
                    "status": "error",
                    "error": e.to_string(),
                }))
            }
        }
    }
}

/// Resolves tool references to tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in tools: `file_logger` writing to `./logs`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("file_logger", FileLogger::default());
        registry
    }

    /// Register `tool` under `reference`, replacing any previous entry.
    pub fn register(&mut self, reference: impl Into<String>, tool: impl Tool + 'static) -> &mut Self {
        self.tools.insert(reference.into(), Arc::new(tool));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, reference: impl Into<String>, tool: impl Tool + 'static) -> Self {
        self.register(reference, tool);
        self
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.tools.contains_key(reference)
    }

    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(reference)
            .cloned()
            .ok_or_else(|| PipelineError::Tool {
                reference: reference.to_string(),
                message: "no tool is registered under this name".to_string(),
            })
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Map<String, Value> {
        json!({"user_input": "hi", "gen": "joke"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn fn_tool_sees_context() {
        let tool = FnTool(|ctx: &Map<String, Value>| Ok(json!(ctx.len())));
        assert_eq!(tool.call(&context()).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn file_logger_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileLogger::new(dir.path().join("nested"));

        let out = logger.call(&context()).await.unwrap();
        assert_eq!(out["status"], "success");

        let path = PathBuf::from(out["log_file"].as_str().unwrap());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("log_") && name.ends_with(".json"));

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["data"], Value::Object(context()));
        assert_eq!(written["timestamp"].as_str().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn file_logger_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let out = FileLogger::new(blocker.join("logs"))
            .call(&context())
            .await
            .unwrap();
        assert_eq!(out["status"], "error");
        assert!(out["error"].is_string());
    }

    #[test]
    fn registry_resolves_builtins_and_rejects_unknown() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.resolve("file_logger").is_ok());
        assert!(matches!(
            registry.resolve("missing"),
            Err(PipelineError::Tool { reference, .. }) if reference == "missing"
        ));
    }

    #[test]
    fn registered_closure_is_callable() {
        let registry = ToolRegistry::new().with(
            "keys",
            FnTool(|ctx: &Map<String, Value>| Ok(json!(ctx.keys().collect::<Vec<_>>()))),
        );
        let tool = registry.resolve("keys").unwrap();
        let out = tokio_test::block_on(tool.call(&context())).unwrap();
        assert_eq!(out, json!(["user_input", "gen"]));
    }
}
