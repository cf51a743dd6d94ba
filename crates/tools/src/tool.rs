//! Model-invocable tools.
//!
//! A tool knows how to run itself against a task workspace and how to render
//! its request and execution in the client stream. The registry looks tools
//! up by the name the model uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use cm_domain::config::BuildConfig;

use crate::file_ops::{persist_file, PersistStatus};
use crate::validate::{CodeValidationTool, ProjectStructureTool};

/// Where a tool runs.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
}

impl ToolContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by.
    fn name(&self) -> &str;

    /// Human-facing label used in stream markup.
    fn display_name(&self) -> &str;

    /// Markup for the first sighting of a request for this tool.
    fn request_marker(&self) -> String {
        format!("\n\n[selected tool] {}\n\n", self.display_name())
    }

    /// Markup for a finished call. `args` are already decoded.
    fn render_executed(&self, args: &Value, preview_chars: usize) -> String;

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String, String>;
}

/// Tool-call arguments arrive either as a JSON object or as a string holding
/// one. Anything unparsable decodes to `Value::Null`.
pub fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Cut `content` to at most `max_chars` characters, noting how much was cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_owned();
    }
    let mut out: String = content.chars().take(max_chars).collect();
    out.push_str(&format!("\n... (truncated, {} more characters)", total - max_chars));
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// writeFile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteFileArgs {
    relative_file_path: String,
    #[serde(default)]
    content: String,
}

pub struct WriteFileTool;

impl WriteFileTool {
    pub const NAME: &'static str = "writeFile";

    fn parse(args: &Value) -> Result<WriteFileArgs, String> {
        serde_json::from_value(decode_arguments(args))
            .map_err(|e| format!("invalid writeFile arguments: {e}"))
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "write file"
    }

    fn render_executed(&self, args: &Value, preview_chars: usize) -> String {
        let Ok(args) = Self::parse(args) else {
            return format!("\n\n[tool call] {}\n\n", self.display_name());
        };
        let ext = Path::new(&args.relative_file_path)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "\n\n[tool call] {} {}\n```{ext}\n{}\n```\n\n",
            self.display_name(),
            args.relative_file_path,
            preview(&args.content, preview_chars)
        )
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String, String> {
        let args = Self::parse(args)?;
        let persisted =
            persist_file(&ctx.workspace_root, &args.relative_file_path, &args.content).await?;
        Ok(match persisted.status {
            PersistStatus::Written => format!("file written: {}", persisted.path),
            PersistStatus::Unchanged => format!("file unchanged: {}", persisted.path),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// exit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lets the model signal it is done calling tools.
pub struct ExitTool;

impl ExitTool {
    pub const NAME: &'static str = "exit";
}

#[async_trait]
impl Tool for ExitTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "exit tool calls"
    }

    fn render_executed(&self, _args: &Value, _preview_chars: usize) -> String {
        "\n\n[execution finished]\n\n".to_owned()
    }

    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<String, String> {
        Ok("no further tool calls are needed; reply with the final answer".to_owned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool with the default build config.
    pub fn with_builtins() -> Self {
        Self::for_build(&BuildConfig::default())
    }

    /// `writeFile`, `exit` and the two validation tools; `validateCode`
    /// runs lint through `build.program`.
    pub fn for_build(build: &BuildConfig) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(WriteFileTool));
        reg.register(Arc::new(ExitTool));
        reg.register(Arc::new(ProjectStructureTool));
        reg.register(Arc::new(CodeValidationTool::new(build)));
        reg
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn render_request(&self, name: &str) -> String {
        match self.tools.get(name) {
            Some(tool) => tool.request_marker(),
            None => format!("\n\n[selected tool] {name}\n\n"),
        }
    }

    pub fn render_executed(&self, name: &str, args: &Value, preview_chars: usize) -> String {
        match self.tools.get(name) {
            Some(tool) => tool.render_executed(args, preview_chars),
            None => format!("\n\n[tool call] {name}\n\n"),
        }
    }

    pub async fn execute(
        &self,
        name: &str,
        ctx: &ToolContext,
        args: &Value,
    ) -> Result<String, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool '{name}'"))?;
        tool.execute(ctx, args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_accept_string_or_object() {
        let obj = json!({"relativeFilePath": "a.js", "content": "x"});
        let as_string = Value::String(obj.to_string());
        assert_eq!(decode_arguments(&obj), obj);
        assert_eq!(decode_arguments(&as_string), obj);
        assert_eq!(decode_arguments(&json!("{broken")), Value::Null);
    }

    #[test]
    fn preview_truncates_with_notice() {
        assert_eq!(preview("short", 10), "short");
        let long = "é".repeat(600);
        let p = preview(&long, 500);
        assert!(p.starts_with(&"é".repeat(500)));
        assert!(p.ends_with("(truncated, 100 more characters)"));
    }

    #[test]
    fn write_file_renders_fenced_preview() {
        let reg = ToolRegistry::with_builtins();
        let args = json!({"relativeFilePath": "src/App.vue", "content": "<template/>"});
        let out = reg.render_executed("writeFile", &args, 500);
        assert_eq!(
            out,
            "\n\n[tool call] write file src/App.vue\n```vue\n<template/>\n```\n\n"
        );
    }

    #[test]
    fn request_markers() {
        let reg = ToolRegistry::with_builtins();
        assert_eq!(reg.render_request("writeFile"), "\n\n[selected tool] write file\n\n");
        assert_eq!(reg.render_request("mystery"), "\n\n[selected tool] mystery\n\n");
        assert_eq!(
            reg.render_executed("exit", &Value::Null, 500),
            "\n\n[execution finished]\n\n"
        );
        assert_eq!(
            reg.render_executed("mystery", &Value::Null, 500),
            "\n\n[tool call] mystery\n\n"
        );
    }

    #[tokio::test]
    async fn write_file_executes_through_persister() {
        let ws = tempfile::tempdir().unwrap();
        let reg = ToolRegistry::with_builtins();
        let ctx = ToolContext::new(ws.path());
        let args = json!({"relativeFilePath": "src/main.js", "content": "let a = 1;"});

        let first = reg.execute("writeFile", &ctx, &args).await.unwrap();
        assert_eq!(first, "file written: src/main.js");
        let second = reg.execute("writeFile", &ctx, &args).await.unwrap();
        assert_eq!(second, "file unchanged: src/main.js");
        assert_eq!(
            std::fs::read_to_string(ws.path().join("src/main.js")).unwrap(),
            "let a = 1;"
        );
    }

    #[test]
    fn builtins_include_validation_tools() {
        let reg = ToolRegistry::with_builtins();
        assert_eq!(
            reg.names(),
            vec!["exit", "validateCode", "validateVueProjectStructure", "writeFile"]
        );
        assert_eq!(
            reg.render_request("validateCode"),
            "\n\n[selected tool] validate code\n\n"
        );
        assert_eq!(
            reg.render_executed("validateVueProjectStructure", &Value::Null, 500),
            "\n\n[tool call] validate project structure\n\n"
        );
    }

    #[tokio::test]
    async fn bad_arguments_and_unknown_tools_are_errors() {
        let ws = tempfile::tempdir().unwrap();
        let reg = ToolRegistry::with_builtins();
        let ctx = ToolContext::new(ws.path());
        assert!(reg.execute("writeFile", &ctx, &json!({"content": "x"})).await.is_err());
        assert!(reg.execute("deleteFile", &ctx, &json!({})).await.is_err());
    }
}
