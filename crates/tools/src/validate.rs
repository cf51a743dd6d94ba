//! Project validation tools for tool-protocol runs.
//!
//! - `validateVueProjectStructure`: static checks on the scaffold files the
//!   model must write first (`package.json`, `vite.config.js`, `index.html`).
//! - `validateCode`: runs ESLint through the configured package manager and
//!   reports error-level findings.
//!
//! Both always answer the model with a report; only I/O trouble is an `Err`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use cm_domain::config::BuildConfig;
use serde_json::{json, Map, Value};

use crate::process::run_captured;
use crate::tool::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structure validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REQUIRED_FILES: [&str; 3] = ["package.json", "vite.config.js", "index.html"];
const FORBIDDEN_DIRS: [&str; 2] = ["styles", "scripts"];

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn report(&self) -> String {
        let mut out = String::new();
        if self.errors.is_empty() {
            out.push_str("project structure OK: Vue 3 + Vite scaffold is complete\n");
        } else {
            out.push_str("project structure INVALID:\n");
            for e in &self.errors {
                out.push_str(&format!("- error: {e}\n"));
            }
        }
        for w in &self.warnings {
            out.push_str(&format!("- warning: {w}\n"));
        }
        if self.errors.is_empty() {
            out.push_str("continue with src/main.js, src/App.vue and the remaining sources");
        } else {
            out.push_str("fix the errors above and call this tool again before writing other files");
        }
        out
    }
}

fn check_package_json(raw: &str, f: &mut Findings) {
    let pkg: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            f.error(format!("package.json is not valid JSON: {e}"));
            return;
        }
    };

    let Some(deps) = pkg.get("dependencies").and_then(Value::as_object) else {
        f.error("package.json has no dependencies section");
        return;
    };
    if !deps.contains_key("vue") {
        f.error("package.json is missing the \"vue\" dependency");
    }

    let Some(dev) = pkg.get("devDependencies").and_then(Value::as_object) else {
        f.error("package.json has no devDependencies section");
        return;
    };
    for required in ["@vitejs/plugin-vue", "vite"] {
        if !dev.contains_key(required) {
            f.error(format!("package.json is missing the \"{required}\" dev dependency"));
        }
    }

    match pkg.get("scripts").and_then(Value::as_object) {
        None => f.warn("package.json has no scripts; add \"dev\" and \"build\""),
        Some(scripts) => {
            for (name, cmd) in [("dev", "vite"), ("build", "vite build")] {
                if !scripts.contains_key(name) {
                    f.warn(format!("package.json has no \"{name}\" script (\"{cmd}\")"));
                }
            }
        }
    }
}

fn check_vite_config(src: &str, f: &mut Findings) {
    if !src.contains("@vitejs/plugin-vue") {
        f.error("vite.config.js does not import @vitejs/plugin-vue");
    }
    if !src.contains("vue()") {
        f.error("vite.config.js does not register vue() in plugins");
    }
    if !src.contains("base:") && !src.contains("base :") {
        f.warn("vite.config.js sets no base; use base: './' for sub-path deploys");
    }
    if !src.contains("alias") {
        f.warn("vite.config.js has no '@' alias for src");
    }
}

fn check_index_html(src: &str, f: &mut Findings) {
    if !src.contains("id=\"app\"") && !src.contains("id='app'") {
        f.error("index.html has no <div id=\"app\"> mount point");
    }
    if !src.contains("src/main.js") {
        f.error("index.html does not load /src/main.js");
    }
    if src.matches("<script").count() > 1 {
        f.warn("index.html has more than one <script>; import other modules from main.js");
    }
    if src.contains("<link") && src.contains("stylesheet") {
        f.warn("index.html links a stylesheet; keep styles in components or src/styles/");
    }
}

/// Run every structure check against `root`.
pub async fn check_project_structure(root: &Path) -> std::io::Result<String> {
    let mut f = Findings::default();

    for dir in FORBIDDEN_DIRS {
        if root.join(dir).is_dir() {
            f.error(format!(
                "found {dir}/ at the project root; that is a plain HTML layout, move it under src/"
            ));
        }
    }
    for file in REQUIRED_FILES {
        if !root.join(file).is_file() {
            f.error(format!("{file} is missing"));
        }
    }
    if !f.errors.is_empty() {
        return Ok(f.report());
    }

    check_package_json(&tokio::fs::read_to_string(root.join("package.json")).await?, &mut f);
    check_vite_config(&tokio::fs::read_to_string(root.join("vite.config.js")).await?, &mut f);
    check_index_html(&tokio::fs::read_to_string(root.join("index.html")).await?, &mut f);

    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".css") {
            f.warn(format!("{name} sits at the project root; move it under src/styles/"));
        } else if name.ends_with(".js") && name != "vite.config.js" {
            f.warn(format!("{name} sits at the project root; move it under src/"));
        }
    }

    Ok(f.report())
}

pub struct ProjectStructureTool;

impl ProjectStructureTool {
    pub const NAME: &'static str = "validateVueProjectStructure";
}

#[async_trait]
impl Tool for ProjectStructureTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "validate project structure"
    }

    fn render_executed(&self, _args: &Value, _preview_chars: usize) -> String {
        format!("\n\n[tool call] {}\n\n", self.display_name())
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<String, String> {
        if !ctx.workspace_root.is_dir() {
            return Ok(format!(
                "project directory does not exist: {}",
                ctx.workspace_root.display()
            ));
        }
        tracing::info!(workspace = %ctx.workspace_root.display(), "validating project structure");
        check_project_structure(&ctx.workspace_root)
            .await
            .map_err(|e| format!("structure validation failed: {e}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const LINT_OUTPUT: &str = "eslint-result.json";
const LINT_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
const LINT_RUN_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REPORTED: usize = 10;

const ESLINT_CONFIG: &str = r#"module.exports = {
  env: { browser: true, es2021: true, node: true },
  extends: ['eslint:recommended', 'plugin:vue/vue3-recommended'],
  parserOptions: { ecmaVersion: 'latest', sourceType: 'module' },
  plugins: ['vue'],
  rules: {
    'no-console': 'off',
    'no-debugger': 'warn',
    'vue/multi-word-component-names': 'off'
  }
};
"#;

/// Add the lint script and ESLint dev dependencies to `pkg` when missing.
/// Returns whether anything changed.
fn add_eslint(pkg: &mut Map<String, Value>) -> bool {
    let mut changed = false;

    let scripts = pkg
        .entry("scripts")
        .or_insert_with(|| json!({}));
    if let Some(scripts) = scripts.as_object_mut() {
        if !scripts.contains_key("lint") {
            scripts.insert("lint".into(), json!("eslint . --ext .vue,.js,.ts,.jsx,.tsx"));
            changed = true;
        }
    }

    let dev = pkg
        .entry("devDependencies")
        .or_insert_with(|| json!({}));
    if let Some(dev) = dev.as_object_mut() {
        if !dev.contains_key("eslint") {
            dev.insert("eslint".into(), json!("^8.57.0"));
            dev.insert("eslint-plugin-vue".into(), json!("^9.20.0"));
            changed = true;
        }
    }

    changed
}

/// Error-level messages from ESLint's JSON formatter, as
/// `path:line:col - message (rule)`.
pub fn parse_eslint_errors(raw: &str, root: &Path) -> Vec<String> {
    let Ok(Value::Array(files)) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for file in &files {
        let full = file.get("filePath").and_then(Value::as_str).unwrap_or_default();
        let path = Path::new(full)
            .strip_prefix(root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| full.to_owned());

        let messages = file.get("messages").and_then(Value::as_array);
        for msg in messages.into_iter().flatten() {
            if msg.get("severity").and_then(Value::as_u64) != Some(2) {
                continue;
            }
            let num = |k: &str| msg.get(k).and_then(Value::as_u64).unwrap_or(0);
            let text = |k: &str| msg.get(k).and_then(Value::as_str).unwrap_or("-");
            out.push(format!(
                "{path}:{}:{} - {} ({})",
                num("line"),
                num("column"),
                text("message"),
                text("ruleId")
            ));
        }
    }
    out
}

fn lint_report(errors: &[String]) -> String {
    if errors.is_empty() {
        return "code validation passed, no errors found; the project can be built".to_owned();
    }
    let mut out = format!("found {} code error(s):\n\n", errors.len());
    for (i, e) in errors.iter().take(MAX_REPORTED).enumerate() {
        out.push_str(&format!("{}. {e}\n", i + 1));
    }
    if errors.len() > MAX_REPORTED {
        out.push_str(&format!("\n... and {} more\n", errors.len() - MAX_REPORTED));
    }
    out.push_str("\nfix these errors and validate again");
    out
}

pub struct CodeValidationTool {
    program: String,
}

impl CodeValidationTool {
    pub const NAME: &'static str = "validateCode";

    pub fn new(build: &BuildConfig) -> Self {
        Self {
            program: build.program.clone(),
        }
    }

    /// Make sure ESLint is declared, installed and configured.
    async fn ensure_eslint(&self, root: &Path) -> Result<Option<String>, String> {
        let manifest = root.join("package.json");
        let raw = match tokio::fs::read_to_string(&manifest).await {
            Ok(raw) => raw,
            Err(_) => return Ok(Some("package.json not found; cannot lint".to_owned())),
        };
        let mut pkg = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(Some("package.json is not a JSON object; cannot lint".to_owned())),
        };
        let es_module = pkg.get("type").and_then(Value::as_str) == Some("module");

        if add_eslint(&mut pkg) {
            let pretty = serde_json::to_string_pretty(&Value::Object(pkg))
                .map_err(|e| format!("failed to encode package.json: {e}"))?;
            tokio::fs::write(&manifest, pretty)
                .await
                .map_err(|e| format!("failed to update package.json: {e}"))?;
            tracing::info!(workspace = %root.display(), "added eslint to package.json");

            let install = run_captured(
                &self.program,
                &["install".to_owned()],
                root,
                LINT_INSTALL_TIMEOUT,
            )
            .await;
            if !install.succeeded() {
                return Ok(Some(format!(
                    "could not install eslint (exit code {})",
                    install.exit_code
                )));
            }
        }

        let existing = [".eslintrc.js", ".eslintrc.cjs", ".eslintrc.json"];
        if !existing.iter().any(|n| root.join(n).exists()) {
            let name = if es_module { ".eslintrc.cjs" } else { ".eslintrc.js" };
            tokio::fs::write(root.join(name), ESLINT_CONFIG)
                .await
                .map_err(|e| format!("failed to write {name}: {e}"))?;
        }
        Ok(None)
    }
}

#[async_trait]
impl Tool for CodeValidationTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "validate code"
    }

    fn render_executed(&self, _args: &Value, _preview_chars: usize) -> String {
        format!("\n\n[tool call] {}\n\n", self.display_name())
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<String, String> {
        let root = &ctx.workspace_root;
        if !root.is_dir() {
            return Ok(format!("project directory does not exist: {}", root.display()));
        }
        if let Some(problem) = self.ensure_eslint(root).await? {
            return Ok(problem);
        }

        let args: Vec<String> = ["run", "lint", "--", "--format", "json", "--output-file", LINT_OUTPUT]
            .into_iter()
            .map(str::to_owned)
            .collect();
        let run = run_captured(&self.program, &args, root, LINT_RUN_TIMEOUT).await;
        // ESLint exits 1 when it found problems.
        if run.timed_out || !matches!(run.exit_code, 0 | 1) {
            return Ok(format!("eslint failed to run (exit code {})", run.exit_code));
        }

        let output = root.join(LINT_OUTPUT);
        let raw = match tokio::fs::read_to_string(&output).await {
            Ok(raw) => raw,
            Err(_) => return Ok(lint_report(&[])),
        };
        let _ = tokio::fs::remove_file(&output).await;

        let canonical = root.canonicalize().unwrap_or_else(|_| root.clone());
        let mut errors = parse_eslint_errors(&raw, &canonical);
        if errors.is_empty() {
            errors = parse_eslint_errors(&raw, root);
        }
        Ok(lint_report(&errors))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_PACKAGE: &str = r#"{
  "name": "app",
  "scripts": {"dev": "vite", "build": "vite build"},
  "dependencies": {"vue": "^3.3.4"},
  "devDependencies": {"@vitejs/plugin-vue": "^4.2.3", "vite": "^4.4.5"}
}"#;
    const GOOD_VITE: &str = "import { defineConfig } from 'vite'\nimport vue from '@vitejs/plugin-vue'\nexport default defineConfig({ base: './', plugins: [vue()], resolve: { alias: { '@': '/src' } } })\n";
    const GOOD_INDEX: &str = "<!doctype html><body><div id=\"app\"></div><script type=\"module\" src=\"/src/main.js\"></script></body>";

    fn scaffold(root: &Path) {
        std::fs::write(root.join("package.json"), GOOD_PACKAGE).unwrap();
        std::fs::write(root.join("vite.config.js"), GOOD_VITE).unwrap();
        std::fs::write(root.join("index.html"), GOOD_INDEX).unwrap();
    }

    async fn structure(root: &Path) -> String {
        ProjectStructureTool
            .execute(&ToolContext::new(root), &Value::Null)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn complete_scaffold_passes() {
        let dir = tempfile::tempdir().unwrap();
        scaffold(dir.path());
        let report = structure(dir.path()).await;
        assert!(report.starts_with("project structure OK"), "{report}");
        assert!(!report.contains("warning"), "{report}");
    }

    #[tokio::test]
    async fn missing_files_and_plain_html_dirs_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("styles")).unwrap();
        std::fs::write(dir.path().join("index.html"), GOOD_INDEX).unwrap();

        let report = structure(dir.path()).await;
        assert!(report.starts_with("project structure INVALID"));
        assert!(report.contains("found styles/"));
        assert!(report.contains("package.json is missing"));
        assert!(report.contains("vite.config.js is missing"));
        assert!(!report.contains("index.html is missing"));
    }

    #[tokio::test]
    async fn manifest_and_config_content_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        scaffold(dir.path());
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "18"}, "devDependencies": {"vite": "4"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("vite.config.js"), "export default {}").unwrap();
        std::fs::write(dir.path().join("app.js"), "x").unwrap();

        let report = structure(dir.path()).await;
        assert!(report.contains("missing the \"vue\" dependency"));
        assert!(report.contains("\"@vitejs/plugin-vue\" dev dependency"));
        assert!(report.contains("does not register vue()"));
        assert!(report.contains("no scripts"));
        assert!(report.contains("app.js sits at the project root"));
    }

    #[tokio::test]
    async fn missing_workspace_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let report = structure(&dir.path().join("nope")).await;
        assert!(report.contains("does not exist"));
    }

    #[test]
    fn eslint_output_keeps_errors_only() {
        let raw = r#"[
          {"filePath": "/w/src/App.vue", "messages": [
            {"severity": 2, "line": 3, "column": 7, "message": "'x' is not defined.", "ruleId": "no-undef"},
            {"severity": 1, "line": 9, "column": 1, "message": "Unexpected debugger", "ruleId": "no-debugger"}
          ]},
          {"filePath": "/w/src/main.js", "messages": []}
        ]"#;
        let errors = parse_eslint_errors(raw, Path::new("/w"));
        assert_eq!(errors, vec!["src/App.vue:3:7 - 'x' is not defined. (no-undef)"]);
        assert!(parse_eslint_errors("not json", Path::new("/w")).is_empty());
    }

    #[test]
    fn report_caps_listed_errors() {
        let errors: Vec<String> = (0..12).map(|i| format!("e{i}")).collect();
        let report = lint_report(&errors);
        assert!(report.starts_with("found 12 code error(s)"));
        assert!(report.contains("10. e9"));
        assert!(!report.contains("11. e10"));
        assert!(report.contains("... and 2 more"));
        assert!(lint_report(&[]).contains("passed"));
    }

    #[test]
    fn eslint_is_added_once() {
        let mut pkg = serde_json::from_str::<Map<String, Value>>(GOOD_PACKAGE).unwrap();
        assert!(add_eslint(&mut pkg));
        assert_eq!(pkg["devDependencies"]["eslint"], "^8.57.0");
        assert!(pkg["scripts"]["lint"].as_str().unwrap().starts_with("eslint"));
        assert!(!add_eslint(&mut pkg));
    }

    #[tokio::test]
    async fn lint_without_manifest_reports() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CodeValidationTool::new(&BuildConfig::default());
        let out = tool
            .execute(&ToolContext::new(dir.path()), &Value::Null)
            .await
            .unwrap();
        assert!(out.contains("package.json not found"));
    }

    /// `sh run lint …` executes the workspace's `run` script in place of the
    /// package manager.
    #[cfg(unix)]
    #[tokio::test]
    async fn lint_results_are_read_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("package.json"),
            r#"{"type": "module", "scripts": {"lint": "eslint ."}, "devDependencies": {"eslint": "8"}}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("run"),
            r#"printf '[{"filePath":"src/App.vue","messages":[{"severity":2,"line":1,"column":2,"message":"bad","ruleId":"r"}]}]' > eslint-result.json
exit 1
"#,
        )
        .unwrap();

        let build = BuildConfig {
            program: "sh".into(),
            ..BuildConfig::default()
        };
        let out = CodeValidationTool::new(&build)
            .execute(&ToolContext::new(root), &Value::Null)
            .await
            .unwrap();
        assert!(out.contains("found 1 code error(s)"), "{out}");
        assert!(out.contains("src/App.vue:1:2 - bad (r)"));
        assert!(!root.join(LINT_OUTPUT).exists());
        assert!(root.join(".eslintrc.cjs").exists());
    }
}
