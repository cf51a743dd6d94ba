use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Build pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the project build pipeline (install + build).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Package manager executable. Platform suffixes (`npm.cmd`) belong here.
    #[serde(default = "d_program")]
    pub program: String,
    #[serde(default = "d_install_args")]
    pub install_args: Vec<String>,
    #[serde(default = "d_build_args")]
    pub build_args: Vec<String>,
    /// File that must exist in the workspace before anything is spawned.
    #[serde(default = "d_manifest")]
    pub manifest: String,
    /// Directory the build step must leave behind.
    #[serde(default = "d_artifact_dir")]
    pub artifact_dir: String,
    #[serde(default = "d_300")]
    pub install_timeout_sec: u64,
    #[serde(default = "d_180")]
    pub build_timeout_sec: u64,
    /// Number of stderr lines kept in a result's error summary.
    #[serde(default = "d_10")]
    pub error_summary_lines: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: d_program(),
            install_args: d_install_args(),
            build_args: d_build_args(),
            manifest: d_manifest(),
            artifact_dir: d_artifact_dir(),
            install_timeout_sec: 300,
            build_timeout_sec: 180,
            error_summary_lines: 10,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_program() -> String {
    if cfg!(windows) {
        "npm.cmd".into()
    } else {
        "npm".into()
    }
}
fn d_install_args() -> Vec<String> {
    vec!["install".into()]
}
fn d_build_args() -> Vec<String> {
    vec!["run".into(), "build".into()]
}
fn d_manifest() -> String {
    "package.json".into()
}
fn d_artifact_dir() -> String {
    "dist".into()
}
fn d_300() -> u64 {
    300
}
fn d_180() -> u64 {
    180
}
fn d_10() -> usize {
    10
}
