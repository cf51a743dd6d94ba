mod build;
mod observability;
mod pipeline;
mod workspace;

pub use build::*;
pub use observability::*;
pub use pipeline::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.build.program.trim().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "build.program".into(),
                message: "program must not be empty".into(),
            });
        }

        for (field, secs) in [
            ("build.install_timeout_sec", self.build.install_timeout_sec),
            ("build.build_timeout_sec", self.build.build_timeout_sec),
        ] {
            if secs == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "timeout must be greater than 0".into(),
                });
            }
        }

        if self.usage.tokens_per_point == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "usage.tokens_per_point".into(),
                message: "tokens_per_point must be greater than 0".into(),
            });
        }

        if self.decoder.preview_chars < 50 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "decoder.preview_chars".into(),
                message: "very small previews make tool output unreadable".into(),
            });
        }

        if self.workspace.root == self.history.path {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "history.path".into(),
                message: "history shares the workspace root; task directories and transcripts will mix".into(),
            });
        }

        errors
    }
}
