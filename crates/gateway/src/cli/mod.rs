pub mod build;
pub mod config;
pub mod extract;
pub mod history;
pub mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cm_domain::OutputMode;

/// codemill: turns streamed model output into live events, chat history,
/// workspace files and builds.
#[derive(Debug, Parser)]
#[command(name = "codemill", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a recorded model stream (JSONL of model events) through the
    /// full pipeline and print client events as JSON lines.
    Replay {
        /// Path to the recorded events.
        events: PathBuf,
        /// Task the run belongs to.
        #[arg(long)]
        task: String,
        /// Output mode: html, multi_file or vue_project.
        #[arg(long, default_value = "html")]
        mode: OutputMode,
        /// Owner of the run.
        #[arg(long, default_value = "cli")]
        owner: String,
        /// Run id (random when omitted).
        #[arg(long)]
        run_id: Option<String>,
        /// Model identifier recorded with the usage.
        #[arg(long)]
        model: Option<String>,
        /// User prompt to record in history before the reply.
        #[arg(long)]
        prompt: Option<String>,
        /// Stop the run after this many non-empty deltas.
        #[arg(long)]
        cancel_after: Option<usize>,
        /// Pause between replayed events, in milliseconds.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Extract code files from a saved plain-text response.
    Extract {
        /// File holding the response text.
        file: PathBuf,
        /// Output mode: html or multi_file.
        #[arg(long, default_value = "html")]
        mode: OutputMode,
        /// Persist the files into this task's workspace instead of printing.
        #[arg(long)]
        task: Option<String>,
    },
    /// Run the build pipeline on a task's project workspace.
    Build {
        task_id: String,
    },
    /// Print a task's chat history.
    History {
        task_id: String,
        /// Print raw JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load `$CODEMILL_CONFIG` (default `config.toml`), falling back to defaults
/// when the file does not exist.
pub fn load_config() -> anyhow::Result<(cm_domain::config::Config, String)> {
    let config_path =
        std::env::var("CODEMILL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        cm_domain::config::Config::default()
    };

    Ok((config, config_path))
}
