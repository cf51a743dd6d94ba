use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cm_domain::config::{LogFormat, ObservabilityConfig};
use cm_gateway::cli::{self, Cli, Command, ConfigCommand};
use cm_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ok = match cli.command {
        Command::Replay {
            events,
            task,
            mode,
            owner,
            run_id,
            model,
            prompt,
            cancel_after,
            delay_ms,
        } => {
            let (config, _) = cli::load_config()?;
            init_tracing(&config.observability);
            let state = Arc::new(AppState::new(Arc::new(config)));
            cli::replay::run(
                state,
                &events,
                task,
                mode,
                owner,
                run_id,
                model,
                prompt,
                cancel_after,
                delay_ms,
            )
            .await?
        }
        Command::Extract { file, mode, task } => {
            let (config, _) = cli::load_config()?;
            init_tracing(&config.observability);
            cli::extract::run(&config, &file, mode, task.as_deref()).await?;
            true
        }
        Command::Build { task_id } => {
            let (config, _) = cli::load_config()?;
            init_tracing(&config.observability);
            cli::build::run(&config, &task_id).await?
        }
        Command::History { task_id, json } => {
            let (config, _) = cli::load_config()?;
            cli::history::run(&config, &task_id, json).await?;
            true
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            cli::config::validate(&config, &config_path)
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config()?;
            cli::config::show(&config)?;
            true
        }
        Command::Version => {
            println!("codemill {}", env!("CARGO_PKG_VERSION"));
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr so stdout stays clean for event output.
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match obs.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
