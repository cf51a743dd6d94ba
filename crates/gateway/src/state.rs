use std::sync::Arc;

use cm_domain::config::Config;
use cm_sessions::{ChatHistory, HistoryStore};
use cm_tools::{BuildPipeline, ToolRegistry};

use crate::runtime::cancel::RunControlRegistry;
use crate::runtime::usage::UsageLedger;

/// Shared state handed to every generation run.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Live runs, for stop requests.
    pub runs: Arc<RunControlRegistry>,
    pub usage: Arc<UsageLedger>,
    pub history: Arc<dyn ChatHistory>,
    pub tools: Arc<ToolRegistry>,
    pub builds: Arc<BuildPipeline>,
}

impl AppState {
    /// State backed by the JSONL history store from `config`.
    pub fn new(config: Arc<Config>) -> Self {
        let history = Arc::new(HistoryStore::new(&config.history.path));
        Self::with_history(config, history)
    }

    pub fn with_history(config: Arc<Config>, history: Arc<dyn ChatHistory>) -> Self {
        Self {
            runs: Arc::new(RunControlRegistry::new()),
            usage: Arc::new(UsageLedger::new(config.usage.clone())),
            history,
            tools: Arc::new(ToolRegistry::for_build(&config.build)),
            builds: Arc::new(BuildPipeline::new(config.build.clone())),
            config,
        }
    }
}
