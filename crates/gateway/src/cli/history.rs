//! `codemill history`: print a task's chat history.

use cm_domain::config::Config;
use cm_sessions::{ChatHistory, HistoryStore};

pub async fn run(config: &Config, task_id: &str, json: bool) -> anyhow::Result<()> {
    let store = HistoryStore::new(&config.history.path);
    let lines = store.read(task_id).await?;

    if lines.is_empty() {
        eprintln!("no history for task {task_id}");
        return Ok(());
    }
    for line in &lines {
        if json {
            println!("{}", serde_json::to_string(line)?);
        } else {
            println!("── {} [{}] {}", line.role, line.owner_id, line.timestamp);
            println!("{}\n", line.content);
        }
    }
    Ok(())
}
