//! `codemill extract`: run the code extractor over a saved response.

use std::path::Path;

use anyhow::Context;
use cm_domain::config::Config;
use cm_domain::{check_task_id, OutputMode};
use cm_tools::persist_file;

use crate::runtime::extract::extract;

pub async fn run(
    config: &Config,
    file: &Path,
    mode: OutputMode,
    task_id: Option<&str>,
) -> anyhow::Result<()> {
    if !mode.extracts_code() {
        anyhow::bail!("{mode} output is written by tools, there is nothing to extract");
    }
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let files = extract(mode, &text);

    let Some(task_id) = task_id else {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    };

    check_task_id(task_id)?;
    let workspace = config.workspace.task_dir(mode, task_id);
    for f in &files {
        let persisted = persist_file(&workspace, &f.path, &f.content)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        println!(
            "{:?} {}",
            persisted.status,
            workspace.join(&persisted.path).display()
        );
    }
    Ok(())
}
