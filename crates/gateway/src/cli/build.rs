//! `codemill build`: run the build pipeline in the foreground.

use cm_domain::config::Config;
use cm_domain::{check_task_id, OutputMode};
use cm_tools::BuildPipeline;

/// Returns whether the build succeeded.
pub async fn run(config: &Config, task_id: &str) -> anyhow::Result<bool> {
    check_task_id(task_id)?;
    let workspace = config.workspace.task_dir(OutputMode::VueProject, task_id);
    let pipeline = BuildPipeline::new(config.build.clone());

    eprintln!("building {}", workspace.display());
    let result = pipeline.build(&workspace).await;

    for line in &result.stdout_lines {
        println!("{line}");
    }
    if result.success {
        eprintln!("build succeeded");
    } else {
        eprintln!("build failed (exit code {})", result.exit_code);
        eprintln!("{}", result.error_summary);
    }
    Ok(result.success)
}
