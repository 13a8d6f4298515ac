use anyhow::Result;
use std::path::Path;

use crate::config::resolve::resolve_config;
use crate::orchestrator::Orchestrator;

/// Print the status report and return the exit code for its verdict.
pub async fn run(config_file: Option<&Path>, run_dir: Option<&Path>, json: bool) -> Result<i32> {
    let config_path = resolve_config(config_file)?;
    let orchestrator = Orchestrator::from_config(&config_path, run_dir)?;

    if !orchestrator.run_dir().root().exists() && !json {
        println!("No running services found.");
        println!("Run `orchestrate start` to start services.");
    }

    let report = orchestrator.status().await?;
    report.print(json)?;
    Ok(report.exit_code())
}
