use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config::resolve::resolve_config;
use crate::orchestrator::graph::OrchestrationPlan;
use crate::orchestrator::registry::ServiceRegistry;

/// Load and validate the config. Diagnostics travel back to `main` as a
/// `ConfigError` so they are rendered once and exit with code 1.
pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config_path = resolve_config(config_file)?;
    let registry = ServiceRegistry::load(&config_path)?;
    let plan = OrchestrationPlan::build(&registry)?;

    let filename = config_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| config_path.display().to_string());

    println!(
        "  {} {} is valid ({} services)",
        "\u{2713}".green(),
        filename,
        plan.len(),
    );
    if !plan.is_empty() {
        println!("  start order: {}", plan.names().join(" -> "));
    }
    Ok(())
}
