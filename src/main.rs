use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use orchestrate::cli::{Cli, Commands};
use orchestrate::commands;
use orchestrate::config::resolve::resolve_config;
use orchestrate::config::validate::ConfigError;
use orchestrate::orchestrator::Orchestrator;
use orchestrate::ui::report::print_stop_summary;

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file;
    let run_dir = cli.global.run_dir;

    let result = match cli.command {
        Commands::Start {
            selection,
            timeout,
            json,
        } => run_start(config_file, run_dir, selection.only, timeout, json).await,
        Commands::Stop { selection } => run_stop(config_file, run_dir, selection.only).await,
        Commands::Restart {
            selection,
            timeout,
            json,
        } => run_restart(config_file, run_dir, selection.only, timeout, json).await,
        Commands::Status { json } => {
            commands::status::run(config_file.as_deref(), run_dir.as_deref(), json).await
        }
        Commands::Validate => commands::validate::run(config_file.as_deref()).map(|_| 0),
        Commands::Logs { service, tail } => {
            commands::logs::run(config_file.as_deref(), run_dir.as_deref(), &service, tail)
                .map(|_| 0)
        }
        Commands::Init => commands::init::run().map(|_| 0),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "orchestrate", &mut std::io::stdout());
            Ok(0)
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<ConfigError>() {
                Some(config_error) => config_error.report(),
                None => eprintln!("Error: {:#}", e),
            }
            1
        }
    };
    std::process::exit(code);
}

fn orchestrator(config_file: Option<&Path>, run_dir: Option<&Path>) -> anyhow::Result<Orchestrator> {
    let config_path = resolve_config(config_file)?;
    Orchestrator::from_config(&config_path, run_dir)
}

async fn run_start(
    config_file: Option<PathBuf>,
    run_dir: Option<PathBuf>,
    only: Vec<String>,
    timeout: Option<u64>,
    json: bool,
) -> anyhow::Result<i32> {
    let orchestrator = orchestrator(config_file.as_deref(), run_dir.as_deref())?;
    let report = orchestrator
        .start(&only, timeout.map(Duration::from_secs))
        .await?;
    report.print(json)?;
    Ok(report.exit_code())
}

async fn run_stop(
    config_file: Option<PathBuf>,
    run_dir: Option<PathBuf>,
    only: Vec<String>,
) -> anyhow::Result<i32> {
    let orchestrator = orchestrator(config_file.as_deref(), run_dir.as_deref())?;
    let outcomes = orchestrator.stop(&only).await?;
    print_stop_summary(&outcomes);
    Ok(0)
}

async fn run_restart(
    config_file: Option<PathBuf>,
    run_dir: Option<PathBuf>,
    only: Vec<String>,
    timeout: Option<u64>,
    json: bool,
) -> anyhow::Result<i32> {
    let orchestrator = orchestrator(config_file.as_deref(), run_dir.as_deref())?;
    let (stopped, report) = orchestrator
        .restart(&only, timeout.map(Duration::from_secs))
        .await?;
    if !json {
        print_stop_summary(&stopped);
    }
    report.print(json)?;
    Ok(report.exit_code())
}
