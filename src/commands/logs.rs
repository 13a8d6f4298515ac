use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::config::resolve::{resolve_config, resolve_run_dir};
use crate::config::validate::ConfigError;
use crate::orchestrator::registry::ServiceRegistry;
use crate::orchestrator::state::RunDir;

pub fn run(
    config_file: Option<&Path>,
    run_dir: Option<&Path>,
    service: &str,
    tail: Option<usize>,
) -> Result<()> {
    let config_path = resolve_config(config_file)?;
    let registry = ServiceRegistry::load(&config_path)?;

    if registry.get(service).is_none() {
        return Err(ConfigError::UnknownService {
            name: service.to_string(),
            available: registry.names(),
        }
        .into());
    }

    let run_dir = RunDir::new(resolve_run_dir(&config_path, registry.settings(), run_dir));
    let log_path = run_dir.log_path(service);
    if !log_path.exists() {
        println!("No logs for '{}' yet.", service);
        println!("Run `orchestrate start` to start services.");
        return Ok(());
    }

    let file = std::fs::File::open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_lines(BufReader::new(file), tail, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Copy `reader` to `out`, keeping only the last `tail` lines when set.
fn write_lines(reader: impl BufRead, tail: Option<usize>, out: &mut impl Write) -> Result<()> {
    match tail {
        None => {
            for line in reader.lines() {
                writeln!(out, "{}", line?)?;
            }
        }
        Some(n) => {
            let mut last: VecDeque<String> = VecDeque::with_capacity(n.min(4096));
            for line in reader.lines() {
                if n == 0 {
                    break;
                }
                if last.len() == n {
                    last.pop_front();
                }
                last.push_back(line?);
            }
            for line in last {
                writeln!(out, "{}", line)?;
            }
        }
    }
    Ok(())
}
