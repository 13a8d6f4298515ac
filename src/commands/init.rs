use anyhow::Result;
use std::path::Path;

use crate::config::resolve::CONFIG_FILENAME;

pub fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config_path = write_starter(&cwd)?;

    let project_name = project_name(&cwd);
    let (service_name, service_command) = detect_project_type(&cwd);
    println!("Created {} in {}", CONFIG_FILENAME, cwd.display());
    println!();
    println!("  Project: {}", project_name);
    println!("  Service: {} -> {}", service_name, service_command);
    println!();
    println!(
        "Edit {}, then run `orchestrate start` to begin.",
        config_path.display()
    );
    Ok(())
}

fn project_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "my-project".to_string())
}

/// Write a commented starter config into `dir`. Refuses to overwrite.
fn write_starter(dir: &Path) -> Result<std::path::PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        anyhow::bail!("{} already exists in {}", CONFIG_FILENAME, dir.display());
    }
    std::fs::write(&config_path, starter_config(dir))?;
    Ok(config_path)
}

fn starter_config(dir: &Path) -> String {
    let project_name = project_name(dir);
    let (service_name, service_command) = detect_project_type(dir);
    format!(
        r#"[project]
name = "{project_name}"

# -- Run-wide settings (all optional) --
# [settings]
# port_policy = "fail"      # or "fallback": try fallback_ports when the port is taken
# max_parallel = 4          # services spawned at the same time
# port_retries = 3          # re-probe budget when a port is grabbed between check and spawn
# stop_grace_ms = 5000      # SIGTERM grace period before SIGKILL
# run_dir = ".orchestrate"  # pid-files, logs and locks

# -- Global env vars shared by all services --
# [env]
# LOG_LEVEL = "debug"

# -- Services --
# Every service receives PORT and HOST, plus ORCHESTRATE_<DEP>_HOST,
# ORCHESTRATE_<DEP>_PORT and ORCHESTRATE_<DEP>_URL for each dependency.
[[services]]
name = "{service_name}"
command = "{service_command}"
# port = 3000
# fallback_ports = [3001, 3002]
# path = "./"
# depends_on = ["redis"]
# optional = false
#
# [services.env]
# NODE_ENV = "development"
#
# [services.health]
# type = "http"             # or "tcp"
# path = "/health"
# accept = [200]
# interval_ms = 500
# max_attempts = 60
# timeout_secs = 30
# probe_timeout_ms = 2000

# [[services]]
# name = "redis"
# command = "redis-server --port $PORT"
# port = 6379
# fallback_ports = [6380, 6381]
# [services.health]
# type = "tcp"
"#
    )
}

fn detect_project_type(dir: &Path) -> (&'static str, &'static str) {
    if dir.join("Cargo.toml").exists() {
        ("app", "cargo run")
    } else if dir.join("package.json").exists() {
        ("app", "npm run dev")
    } else if dir.join("go.mod").exists() {
        ("app", "go run .")
    } else if dir.join("requirements.txt").exists() || dir.join("pyproject.toml").exists() {
        ("app", "python main.py")
    } else {
        ("app", "echo 'Replace this with your command'")
    }
}
