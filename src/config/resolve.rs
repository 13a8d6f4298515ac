use std::path::{Path, PathBuf};

use crate::config::model::Settings;

pub const CONFIG_FILENAME: &str = "orchestrate.toml";

/// Default run directory name, created next to the config file.
pub const DEFAULT_RUN_DIR: &str = ".orchestrate";

/// Return the first `filename` found in `start` or any of its ancestors.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
}

/// Resolve the config file path. An explicit `-f` path must exist; otherwise
/// search upward from the current working directory for `orchestrate.toml`.
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(path.canonicalize()?);
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let cwd = std::env::current_dir()?;
    find_config(&cwd, CONFIG_FILENAME).ok_or_else(|| {
        anyhow::anyhow!(
            "No {} found in {} or any parent directory",
            CONFIG_FILENAME,
            cwd.display()
        )
    })
}

/// Directory containing the config file. Relative paths in the config are
/// resolved against it.
pub fn project_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Pick the run directory: an explicit override (CLI / environment) wins,
/// then `settings.run_dir`, then `.orchestrate` beside the config file.
pub fn resolve_run_dir(
    config_path: &Path,
    settings: &Settings,
    override_dir: Option<&Path>,
) -> PathBuf {
    let base = project_dir(config_path);
    match override_dir {
        Some(dir) => base.join(dir),
        None => match &settings.run_dir {
            Some(dir) => base.join(crate::platform::expand_home(dir)),
            None => base.join(DEFAULT_RUN_DIR),
        },
    }
}
