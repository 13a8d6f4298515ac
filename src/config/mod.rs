pub mod model;
pub mod resolve;
pub mod validate;

use std::path::Path;

use model::OrchestrateConfig;

/// Read and parse a config file. Returns the parsed config together with the
/// raw source so validation diagnostics can point into it.
pub fn load_config(path: &Path) -> anyhow::Result<(OrchestrateConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: OrchestrateConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}
