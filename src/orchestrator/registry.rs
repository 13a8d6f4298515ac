use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config;
use crate::config::model::{
    HealthConfig, OrchestrateConfig, PortPolicy, ProbeKind, ServiceConfig, Settings,
};
use crate::config::resolve::project_dir;
use crate::config::validate::{validate, ConfigError};

use super::graph::DependencyGraph;

/// What a health probe does against the service's resolved port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Http { path: String, accept: Vec<u16> },
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub probe: Probe,
    pub interval: Duration,
    pub max_attempts: u32,
    /// Total budget for the whole poll loop.
    pub timeout: Duration,
    /// Budget for a single probe.
    pub probe_timeout: Duration,
}

impl From<&HealthConfig> for HealthCheck {
    fn from(cfg: &HealthConfig) -> Self {
        let probe = match cfg.kind {
            ProbeKind::Http => Probe::Http {
                path: cfg.path.clone(),
                accept: cfg.accept.clone(),
            },
            ProbeKind::Tcp => Probe::Tcp,
        };
        Self {
            probe,
            interval: Duration::from_millis(cfg.interval_ms),
            max_attempts: cfg.max_attempts,
            timeout: Duration::from_secs(cfg.timeout_secs),
            probe_timeout: Duration::from_millis(cfg.probe_timeout_ms),
        }
    }
}

/// Immutable, fully resolved description of one service for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub port: Option<u16>,
    pub fallback_ports: Vec<u16>,
    pub port_policy: PortPolicy,
    pub depends_on: Vec<String>,
    pub optional: bool,
    pub health: Option<HealthCheck>,
}

impl ServiceSpec {
    fn from_config(svc: &ServiceConfig, settings: &Settings, base: &Path) -> Self {
        let working_dir = match &svc.path {
            Some(p) => base.join(crate::platform::expand_home(p)),
            None => base.to_path_buf(),
        };
        Self {
            name: svc.name.clone(),
            command: svc.command.clone(),
            working_dir,
            env: svc.env.clone(),
            port: svc.port,
            fallback_ports: svc.fallback_ports.clone(),
            port_policy: svc.port_policy.unwrap_or(settings.port_policy),
            depends_on: svc.depends_on.clone(),
            optional: svc.optional,
            health: svc.health.as_ref().map(HealthCheck::from),
        }
    }

    /// Candidate ports in the order the allocator tries them.
    pub fn port_candidates(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.port.into_iter().collect();
        if self.port_policy == PortPolicy::Fallback {
            ports.extend(self.fallback_ports.iter().copied());
        }
        ports
    }
}

/// Validated set of services in registration (declaration) order.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    project: String,
    config_path: PathBuf,
    settings: Settings,
    global_env: BTreeMap<String, String>,
    specs: Vec<ServiceSpec>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Load and validate the config file. Any violation is returned as a
    /// [`ConfigError`] before anything touches the filesystem.
    pub fn load(config_path: &Path) -> Result<Self> {
        let (config, source) = config::load_config(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;
        let registry = Self::from_parsed(config, &source, config_path)?;
        Ok(registry)
    }

    /// Parse and validate TOML source as if it lived at `config_path`.
    pub fn from_source(source: &str, config_path: &Path) -> Result<Self> {
        let config: OrchestrateConfig = toml::from_str(source)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        Ok(Self::from_parsed(config, source, config_path)?)
    }

    fn from_parsed(
        config: OrchestrateConfig,
        source: &str,
        config_path: &Path,
    ) -> std::result::Result<Self, ConfigError> {
        let filename = config_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| crate::config::resolve::CONFIG_FILENAME.to_string());
        validate(&config, source, &filename).map_err(ConfigError::Invalid)?;

        let base = project_dir(config_path);
        let specs: Vec<ServiceSpec> = config
            .services
            .iter()
            .map(|svc| ServiceSpec::from_config(svc, &config.settings, &base))
            .collect();
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        Ok(Self {
            project: config.project.name,
            config_path: config_path.to_path_buf(),
            settings: config.settings,
            global_env: config.env,
            specs,
            index,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn global_env(&self) -> &BTreeMap<String, String> {
        &self.global_env
    }

    pub fn specs(&self) -> &[ServiceSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    fn ensure_known(&self, names: &[String]) -> std::result::Result<(), ConfigError> {
        match names.iter().find(|n| !self.index.contains_key(n.as_str())) {
            Some(unknown) => Err(ConfigError::UnknownService {
                name: unknown.clone(),
                available: self.names(),
            }),
            None => Ok(()),
        }
    }

    /// The named services plus everything they transitively depend on.
    pub fn with_dependencies(
        &self,
        names: &[String],
    ) -> std::result::Result<BTreeSet<String>, ConfigError> {
        self.ensure_known(names)?;
        let graph = DependencyGraph::from_specs(&self.specs)?;
        let mut needed: BTreeSet<String> = names.iter().cloned().collect();
        for name in names {
            needed.extend(graph.dependencies_of(name));
        }
        Ok(needed)
    }

    /// The named services plus everything that transitively depends on them.
    pub fn with_dependents(
        &self,
        names: &[String],
    ) -> std::result::Result<BTreeSet<String>, ConfigError> {
        self.ensure_known(names)?;
        let graph = DependencyGraph::from_specs(&self.specs)?;
        let mut needed: BTreeSet<String> = names.iter().cloned().collect();
        for name in names {
            needed.extend(graph.dependents_of(name));
        }
        Ok(needed)
    }
}
