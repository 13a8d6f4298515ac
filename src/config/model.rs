use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrateConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
}

fn default_max_parallel() -> usize {
    4
}

fn default_port_retries() -> u32 {
    3
}

fn default_stop_grace_ms() -> u64 {
    5000
}

/// Run-wide knobs. Every field has a default so the whole table is optional.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub port_policy: PortPolicy,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_port_retries")]
    pub port_retries: u32,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default)]
    pub run_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port_policy: PortPolicy::default(),
            max_parallel: default_max_parallel(),
            port_retries: default_port_retries(),
            stop_grace_ms: default_stop_grace_ms(),
            run_dir: None,
        }
    }
}

/// What to do when a service's default port is already bound by someone else.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortPolicy {
    #[default]
    Fail,
    Fallback,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub fallback_ports: Vec<u16>,
    #[serde(default)]
    pub port_policy: Option<PortPolicy>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub health: Option<HealthConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Tcp,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_accept() -> Vec<u16> {
    vec![200]
}

fn default_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_accept")]
    pub accept: Vec<u16>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl OrchestrateConfig {
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}
