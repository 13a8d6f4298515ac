use std::collections::BTreeMap;

use crate::orchestrator::registry::ServiceSpec;

pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Environment variable prefix for a service name: uppercased, with every
/// character outside `[A-Z0-9]` replaced by `_` (`mcp-memory` becomes
/// `MCP_MEMORY`).
pub fn env_key(service_name: &str) -> String {
    service_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the environment injected into one service's process.
///
/// The layering order (later overrides earlier):
/// 1. Global env from `[env]`
/// 2. `ORCHESTRATE_<DEP>_HOST/_PORT/_URL` for each declared dependency
/// 3. `PORT` and `HOST` for the service itself
/// 4. Service-specific env (explicit overrides)
///
/// `dependency_ports` holds the resolved port of every dependency that has
/// one; dependencies without a port only get a `_HOST` entry.
pub fn build_service_env(
    spec: &ServiceSpec,
    global_env: &BTreeMap<String, String>,
    own_port: Option<u16>,
    dependency_ports: &BTreeMap<String, Option<u16>>,
) -> BTreeMap<String, String> {
    let mut env = global_env.clone();

    for dep in &spec.depends_on {
        let upper = env_key(dep);
        env.insert(
            format!("ORCHESTRATE_{}_HOST", upper),
            LOOPBACK_HOST.to_string(),
        );
        if let Some(Some(port)) = dependency_ports.get(dep) {
            env.insert(format!("ORCHESTRATE_{}_PORT", upper), port.to_string());
            env.insert(
                format!("ORCHESTRATE_{}_URL", upper),
                format!("http://{}:{}", LOOPBACK_HOST, port),
            );
        }
    }

    if let Some(port) = own_port {
        env.insert("PORT".to_string(), port.to_string());
    }
    env.insert("HOST".to_string(), LOOPBACK_HOST.to_string());
    env.insert("ORCHESTRATE_SERVICE".to_string(), spec.name.clone());

    for (k, v) in &spec.env {
        env.insert(k.clone(), v.clone());
    }

    env
}
