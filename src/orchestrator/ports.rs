use std::collections::HashSet;
use std::net::TcpListener;

use thiserror::Error;

use crate::config::model::PortPolicy;

use super::registry::ServiceSpec;

/// No candidate port could be bound for a service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct PortConflict {
    pub service: String,
    /// Candidates in the order they were tried.
    pub tried: Vec<u16>,
    /// Best-effort description of whoever holds one of the tried ports.
    pub owner: Option<PortOwner>,
}

/// A process found listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub port: u16,
    pub process: String,
}

impl PortOwner {
    pub fn lookup(port: u16) -> Option<Self> {
        crate::platform::identify_port_owner(port).map(|process| Self { port, process })
    }
}

impl std::fmt::Display for PortConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports = self
            .tried
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "no free port for '{}' (tried {})", self.service, ports)?;
        if let Some(owner) = &self.owner {
            write!(f, "; port {} is held by {}", owner.port, owner.process)?;
        }
        Ok(())
    }
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Hands out ports for one run. A port given to one service is never given
/// to another in the same run, even if its listener has not bound yet.
#[derive(Debug, Default)]
pub struct PortAllocator {
    reserved: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a port for `spec`, skipping anything in `exclude` (ports that
    /// were already lost to a race for this service).
    ///
    /// `Ok(None)` means the service declares no port at all.
    pub fn allocate(
        &mut self,
        spec: &ServiceSpec,
        exclude: &HashSet<u16>,
    ) -> Result<Option<u16>, PortConflict> {
        let Some(preferred) = spec.port else {
            return Ok(None);
        };

        let candidates = spec.port_candidates();
        for &port in &candidates {
            if exclude.contains(&port) || self.reserved.contains(&port) {
                continue;
            }
            if check_port_available(port) {
                if port != preferred {
                    tracing::info!(
                        service = %spec.name,
                        preferred,
                        port,
                        "preferred port busy, using fallback"
                    );
                }
                self.reserved.insert(port);
                return Ok(Some(port));
            }
            tracing::debug!(service = %spec.name, port, "port unavailable");
        }

        let owner = if spec.port_policy == PortPolicy::Fail || candidates.len() == 1 {
            PortOwner::lookup(preferred)
        } else {
            None
        };
        Err(PortConflict {
            service: spec.name.clone(),
            tried: candidates,
            owner,
        })
    }

    /// Claim a port already held by a service this run adopted.
    pub fn reserve(&mut self, port: u16) {
        self.reserved.insert(port);
    }

    pub fn release(&mut self, port: u16) {
        self.reserved.remove(&port);
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.contains(&port)
    }
}
