use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::ServiceError;
use super::registry::{HealthCheck, Probe, ServiceSpec};

/// Per-service health as seen by this invocation.
///
/// `Healthy` and `Timeout` are terminal: once reached they only change
/// through [`HealthGate::reset`] (a restart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
    Timeout,
}

impl HealthStatus {
    fn can_become(self, next: HealthStatus) -> bool {
        use HealthStatus::*;
        matches!(
            (self, next),
            (Unknown, Starting)
                | (Unknown, Healthy)
                | (Starting, Unhealthy)
                | (Starting, Healthy)
                | (Starting, Timeout)
                | (Unhealthy, Unhealthy)
                | (Unhealthy, Healthy)
                | (Unhealthy, Timeout)
        )
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Run one probe against `port`.
pub async fn probe_once(client: &reqwest::Client, check: &HealthCheck, port: u16) -> Result<()> {
    match &check.probe {
        Probe::Tcp => {
            tokio::time::timeout(
                check.probe_timeout,
                tokio::net::TcpStream::connect(("127.0.0.1", port)),
            )
            .await
            .context("TCP connect timed out")?
            .context("TCP connect failed")?;
            Ok(())
        }
        Probe::Http { path, accept } => {
            let url = format!("http://127.0.0.1:{}{}", port, path);
            let response = client
                .get(&url)
                .timeout(check.probe_timeout)
                .send()
                .await
                .with_context(|| format!("GET {}", url))?;
            let status = response.status().as_u16();
            if !accept.contains(&status) {
                bail!("GET {} returned {} (accepted: {:?})", url, status, accept);
            }
            Ok(())
        }
    }
}

/// Polls services until they answer their probe, and tracks the resulting
/// status per service.
pub struct HealthGate {
    client: reqwest::Client,
    statuses: Mutex<BTreeMap<String, HealthStatus>>,
}

impl HealthGate {
    pub fn new() -> Result<Self> {
        // Probes only ever target loopback; proxies from the environment
        // must not intercept them.
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            statuses: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn status(&self, service: &str) -> HealthStatus {
        self.statuses
            .lock()
            .ok()
            .and_then(|s| s.get(service).copied())
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Record the result of a one-off probe and return the new status.
    pub fn observe(&self, service: &str, healthy: bool) -> HealthStatus {
        if healthy {
            self.advance(service, HealthStatus::Healthy);
        } else {
            self.advance(service, HealthStatus::Starting);
            self.advance(service, HealthStatus::Unhealthy);
        }
        self.status(service)
    }

    /// Forget the status of `service`, e.g. before it is restarted.
    pub fn reset(&self, service: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.remove(service);
        }
    }

    /// Move `service` to `next` if the transition is allowed. Returns whether
    /// the status changed.
    fn advance(&self, service: &str, next: HealthStatus) -> bool {
        let Ok(mut statuses) = self.statuses.lock() else {
            return false;
        };
        let current = statuses
            .get(service)
            .copied()
            .unwrap_or(HealthStatus::Unknown);
        if current.can_become(next) {
            statuses.insert(service.to_string(), next);
            true
        } else {
            false
        }
    }

    /// Record a service adopted from an earlier run as healthy.
    pub fn mark_healthy(&self, service: &str) {
        self.advance(service, HealthStatus::Healthy);
    }

    /// Single probe without touching recorded status. Services without a
    /// health check count as healthy.
    pub async fn probe_now(&self, spec: &ServiceSpec, port: Option<u16>) -> bool {
        match (&spec.health, port) {
            (None, _) => true,
            (Some(check), Some(port)) => probe_once(&self.client, check, port).await.is_ok(),
            (Some(_), None) => false,
        }
    }

    /// Poll until the service answers, its attempts run out, its time budget
    /// is spent, or the run is cancelled.
    pub async fn wait_healthy(
        &self,
        spec: &ServiceSpec,
        port: Option<u16>,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let name = spec.name.as_str();
        let Some(check) = &spec.health else {
            self.advance(name, HealthStatus::Healthy);
            return Ok(());
        };

        self.advance(name, HealthStatus::Starting);
        let started = Instant::now();

        let Some(port) = port else {
            self.advance(name, HealthStatus::Timeout);
            return Err(ServiceError::HealthTimeout {
                attempts: 0,
                elapsed_ms: 0,
                last_error: "service has no port to probe".to_string(),
            });
        };

        let attempts = AtomicU32::new(0);
        let last_error = Mutex::new(String::from("no probe completed"));
        let retries = check.max_attempts.saturating_sub(1) as usize;

        let polling = (|| async {
            attempts.fetch_add(1, Ordering::Relaxed);
            probe_once(&self.client, check, port).await
        })
        .retry(
            ConstantBuilder::default()
                .with_delay(check.interval)
                .with_max_times(retries),
        )
        .notify(|err: &anyhow::Error, dur: Duration| {
            self.advance(name, HealthStatus::Unhealthy);
            if let Ok(mut last) = last_error.lock() {
                *last = format!("{:#}", err);
            }
            tracing::debug!(
                service = %name,
                "health probe failed: {:#}, retrying in {:?}",
                err,
                dur
            );
        });

        let result = tokio::select! {
            r = tokio::time::timeout(check.timeout, polling) => r,
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(Ok(())) => {
                self.advance(name, HealthStatus::Healthy);
                tracing::info!(service = %name, attempts, elapsed_ms, "healthy");
                Ok(())
            }
            Ok(Err(e)) => {
                self.advance(name, HealthStatus::Timeout);
                Err(ServiceError::HealthTimeout {
                    attempts,
                    elapsed_ms,
                    last_error: format!("{:#}", e),
                })
            }
            Err(_) => {
                self.advance(name, HealthStatus::Timeout);
                let last_error = last_error
                    .lock()
                    .map(|l| l.clone())
                    .unwrap_or_default();
                Err(ServiceError::HealthTimeout {
                    attempts,
                    elapsed_ms,
                    last_error: format!("time budget of {:?} exhausted; {}", check.timeout, last_error),
                })
            }
        }
    }
}
