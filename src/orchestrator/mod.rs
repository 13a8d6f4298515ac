pub mod error;
pub mod graph;
pub mod health;
pub mod ports;
pub mod registry;
pub mod state;
pub mod supervisor;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::resolve::resolve_run_dir;
use crate::config::validate::ConfigError;
use crate::discovery::env::build_service_env;
use crate::ui::report::{Report, ServiceReport, ServiceStatus};

pub use error::ServiceError;
use graph::OrchestrationPlan;
use health::{HealthGate, HealthStatus};
use ports::{PortAllocator, PortConflict, PortOwner};
use registry::{ServiceRegistry, ServiceSpec};
use state::RunDir;
use supervisor::{ProcessHandle, ProcessSupervisor, StopOutcome};

// ---------------------------------------------------------------------------
// ServiceOutcome: what happened to one service in one `start`
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeState {
    Healthy,
    AlreadyRunning,
    Failed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ServiceOutcome {
    pub name: String,
    pub optional: bool,
    pub state: OutcomeState,
    pub handle: Option<ProcessHandle>,
    /// True when this run spawned the process (cancellation cleanup only
    /// touches these).
    pub spawned: bool,
    pub error: Option<ServiceError>,
}

impl ServiceOutcome {
    fn new(spec: &ServiceSpec, state: OutcomeState) -> Self {
        Self {
            name: spec.name.clone(),
            optional: spec.optional,
            state,
            handle: None,
            spawned: false,
            error: None,
        }
    }

    fn failed(spec: &ServiceSpec, error: ServiceError) -> Self {
        let state = match error {
            ServiceError::Cancelled => OutcomeState::Cancelled,
            _ => OutcomeState::Failed,
        };
        Self {
            error: Some(error),
            ..Self::new(spec, state)
        }
    }

    fn with_process(mut self, handle: ProcessHandle, spawned: bool) -> Self {
        self.handle = Some(handle);
        self.spawned = spawned;
        self
    }

    pub fn port(&self) -> Option<u16> {
        self.handle.as_ref().and_then(|h| h.port)
    }

    /// Whether services depending on this one must not start. An optional
    /// service that is running but never turned healthy does not block; one
    /// with no process at all does.
    pub fn blocks_dependents(&self) -> bool {
        match self.state {
            OutcomeState::Healthy | OutcomeState::AlreadyRunning => false,
            OutcomeState::Failed => !(self.optional
                && self.handle.is_some()
                && self.error.as_ref().is_some_and(ServiceError::is_health_timeout)),
            OutcomeState::Blocked | OutcomeState::Cancelled => true,
        }
    }

    pub fn to_report(&self, health: HealthStatus) -> ServiceReport {
        let status = match (self.state, &self.error) {
            (OutcomeState::Healthy | OutcomeState::AlreadyRunning, _) => ServiceStatus::Healthy,
            (OutcomeState::Failed, Some(e)) if e.is_health_timeout() => ServiceStatus::Timeout,
            (OutcomeState::Failed, _) => ServiceStatus::Failed,
            (OutcomeState::Blocked, _) => ServiceStatus::Blocked,
            (OutcomeState::Cancelled, _) => ServiceStatus::Cancelled,
        };
        let mut row = ServiceReport::new(&self.name, status, self.optional);
        row.health = health;
        row.already_running = self.state == OutcomeState::AlreadyRunning;
        row.error = self.error.as_ref().map(|e| e.to_string());
        if let Some(handle) = &self.handle {
            row.pid = Some(handle.pid);
            row.resolved_port = handle.port;
            row.log_path = Some(handle.log_path.clone());
            row.started_at = Some(handle.started_at);
        }
        row
    }
}

// ---------------------------------------------------------------------------
// RunContext: shared by every per-service task of one `start`
// ---------------------------------------------------------------------------

type OutcomeRx = watch::Receiver<Option<ServiceOutcome>>;

struct RunContext {
    registry: Arc<ServiceRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    gate: Arc<HealthGate>,
    allocator: Mutex<PortAllocator>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RunContext {
    /// The allocator only holds a set of ports, so a panic elsewhere cannot
    /// leave it half-updated.
    fn allocator(&self) -> MutexGuard<'_, PortAllocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self, spec: &ServiceSpec, lost: &HashSet<u16>) -> Result<Option<u16>, PortConflict> {
        self.allocator().allocate(spec, lost)
    }

    fn reserve(&self, port: u16) {
        self.allocator().reserve(port);
    }

    fn release(&self, port: u16) {
        self.allocator().release(port);
    }
}

/// Allocate a port for `spec` and hand it to `attempt`. A port lost between
/// allocation and spawn is released and the next candidate tried, up to
/// `port_retries` times.
async fn spawn_on_free_port<F, Fut>(
    ctx: &RunContext,
    spec: &ServiceSpec,
    mut attempt: F,
) -> Result<ProcessHandle, ServiceError>
where
    F: FnMut(Option<u16>) -> Fut,
    Fut: Future<Output = Result<ProcessHandle, ServiceError>>,
{
    let name = spec.name.as_str();
    let retries = ctx.registry.settings().port_retries as usize;
    let mut lost: HashSet<u16> = HashSet::new();
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        let port = ctx.allocate(spec, &lost).inspect_err(|conflict| {
            warn!(service = %name, "{}", conflict);
        })?;
        match attempt(port).await {
            Ok(handle) => return Ok(handle),
            Err(ServiceError::PortTaken { port: taken }) => {
                ctx.release(taken);
                lost.insert(taken);
                if lost.len() > retries {
                    let tried = spec
                        .port_candidates()
                        .into_iter()
                        .filter(|p| lost.contains(p))
                        .collect();
                    let conflict = PortConflict {
                        service: name.to_string(),
                        tried,
                        owner: PortOwner::lookup(taken),
                    };
                    warn!(service = %name, "{}", conflict);
                    return Err(conflict.into());
                }
                warn!(service = %name, port = taken, "port was taken before spawn, retrying");
            }
            Err(e) => {
                if let Some(port) = port {
                    ctx.release(port);
                }
                warn!(service = %name, "{}", e);
                return Err(e);
            }
        }
    }
}

/// Drive one service from "waiting on dependencies" to a terminal outcome.
async fn run_service(ctx: &RunContext, spec: &ServiceSpec, deps: Vec<(String, OutcomeRx)>) -> ServiceOutcome {
    let name = spec.name.as_str();

    // Dependencies first. A closed channel means the dependency task died.
    let mut dependency_ports: BTreeMap<String, Option<u16>> = BTreeMap::new();
    for (dep, mut rx) in deps {
        let settled = tokio::select! {
            r = rx.wait_for(Option::is_some) => r.ok().and_then(|o| (*o).clone()),
            _ = ctx.cancel.cancelled() => return ServiceOutcome::failed(spec, ServiceError::Cancelled),
        };
        match settled {
            Some(outcome) if !outcome.blocks_dependents() => {
                dependency_ports.insert(dep, outcome.port());
            }
            _ if ctx.cancel.is_cancelled() => {
                return ServiceOutcome::failed(spec, ServiceError::Cancelled);
            }
            _ => {
                info!(service = %name, dependency = %dep, "blocked by failed dependency");
                return ServiceOutcome {
                    error: Some(ServiceError::DependencyFailed { dependency: dep }),
                    ..ServiceOutcome::new(spec, OutcomeState::Blocked)
                };
            }
        }
    }

    let lock = match ctx.supervisor.lock(name) {
        Ok(lock) => lock,
        Err(e) => return ServiceOutcome::failed(spec, e),
    };

    let permit = tokio::select! {
        p = ctx.permits.clone().acquire_owned() => match p {
            Ok(p) => p,
            Err(_) => return ServiceOutcome::failed(spec, ServiceError::Cancelled),
        },
        _ = ctx.cancel.cancelled() => return ServiceOutcome::failed(spec, ServiceError::Cancelled),
    };

    match ctx.supervisor.adopt(&lock, spec, &ctx.gate).await {
        Ok(Some(handle)) => {
            if let Some(port) = handle.port {
                ctx.reserve(port);
            }
            ctx.gate.mark_healthy(name);
            return ServiceOutcome::new(spec, OutcomeState::AlreadyRunning).with_process(handle, false);
        }
        Ok(None) => {}
        Err(e) => return ServiceOutcome::failed(spec, e),
    }

    let dependency_ports = &dependency_ports;
    let lock = &lock;
    let spawned = spawn_on_free_port(ctx, spec, move |port| {
        let env = build_service_env(spec, ctx.registry.global_env(), port, dependency_ports);
        async move { ctx.supervisor.spawn(lock, spec, port, &env).await }
    })
    .await;
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => return ServiceOutcome::failed(spec, e),
    };
    drop(permit);

    let port = handle.port;
    match ctx.gate.wait_healthy(spec, port, &ctx.cancel).await {
        Ok(()) => ServiceOutcome::new(spec, OutcomeState::Healthy).with_process(handle, true),
        Err(e) => {
            if !matches!(e, ServiceError::Cancelled) {
                warn!(service = %name, "{}", e);
            }
            ServiceOutcome::failed(spec, e).with_process(handle, true)
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Central orchestrator: plans services from the registry, starts them in
/// dependency order with bounded parallelism, gates dependents on health,
/// and stops them in reverse order.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    gate: Arc<HealthGate>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Load and validate the config, then resolve the run directory. Nothing
    /// is created on disk here.
    pub fn from_config(config_path: &Path, run_dir_override: Option<&Path>) -> Result<Self> {
        let registry = ServiceRegistry::load(config_path)?;
        let run_dir = resolve_run_dir(config_path, registry.settings(), run_dir_override);
        Self::new(registry, RunDir::new(run_dir))
    }

    pub fn new(registry: ServiceRegistry, run_dir: RunDir) -> Result<Self> {
        let grace = Duration::from_millis(registry.settings().stop_grace_ms);
        Ok(Self {
            supervisor: Arc::new(ProcessSupervisor::new(run_dir, grace)),
            gate: Arc::new(HealthGate::new()?),
            registry: Arc::new(registry),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn run_dir(&self) -> &RunDir {
        self.supervisor.run_dir()
    }

    /// Token that cancels an in-flight `start`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn plan(
        &self,
        only: &[String],
        widen: fn(&ServiceRegistry, &[String]) -> Result<BTreeSet<String>, ConfigError>,
    ) -> Result<OrchestrationPlan, ConfigError> {
        let plan = OrchestrationPlan::build(&self.registry)?;
        if only.is_empty() {
            return Ok(plan);
        }
        let scope = widen(&self.registry, only)?;
        Ok(plan.restricted_to(&scope))
    }

    /// Start the selected services (all when `only` is empty) plus their
    /// transitive dependencies. `timeout` bounds the whole run; on expiry or
    /// Ctrl+C, services spawned by this run are stopped again.
    pub async fn start(&self, only: &[String], timeout: Option<Duration>) -> Result<Report> {
        let plan = self.plan(only, ServiceRegistry::with_dependencies)?;
        self.run_dir().ensure()?;
        info!(services = ?plan.names(), "starting");

        let outcomes = self.run_plan(&plan, timeout).await;

        if self.cancel.is_cancelled() {
            self.cleanup(&outcomes).await;
        }

        let services = outcomes
            .iter()
            .map(|o| o.to_report(self.gate.status(&o.name)))
            .collect();
        Ok(Report::new(self.registry.project(), services))
    }

    async fn run_plan(&self, plan: &OrchestrationPlan, timeout: Option<Duration>) -> Vec<ServiceOutcome> {
        let ctx = Arc::new(RunContext {
            registry: self.registry.clone(),
            supervisor: self.supervisor.clone(),
            gate: self.gate.clone(),
            allocator: Mutex::new(PortAllocator::new()),
            permits: Arc::new(Semaphore::new(self.registry.settings().max_parallel.max(1))),
            cancel: self.cancel.clone(),
        });

        let mut senders = HashMap::new();
        let mut receivers: HashMap<String, OutcomeRx> = HashMap::new();
        for spec in plan {
            let (tx, rx) = watch::channel(None);
            senders.insert(spec.name.clone(), tx);
            receivers.insert(spec.name.clone(), rx);
        }

        let done = CancellationToken::new();
        self.watch_for_cancellation(timeout, done.clone());

        let mut tasks = Vec::with_capacity(plan.len());
        for spec in plan {
            let Some(tx) = senders.remove(&spec.name) else {
                continue;
            };
            let deps: Vec<(String, OutcomeRx)> = spec
                .depends_on
                .iter()
                .filter_map(|d| receivers.get(d).map(|rx| (d.clone(), rx.clone())))
                .collect();
            let ctx = ctx.clone();
            let task_spec = spec.clone();
            let handle = self.tracker.spawn(async move {
                let outcome = run_service(&ctx, &task_spec, deps).await;
                tx.send_replace(Some(outcome.clone()));
                outcome
            });
            tasks.push((spec, handle));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (spec, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => ServiceOutcome::failed(spec, ServiceError::spawn(format!("task failed: {}", e))),
            };
            outcomes.push(outcome);
        }
        done.cancel();
        outcomes
    }

    /// Cancel the run on Ctrl+C or when `timeout` elapses, whichever comes
    /// first, unless `done` fires before either.
    fn watch_for_cancellation(&self, timeout: Option<Duration>, done: CancellationToken) {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let deadline = async {
                match timeout {
                    Some(t) => tokio::time::sleep(t).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = done.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, cancelling startup");
                    cancel.cancel();
                }
                _ = deadline => {
                    warn!(timeout = ?timeout, "run timeout reached, cancelling startup");
                    cancel.cancel();
                }
            }
        });
    }

    /// Stop what this run spawned, dependents first. Adopted services are
    /// left alone.
    async fn cleanup(&self, outcomes: &[ServiceOutcome]) {
        for outcome in outcomes.iter().rev().filter(|o| o.spawned) {
            let stopped = self.stop_one(&outcome.name).await;
            info!(service = %outcome.name, state = ?stopped.state, "cleaned up after cancellation");
        }
    }

    /// Stop the selected services (all when `only` is empty) plus everything
    /// that depends on them, dependents first. A full stop also stops
    /// processes recorded for services no longer in the config.
    pub async fn stop(&self, only: &[String]) -> Result<Vec<StopOutcome>> {
        let plan = self.plan(only, ServiceRegistry::with_dependents)?;
        let mut outcomes = Vec::with_capacity(plan.len());
        for spec in plan.iter().rev() {
            outcomes.push(self.stop_one(&spec.name).await);
        }

        if only.is_empty() {
            let recorded = self
                .run_dir()
                .recorded_services()
                .context("listing recorded services")?;
            for orphan in recorded.iter().filter(|n| self.registry.get(n).is_none()) {
                info!(service = %orphan, "stopping process for service no longer in config");
                outcomes.push(self.stop_one(orphan).await);
            }
        }
        Ok(outcomes)
    }

    async fn stop_one(&self, name: &str) -> StopOutcome {
        self.gate.reset(name);
        if !self.run_dir().pid_path(name).exists() {
            return StopOutcome {
                service: name.to_string(),
                pid: None,
                state: supervisor::StopState::NotRunning,
                warnings: Vec::new(),
            };
        }
        match self.supervisor.lock(name) {
            Ok(lock) => self.supervisor.stop(&lock).await,
            Err(e) => StopOutcome::failed(name, e),
        }
    }

    /// Stop the selection and its dependents, then start the same set again.
    pub async fn restart(
        &self,
        only: &[String],
        timeout: Option<Duration>,
    ) -> Result<(Vec<StopOutcome>, Report)> {
        let selection: Vec<String> = if only.is_empty() {
            Vec::new()
        } else {
            self.registry.with_dependents(only)?.into_iter().collect()
        };
        let stopped = self.stop(&selection).await?;
        let report = self.start(&selection, timeout).await?;
        Ok((stopped, report))
    }

    /// Inspect every registered service: pid-file, liveness, and one probe
    /// per live service, run concurrently.
    pub async fn status(&self) -> Result<Report> {
        let plan = self.plan(&[], ServiceRegistry::with_dependencies)?;
        let checks = plan.iter().map(|spec| self.status_of(spec));
        let services = futures_util::future::join_all(checks).await;
        Ok(Report::new(self.registry.project(), services))
    }

    async fn status_of(&self, spec: &ServiceSpec) -> ServiceReport {
        let mut row = ServiceReport::new(&spec.name, ServiceStatus::NotRunning, spec.optional);
        let handle = match self.run_dir().read_handle(&spec.name) {
            Ok(Some(handle)) => handle,
            Ok(None) => return row,
            Err(e) => {
                row.status = ServiceStatus::Failed;
                row.error = Some(format!("{:#}", e));
                return row;
            }
        };

        row.pid = Some(handle.pid);
        row.resolved_port = handle.port;
        row.log_path = Some(handle.log_path.clone());
        row.started_at = Some(handle.started_at);

        if !handle.is_alive() {
            row.status = ServiceStatus::Stopped;
            row.error = Some("process exited".to_string());
            return row;
        }
        // Each status call reports the health seen right now.
        self.gate.reset(&spec.name);
        let healthy = self.gate.probe_now(spec, handle.port).await;
        row.health = self.gate.observe(&spec.name, healthy);
        row.status = match row.health {
            HealthStatus::Healthy => ServiceStatus::Healthy,
            _ => ServiceStatus::Unhealthy,
        };
        row
    }
}
