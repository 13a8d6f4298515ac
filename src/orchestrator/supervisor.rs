use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::platform::{self, Signalled};

use super::error::ServiceError;
use super::health::HealthGate;
use super::ports::check_port_available;
use super::registry::ServiceSpec;
use super::state::{RunDir, ServiceLock};

/// How long a fresh child is watched for an immediate exit (missing binary,
/// bad shell syntax) before it counts as spawned.
pub(crate) const SPAWN_SETTLE: Duration = Duration::from_millis(150);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Clock granularity allowed when matching a pid-file against the process
/// start time.
const START_TIME_SLACK_SECS: i64 = 5;

/// How long to wait for SIGKILL to take effect.
const KILL_WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// ProcessHandle: persisted record of one spawned process
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub service: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub port: Option<u16>,
    pub log_path: PathBuf,
    pub pid_file: PathBuf,
}

/// Result of a graceful termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    NotRunning,
    StillRunning,
}

impl ProcessHandle {
    /// Alive and still the process this handle was written for. A pid that
    /// was reused after the original exited (or after a reboot) counts as
    /// dead so it is never adopted or signalled.
    pub fn is_alive(&self) -> bool {
        platform::is_process_alive(self.pid) && !self.pid_reused()
    }

    pub(crate) fn pid_reused(&self) -> bool {
        match platform::process_start_time(self.pid) {
            Some(started) => started > self.started_at + chrono::Duration::seconds(START_TIME_SLACK_SECS),
            None => false,
        }
    }

    /// Ask the process group to exit and wait up to `grace` for the leader to
    /// go away.
    pub async fn terminate(&self, grace: Duration) -> std::io::Result<Termination> {
        if platform::request_terminate(self.pid)? == Signalled::NotRunning {
            return Ok(Termination::NotRunning);
        }
        if wait_for_exit(self.pid, grace).await {
            Ok(Termination::Exited)
        } else {
            Ok(Termination::StillRunning)
        }
    }

    pub fn force_kill(&self) -> std::io::Result<Signalled> {
        platform::force_kill(self.pid)
    }
}

async fn wait_for_exit(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if !platform::is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopState {
    /// Exited within the grace period.
    Stopped,
    /// Needed SIGKILL.
    Killed,
    /// No pid-file.
    NotRunning,
    /// Pid-file pointed at a dead process; removed.
    Stale,
    /// Could not be stopped or cleaned up; see warnings.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub service: String,
    pub pid: Option<u32>,
    pub state: StopState,
    pub warnings: Vec<String>,
}

impl StopOutcome {
    fn new(service: &str, pid: Option<u32>, state: StopState) -> Self {
        Self {
            service: service.to_string(),
            pid,
            state,
            warnings: Vec::new(),
        }
    }

    pub fn failed(service: &str, reason: impl std::fmt::Display) -> Self {
        let mut outcome = Self::new(service, None, StopState::Failed);
        outcome.warnings.push(reason.to_string());
        outcome
    }
}

// ---------------------------------------------------------------------------
// ProcessSupervisor
// ---------------------------------------------------------------------------

/// Spawns, adopts and stops service processes. Every mutating call takes a
/// [`ServiceLock`] for the service it touches.
pub struct ProcessSupervisor {
    run_dir: RunDir,
    stop_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(run_dir: RunDir, stop_grace: Duration) -> Self {
        Self {
            run_dir,
            stop_grace,
        }
    }

    pub fn run_dir(&self) -> &RunDir {
        &self.run_dir
    }

    pub fn lock(&self, service: &str) -> Result<ServiceLock, ServiceError> {
        self.run_dir.lock_service(service)
    }

    /// Look at the recorded pid-file for `spec`. Returns the handle when the
    /// process is alive and answers its probe; otherwise clears the way for
    /// a fresh spawn (stale pid-files removed, unhealthy processes stopped).
    pub async fn adopt(
        &self,
        lock: &ServiceLock,
        spec: &ServiceSpec,
        gate: &HealthGate,
    ) -> Result<Option<ProcessHandle>, ServiceError> {
        debug_assert_eq!(lock.service(), spec.name);
        let name = spec.name.as_str();
        let Some(handle) = self
            .run_dir
            .read_handle(name)
            .map_err(ServiceError::run_dir)?
        else {
            return Ok(None);
        };

        if !handle.is_alive() {
            info!(service = %name, pid = handle.pid, "removing stale pid-file");
            self.run_dir
                .remove_handle(name)
                .map_err(ServiceError::run_dir)?;
            return Ok(None);
        }

        if gate.probe_now(spec, handle.port).await {
            info!(service = %name, pid = handle.pid, "already running and healthy");
            return Ok(Some(handle));
        }

        warn!(
            service = %name,
            pid = handle.pid,
            "recorded process is alive but not healthy, replacing it"
        );
        let outcome = self.stop(lock).await;
        if outcome.state == StopState::Failed {
            return Err(ServiceError::Spawn {
                reason: format!(
                    "could not stop unhealthy process {}: {}",
                    handle.pid,
                    outcome.warnings.join("; ")
                ),
            });
        }
        Ok(None)
    }

    /// Spawn a fresh process. Fails with [`ServiceError::PortTaken`] when the
    /// allocated port was bound by someone else in the meantime.
    pub async fn spawn(
        &self,
        lock: &ServiceLock,
        spec: &ServiceSpec,
        port: Option<u16>,
        env: &BTreeMap<String, String>,
    ) -> Result<ProcessHandle, ServiceError> {
        debug_assert_eq!(lock.service(), spec.name);
        let name = spec.name.as_str();

        if let Some(port) = port {
            if !check_port_available(port) {
                return Err(ServiceError::PortTaken { port });
            }
        }

        if !spec.working_dir.is_dir() {
            return Err(ServiceError::spawn(format!(
                "working directory {} does not exist",
                spec.working_dir.display()
            )));
        }

        self.run_dir.ensure().map_err(ServiceError::run_dir)?;
        let log_path = self.run_dir.log_path(name);
        let stdout = std::fs::File::create(&log_path)
            .map_err(|e| ServiceError::spawn(format!("opening {}: {}", log_path.display(), e)))?;
        let stderr = stdout.try_clone().map_err(ServiceError::spawn)?;

        info!(
            service = %name,
            port = ?port,
            "spawning: {} {:?}",
            platform::shell_name(),
            spec.command,
        );

        let mut cmd = platform::shell_command(&spec.command);
        cmd.current_dir(&spec.working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        platform::configure_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(ServiceError::spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| ServiceError::spawn("process exited before its pid was read"))?;

        let settled = tokio::time::timeout(SPAWN_SETTLE, child.wait()).await;
        if let Ok(status) = settled {
            let status = status.map_err(ServiceError::spawn)?;
            if !status.success() {
                return Err(ServiceError::spawn(format!(
                    "`{}` exited immediately with {} (see {})",
                    spec.command,
                    status,
                    log_path.display()
                )));
            }
            info!(service = %name, pid, "process exited immediately with success");
        } else {
            // Reap the child once it exits so liveness checks never see a
            // zombie. Dropping the task on runtime shutdown leaves the
            // process running.
            let service = name.to_string();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => debug!(service = %service, pid, %status, "process exited"),
                    Err(e) => debug!(service = %service, pid, "wait failed: {}", e),
                }
            });
        }

        let handle = ProcessHandle {
            service: name.to_string(),
            pid,
            started_at: Utc::now(),
            port,
            log_path,
            pid_file: self.run_dir.pid_path(name),
        };
        if let Err(e) = self.run_dir.write_handle(&handle) {
            warn!(service = %name, pid, "could not record pid-file, killing the process");
            match handle.force_kill() {
                Ok(Signalled::Delivered) => platform::kill_group_stragglers(pid),
                Ok(Signalled::NotRunning) => {}
                Err(kill_err) => {
                    warn!(service = %name, pid, "SIGKILL after failed pid-file write failed: {}", kill_err)
                }
            }
            return Err(ServiceError::run_dir(e));
        }
        debug!(service = %name, pid, "pid-file written");
        Ok(handle)
    }

    /// Stop the recorded process for the locked service: SIGTERM to the
    /// group, wait up to the grace period, then SIGKILL. Never errors; every
    /// step lands in the returned [`StopOutcome`].
    pub async fn stop(&self, lock: &ServiceLock) -> StopOutcome {
        let name = lock.service();
        let handle = match self.run_dir.read_handle(name) {
            Ok(Some(h)) => h,
            Ok(None) => return StopOutcome::new(name, None, StopState::NotRunning),
            Err(e) => return StopOutcome::failed(name, format!("{:#}", e)),
        };
        let pid = handle.pid;

        let mut outcome = if !handle.is_alive() {
            debug!(service = %name, pid, "pid-file is stale");
            StopOutcome::new(name, Some(pid), StopState::Stale)
        } else {
            self.terminate(&handle).await
        };

        if outcome.state != StopState::Failed {
            if !handle.pid_reused() {
                platform::kill_group_stragglers(pid);
            }
            if let Err(e) = self.run_dir.remove_handle(name) {
                outcome.state = StopState::Failed;
                outcome.warnings.push(format!("{:#}", e));
            }
        }
        outcome
    }

    async fn terminate(&self, handle: &ProcessHandle) -> StopOutcome {
        let name = handle.service.as_str();
        let pid = handle.pid;
        let mut outcome = StopOutcome::new(name, Some(pid), StopState::Stopped);

        match handle.terminate(self.stop_grace).await {
            Ok(Termination::Exited) => {
                info!(service = %name, pid, "stopped");
                return outcome;
            }
            Ok(Termination::NotRunning) => {
                outcome.state = StopState::Stale;
                return outcome;
            }
            Ok(Termination::StillRunning) => {
                let msg = format!(
                    "did not exit within {:?} of SIGTERM, sending SIGKILL",
                    self.stop_grace
                );
                warn!(service = %name, pid, "{}", msg);
                outcome.warnings.push(msg);
            }
            Err(e) => {
                let msg = format!("graceful stop failed ({}), sending SIGKILL", e);
                warn!(service = %name, pid, "{}", msg);
                outcome.warnings.push(msg);
            }
        }

        if let Err(e) = handle.force_kill() {
            outcome.state = StopState::Failed;
            outcome.warnings.push(format!("SIGKILL failed: {}", e));
            return outcome;
        }
        if wait_for_exit(pid, KILL_WAIT).await {
            outcome.state = StopState::Killed;
        } else {
            outcome.state = StopState::Failed;
            outcome
                .warnings
                .push(format!("process {} survived SIGKILL", pid));
        }
        outcome
    }
}
