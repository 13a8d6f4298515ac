use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use super::error::ServiceError;
use super::supervisor::ProcessHandle;

/// Layout of the run directory shared by every invocation against the same
/// config:
///
/// ```text
/// <run_dir>/pids/<service>.pid    JSON ProcessHandle
/// <run_dir>/logs/<service>.log    combined stdout/stderr
/// <run_dir>/locks/<service>.lock  flock target
/// ```
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.root.join("pids")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn pid_path(&self, service: &str) -> PathBuf {
        self.pids_dir().join(format!("{}.pid", service))
    }

    pub fn log_path(&self, service: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", service))
    }

    pub fn lock_path(&self, service: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", service))
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [self.pids_dir(), self.logs_dir(), self.locks_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    /// Read the recorded handle for `service`. A pid-file that cannot be
    /// parsed is treated as stale and removed.
    pub fn read_handle(&self, service: &str) -> Result<Option<ProcessHandle>> {
        let path = self.pid_path(service);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        match serde_json::from_str(&content) {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                warn!(service, path = %path.display(), error = %e, "discarding unreadable pid-file");
                self.remove_handle(service)?;
                Ok(None)
            }
        }
    }

    /// Persist a handle. Written to a temp file and renamed so readers never
    /// observe a half-written pid-file.
    pub fn write_handle(&self, handle: &ProcessHandle) -> Result<()> {
        let dir = self.pids_dir();
        std::fs::create_dir_all(&dir)?;
        let path = self.pid_path(&handle.service);
        let tmp_path = dir.join(format!("{}.pid.tmp", handle.service));
        let content = serde_json::to_string_pretty(handle)?;
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    pub fn remove_handle(&self, service: &str) -> Result<()> {
        let path = self.pid_path(service);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    /// Service names that currently have a pid-file, sorted.
    pub fn recorded_services(&self) -> Result<Vec<String>> {
        let dir = self.pids_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".pid").map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Take the exclusive per-service lock without blocking. Another holder,
    /// in this process or another, yields [`ServiceError::Locked`].
    pub fn lock_service(&self, service: &str) -> Result<ServiceLock, ServiceError> {
        std::fs::create_dir_all(self.locks_dir()).map_err(ServiceError::run_dir)?;
        let path = self.lock_path(service);
        let file = File::create(&path).map_err(ServiceError::run_dir)?;
        try_lock_exclusive(&file)?;
        Ok(ServiceLock {
            service: service.to_string(),
            _file: file,
        })
    }
}

/// Proof that the holder may mutate a service's process and pid-file.
/// Released when dropped.
#[derive(Debug)]
pub struct ServiceLock {
    service: String,
    _file: File,
}

impl ServiceLock {
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<(), ServiceError> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is valid for the lifetime of `file`
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Err(ServiceError::Locked)
    } else {
        Err(ServiceError::run_dir(err))
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<(), ServiceError> {
    Ok(())
}
