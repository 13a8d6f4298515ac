use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::debug;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use super::Signalled;

pub const SHELL_NAME: &str = "sh -c";

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

/// Signal the whole group first; a pid that is not a group leader (adopted
/// from an older pid-file) falls back to a plain `kill`.
fn signal_tree(pid: u32, signal: Signal) -> std::io::Result<Signalled> {
    let target = Pid::from_raw(pid as i32);
    match killpg(target, signal) {
        Ok(()) => {
            debug!(pid, ?signal, "signalled process group");
            Ok(Signalled::Delivered)
        }
        Err(Errno::ESRCH) => match kill(target, signal) {
            Ok(()) => {
                debug!(pid, ?signal, "signalled process");
                Ok(Signalled::Delivered)
            }
            Err(Errno::ESRCH) => Ok(Signalled::NotRunning),
            Err(e) => Err(std::io::Error::from(e)),
        },
        Err(e) => Err(std::io::Error::from(e)),
    }
}

pub fn request_terminate(pid: u32) -> std::io::Result<Signalled> {
    signal_tree(pid, Signal::SIGTERM)
}

pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    signal_tree(pid, Signal::SIGKILL)
}

/// SIGKILL whatever is left in the group once its leader is gone. Never falls
/// back to a plain `kill`, the pid may already belong to someone else.
pub fn kill_group_stragglers(pid: u32) {
    if killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
        debug!(pid, "killed leftover group members");
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised comm.
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// When the process was started, from field 22 of `/proc/<pid>/stat` (clock
/// ticks after boot) and `btime` in `/proc/stat`. Accurate to about a second.
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    // `rest` starts at field 3 (state), so field 22 is index 19.
    let start_ticks: u64 = rest.split_whitespace().nth(19)?.parse().ok()?;

    let boot_secs: i64 = std::fs::read_to_string("/proc/stat")
        .ok()?
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;

    // SAFETY: sysconf has no preconditions.
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec <= 0 {
        return None;
    }
    let since_boot_ms = start_ticks.saturating_mul(1000) / ticks_per_sec as u64;
    DateTime::from_timestamp_millis(boot_secs * 1000 + since_boot_ms as i64)
}

#[cfg(not(target_os = "linux"))]
pub fn process_start_time(_pid: u32) -> Option<DateTime<Utc>> {
    None
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let port_hex = format!("{:04X}", port);

    let mut target_inode: Option<String> = None;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // fields[3] == "0A" is LISTEN
            if fields.len() < 10 || fields[3] != "0A" {
                continue;
            }
            if fields[1].rsplit(':').next() == Some(port_hex.as_str()) {
                target_inode = Some(fields[9].to_string());
                break;
            }
        }
        if target_inode.is_some() {
            break;
        }
    }

    let inode = target_inode?;
    if inode == "0" {
        return None;
    }
    let needle = format!("socket:[{}]", inode);

    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let pid_str = entry.file_name().to_string_lossy().to_string();
        if !pid_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid_str)) else {
            continue;
        };
        let owns = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| link.to_string_lossy() == needle)
                .unwrap_or(false)
        });
        if !owns {
            continue;
        }
        let cmd = std::fs::read_to_string(format!("/proc/{}/cmdline", pid_str))
            .map(|c| c.replace('\0', " ").trim().to_string())
            .unwrap_or_default();
        return Some(super::describe_process(&cmd, &pid_str));
    }

    None
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
