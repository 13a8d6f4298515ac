use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

/// Outcome of delivering a signal to a recorded pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signalled {
    Delivered,
    NotRunning,
}

/// Create a platform-appropriate shell command.
/// Unix: `sh -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Put the child in its own process group so it survives the orchestrator's
/// exit and can be signalled as a tree.
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Ask the process (group) led by `pid` to shut down gracefully.
pub fn request_terminate(pid: u32) -> std::io::Result<Signalled> {
    imp::request_terminate(pid)
}

/// Forcefully kill the process (group) led by `pid`.
pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    imp::force_kill(pid)
}

/// Best-effort cleanup of group members that outlived the group leader.
pub fn kill_group_stragglers(pid: u32) {
    if pid != 0 {
        imp::kill_group_stragglers(pid)
    }
}

/// Check if a process with the given PID is still alive. Zombies count as
/// dead.
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0 && imp::is_process_alive(pid)
}

/// Start time of a running process, where the platform exposes it.
pub fn process_start_time(pid: u32) -> Option<chrono::DateTime<chrono::Utc>> {
    imp::process_start_time(pid)
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return format!("{}/{}", home, rest);
        }
        if let Some(rest) = path
            .strip_prefix("$HOME/")
            .or_else(|| path.strip_prefix("$HOME\\"))
        {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

/// Identify which process owns a given TCP port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    imp::identify_port_owner(port)
}

/// `<cmdline> (PID n)`, with the command line cut to 60 characters.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn describe_process(cmdline: &str, pid: &str) -> String {
    const MAX_CHARS: usize = 60;
    if cmdline.is_empty() {
        return format!("PID {}", pid);
    }
    if cmdline.chars().count() > MAX_CHARS {
        let head: String = cmdline.chars().take(MAX_CHARS - 3).collect();
        return format!("{}... (PID {})", head, pid);
    }
    format!("{} (PID {})", cmdline, pid)
}

/// Shell name for log messages.
pub fn shell_name() -> &'static str {
    imp::SHELL_NAME
}
