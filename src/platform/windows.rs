use tokio::process::Command;
use tracing::debug;

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, CREATE_NEW_PROCESS_GROUP,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE,
};

use super::Signalled;

pub const SHELL_NAME: &str = "cmd.exe /C";

const STILL_ACTIVE: u32 = 259;

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub fn request_terminate(pid: u32) -> std::io::Result<Signalled> {
    if !is_process_alive(pid) {
        return Ok(Signalled::NotRunning);
    }
    // SAFETY: plain Win32 call; the group id is the pid of a
    // CREATE_NEW_PROCESS_GROUP child.
    let sent = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if sent == 0 {
        return Err(std::io::Error::last_os_error());
    }
    debug!(pid, "sent CTRL_BREAK_EVENT");
    Ok(Signalled::Delivered)
}

pub fn force_kill(pid: u32) -> std::io::Result<Signalled> {
    // SAFETY: the handle is checked for null and closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return Ok(Signalled::NotRunning);
        }
        let ok = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if ok == 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(Signalled::Delivered)
}

pub fn kill_group_stragglers(_pid: u32) {}

pub fn is_process_alive(pid: u32) -> bool {
    // SAFETY: the handle is checked for null and closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        result != 0 && exit_code == STILL_ACTIVE
    }
}

pub fn identify_port_owner(_port: u16) -> Option<String> {
    // TODO: implement via GetExtendedTcpTable from Win32_NetworkManagement_IpHelper
    None
}

pub fn process_start_time(_pid: u32) -> Option<chrono::DateTime<chrono::Utc>> {
    None
}
