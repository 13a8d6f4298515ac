#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Output;
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("orchestrate.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    pub fn config(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.dir.path().join(".orchestrate")
    }

    pub fn pid_file(&self, service: &str) -> PathBuf {
        self.run_dir().join("pids").join(format!("{}.pid", service))
    }

    /// Run the binary against this project and wait for it to finish.
    pub fn run(&self, args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_orchestrate"))
            .arg("-f")
            .arg(self.config())
            .args(args)
            .env_remove("ORCHESTRATE_RUN_DIR")
            .output()
            .expect("failed to run orchestrate")
    }

    /// Stop everything this project started. Safe to call from a drop guard.
    pub fn stop_all(&self) {
        let _ = self.run(&["stop"]);
    }

    pub fn recorded_pid(&self, service: &str) -> Option<u32> {
        let content = std::fs::read_to_string(self.pid_file(service)).ok()?;
        let v: serde_json::Value = serde_json::from_str(&content).ok()?;
        v["pid"].as_u64().map(|p| p as u32)
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn free_ports(count: usize) -> Vec<u16> {
    // Bind all at once to avoid reuse, then drop
    let listeners: Vec<_> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    let ports: Vec<_> = listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect();
    drop(listeners);
    ports
}

pub async fn wait_for_port(port: u16, timeout: std::time::Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: std::time::Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

pub fn http_server(port: u16) -> String {
    format!("python3 -m http.server {port} --bind 127.0.0.1")
}
