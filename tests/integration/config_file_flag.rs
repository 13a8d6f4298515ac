use crate::common::*;
use std::time::Duration;

#[tokio::test]
async fn custom_config_file() {
    let port = free_port();
    let dir = tempfile::TempDir::new().unwrap();
    let custom_path = dir.path().join("custom.toml");
    std::fs::write(
        &custom_path,
        format!(
            r#"
[project]
name = "test-custom"

[[services]]
name = "web"
command = "{cmd}"
port = {port}
[services.health]
type = "tcp"
"#,
            cmd = http_server(port),
        ),
    )
    .unwrap();
    let config = custom_path.to_str().unwrap().to_string();
    let run = |args: &[&str]| {
        std::process::Command::new(env!("CARGO_BIN_EXE_orchestrate"))
            .args(["-f", &config])
            .args(args)
            .env_remove("ORCHESTRATE_RUN_DIR")
            .output()
            .expect("failed to run orchestrate")
    };
    let _guard = scopeguard::guard((), |_| {
        let _ = run(&["stop"]);
    });

    let output = run(&["start"]);
    assert!(output.status.success());
    assert!(
        wait_for_port(port, Duration::from_secs(5)).await,
        "Service did not start with custom config"
    );
    assert!(dir.path().join(".orchestrate/pids/web.pid").exists());
}

#[test]
fn missing_config_file_exits_one() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["-f", "/nonexistent/orchestrate.toml", "status"])
        .output()
        .expect("failed to run orchestrate");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Config file not found"), "got: {}", stderr);
}

#[test]
fn run_dir_override_from_env() {
    let project = TestProject::new(
        r#"
[project]
name = "test-run-dir"

[[services]]
name = "worker"
command = "sleep 30"
"#,
    );
    let custom = project.dir.path().join("state");
    let run = |args: &[&str]| {
        std::process::Command::new(env!("CARGO_BIN_EXE_orchestrate"))
            .args(["-f", project.config()])
            .args(args)
            .env("ORCHESTRATE_RUN_DIR", &custom)
            .output()
            .expect("failed to run orchestrate")
    };
    let _guard = scopeguard::guard((), |_| {
        let _ = run(&["stop"]);
    });

    let output = run(&["start"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(custom.join("pids/worker.pid").exists());
    assert!(!project.run_dir().exists());
}
