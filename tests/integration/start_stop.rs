use crate::common::*;
use std::time::Duration;

#[tokio::test]
async fn start_stop_lifecycle() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-lifecycle"

[[services]]
name = "web"
command = "{cmd}"
port = {port}
[services.health]
type = "http"
path = "/"
"#,
        cmd = http_server(port),
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start"]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "start failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(
        wait_for_port(port, Duration::from_secs(5)).await,
        "Service did not become reachable on port {port}"
    );
    assert!(project.pid_file("web").exists());

    let output = project.run(&["stop"]);
    assert!(output.status.success());
    assert!(!project.pid_file("web").exists(), "pid-file left behind");
    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );
}

#[tokio::test]
async fn second_start_adopts_running_service() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-idempotent"

[[services]]
name = "web"
command = "{cmd}"
port = {port}
[services.health]
type = "http"
path = "/"
"#,
        cmd = http_server(port),
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let first = project.run(&["start", "--json"]);
    assert_eq!(first.status.code(), Some(0));
    let pid = project.recorded_pid("web").expect("pid-file written");

    let second = project.run(&["start", "--json"]);
    assert_eq!(second.status.code(), Some(0));
    let report = stdout_json(&second);
    assert_eq!(report["services"][0]["already_running"], true);
    assert_eq!(report["services"][0]["pid"], pid);
    assert_eq!(project.recorded_pid("web"), Some(pid));
}

#[test]
fn stop_with_nothing_running_succeeds() {
    let project = TestProject::new(
        r#"
[project]
name = "test-idle-stop"

[[services]]
name = "web"
command = "sleep 30"
"#,
    );

    let output = project.run(&["stop"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not running"), "got: {}", stdout);
}
