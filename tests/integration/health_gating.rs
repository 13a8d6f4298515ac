use crate::common::*;

fn never_healthy(name: &str, port: u16, optional: bool) -> String {
    format!(
        r#"
[[services]]
name = "{name}"
command = "sleep 30"
port = {port}
optional = {optional}
[services.health]
type = "tcp"
interval_ms = 100
max_attempts = 5
timeout_secs = 5
"#
    )
}

#[test]
fn hard_failure_blocks_transitive_dependents() {
    let ports = free_ports(3);
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-hard-failure"
{redis}
[[services]]
name = "mcp-memory"
command = "sleep 30"
port = {memory}
depends_on = ["redis"]

[[services]]
name = "api"
command = "sleep 30"
port = {api}
depends_on = ["mcp-memory"]
"#,
        redis = never_healthy("redis", ports[0], false),
        memory = ports[1],
        api = ports[2],
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--json"]);
    assert_eq!(output.status.code(), Some(2));

    let report = stdout_json(&output);
    assert_eq!(report["overall"], "failed");
    assert_eq!(report["services"][0]["status"], "timeout");
    assert_eq!(report["services"][1]["status"], "blocked");
    assert_eq!(report["services"][2]["status"], "blocked");
    assert!(!project.pid_file("mcp-memory").exists());
    assert!(!project.pid_file("api").exists());
}

#[test]
fn optional_timeout_is_degraded() {
    let ports = free_ports(2);
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-degraded"

[[services]]
name = "worker"
command = "sleep 30"
{ui}
"#,
        ui = never_healthy("ui", ports[1], true),
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--json"]);
    assert_eq!(output.status.code(), Some(3));

    let report = stdout_json(&output);
    assert_eq!(report["overall"], "degraded");
    assert_eq!(report["services"][0]["status"], "healthy");
    assert_eq!(report["services"][1]["status"], "timeout");
    assert!(project.recorded_pid("worker").is_some());
}

#[test]
fn run_timeout_cancels_and_cleans_up() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-run-timeout"

[[services]]
name = "slow"
command = "sleep 30"
port = {port}
[services.health]
type = "tcp"
interval_ms = 200
max_attempts = 100
timeout_secs = 60
"#
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--timeout", "1", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let report = stdout_json(&output);
    assert_eq!(report["services"][0]["status"], "cancelled");
    assert!(!project.pid_file("slow").exists(), "spawned service not cleaned up");
}
