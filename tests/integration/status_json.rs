use crate::common::*;

#[test]
fn status_reports_running_and_stopped_services() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-status"

[[services]]
name = "web"
command = "{cmd}"
port = {port}
[services.health]
type = "http"
path = "/"

[[services]]
name = "docs"
command = "sleep 30"
optional = true
"#,
        cmd = http_server(port),
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--only", "web"]);
    assert_eq!(output.status.code(), Some(0));

    let output = project.run(&["status", "--json"]);
    // docs is optional and not running
    assert_eq!(output.status.code(), Some(3));
    let report = stdout_json(&output);
    assert_eq!(report["project"], "test-status");
    assert_eq!(report["services"][0]["name"], "web");
    assert_eq!(report["services"][0]["status"], "healthy");
    assert_eq!(report["services"][0]["resolved_port"], port);
    assert_eq!(report["services"][1]["name"], "docs");
    assert_eq!(report["services"][1]["status"], "not-running");
}

#[test]
fn status_before_any_start() {
    let project = TestProject::new(
        r#"
[project]
name = "test-status-idle"

[[services]]
name = "web"
command = "sleep 30"
"#,
    );

    let output = project.run(&["status", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let report = stdout_json(&output);
    assert_eq!(report["overall"], "failed");
    assert_eq!(report["services"][0]["status"], "not-running");
}
