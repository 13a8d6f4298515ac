use crate::common::*;
use std::net::TcpListener;

#[test]
fn port_conflict_fails_the_service() {
    let port = free_port();

    // Bind the port ourselves so it is occupied
    let _listener = TcpListener::bind(("127.0.0.1", port)).unwrap();

    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-collision"

[[services]]
name = "web"
command = "sleep 30"
port = {port}
"#
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--json"]);
    assert_eq!(output.status.code(), Some(2));

    let report = stdout_json(&output);
    let web = &report["services"][0];
    assert_eq!(web["status"], "failed");
    assert!(
        web["error"].as_str().unwrap_or_default().contains(&port.to_string()),
        "Expected the tried port in the error, got: {}",
        web["error"]
    );
    assert!(!project.pid_file("web").exists());
}

#[tokio::test]
async fn fallback_port_reaches_dependent_env() {
    let ports = free_ports(3);
    let (taken, fallback, api_port) = (ports[0], ports[1], ports[2]);
    let _listener = TcpListener::bind(("127.0.0.1", taken)).unwrap();

    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-fallback"

[settings]
port_policy = "fallback"

[[services]]
name = "cache"
command = "python3 -m http.server $PORT --bind 127.0.0.1"
port = {taken}
fallback_ports = [{fallback}]
[services.health]
type = "tcp"

[[services]]
name = "api"
command = "env > api.env && exec python3 -m http.server $PORT --bind 127.0.0.1"
port = {api_port}
depends_on = ["cache"]
[services.health]
type = "tcp"
"#
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--json"]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "start failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = stdout_json(&output);
    assert_eq!(report["services"][0]["name"], "cache");
    assert_eq!(report["services"][0]["resolved_port"], fallback);

    let env = std::fs::read_to_string(project.dir.path().join("api.env")).unwrap();
    assert!(env.contains(&format!("ORCHESTRATE_CACHE_PORT={}", fallback)));
    assert!(env.contains(&format!(
        "ORCHESTRATE_CACHE_URL=http://127.0.0.1:{}",
        fallback
    )));
    assert!(env.contains(&format!("PORT={}", api_port)));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn non_ascii_port_owner_is_reported() {
    let port = free_port();
    // The comment puts multi-byte characters across the point where the
    // owner's command line is shortened.
    let script = format!(
        "#{}\nimport socket,sys,time\ns=socket.socket()\ns.bind(('127.0.0.1',int(sys.argv[1])))\ns.listen()\ntime.sleep(30)\n",
        "é".repeat(60)
    );
    let holder = std::process::Command::new("python3")
        .arg("-c")
        .arg(&script)
        .arg(port.to_string())
        .spawn()
        .unwrap();
    let holder_pid = holder.id();
    let _holder = scopeguard::guard(holder, |mut child| {
        let _ = child.kill();
        let _ = child.wait();
    });
    assert!(wait_for_port(port, std::time::Duration::from_secs(5)).await);

    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-owner"

[[services]]
name = "web"
command = "sleep 30"
port = {port}
port_policy = "fail"
"#
    ));
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start", "--json"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr);
    assert!(!stderr.contains("panicked"), "stderr: {}", stderr);

    let report = stdout_json(&output);
    let web = &report["services"][0];
    assert_eq!(web["status"], "failed");
    let error = web["error"].as_str().unwrap_or_default();
    assert!(error.contains(&port.to_string()), "error: {}", error);
    assert!(
        error.contains("held by python3 -c #é") && error.contains(&format!("(PID {})", holder_pid)),
        "error: {}",
        error
    );
}
