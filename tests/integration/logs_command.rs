use crate::common::*;

#[test]
fn logs_tail_prints_last_lines() {
    let project = TestProject::new(
        r#"
[project]
name = "test-logs"

[[services]]
name = "chatty"
command = "echo one; echo two; echo three; exec sleep 30"
"#,
    );
    let _guard = scopeguard::guard((), |_| project.stop_all());

    let output = project.run(&["start"]);
    assert_eq!(output.status.code(), Some(0));

    let output = project.run(&["logs", "chatty", "--tail", "2"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "two\nthree\n");
}

#[test]
fn logs_for_unknown_service_exits_one() {
    let project = TestProject::new(
        r#"
[project]
name = "test-logs-unknown"

[[services]]
name = "api"
command = "sleep 30"
"#,
    );

    let output = project.run(&["logs", "nope"]);
    assert_eq!(output.status.code(), Some(1));
}
