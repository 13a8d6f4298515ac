use crate::common::*;

#[test]
fn cycle_exits_one_without_side_effects() {
    let project = TestProject::new(
        r#"
[project]
name = "test-cycle"

[[services]]
name = "a"
command = "sleep 30"
depends_on = ["b"]

[[services]]
name = "b"
command = "sleep 30"
depends_on = ["a"]
"#,
    );

    let output = project.run(&["start"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cycle"), "got: {}", stderr);
    assert!(!project.run_dir().exists(), "run directory was created");
}

#[test]
fn duplicate_name_exits_one() {
    let project = TestProject::new(
        r#"
[project]
name = "test-duplicate"

[[services]]
name = "api"
command = "sleep 30"

[[services]]
name = "api"
command = "sleep 30"
"#,
    );

    let output = project.run(&["start"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!project.run_dir().exists());
}

#[test]
fn unknown_only_name_exits_one() {
    let project = TestProject::new(
        r#"
[project]
name = "test-unknown-only"

[[services]]
name = "api"
command = "sleep 30"
"#,
    );

    let output = project.run(&["start", "--only", "nope"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown service 'nope'"), "got: {}", stderr);
    assert!(!project.run_dir().exists());
}

#[test]
fn unreadable_config_exits_one() {
    let project = TestProject::new("this is = = not toml");
    let output = project.run(&["status"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "got: {}", stderr);
}
