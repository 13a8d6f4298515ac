use crate::common::TestProject;
use orchestrate::config::resolve::{find_config, CONFIG_FILENAME};

#[test]
fn config_found_in_parent_directory() {
    let project = TestProject::new(
        r#"
[project]
name = "test-discovery"
"#,
    );

    let sub = project.dir.path().join("subdir");
    std::fs::create_dir(&sub).unwrap();

    let found = find_config(&sub, CONFIG_FILENAME);
    assert_eq!(found, Some(project.config_path.clone()));
}

#[test]
fn validate_from_nested_directory() {
    let project = TestProject::new(
        r#"
[project]
name = "test-discovery-nested"

[[services]]
name = "api"
command = "echo hi"
"#,
    );
    let sub = project.dir.path().join("a").join("b");
    std::fs::create_dir_all(&sub).unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .arg("validate")
        .current_dir(&sub)
        .output()
        .expect("failed to run orchestrate");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid (1 services)"), "got: {}", stdout);
}
