use crate::common::TestProject;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn validate_valid_config() {
    let project = TestProject::new(
        r#"
        [project]
        name = "test"

        [[services]]
        name = "api"
        command = "echo hi"
        port = 3000
        depends_on = ["db"]

        [[services]]
        name = "db"
        command = "echo db"
        port = 5432
    "#,
    );

    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["-f", project.config(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (2 services)"))
        .stdout(predicate::str::contains("db -> api"));
}

#[test]
fn validate_catches_duplicate_ports() {
    let project = TestProject::new(
        r#"
        [project]
        name = "test"

        [[services]]
        name = "api"
        command = "echo a"
        port = 3000

        [[services]]
        name = "web"
        command = "echo b"
        port = 3000
    "#,
    );

    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["-f", project.config(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("3000"));
}

#[test]
fn validate_suggests_close_dependency_name() {
    let project = TestProject::new(
        r#"
        [project]
        name = "test"

        [[services]]
        name = "redis"
        command = "echo r"

        [[services]]
        name = "api"
        command = "echo a"
        depends_on = ["rediss"]
    "#,
    );

    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["-f", project.config(), "validate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("redis"));
}

#[test]
fn validate_catches_empty_accept_list() {
    let project = TestProject::new(
        r#"
        [project]
        name = "test"

        [[services]]
        name = "api"
        command = "echo a"
        port = 3000
        [services.health]
        type = "http"
        accept = []
    "#,
    );

    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["-f", project.config(), "validate"])
        .assert()
        .code(1);
}
