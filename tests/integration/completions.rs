use assert_cmd::Command;
use predicates::prelude::*;

fn completions(shell: &str) -> assert_cmd::assert::Assert {
    Command::new(env!("CARGO_BIN_EXE_orchestrate"))
        .args(["completions", shell])
        .assert()
}

#[test]
fn completions_bash_generates_output() {
    completions("bash")
        .success()
        .stdout(predicate::str::contains("orchestrate"))
        .stdout(predicate::str::contains("restart"));
}

#[test]
fn completions_zsh_generates_output() {
    completions("zsh")
        .success()
        .stdout(predicate::str::contains("orchestrate"));
}

#[test]
fn completions_fish_generates_output() {
    completions("fish")
        .success()
        .stdout(predicate::str::contains("orchestrate"));
}

#[test]
fn completions_reject_unknown_shell() {
    completions("tcsh").failure();
}
