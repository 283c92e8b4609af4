use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_no_subcommand_shows_task_flow() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("tackle").unwrap();

    cmd.current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("tackle start <task>"))
        .stdout(predicate::str::contains("tackle sync"))
        .stdout(predicate::str::contains("tackle cleanup --dry-run"));
}

#[test]
fn test_help_lists_every_command() {
    let output = Command::cargo_bin("tackle").unwrap().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    for command in [
        "start", "review", "ship", "sync", "auto-sync", "resolve", "dedupe", "cleanup", "agent-event",
        "health",
    ] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn test_resolve_requires_a_known_side() {
    let mut cmd = Command::cargo_bin("tackle").unwrap();

    cmd.args(["resolve", "t1", "--keep", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("local"));
}

#[test]
fn test_agent_event_requires_cwd() {
    let mut cmd = Command::cargo_bin("tackle").unwrap();

    cmd.args(["agent-event", "--kind", "session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--cwd"));
}
