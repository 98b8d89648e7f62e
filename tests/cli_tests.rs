// CLI smoke tests: help output and a deposit → register → sense → claim
// session against a throwaway database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn swarm_field(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("swarm-field").unwrap();
    cmd.current_dir(dir)
        .arg("--config")
        .arg(dir.join("swarm-field.toml"))
        .env("RUST_LOG", "warn");
    cmd
}

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state").join("field.db");
    std::fs::write(
        dir.path().join("swarm-field.toml"),
        format!("[database]\nurl = \"sqlite://{}\"\n", db.display()),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("plan.json"),
        r#"{
            "node_type": "spec",
            "title": "Billing service",
            "children": [
                {"key": "schema", "node_type": "task", "title": "Design schema",
                 "affinity": ["backend"], "potential": 0.9},
                {"node_type": "task", "title": "Write handlers",
                 "affinity": ["backend"], "potential": 0.4, "blocked_by": ["schema"]}
            ]
        }"#,
    )
    .unwrap();
    dir
}

#[test]
fn test_help_lists_coordination_commands() {
    let mut cmd = Command::cargo_bin("swarm-field").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sense"))
        .stdout(predicate::str::contains("claim"))
        .stdout(predicate::str::contains("deposit"))
        .stdout(predicate::str::contains("sweep"));
}

#[test]
fn test_no_subcommand_explains_getting_started() {
    let dir = workspace();
    swarm_field(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("To get started"));
}

#[test]
fn test_deposit_register_sense_session() {
    let dir = workspace();

    swarm_field(dir.path())
        .arg("migrate")
        .assert()
        .success();

    swarm_field(dir.path())
        .args(["deposit", "--file", "plan.json", "--created-by", "planner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deposited"))
        .stdout(predicate::str::contains("(schema)"));

    swarm_field(dir.path())
        .args(["agent", "register", "coder", "--affinity", "backend", "--id", "coder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered agent coder-1"));

    // The blocked handler task is not offered, only the schema task
    swarm_field(dir.path())
        .args(["sense", "coder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 candidates for coder-1"))
        .stdout(predicate::str::contains("Design schema"))
        .stdout(predicate::str::contains("Write handlers").not());

    swarm_field(dir.path())
        .args(["claim", "coder-1", "no-such-node"])
        .assert()
        .failure();

    swarm_field(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("FIELD OVERVIEW"))
        .stdout(predicate::str::contains("coder-1"));
}

#[test]
fn test_invalid_deposit_file_fails() {
    let dir = workspace();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    swarm_field(dir.path())
        .args(["deposit", "--file", "broken.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken.json"));
}
