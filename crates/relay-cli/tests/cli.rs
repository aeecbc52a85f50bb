use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn relay() -> Command {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.env_remove("RELAY_CONFIG").env_remove("RELAY_PORT");
    cmd
}

fn db_arg(dir: &TempDir) -> String {
    dir.path().join("running.redb").display().to_string()
}

#[test]
fn help_lists_commands() {
    relay()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("state"));
}

#[test]
fn state_requires_a_database() {
    relay()
        .args(["state", "show", "1011"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no state database"));
}

#[test]
fn show_unknown_store() {
    let dir = TempDir::new().unwrap();
    relay()
        .args(["state", "--db", &db_arg(&dir), "show", "1011"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no running state for store 1011"));
}

#[test]
fn stop_is_visible_in_show_and_cleared_again() {
    let dir = TempDir::new().unwrap();
    let db = db_arg(&dir);

    relay()
        .args(["state", "--db", &db, "stop", "1011", "products"])
        .assert()
        .success();

    relay()
        .args(["--json", "state", "--db", &db, "show", "1011"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""stop": "products""#));

    relay()
        .args(["state", "--db", &db, "clear-stop", "1011"])
        .assert()
        .success();

    relay()
        .args(["state", "--db", &db, "show", "1011"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stop:     -"));
}

#[test]
fn reset_store_appears_in_list() {
    let dir = TempDir::new().unwrap();
    let db = db_arg(&dir);

    relay()
        .args(["state", "--db", &db, "reset", "2022"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset running state for store 2022"));

    relay()
        .args(["state", "--db", &db, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2022"));
}

#[test]
fn config_file_supplies_database_path() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("relay.yaml");
    std::fs::write(
        &config,
        format!("server:\n  state_db: {}\n", db_arg(&dir)),
    )
    .unwrap();

    relay()
        .args(["--config", &config.display().to_string(), "state", "reset", "3033"])
        .assert()
        .success();
    assert!(dir.path().join("running.redb").exists());
}
