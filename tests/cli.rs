use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_tool() {
    Command::cargo_bin("pgsubset")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("subset"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--stats-json"));
}

#[test]
fn missing_configuration_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("pgsubset")
        .unwrap()
        .current_dir(dir.path())
        .env_clear()
        .assert()
        .failure();
}

#[test]
fn invalid_tenant_values_fail() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("pgsubset")
        .unwrap()
        .current_dir(dir.path())
        .env_clear()
        .env("KEY_TABLE_NAME", "tenant")
        .env("KEY_COLUMN_VALUES", "1,banana")
        .assert()
        .failure();
}
