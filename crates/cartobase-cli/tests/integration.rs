use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cartobase(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cartobase").unwrap();
    cmd.current_dir(dir.path());
    cmd.env_remove("CARTOBASE_CONFIG");
    cmd.env_remove("GTFS_CONFIG");
    cmd.env_remove("GTFS_LOG_LEVEL");
    cmd.env_remove("PGPASSWORD");
    cmd
}

fn write_config(dir: &TempDir, body: &str) {
    std::fs::write(dir.path().join("cartobase.yml"), body).unwrap();
}

// ---------------------------------------------------------------------------
// global surface
// ---------------------------------------------------------------------------

#[test]
fn help_lists_every_flow() {
    let dir = TempDir::new().unwrap();
    cartobase(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("external"))
        .stdout(predicate::str::contains("gtfs"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn version_flag_works() {
    let dir = TempDir::new().unwrap();
    cartobase(&dir).arg("--version").assert().success();
}

// ---------------------------------------------------------------------------
// cartobase config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_passes_a_clean_file() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "settings: {}\nsources:\n  water_polygons:\n    url: https://example.org/water.zip\n",
    );

    cartobase(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No warnings"));
}

#[test]
fn config_validate_rejects_hostile_table_name() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "settings: {}\nsources:\n  \"robert'; drop table x;--\":\n    url: https://example.org/x.zip\n",
    );

    cartobase(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid table name"))
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn config_validate_without_a_file_fails() {
    let dir = TempDir::new().unwrap();
    cartobase(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn config_show_redacts_the_password() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "settings:\n  database:\n    dbname: gis\n    password: hunter2\n",
    );

    cartobase(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("hunter2").not());
}

// ---------------------------------------------------------------------------
// cartobase external
// ---------------------------------------------------------------------------

#[test]
fn external_refuses_identical_schemas() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "settings:\n  schema: loading\n  staging_schema: loading\nsources:\n  water:\n    url: https://example.org/water.zip\n",
    );

    // rejected during validation, before any database or network contact
    cartobase(&dir)
        .args(["external", "--no-update"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("distinct schemas"))
        .stderr(predicate::str::contains("config validation found errors"));
}

// ---------------------------------------------------------------------------
// cartobase gtfs
// ---------------------------------------------------------------------------

#[test]
fn gtfs_without_feed_config_fails() {
    let dir = TempDir::new().unwrap();
    cartobase(&dir)
        .arg("gtfs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn gtfs_rejects_an_empty_feed_list() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("gtfs.json"), "{ \"feeds\": [] }").unwrap();

    cartobase(&dir)
        .arg("gtfs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no GTFS feeds configured"));
}

// ---------------------------------------------------------------------------
// cartobase deploy
// ---------------------------------------------------------------------------

#[test]
fn deploy_reports_an_empty_manifest_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("manifests")).unwrap();

    cartobase(&dir)
        .arg("deploy")
        .assert()
        .success()
        .stdout(predicate::str::contains("No manifests"));
}

#[test]
fn deploy_with_a_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    cartobase(&dir)
        .args(["deploy", "--manifests", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
