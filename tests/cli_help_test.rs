// CLI surface tests: help output, argument validation, offline commands

use assert_cmd::Command;
use predicates::prelude::*;

fn cli_in(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("scrape-orchestrator").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    cli_in(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("work-orders"))
        .stdout(predicate::str::contains("dispensers"))
        .stdout(predicate::str::contains("dispenser"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("markers"));
}

#[test]
fn test_dispensers_help_mentions_ids() {
    let dir = tempfile::tempdir().unwrap();
    cli_in(dir.path())
        .args(["dispensers", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--ids"))
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn test_user_is_required() {
    let dir = tempfile::tempdir().unwrap();
    cli_in(dir.path())
        .arg("work-orders")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--user"));
}

#[test]
fn test_single_dispenser_needs_work_order_id() {
    let dir = tempfile::tempdir().unwrap();
    cli_in(dir.path())
        .args(["dispenser", "--user", "user-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WORK_ORDER_ID"));
}

#[test]
fn test_markers_with_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("orchestrator.toml");
    std::fs::write(
        &config,
        format!(
            "[markers]\ndirectory = \"{}\"\n",
            dir.path().join("markers").display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    cli_in(dir.path())
        .args(["markers", "--user", "user-1", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No session markers for user-1"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    cli_in(dir.path())
        .args(["markers", "--user", "user-1", "--config", "does-not-exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_start_is_rejected_while_earlier_job_runs() {
    use scrape_orchestrator::{FileStore, JobKind, SessionMarkers};
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    let marker_dir = dir.path().join("markers");
    let markers = SessionMarkers::new(Arc::new(FileStore::new(&marker_dir).unwrap()));
    markers.write("user-1", JobKind::WorkOrderScrape, chrono::Utc::now(), Default::default());

    let config = dir.path().join("orchestrator.toml");
    std::fs::write(
        &config,
        format!(
            "[backend]\nbase_url = \"http://127.0.0.1:9\"\n\n[markers]\ndirectory = \"{}\"\n",
            marker_dir.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    cli_in(dir.path())
        .args(["dispenser", "WO-1", "--user", "user-1", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Another operation is in progress"))
        .stdout(predicate::str::contains("resume"));

    // The running job's marker is left for `resume`
    assert!(markers.read("user-1", JobKind::WorkOrderScrape).is_some());
}
