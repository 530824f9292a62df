#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// Nothing listens on the discard port, so every remote call fails fast
const DEAD_API: &str = "http://127.0.0.1:9";

fn stitchkeep(home: &Path) -> Command {
    let mut cmd = Command::new(cargo_bin("stitchkeep"));
    cmd.env("STITCHKEEP_HOME", home.as_os_str())
        .env("STITCHKEEP_API_URL", DEAD_API)
        .env("NO_COLOR", "1")
        .env_remove("STITCHKEEP_API_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

fn write_sample(dir: &Path) -> std::path::PathBuf {
    let file = dir.join("sample.json");
    fs::write(
        &file,
        r#"{
            "inventory": [
                {
                    "id": "hoop-a-1", "name": "Hoop A", "status": "pending",
                    "price": 12, "description": "wooden hoop"
                },
                {"id": "floss-1", "name": "Floss", "status": "sold", "price": 3}
            ],
            "customers": [], "sales": [], "gallery": [], "ideas": [], "invoices": []
        }"#,
    )
    .unwrap();
    file
}

#[test]
fn fresh_home_has_no_snapshots() {
    let temp = TempDir::new().unwrap();
    stitchkeep(temp.path())
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots."));
}

#[test]
fn status_reports_local_fallback() {
    let temp = TempDir::new().unwrap();
    stitchkeep(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("unavailable"))
        .stdout(predicate::str::contains("local store"));
}

#[test]
fn import_search_and_export_offline() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("home");
    let sample = write_sample(temp.path());

    stitchkeep(&home)
        .arg("import")
        .arg(&sample)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 items"))
        .stdout(predicate::str::contains("Saved locally"));

    stitchkeep(&home)
        .args(["search", "inventory", "hoop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hoop A"))
        .stdout(predicate::str::contains("Floss").not());

    stitchkeep(&home)
        .args(["filter", "inventory", "--status", "pending,sold", "--min-price", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hoop A"))
        .stdout(predicate::str::contains("1 matching"));

    let out = temp.path().join("out.json.gz");
    stitchkeep(&home)
        .arg("export")
        .arg(&out)
        .arg("--gzip")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 items"));
    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    stitchkeep(&home)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pre-import"));

    stitchkeep(&home)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 2 items"));
}

#[test]
fn malformed_import_is_rejected() {
    let temp = TempDir::new().unwrap();
    let bad = temp.path().join("bad.json");
    fs::write(&bad, r#"{"inventory": "not a list"}"#).unwrap();

    stitchkeep(temp.path())
        .arg("import")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Restore rejected"));
}

#[test]
fn unknown_snapshot_is_an_error() {
    let temp = TempDir::new().unwrap();
    stitchkeep(temp.path())
        .args(["backup", "restore", "12345"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Snapshot not found"));
}

#[test]
fn saved_search_via_filter() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("home");
    let sample = write_sample(temp.path());
    stitchkeep(&home).arg("import").arg(&sample).assert().success();

    stitchkeep(&home)
        .args(["filter", "inventory", "--status", "sold", "--save-as", "Sold stock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved search 'Sold stock'"));

    stitchkeep(&home)
        .args(["saved", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sold stock"));
}
