use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("lumenctl");
    let output = cmd
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    for sub in ["fetch", "clear", "address", "where"] {
        assert!(text.contains(sub), "help missing '{sub}'");
    }
}

#[test]
fn fetch_help_documents_cancellation() {
    let mut cmd = cargo_bin_cmd!("lumenctl");
    cmd.args(["fetch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cancel-after"))
        .stdout(predicate::str::contains("--file"));
}

#[test]
fn address_prints_sha256_hex() {
    let mut cmd = cargo_bin_cmd!("lumenctl");
    cmd.args(["address", "https://example.com/"])
        .assert()
        .success()
        .stdout(
            "0f115db062b7c0dd030b16878c99dea5c354b49dc37b38eb8846179c7783e9d7\n",
        );
}

#[test]
fn address_rejects_malformed_urls() {
    let mut cmd = cargo_bin_cmd!("lumenctl");
    cmd.args(["address", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid resource id"));
}

#[test]
fn where_reports_missing_entry_under_cache_dir() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("lumenctl");
    cmd.arg("--cache-dir")
        .arg(dir.path())
        .args(["where", "https://example.com/"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "0f115db062b7c0dd030b16878c99dea5c354b49dc37b38eb8846179c7783e9d7.png",
        ))
        .stdout(predicate::str::ends_with("missing\n"));
}

#[test]
fn fetch_from_unreachable_host_fails() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("lumenctl");
    cmd.arg("--cache-dir")
        .arg(dir.path())
        .args(["fetch", "http://127.0.0.1:9/a.png"])
        .assert()
        .failure()
        .stdout(predicate::str::starts_with("error\t"));
}
