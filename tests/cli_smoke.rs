//! Behavioural smoke tests for the CLI entrypoint. None of these reach the
//! provider.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use predicates::prelude::*;
use tempfile::TempDir;

/// Runs `linvol` in an empty directory with no ambient configuration.
fn isolated(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("linvol");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("LINVOL_TOKEN")
        .env_remove("LINVOL_MOUNT_ROOT")
        .env_remove("LINVOL_CONFIG_PATH");
    cmd
}

fn tempdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn no_arguments_prints_usage() {
    let dir = tempdir();
    isolated(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn capabilities_report_global_scope() {
    let dir = tempdir();
    isolated(&dir)
        .arg("capabilities")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""scope": "global""#));
}

#[test]
fn path_uses_configured_mount_root() {
    let dir = tempdir();
    isolated(&dir)
        .env("LINVOL_MOUNT_ROOT", "/srv/volumes")
        .args(["path", "db-data"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""mountpoint": "/srv/volumes/db-data""#));
}

#[test]
fn path_reads_mount_root_from_config_file() {
    let dir = tempdir();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write("custom.toml", "mount_root = \"/data/linode\"\n")
        .unwrap_or_else(|err| panic!("write config: {err}"));

    isolated(&dir)
        .env("LINVOL_CONFIG_PATH", root.join("custom.toml").as_str())
        .args(["path", "cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/data/linode/cache"));
}

#[test]
fn path_rejects_traversal() {
    let dir = tempdir();
    isolated(&dir)
        .args(["path", "../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid volume name"));
}

#[test]
fn provider_commands_require_a_token() {
    let dir = tempdir();
    isolated(&dir)
        .arg("list")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("LINVOL_TOKEN"));
}

#[test]
fn relative_mount_root_is_rejected() {
    let dir = tempdir();
    isolated(&dir)
        .env("LINVOL_MOUNT_ROOT", "volumes")
        .args(["path", "db-data"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("LINVOL_MOUNT_ROOT"));
}
