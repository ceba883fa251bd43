//! Integration tests for the refstore CLI image removal commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn refstore(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("refstore"));
    cmd.arg("--data-dir").arg(data_dir).env_remove("RUST_LOG");
    cmd
}

/// Data directory holding a `busybox:latest` image
fn with_busybox() -> TempDir {
    let temp = tempfile::tempdir().unwrap();
    refstore(temp.path())
        .args(["import", "busybox"])
        .assert()
        .success();
    temp
}

fn stdout_of(data_dir: &Path, args: &[&str]) -> String {
    let output = refstore(data_dir).args(args).assert().success();
    String::from_utf8(output.get_output().stdout.clone()).unwrap()
}

fn image_lines(data_dir: &Path) -> usize {
    stdout_of(data_dir, &["images", "-a"]).matches('\n').count()
}

#[test]
fn rmi_with_container_fails() {
    let temp = with_busybox();
    let id = stdout_of(temp.path(), &["run", "-d", "busybox", "true"]);
    assert_eq!(id.trim().len(), 12);

    refstore(temp.path())
        .args(["rmi", "busybox"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is using it"));

    let images = stdout_of(temp.path(), &["images"]);
    assert!(images.contains("busybox"), "busybox name was removed: {images}");

    refstore(temp.path())
        .args(["rm", "-f", id.trim()])
        .assert()
        .success();
    refstore(temp.path())
        .args(["rmi", "busybox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Untagged: busybox:latest"))
        .stdout(predicate::str::contains("Deleted: "));
}

#[test]
fn rmi_tag() {
    let temp = with_busybox();
    let before = image_lines(temp.path());

    for target in ["utest:tag1", "utest/docker:tag2", "utest:5000/docker:tag3"] {
        refstore(temp.path())
            .args(["tag", "busybox", target])
            .assert()
            .success();
    }
    assert_eq!(image_lines(temp.path()), before + 3);

    refstore(temp.path())
        .args(["rmi", "utest/docker:tag2"])
        .assert()
        .success();
    assert_eq!(image_lines(temp.path()), before + 2);

    refstore(temp.path())
        .args(["rmi", "utest:5000/docker:tag3"])
        .assert()
        .success();
    assert_eq!(image_lines(temp.path()), before + 1);

    refstore(temp.path())
        .args(["rmi", "utest:tag1"])
        .assert()
        .success();
    assert_eq!(image_lines(temp.path()), before);
}

#[test]
fn rmi_tag_with_existing_containers() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["tag", "busybox:latest", "busybox:newtag"])
        .assert()
        .success();
    refstore(temp.path())
        .args(["run", "--name", "test-delete-tag", "busybox:latest", "/bin/true"])
        .assert()
        .success();

    let out = stdout_of(temp.path(), &["rmi", "busybox:newtag"]);
    assert_eq!(out.matches("Untagged: ").count(), 1, "{out}");
    assert!(!out.contains("Deleted: "), "{out}");
}

#[test]
fn rmi_force_with_existing_containers() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["build", "-t", "busybox-clone", "--created-by", "MAINTAINER foo", "busybox"])
        .assert()
        .success();
    refstore(temp.path())
        .args(["run", "--name", "test-force-rmi", "busybox-clone", "/bin/true"])
        .assert()
        .success();

    refstore(temp.path())
        .args(["rmi", "busybox-clone"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is using it"));

    refstore(temp.path())
        .args(["rmi", "-f", "busybox-clone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Untagged: busybox-clone:latest"))
        .stdout(predicate::str::contains("Deleted: "));

    // The base image is still tagged and survives
    let images = stdout_of(temp.path(), &["images"]);
    assert!(images.contains("busybox"));
    assert!(!images.contains("busybox-clone"));
}

#[test]
fn rmi_with_multiple_repositories() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["tag", "busybox", "127.0.0.1:5000/busybox"])
        .assert()
        .success();
    refstore(temp.path())
        .args(["run", "--name", "test", "busybox", "touch", "/home/abcd"])
        .assert()
        .success();
    refstore(temp.path())
        .args(["commit", "test", "busybox:test"])
        .assert()
        .success();

    refstore(temp.path())
        .args(["rmi", "busybox:test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Untagged: busybox:test"));
}

#[test]
fn rmi_by_id_reports_untags_before_failure() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["tag", "busybox", "repo1:x"])
        .assert()
        .success();
    let id = stdout_of(temp.path(), &["images", "-q"]);
    let id = id.lines().next().unwrap().to_string();
    refstore(temp.path())
        .args(["run", "-d", "busybox"])
        .assert()
        .success();

    refstore(temp.path())
        .args(["rmi", &id])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Untagged: busybox:latest"))
        .stdout(predicate::str::contains("Untagged: repo1:x"))
        .stderr(predicate::str::contains("is using it"));

    // Retrying the names is a benign not-found
    refstore(temp.path())
        .args(["rmi", "repo1:x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such image"));
}

#[test]
fn rmi_unknown_image_fails() {
    let temp = tempfile::tempdir().unwrap();
    refstore(temp.path())
        .args(["rmi", "nosuchimage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such image: nosuchimage"));
}

#[test]
fn rm_continues_past_missing_containers() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["run", "--name", "first", "busybox", "true"])
        .assert()
        .success();
    refstore(temp.path())
        .args(["run", "--name", "second", "busybox", "true"])
        .assert()
        .success();

    refstore(temp.path())
        .args(["rm", "first", "nosuchcontainer", "second"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("second"))
        .stderr(predicate::str::contains(
            "Error response from daemon: No such container: nosuchcontainer",
        ));

    let ps = stdout_of(temp.path(), &["ps", "-a", "-q"]);
    assert!(ps.trim().is_empty(), "containers left behind: {ps}");
}

#[test]
fn errors_share_one_prefix() {
    let temp = with_busybox();
    refstore(temp.path())
        .args(["tag", "nosuchimage", "other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Error response from daemon: No such image: nosuchimage",
        ));
    refstore(temp.path())
        .args(["history", "nosuchimage"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error response from daemon: "));
}
