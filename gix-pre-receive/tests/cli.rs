//! The hook binary, run against the `release-history.sh` fixture and installed into a repository
//! receiving real pushes.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use gix_hash::ObjectId;
use gix_pre_receive::backend::{Backend, GixBackend};
use gix_testtools::scripted_fixture_read_only;
use predicates::prelude::*;

const NULL: &str = "0000000000000000000000000000000000000000";

fn fixture() -> gix_testtools::Result<PathBuf> {
    scripted_fixture_read_only("release-history.sh")
}

fn tip(repo: &Path, name: &str) -> ObjectId {
    GixBackend::open(repo)
        .unwrap()
        .resolve_ref(name)
        .unwrap()
        .unwrap_or_else(|| panic!("{name} exists in fixture"))
}

fn bare_hook(repo: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gix-pre-receive").unwrap();
    cmd.env_remove("GIT_DIR")
        .env_remove("GIT_CONFIG_SYSTEM")
        .env_remove("GIT_CONFIG_NOSYSTEM")
        .env_remove("RUST_LOG")
        .arg("--git-dir")
        .arg(repo);
    cmd
}

/// The hook with the deployer configured as `committer@example.com`.
fn hook(repo: &Path) -> Command {
    let mut cmd = bare_hook(repo);
    cmd.arg("--system-config").arg(repo.join("protect.gitconfig"));
    cmd
}

#[test]
fn accepted_push_is_silent() -> gix_testtools::Result {
    let repo = fixture()?;
    let b = tip(&repo, "refs/tags/base");
    let c = tip(&repo, "refs/heads/master");

    hook(&repo)
        .write_stdin(format!("{b} {c} refs/heads/master\n{NULL} {c} refs/heads/feature\n"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
    Ok(())
}

#[test]
fn rejected_push_reports_its_reason() -> gix_testtools::Result {
    let repo = fixture()?;
    let c = tip(&repo, "refs/heads/master");

    hook(&repo)
        .write_stdin(format!("{c} {NULL} refs/heads/master\n"))
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains(
            "Branch master is protected, no one can delete or force push",
        ));
    Ok(())
}

#[test]
fn deployer_is_read_from_configuration() -> gix_testtools::Result {
    let repo = fixture()?;
    let d = tip(&repo, "refs/tags/v1.0");

    hook(&repo)
        .write_stdin(format!("{d} {NULL} refs/tags/v1.0\n"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("The release tag is protected"));

    bare_hook(&repo)
        .env("GIT_CONFIG_SYSTEM", repo.join("protect.gitconfig"))
        .args(["--system-config", "/does/not/exist"])
        .write_stdin(format!("{d} {NULL} refs/tags/v1.0\n"))
        .assert()
        .success()
        .stderr(predicate::str::contains("no deployer identity configured"));
    Ok(())
}

#[test]
fn system_configuration_is_found_through_the_environment() -> gix_testtools::Result {
    let repo = fixture()?;
    let d = tip(&repo, "refs/tags/v1.0");

    let mut cmd = Command::cargo_bin("gix-pre-receive")?;
    cmd.env_remove("RUST_LOG")
        .env_remove("GIT_CONFIG_NOSYSTEM")
        .env("GIT_DIR", &repo)
        .env("GIT_CONFIG_SYSTEM", repo.join("protect.gitconfig"))
        .write_stdin(format!("{d} {NULL} refs/tags/v1.0\n"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("The release tag is protected"));
    Ok(())
}

#[test]
fn deployer_can_be_overridden() -> gix_testtools::Result {
    let repo = fixture()?;
    let d = tip(&repo, "refs/tags/v1.0");

    hook(&repo)
        .args(["--deployer-email", "someone@example.com"])
        .write_stdin(format!("{d} {NULL} refs/tags/v1.0\n"))
        .assert()
        .success();
    Ok(())
}

#[test]
fn release_branch_rules() -> gix_testtools::Result {
    let repo = fixture()?;
    let e = tip(&repo, "refs/heads/release/1.0");
    let g = tip(&repo, "refs/heads/rewrite");
    let x = tip(&repo, "refs/heads/unrelated");

    hook(&repo)
        .write_stdin(format!("{e} {g} refs/heads/release/1.0\n"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("The release branch tagged"));

    hook(&repo)
        .write_stdin(format!("{NULL} {x} refs/heads/release/2.0\n"))
        .assert()
        .code(1);

    hook(&repo)
        .write_stdin(format!("{NULL} {g} refs/heads/release/2.0\n"))
        .assert()
        .success();
    Ok(())
}

#[test]
fn malformed_input_is_fatal() -> gix_testtools::Result {
    let repo = fixture()?;

    hook(&repo)
        .write_stdin("not an update\n")
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("fatal:").and(predicate::str::contains("line 1")));
    Ok(())
}

#[test]
fn missing_repository_is_fatal() {
    hook(Path::new("/does/not/exist"))
        .write_stdin(format!("{NULL} {NULL} refs/heads/master\n"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("fatal: could not open repository"));
}

/// Install the binary as `pre-receive` hook of the bare repository at `remote`.
#[cfg(unix)]
fn install_hook(remote: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let hooks = remote.join("hooks");
    std::fs::create_dir_all(&hooks)?;
    let hook = hooks.join("pre-receive");
    let binary = assert_cmd::cargo::cargo_bin("gix-pre-receive");
    std::fs::write(
        &hook,
        format!(
            "#!/bin/sh\nexec '{}' --deployer-email committer@example.com\n",
            binary.display()
        ),
    )?;
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755))
}

#[cfg(unix)]
fn git_push(work: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(work)
        .env_remove("GIT_DIR")
        .env_remove("RUST_LOG")
        .args(["push", "../remote.git"])
        .args(args);
    cmd
}

#[test]
#[cfg(unix)]
fn pushed_objects_are_visible_to_the_hook() -> gix_testtools::Result {
    let dir = gix_testtools::scripted_fixture_writable("push-to-bare.sh")?;
    let remote = dir.path().join("remote.git");
    let work = dir.path().join("work");
    install_hook(&remote)?;

    git_push(&work, &["master", "release:refs/heads/release/1"])
        .assert()
        .success();
    assert_eq!(
        tip(&remote, "refs/heads/release/1"),
        tip(&work, "refs/heads/release"),
        "release branch created from master"
    );
    assert_eq!(tip(&remote, "refs/heads/master"), tip(&work, "refs/heads/master"));

    git_push(&work, &["--force", "unrelated:master"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("Branch master is protected, no one can delete or force push")
                .and(predicate::str::contains("pre-receive hook declined")),
        );
    assert_eq!(tip(&remote, "refs/heads/master"), tip(&work, "refs/heads/master"));
    Ok(())
}
