// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end runs of the `confstage` binary against a temporary store.

use assert_cmd::Command;
use confstage_app_core::config::ConfigService;
use confstage_config_fs::FsConfigStore;
use confstage_core::mutator::{change_value, create_child, finish_child_schemas, open_creation};
use confstage_core::{PendingFetch, SessionStore};
use confstage_dry_tests::fixtures::{device, interface_name_schema, interface_schema, sample_root};
use predicates::prelude::*;
use tempfile::TempDir;

fn seeded(edit: impl FnOnce(&mut SessionStore)) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigService::new(FsConfigStore::at(dir.path()).unwrap());
    let mut sessions = SessionStore::new();
    sessions.open("s1", device("r1")).data = Some(sample_root());
    edit(&mut sessions);
    sessions.persist(&config).unwrap();
    dir
}

fn confstage(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("confstage").unwrap();
    cmd.arg("--config-dir").arg(dir.path());
    cmd
}

fn hostname_changed() -> TempDir {
    seeded(|sessions| {
        let session = sessions.get_mut("s1").unwrap();
        change_value(session, "/sys:system/hostname", "core").unwrap();
    })
}

#[test]
fn lists_sessions() {
    let dir = hostname_changed();
    confstage(&dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("s1"))
        .stdout(predicate::str::contains("admin@r1.lab:830"));
}

#[test]
fn empty_store_has_no_sessions() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("confstage")
        .unwrap()
        .args(["--config-dir"])
        .arg(dir.path())
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("no sessions"));
}

#[test]
fn pending_shows_staged_changes() {
    let dir = hostname_changed();
    confstage(&dir)
        .args(["pending", "--session", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/sys:system/hostname"))
        .stdout(predicate::str::contains("\"edge\" -> \"core\""));
}

#[test]
fn compile_prints_the_batch() {
    let dir = hostname_changed();
    confstage(&dir)
        .arg("compile")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"change\""))
        .stdout(predicate::str::contains("\"value\": \"core\""));
}

#[test]
fn compile_fails_on_unconfirmed_keys() {
    let dir = seeded(|sessions| {
        let session = sessions.get_mut("s1").unwrap();
        open_creation(session, "/if:interfaces", vec![interface_schema()]).unwrap();
        let outcome = create_child(session, "/if:interfaces", 0).unwrap();
        let Some(PendingFetch::ChildSchemas(request)) = outcome.pending else {
            unreachable!("list instances fetch their child schemas");
        };
        finish_child_schemas(session, &request, Ok(vec![interface_name_schema()])).unwrap();
    });
    confstage(&dir)
        .arg("compile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not confirmed value of the"));
}

#[test]
fn cancel_reverts_and_persists() {
    let dir = hostname_changed();
    confstage(&dir)
        .arg("cancel")
        .assert()
        .success()
        .stdout(predicate::str::contains("reverted 1 change(s) in s1"));
    confstage(&dir)
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("no staged changes in s1"));
}

#[test]
fn unknown_session_is_an_error() {
    let dir = hostname_changed();
    confstage(&dir)
        .args(["pending", "--session", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown session: nope"));
}

#[test]
fn close_and_reset_forget_sessions() {
    let dir = hostname_changed();
    confstage(&dir).args(["close", "s1"]).assert().success();
    confstage(&dir)
        .arg("pending")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no active session"));

    let dir = hostname_changed();
    confstage(&dir).arg("reset").assert().success();
    confstage(&dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("no sessions"));
}

#[test]
fn prefs_default_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    confstage(&dir)
        .arg("prefs")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"persist_on_mutation\": true"));
}
