//! End-to-end CLI tests using assert_cmd.
//!
//! These tests run the actual steamshell binary against a scripted steamcmd
//! and verify stdout/stderr/exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use steamshell::{FakeScript, FakeSteamCmd};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A fake steamcmd plus a private cache directory.
struct TestEnv {
    fake: FakeScript,
    cache_dir: PathBuf,
}

impl TestEnv {
    fn new(fake: FakeSteamCmd) -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        Self {
            fake: fake
                .respond("login anonymous", &["Waiting for user info...OK"])
                .install()
                .unwrap(),
            cache_dir: std::env::temp_dir().join(format!("steamshell-cli-test-{pid}-{id}")),
        }
    }

    fn steamshell(&self) -> Command {
        let mut cmd = Command::cargo_bin("steamshell").unwrap();
        cmd.env_remove("STEAMSHELL_USER")
            .env_remove("STEAMSHELL_PASSWORD")
            .env_remove("RUST_LOG")
            .arg("--steamcmd")
            .arg(self.fake.path())
            .arg("--arg=-quiet")
            .arg("--cache-dir")
            .arg(&self.cache_dir)
            .arg("--timeout=10");
        cmd
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.cache_dir).ok();
    }
}

#[test]
fn test_help() {
    Command::cargo_bin("steamshell")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("steamcmd"))
        .stdout(predicate::str::contains("installed"));
}

#[test]
fn test_names_requires_ids() {
    Command::cargo_bin("steamshell")
        .unwrap()
        .arg("names")
        .assert()
        .failure();
}

#[test]
fn test_exec_prints_raw_output() {
    let env = TestEnv::new(FakeSteamCmd::new().respond(
        "app_status 740",
        &["AppID 740 (CS):", " - release state: Fully Installed"],
    ));
    env.steamshell()
        .args(["exec", "app_status", "740"])
        .assert()
        .success()
        .stdout(predicate::str::contains("release state: Fully Installed"));
}

#[test]
fn test_installed_json() {
    let env = TestEnv::new(FakeSteamCmd::new().respond(
        "apps_installed",
        &["AppID 90 : \"Half-Life Dedicated Server\" : /srv/hlds"],
    ));
    let output = env
        .steamshell()
        .args(["--no-cache", "installed", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let apps: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(apps[0]["app_id"], 90);
    assert_eq!(apps[0]["name"], "Half-Life Dedicated Server");
}

#[test]
fn test_licenses() {
    let env = TestEnv::new(FakeSteamCmd::new().respond(
        "licenses_print",
        &["License packageID 0:", " - Apps    : 10, 20,  (2 in total)"],
    ));
    env.steamshell()
        .args(["licenses", "--json"])
        .assert()
        .success()
        .stdout("[10,20]\n");
}

#[test]
fn test_login_failure_exit_code() {
    let env = TestEnv::new(
        FakeSteamCmd::new().respond("login gaben*", &["FAILED (Invalid Password)"]),
    );
    env.steamshell()
        .args(["--user", "gaben", "--password", "wrong", "login"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid password"))
        .stderr(predicate::str::contains("wrong").not());
}

#[test]
fn test_login_without_user_resumes_last_user() {
    let env = TestEnv::new(
        FakeSteamCmd::new()
            .respond("login gaben", &["Logged in OK"])
            .respond("login gaben *", &["Logged in OK"])
            .respond("login anonymous", &["FAILED"]),
    );
    env.steamshell()
        .args(["--user", "gaben", "--password", "hunter2", "login"])
        .assert()
        .success();
    env.steamshell().arg("login").assert().success().stdout("ok\n");
}

#[test]
fn test_install_progress_events() {
    let env = TestEnv::new(FakeSteamCmd::new().respond(
        "app_update 740",
        &[
            " Update state (0x61) downloading, progress: 50.0 (500 / 1000)",
            "Success! App '740' fully installed.",
        ],
    ));
    env.steamshell()
        .args(["--events", "install", "740"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed 740"))
        .stderr(predicate::str::contains(r#""event":"client_ready""#))
        .stderr(predicate::str::contains(
            r#"{"event":"install_progressed","app_id":740,"current":500,"total":1000}"#,
        ))
        .stderr(predicate::str::contains(
            r#"{"event":"app_installed","app_id":740,"success":true}"#,
        ));
}

#[test]
fn test_install_into_dir_prints_location() {
    let env = TestEnv::new(
        FakeSteamCmd::new()
            .respond("force_install_dir*", &[])
            .respond("app_update 90", &["Success! App '90' fully installed."])
            .respond(
                "app_info_print 90",
                &["\"90\"", "{", "  \"config\" { \"installdir\" \"hlds\" }", "}"],
            ),
    );
    env.steamshell()
        .args(["--no-cache", "install", "90", "--dir", "/srv/steam"])
        .assert()
        .success()
        .stdout("installed 90 to /srv/steam/steamapps/common/hlds\n");
}

#[test]
fn test_failed_update_exit_code() {
    let env = TestEnv::new(
        FakeSteamCmd::new().respond("app_update 10*", &["Error! App '10' state is 0x202"]),
    );
    env.steamshell()
        .args(["update", "10", "--validate"])
        .assert()
        .failure();
}

#[test]
fn test_doctor_passes_with_working_tool() {
    let env = TestEnv::new(FakeSteamCmd::new());
    env.steamshell()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("steamcmd prompt: [OK]"))
        .stdout(predicate::str::contains("All checks passed!"));
}

#[test]
fn test_doctor_reports_missing_tool() {
    Command::cargo_bin("steamshell")
        .unwrap()
        .args(["--steamcmd", "/nonexistent/steamcmd.sh", "doctor"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[FAIL]"));
}
