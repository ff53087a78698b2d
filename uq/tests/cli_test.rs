//! Smoke tests for the `uq` binary
//!
//! Each test points the binary at its own config, database and XDG
//! directories so runs never touch the user's files.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = format!(
            "log-level: debug\n\
             scheduler:\n  tick-ms: 10\n\
             transport:\n  latency-ms: 0\n  failure-rate: 0.0\n\
             storage:\n  database-path: {}\n",
            dir.path().join("ussdq.db").display()
        );
        std::fs::write(dir.path().join("ussdq.yml"), config).expect("Failed to write config");
        Self { dir }
    }

    fn uq(&self) -> Command {
        let mut cmd = Command::cargo_bin("uq").expect("binary built");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_DATA_HOME", self.dir.path().join("data"))
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(self.dir.path().join("ussdq.yml"));
        cmd
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.uq().args(args).args(["--format", "json"]).output().expect("run uq");
        assert!(output.status.success(), "uq {:?} failed: {:?}", args, output);
        serde_json::from_slice(&output.stdout).expect("valid JSON")
    }
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("uq")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("session"));
}

#[test]
fn test_device_submit_execute_history() {
    let sandbox = Sandbox::new();

    sandbox
        .uq()
        .args(["device", "add", "Pixel 7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered"));

    let sims = sandbox.json(&["sim", "list"]);
    let sims = sims.as_array().expect("SIM array");
    assert_eq!(sims.len(), 2);
    let sim_id = sims[0]["id"].as_str().unwrap().to_string();

    sandbox
        .uq()
        .args(["submit", "--sim", &sim_id, "*580#"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued #1"));

    sandbox
        .uq()
        .args(["execute", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("success"));

    let history = sandbox.json(&["history"]);
    let history = history.as_array().expect("command array");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "success");
    assert_eq!(history[0]["auto_executed"], false);

    sandbox
        .uq()
        .args(["sim", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("left: 19"));

    let stats = sandbox.json(&["stats"]);
    assert_eq!(stats["completed_today"], 1);
    assert_eq!(stats["total_devices"], 1);
    assert_eq!(stats["active_devices"], 0);
    assert_eq!(stats["overrun_sims"], 0);

    let device_id = sims[0]["device_id"].as_str().unwrap().to_string();
    sandbox.uq().args(["device", "touch", &device_id]).assert().success();
    let stats = sandbox.json(&["stats"]);
    assert_eq!(stats["active_devices"], 1);
}

#[test]
fn test_run_once_dispatches_pending() {
    let sandbox = Sandbox::new();
    sandbox.uq().args(["device", "add", "Galaxy"]).assert().success();
    let sims = sandbox.json(&["sim", "list"]);
    let sim_id = sims[0]["id"].as_str().unwrap().to_string();

    sandbox
        .uq()
        .args(["submit", "--sim", &sim_id, "*100#", "--type", "activation"])
        .assert()
        .success();
    sandbox
        .uq()
        .args(["run", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatched 1"));

    let history = sandbox.json(&["history", "--status", "success"]);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["auto_executed"], true);
}

#[test]
fn test_invalid_code_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.uq().args(["device", "add", "Galaxy"]).assert().success();
    let sims = sandbox.json(&["sim", "list"]);
    let sim_id = sims[0]["id"].as_str().unwrap().to_string();

    sandbox
        .uq()
        .args(["submit", "--sim", &sim_id, "580"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a USSD code"));
}

#[test]
fn test_session_run_prints_steps() {
    let sandbox = Sandbox::new();
    sandbox.uq().args(["device", "add", "Galaxy"]).assert().success();
    let sims = sandbox.json(&["sim", "list"]);
    let sim_id = sims[0]["id"].as_str().unwrap().to_string();

    sandbox
        .uq()
        .args(["session", "run", "--sim", &sim_id, "*100#", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
}
