//! End-to-end smoke tests driving the `mc` binary through `assert_cmd`,
//! each against its own isolated `$MC_STATE_DIR` so runs never see one
//! another's rate-limit windows, audit log, or config overlay.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn mc(state_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("mc").expect("should find binary for mc");
    cmd.env("MC_STATE_DIR", state_dir).env_remove("MC_JSON_OUTPUT").env_remove("MC_CORRELATION_ID");
    cmd
}

#[test]
fn unknown_flag_exits_with_usage_code() {
    let dir = tempdir().unwrap();
    mc(dir.path()).arg("--definitely-not-a-flag").assert().failure().code(2);
}

#[test]
fn config_set_then_get_round_trips_through_the_overlay() {
    let dir = tempdir().unwrap();
    mc(dir.path()).args(["config", "set", "gateway.url", "http://localhost:9000"]).assert().success();

    mc(dir.path())
        .args(["--json", "config", "get", "gateway.url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://localhost:9000"));
}

#[test]
fn config_set_rejects_a_dangerous_key_segment() {
    let dir = tempdir().unwrap();
    mc(dir.path())
        .args(["config", "set", "__proto__.polluted", "true"])
        .assert()
        .failure()
        .code(10); // INTEGRITY, per §6's exit-code table
}

#[test]
fn a_polluted_config_overlay_keeps_its_siblings_and_is_audited() {
    // §8 scenario E5: a `config.json` overlay written directly to disk (not
    // through `mc config set`, which already refuses a dangerous segment at
    // write time) can still carry a `__proto__` key if it was hand-edited or
    // restored from backup. Loading it must strip the dangerous key, keep
    // `gateway.url`, and leave a `SECURITY_VIOLATION` record behind.
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.json"),
        serde_json::json!({
            "gateway": { "url": "http://localhost:9002" },
            "__proto__": { "polluted": true },
        })
        .to_string(),
    )
    .unwrap();

    mc(dir.path())
        .args(["--json", "config", "get", "gateway.url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://localhost:9002"));

    mc(dir.path())
        .args(["--json", "audit", "tail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SECURITY_VIOLATION"));
}

#[test]
fn rate_limit_show_reports_no_windows_for_a_fresh_state_dir() {
    let dir = tempdir().unwrap();
    mc(dir.path())
        .args(["rate-limit", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no active rate-limit windows"));
}

#[test]
fn deploy_six_times_in_a_row_eventually_rate_limits() {
    let dir = tempdir().unwrap();
    // `deploy`'s default window allows 5 admissions per 300s (§4.8's table);
    // the sixth call in the same window must be denied with exit code 5.
    for _ in 0..5 {
        mc(dir.path()).args(["deploy", "rolling"]).assert().success();
    }
    mc(dir.path()).args(["deploy", "rolling"]).assert().failure().code(5);
}

#[test]
fn exec_against_a_non_whitelisted_container_is_refused_as_validation() {
    let dir = tempdir().unwrap();
    mc(dir.path())
        .args(["exec", "some-other-container", "echo", "hi"])
        .assert()
        .failure()
        .code(3); // VALIDATION, per §6's exit-code table
}

#[test]
fn audit_tail_on_a_fresh_state_dir_reports_no_records() {
    let dir = tempdir().unwrap();
    mc(dir.path()).args(["audit", "tail"]).assert().success().stdout(predicate::str::contains("no audit records"));
}

#[test]
fn audit_verify_succeeds_after_a_config_change_is_recorded() {
    let dir = tempdir().unwrap();
    mc(dir.path()).args(["config", "set", "gateway.url", "http://localhost:9001"]).assert().success();
    mc(dir.path()).args(["audit", "verify"]).assert().success().stdout(predicate::str::contains("verified intact"));
}
