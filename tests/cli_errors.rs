use predicates::prelude::*;
use predicates::str::{contains, diff};

fn broker_sim() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("broker-sim")
}

#[test]
fn unstable_configuration_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "single",
        "--arrival-rate",
        "100",
        "--servers",
        "5",
        "--service",
        "exp:10",
        "--duration",
        "10",
    ]);
    cmd.assert().failure().stderr(diff(
        "Error: unstable configuration at stage 'broker': utilization 2.0000 >= 1 \
         (arrival rate 100, 5 servers at service rate 10)\n",
    ));
}

#[test]
fn unstable_stage_is_named_in_analysis() {
    let mut cmd = broker_sim();
    cmd.args([
        "analyze",
        "--arrival-rate",
        "12",
        "--servers",
        "2",
        "--service",
        "det:0.2",
    ]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: unstable configuration at stage 'broker'"));
}

#[test]
fn invalid_distribution_spec_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "single",
        "--arrival-rate",
        "8",
        "--servers",
        "2",
        "--service",
        "gamma:2",
        "--duration",
        "10",
    ]);
    cmd.assert().failure().stderr(diff(
        "Error: invalid distribution spec 'gamma:2': expected family:param[:param]\n",
    ));
}

#[test]
fn invalid_distribution_parameters_are_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "single",
        "--arrival-rate",
        "8",
        "--servers",
        "2",
        "--service",
        "exp:-1",
        "--duration",
        "10",
    ]);
    cmd.assert()
        .failure()
        .stderr(contains("Error: invalid exponential distribution"));
}

#[test]
fn missing_flag_is_reported() {
    let mut cmd = broker_sim();
    cmd.args(["single", "--arrival-rate", "8", "--servers", "2", "--duration", "10"]);
    cmd.assert()
        .failure()
        .stderr(diff("Error: missing --service (or pass --config)\n"));
}

#[test]
fn certain_failure_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "tandem",
        "--arrival-rate",
        "10",
        "--broker-servers",
        "2",
        "--broker-service",
        "exp:20",
        "--receiver-servers",
        "2",
        "--receiver-service",
        "exp:20",
        "--failure-probability",
        "1",
        "--duration",
        "10",
    ]);
    cmd.assert()
        .failure()
        .stderr(diff("Error: failure probability must be in [0, 1) (got 1)\n"));
}

#[test]
fn zero_attempt_cap_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "show-config",
        "tandem",
        "--arrival-rate",
        "10",
        "--broker-servers",
        "2",
        "--broker-service",
        "exp:20",
        "--receiver-servers",
        "2",
        "--receiver-service",
        "exp:20",
        "--max-attempts",
        "0",
        "--duration",
        "10",
    ]);
    cmd.assert()
        .failure()
        .stderr(diff("Error: max attempts must be at least 1\n"));
}

#[test]
fn warmup_past_duration_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args([
        "single",
        "--arrival-rate",
        "8",
        "--servers",
        "2",
        "--service",
        "exp:5",
        "--warmup",
        "20",
        "--duration",
        "10",
    ]);
    cmd.assert().failure().stderr(diff(
        "Error: warmup must be >= 0 and below duration (warmup 20, duration 10)\n",
    ));
}

#[test]
fn degenerate_tail_sample_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args(["tail", "-"]).write_stdin("1.5\n");
    cmd.assert()
        .failure()
        .stderr(diff("Error: degenerate sample of size 1\n"));
}

#[test]
fn unparseable_sample_is_rejected() {
    let mut cmd = broker_sim();
    cmd.args(["tail", "-"]).write_stdin("1.0\n2.0\nabc\n");
    cmd.assert()
        .failure()
        .stderr(diff("Error: invalid sample value 'abc'\n"));
}

#[test]
fn unsupported_config_extension_is_rejected() {
    let mut path = std::env::temp_dir();
    path.push(format!("broker-sim-{}.yaml", std::process::id()));
    std::fs::write(&path, "model: single\n").expect("config write should succeed");

    let mut cmd = broker_sim();
    cmd.args(["single", "--config"]).arg(&path);
    cmd.assert()
        .failure()
        .stderr(diff("Error: unsupported config format 'yaml'\n"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unknown_subcommand_is_a_cli_error() {
    let mut cmd = broker_sim();
    cmd.arg("simulate");
    cmd.assert()
        .failure()
        .stderr(contains("unrecognized subcommand 'simulate'"));
}
