use broker_sim::distributions::{Exponential, Pareto, ServiceTimeDistribution};
use broker_sim::error::Error;
use broker_sim::tail::{
    analyze_tail, bootstrap_percentile, fit_gpd, hill_estimator, normal_approximation,
    recommended_method, BootstrapOptions, EvtOptions, TailMethod,
};
use predicates::str::contains;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

const PARETO_P99: f64 = 6.309_573_444_801_933;

fn pareto_sample(n: usize, seed: u64) -> Vec<f64> {
    let dist = Pareto::new(2.5, 1.0).expect("valid pareto");
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| dist.sample(&mut rng)).collect()
}

fn stratified_pareto(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| (1.0 - (i as f64 + 0.5) / n as f64).powf(-1.0 / 2.5))
        .collect()
}

fn write_samples(sample: &[f64]) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be available")
        .as_nanos();
    path.push(format!("broker-sim-samples-{}.txt", nanos));
    let body: String = sample.iter().map(|x| format!("{}\n", x)).collect();
    fs::write(&path, body).expect("sample write should succeed");
    path
}

#[test]
fn gpd_fit_recovers_a_random_pareto_tail() {
    let sample = pareto_sample(20_000, 99);
    let fit = fit_gpd(&sample, &EvtOptions::default()).expect("enough exceedances");
    let evt = fit.quantile(0.99).expect("p above threshold");
    assert!(
        (evt - PARETO_P99).abs() / PARETO_P99 < 0.10,
        "evt {}",
        evt
    );
    assert!(fit.shape > 0.0);

    let hill = hill_estimator(&sample, fit.exceedances).expect("hill");
    assert!((hill - 2.5).abs() / 2.5 < 0.15, "hill {}", hill);
}

#[test]
fn normal_approximation_misses_the_heavy_tail() {
    let sample = stratified_pareto(20_000);
    let normal = normal_approximation(&sample, 0.99).expect("normal");
    assert!(
        (PARETO_P99 - normal) / PARETO_P99 > 0.20,
        "normal {}",
        normal
    );
}

#[test]
fn bootstrap_interval_brackets_the_estimate_and_is_seeded() {
    let sample = pareto_sample(5_000, 3);
    let options = BootstrapOptions {
        resamples: 500,
        confidence: 0.9,
        seed: 17,
    };
    let first = bootstrap_percentile(&sample, 0.95, &options).expect("bootstrap");
    let second = bootstrap_percentile(&sample, 0.95, &options).expect("bootstrap");
    assert_eq!(first, second);

    let interval = first.interval.expect("bootstrap carries an interval");
    assert!(interval.lower <= first.estimate && first.estimate <= interval.upper);
    assert!(interval.lower < interval.upper);
    assert_eq!(interval.confidence, 0.9);
    assert_eq!(first.method, TailMethod::Bootstrap);
}

#[test]
fn thin_tails_are_reported_not_extrapolated() {
    let sample: Vec<f64> = (1..=100).map(f64::from).collect();
    assert!(matches!(
        fit_gpd(&sample, &EvtOptions::default()),
        Err(Error::InsufficientTailData {
            available: 10,
            required: 20
        })
    ));

    let report = analyze_tail(
        &sample,
        0.99,
        &BootstrapOptions {
            resamples: 100,
            ..BootstrapOptions::default()
        },
        &EvtOptions::default(),
    )
    .expect("report without evt");
    assert!(report.evt.is_none());
    assert!(report.gpd.is_none());
    assert!(report.hill_tail_index.is_none());
}

#[test]
fn heavy_tails_are_routed_to_evt() {
    let pareto = Pareto::new(2.5, 1.0).expect("valid pareto");
    let exponential = Exponential::new(5.0).expect("valid exponential");
    assert_eq!(recommended_method(&pareto), TailMethod::Evt);
    assert_eq!(recommended_method(&exponential), TailMethod::Bootstrap);
}

#[test]
fn tail_command_reads_a_sample_file() {
    let path = write_samples(&stratified_pareto(20_000));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("broker-sim");
    cmd.arg("tail").arg(&path).args(["--resamples", "200"]);
    cmd.assert()
        .success()
        .stdout(contains("Tail:\nsamples: 20000\npercentile: 0.99\n"))
        .stdout(contains("empirical: 6.303"))
        .stdout(contains("at 95% confidence"))
        .stdout(contains("evt: 6.30"))
        .stdout(contains("2000 exceedances"))
        .stdout(contains("hill_tail_index: 2.4"));
    let _ = fs::remove_file(&path);
}

#[test]
fn tail_command_reads_stdin_and_skips_evt_on_short_samples() {
    let input: String = (1..=50).map(|i| format!("{}\n", i)).collect();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("broker-sim");
    cmd.env_remove("RUST_LOG")
        .args(["tail", "-", "--resamples", "100"])
        .write_stdin(input);
    cmd.assert()
        .success()
        .stdout(contains("samples: 50\n"))
        .stdout(contains("empirical: 49.5100\n"))
        .stdout(contains("evt: unavailable\n"))
        .stdout(contains("hill_tail_index: -\n"))
        .stderr(contains("skipping GPD fit"));
}

#[test]
fn tail_command_emits_json() {
    let path = write_samples(&stratified_pareto(2_000));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("broker-sim");
    cmd.args(["--format", "json", "tail", "--resamples", "100"])
        .arg(&path);
    let output = cmd.output().expect("binary should run");
    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json should parse");
    assert_eq!(report["samples"], 2000);
    assert_eq!(report["bootstrap"]["method"], "bootstrap");
    assert_eq!(report["evt"]["method"], "evt");
    assert!(report["gpd"]["shape"].as_f64().expect("shape") > 0.0);
    let _ = fs::remove_file(&path);
}
