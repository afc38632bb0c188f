//! Closed-form and approximate queueing results.
//!
//! Everything here is a pure function of rates, server counts and service-time
//! moments. Any input with utilization >= 1 fails with
//! [`Error::UnstableConfiguration`] instead of producing a negative or
//! infinite figure.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::distributions::{build_distribution, ServiceTimeDistribution};
use crate::error::{Error, Result};
use crate::models::{StageConfig, TandemConfig};

pub fn utilization(arrival_rate: f64, servers: usize, service_rate: f64) -> f64 {
    arrival_rate / (servers as f64 * service_rate)
}

/// Rejects N < 1, non-positive arrival rates and any rho >= 1.
pub fn check_stability(
    stage: &str,
    arrival_rate: f64,
    servers: usize,
    service_rate: f64,
) -> Result<f64> {
    if servers == 0 {
        return Err(Error::InvalidServerCount(servers));
    }
    if !arrival_rate.is_finite() || arrival_rate <= 0.0 {
        return Err(Error::InvalidArrivalRate(arrival_rate));
    }
    let rho = utilization(arrival_rate, servers, service_rate);
    debug!(stage, arrival_rate, servers, service_rate, rho, "stability check");
    if !rho.is_finite() || rho >= 1.0 {
        return Err(Error::UnstableConfiguration {
            stage: stage.to_string(),
            arrival_rate,
            servers,
            service_rate,
            utilization: rho,
        });
    }
    Ok(rho)
}

/// Erlang-C probability that an arrival waits, for offered load `a = lambda / mu`.
///
/// Uses the Erlang-B recursion, which stays finite for large `servers`.
/// Callers guarantee `a < servers`.
pub fn erlang_c(servers: usize, offered_load: f64) -> f64 {
    let mut erlang_b = 1.0;
    for k in 1..=servers {
        erlang_b = offered_load * erlang_b / (k as f64 + offered_load * erlang_b);
    }
    let rho = offered_load / servers as f64;
    erlang_b / (1.0 - rho * (1.0 - erlang_b))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MmnMetrics {
    pub utilization: f64,
    pub prob_wait: f64,
    pub mean_queue_length: f64,
    pub mean_wait: f64,
    pub mean_response: f64,
    pub mean_in_system: f64,
}

/// Exact M/M/N steady-state means (Erlang-C plus Little's law).
pub fn mmn(arrival_rate: f64, servers: usize, service_rate: f64) -> Result<MmnMetrics> {
    let rho = check_stability("m/m/n", arrival_rate, servers, service_rate)?;
    let prob_wait = erlang_c(servers, arrival_rate / service_rate);
    let mean_queue_length = prob_wait * rho / (1.0 - rho);
    let mean_wait = mean_queue_length / arrival_rate;
    let mean_response = mean_wait + 1.0 / service_rate;
    Ok(MmnMetrics {
        utilization: rho,
        prob_wait,
        mean_queue_length,
        mean_wait,
        mean_response,
        mean_in_system: arrival_rate * mean_response,
    })
}

/// Quantile of the M/M/N waiting time, from `P(Wq > t) = C * exp(-(N*mu - lambda) * t)`.
pub fn mmn_wait_quantile(arrival_rate: f64, servers: usize, service_rate: f64, p: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(Error::InvalidPercentile(p));
    }
    let metrics = mmn(arrival_rate, servers, service_rate)?;
    let tail = 1.0 - p;
    if metrics.prob_wait <= tail {
        return Ok(0.0);
    }
    let drain_rate = servers as f64 * service_rate - arrival_rate;
    Ok((metrics.prob_wait / tail).ln() / drain_rate)
}

/// M/G/N mean-wait approximations. None is exact; pick by regime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApproximationMethod {
    /// `Wq ~ Wq(M/M/N) * (1 + C^2) / 2`. Heavy-traffic two-moment scaling;
    /// trustworthy for low to moderate variability (C^2 <= 2). Under Poisson
    /// input this is the same correction as Allen-Cunneen with `Ca^2 = 1`,
    /// and Whitt above C^2 = 1; only the regime tag differs.
    Kingman,
    /// Interpolates between M/D/N (Cosmetatos) and M/M/N for C^2 <= 1 and
    /// falls back to `(1 + C^2) / 2` above; tuned for high utilization.
    Whitt,
    /// `Wq ~ Wq(M/M/N) * (Ca^2 + Cs^2) / 2`; accepts non-Poisson input
    /// variability and holds up under high utilization or high variability.
    AllenCunneen,
}

/// Parameter region where an approximation is known to track M/G/N well.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValidityRegime {
    pub max_cv_squared: Option<f64>,
    pub min_utilization: Option<f64>,
    pub description: &'static str,
}

impl ValidityRegime {
    pub fn violation(&self, rho: f64, cv_squared: f64) -> Option<String> {
        if let Some(max) = self.max_cv_squared {
            if cv_squared > max {
                return Some(format!("C^2 {:.3} above {:.3}", cv_squared, max));
            }
        }
        if let Some(min) = self.min_utilization {
            if rho < min {
                return Some(format!("utilization {:.3} below {:.3}", rho, min));
            }
        }
        None
    }
}

impl ApproximationMethod {
    pub const ALL: [ApproximationMethod; 3] = [
        ApproximationMethod::Kingman,
        ApproximationMethod::Whitt,
        ApproximationMethod::AllenCunneen,
    ];

    pub fn regime(&self) -> ValidityRegime {
        match self {
            ApproximationMethod::Kingman => ValidityRegime {
                max_cv_squared: Some(2.0),
                min_utilization: None,
                description: "low to moderate service variability (C^2 <= 2)",
            },
            ApproximationMethod::Whitt => ValidityRegime {
                max_cv_squared: None,
                min_utilization: Some(0.7),
                description: "high utilization (rho >= 0.7), any C^2",
            },
            ApproximationMethod::AllenCunneen => ValidityRegime {
                max_cv_squared: None,
                min_utilization: Some(0.5),
                description: "moderate to high utilization (rho >= 0.5), high variability",
            },
        }
    }
}

impl fmt::Display for ApproximationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApproximationMethod::Kingman => write!(f, "kingman"),
            ApproximationMethod::Whitt => write!(f, "whitt"),
            ApproximationMethod::AllenCunneen => write!(f, "allen-cunneen"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Approximation {
    pub method: ApproximationMethod,
    pub mean_wait: f64,
    pub mean_response: f64,
    /// Exact M/M/N wait the correction was applied to.
    pub mmn_mean_wait: f64,
    pub correction: f64,
    pub regime_warning: Option<String>,
}

/// Ratio Wq(M/D/N) / Wq(M/M/N) after Cosmetatos, capped at 1.
fn deterministic_wait_ratio(rho: f64, servers: usize) -> f64 {
    let n = servers as f64;
    let k = 1.0 + (1.0 - rho) * (n - 1.0) * ((4.0 + 5.0 * n).sqrt() - 2.0) / (16.0 * rho * n);
    (0.5 * k).min(1.0)
}

fn approximate(
    method: ApproximationMethod,
    arrival_rate: f64,
    servers: usize,
    mean_service: f64,
    correction: impl FnOnce(f64) -> f64,
    cv_squared: f64,
) -> Result<Approximation> {
    if !cv_squared.is_finite() || cv_squared < 0.0 {
        return Err(Error::InvalidDistribution {
            family: "service".to_string(),
            reason: format!("C^2 must be finite and >= 0 (got {})", cv_squared),
        });
    }
    let base = mmn(arrival_rate, servers, 1.0 / mean_service)?;
    let correction = correction(base.utilization);
    let mean_wait = base.mean_wait * correction;
    let regime_warning = method.regime().violation(base.utilization, cv_squared);
    if let Some(reason) = &regime_warning {
        warn!(%method, reason = reason.as_str(), "approximation used outside its regime");
    }
    Ok(Approximation {
        method,
        mean_wait,
        mean_response: mean_wait + mean_service,
        mmn_mean_wait: base.mean_wait,
        correction,
        regime_warning,
    })
}

/// Mean M/G/N wait for Poisson input by the chosen method.
pub fn mgn_mean_wait(
    method: ApproximationMethod,
    arrival_rate: f64,
    servers: usize,
    mean_service: f64,
    cv_squared: f64,
) -> Result<Approximation> {
    match method {
        ApproximationMethod::Kingman => approximate(
            method,
            arrival_rate,
            servers,
            mean_service,
            |_| (1.0 + cv_squared) / 2.0,
            cv_squared,
        ),
        ApproximationMethod::Whitt => approximate(
            method,
            arrival_rate,
            servers,
            mean_service,
            |rho| {
                if cv_squared <= 1.0 {
                    (1.0 - cv_squared) * deterministic_wait_ratio(rho, servers) + cv_squared
                } else {
                    (1.0 + cv_squared) / 2.0
                }
            },
            cv_squared,
        ),
        ApproximationMethod::AllenCunneen => {
            allen_cunneen(arrival_rate, servers, mean_service, 1.0, cv_squared)
        }
    }
}

/// Allen-Cunneen with an explicit arrival-process variability `Ca^2`.
pub fn allen_cunneen(
    arrival_rate: f64,
    servers: usize,
    mean_service: f64,
    arrival_cv_squared: f64,
    service_cv_squared: f64,
) -> Result<Approximation> {
    approximate(
        ApproximationMethod::AllenCunneen,
        arrival_rate,
        servers,
        mean_service,
        |_| (arrival_cv_squared + service_cv_squared) / 2.0,
        service_cv_squared,
    )
}

/// Expected delivery attempts per job under independent failures.
///
/// Geometric `1 / (1 - p)` when unbounded, `(1 - p^m) / (1 - p)` with a cap of `m`.
pub fn expected_attempts(failure_probability: f64, max_attempts: Option<u32>) -> Result<f64> {
    if !(0.0..1.0).contains(&failure_probability) {
        return Err(Error::InvalidFailureProbability(failure_probability));
    }
    let p = failure_probability;
    Ok(match max_attempts {
        Some(0) => return Err(Error::InvalidMaxAttempts),
        Some(m) => (1.0 - p.powf(f64::from(m))) / (1.0 - p),
        None => 1.0 / (1.0 - p),
    })
}

/// Retry-inflated rate seen downstream, `lambda / (1 - p)` when unbounded.
pub fn effective_arrival_rate(
    arrival_rate: f64,
    failure_probability: f64,
    max_attempts: Option<u32>,
) -> Result<f64> {
    Ok(arrival_rate * expected_attempts(failure_probability, max_attempts)?)
}

/// Expected network time `(2 + p) * D`: a send and acknowledgement leg plus
/// the first-order expected retransmission leg.
pub fn expected_network_time(failure_probability: f64, mean_delay: f64) -> f64 {
    (2.0 + failure_probability) * mean_delay
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StageParams {
    pub servers: usize,
    pub mean_service: f64,
    pub cv_squared: f64,
}

impl StageParams {
    pub fn from_distribution(servers: usize, dist: &dyn ServiceTimeDistribution) -> Self {
        Self {
            servers,
            mean_service: dist.mean(),
            cv_squared: dist.cv_squared(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TandemParams {
    pub arrival_rate: f64,
    pub failure_probability: f64,
    pub max_attempts: Option<u32>,
    pub broker: StageParams,
    pub receiver: StageParams,
    pub mean_network_delay: f64,
    pub method: ApproximationMethod,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TandemAnalysis {
    pub expected_attempts: f64,
    /// Lambda_2, the retry-inflated downstream arrival rate.
    pub effective_arrival_rate: f64,
    pub broker_utilization: f64,
    pub receiver_utilization: f64,
    pub broker: Approximation,
    pub network_time: f64,
    pub receiver: Approximation,
    pub total_latency: f64,
}

/// Broker -> network -> receiver estimate; both stages see the inflated rate.
pub fn tandem(params: &TandemParams) -> Result<TandemAnalysis> {
    let attempts = expected_attempts(params.failure_probability, params.max_attempts)?;
    let inflated = params.arrival_rate * attempts;

    let broker_utilization = check_stability(
        "broker",
        inflated,
        params.broker.servers,
        1.0 / params.broker.mean_service,
    )?;
    let receiver_utilization = check_stability(
        "receiver",
        inflated,
        params.receiver.servers,
        1.0 / params.receiver.mean_service,
    )?;

    let broker = mgn_mean_wait(
        params.method,
        inflated,
        params.broker.servers,
        params.broker.mean_service,
        params.broker.cv_squared,
    )?;
    let receiver = mgn_mean_wait(
        params.method,
        inflated,
        params.receiver.servers,
        params.receiver.mean_service,
        params.receiver.cv_squared,
    )?;
    let network_time = expected_network_time(params.failure_probability, params.mean_network_delay);

    Ok(TandemAnalysis {
        expected_attempts: attempts,
        effective_arrival_rate: inflated,
        broker_utilization,
        receiver_utilization,
        total_latency: broker.mean_response + network_time + receiver.mean_response,
        broker,
        network_time,
        receiver,
    })
}

/// Exact M/M/N baseline for one pool plus the requested M/G/N corrections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageAnalysis {
    pub name: String,
    pub arrival_rate: f64,
    pub servers: usize,
    pub mean_service: f64,
    pub cv_squared: f64,
    /// M/M/N with the same mean service time.
    pub mmn: MmnMetrics,
    pub mmn_wait_p95: f64,
    pub mmn_wait_p99: f64,
    pub approximations: Vec<Approximation>,
}

pub fn analyze_stage(
    stage: &StageConfig,
    arrival_rate: f64,
    methods: &[ApproximationMethod],
) -> Result<StageAnalysis> {
    let dist = build_distribution(&stage.service)?;
    let params = StageParams::from_distribution(stage.servers, dist.as_ref());
    let service_rate = 1.0 / params.mean_service;
    check_stability(&stage.name, arrival_rate, stage.servers, service_rate)?;

    let approximations = methods
        .iter()
        .map(|method| {
            mgn_mean_wait(
                *method,
                arrival_rate,
                stage.servers,
                params.mean_service,
                params.cv_squared,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StageAnalysis {
        name: stage.name.clone(),
        arrival_rate,
        servers: stage.servers,
        mean_service: params.mean_service,
        cv_squared: params.cv_squared,
        mmn: mmn(arrival_rate, stage.servers, service_rate)?,
        mmn_wait_p95: mmn_wait_quantile(arrival_rate, stage.servers, service_rate, 0.95)?,
        mmn_wait_p99: mmn_wait_quantile(arrival_rate, stage.servers, service_rate, 0.99)?,
        approximations,
    })
}

impl TandemParams {
    pub fn from_config(config: &TandemConfig, method: ApproximationMethod) -> Result<Self> {
        let broker = build_distribution(&config.broker.service)?;
        let receiver = build_distribution(&config.receiver.service)?;
        let network = build_distribution(&config.network_delay)?;
        Ok(Self {
            arrival_rate: config.arrival_rate,
            failure_probability: config.failure_probability,
            max_attempts: config.max_attempts,
            broker: StageParams::from_distribution(config.broker.servers, broker.as_ref()),
            receiver: StageParams::from_distribution(config.receiver.servers, receiver.as_ref()),
            mean_network_delay: network.mean(),
            method,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "kebab-case")]
pub enum AnalysisReport {
    Single(StageAnalysis),
    /// One estimate per requested approximation method.
    Tandem { estimates: Vec<TandemAnalysis> },
}
