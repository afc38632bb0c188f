use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::distributions::build_distribution;
use crate::error::Error;

/// Parameter set of a service-time (or network-delay) distribution.
///
/// The serde form is tagged by `family`; the compact `family:p1[:p2]` form is
/// what the CLI accepts.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "family", rename_all = "kebab-case")]
pub enum DistributionSpec {
    Exponential { rate: f64 },
    Pareto { shape: f64, scale: f64 },
    Erlang { k: u32, mean: f64 },
    Lognormal { mu: f64, sigma: f64 },
    Weibull { shape: f64, scale: f64 },
    Deterministic { value: f64 },
}

impl DistributionSpec {
    pub fn exponential_mean(mean: f64) -> Self {
        DistributionSpec::Exponential { rate: 1.0 / mean }
    }

    /// Lognormal matched to a target mean and squared coefficient of variation.
    pub fn lognormal_from_moments(mean: f64, cv_squared: f64) -> Self {
        let sigma_sq = (1.0 + cv_squared).ln();
        DistributionSpec::Lognormal {
            mu: mean.ln() - sigma_sq / 2.0,
            sigma: sigma_sq.sqrt(),
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            DistributionSpec::Exponential { .. } => "exponential",
            DistributionSpec::Pareto { .. } => "pareto",
            DistributionSpec::Erlang { .. } => "erlang",
            DistributionSpec::Lognormal { .. } => "lognormal",
            DistributionSpec::Weibull { .. } => "weibull",
            DistributionSpec::Deterministic { .. } => "deterministic",
        }
    }
}

impl fmt::Display for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionSpec::Exponential { rate } => write!(f, "exp:{}", rate),
            DistributionSpec::Pareto { shape, scale } => write!(f, "pareto:{}:{}", shape, scale),
            DistributionSpec::Erlang { k, mean } => write!(f, "erlang:{}:{}", k, mean),
            DistributionSpec::Lognormal { mu, sigma } => write!(f, "lognormal:{}:{}", mu, sigma),
            DistributionSpec::Weibull { shape, scale } => write!(f, "weibull:{}:{}", shape, scale),
            DistributionSpec::Deterministic { value } => write!(f, "det:{}", value),
        }
    }
}

impl FromStr for DistributionSpec {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidDistributionSpec(input.to_string());
        let mut parts = input.trim().split(':').map(str::trim);
        let family = parts.next().unwrap_or("").to_ascii_lowercase();
        let params = parts
            .map(|value| value.parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let spec = match (family.as_str(), params.as_slice()) {
            ("exp" | "exponential", [rate]) => DistributionSpec::Exponential { rate: *rate },
            ("pareto", [shape, scale]) => DistributionSpec::Pareto {
                shape: *shape,
                scale: *scale,
            },
            ("erlang", [k, mean]) => {
                if k.fract() != 0.0 || *k < 0.0 || *k > u32::MAX as f64 {
                    return Err(invalid());
                }
                DistributionSpec::Erlang {
                    k: *k as u32,
                    mean: *mean,
                }
            }
            ("lognormal", [mu, sigma]) => DistributionSpec::Lognormal {
                mu: *mu,
                sigma: *sigma,
            },
            ("weibull", [shape, scale]) => DistributionSpec::Weibull {
                shape: *shape,
                scale: *scale,
            },
            ("det" | "deterministic", [value]) => DistributionSpec::Deterministic { value: *value },
            _ => return Err(invalid()),
        };
        Ok(spec)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StageConfig {
    pub name: String,
    pub servers: usize,
    pub service: DistributionSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SingleStageConfig {
    pub arrival_rate: f64,
    pub stage: StageConfig,
    #[serde(default)]
    pub warmup: f64,
    pub duration: f64,
    #[serde(default)]
    pub seed: u64,
}

/// Where a failed delivery is detected in the tandem model.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailureDetection {
    /// The transfer is lost on the wire; the receiver never sees the attempt.
    InTransit,
    /// The receiver processes every attempt and rejects failed ones, so its
    /// input carries the retry-inflated rate.
    #[default]
    AtReceiver,
}

impl fmt::Display for FailureDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDetection::InTransit => write!(f, "in-transit"),
            FailureDetection::AtReceiver => write!(f, "at-receiver"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TandemConfig {
    pub arrival_rate: f64,
    pub broker: StageConfig,
    pub receiver: StageConfig,
    #[serde(default = "default_network_delay")]
    pub network_delay: DistributionSpec,
    #[serde(default)]
    pub failure_probability: f64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default)]
    pub failure_detection: FailureDetection,
    #[serde(default)]
    pub warmup: f64,
    pub duration: f64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "model", rename_all = "kebab-case")]
pub enum ExperimentConfig {
    Single(SingleStageConfig),
    Tandem(TandemConfig),
}

fn validate_window(warmup: f64, duration: f64) -> crate::error::Result<()> {
    let valid = duration.is_finite()
        && duration > 0.0
        && warmup.is_finite()
        && warmup >= 0.0
        && warmup < duration;
    if !valid {
        return Err(Error::InvalidDuration { warmup, duration });
    }
    Ok(())
}

fn validate_arrival_rate(rate: f64) -> crate::error::Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidArrivalRate(rate));
    }
    Ok(())
}

impl StageConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.servers == 0 {
            return Err(Error::InvalidServerCount(self.servers));
        }
        build_distribution(&self.service)?;
        Ok(())
    }
}

impl SingleStageConfig {
    /// Parameter checks only; stability needs the built distribution and is
    /// checked by the engine.
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_window(self.warmup, self.duration)?;
        validate_arrival_rate(self.arrival_rate)?;
        self.stage.validate()
    }
}

impl TandemConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_window(self.warmup, self.duration)?;
        validate_arrival_rate(self.arrival_rate)?;
        let p = self.failure_probability;
        if !(0.0..1.0).contains(&p) {
            return Err(Error::InvalidFailureProbability(p));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidMaxAttempts);
        }
        if !self.retry_backoff.is_finite() || self.retry_backoff < 0.0 {
            return Err(Error::InvalidBackoff(self.retry_backoff));
        }
        self.broker.validate()?;
        self.receiver.validate()?;
        build_distribution(&self.network_delay)?;
        Ok(())
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            ExperimentConfig::Single(config) => config.validate(),
            ExperimentConfig::Tandem(config) => config.validate(),
        }
    }
}

pub fn default_network_delay() -> DistributionSpec {
    DistributionSpec::exponential_mean(0.001)
}

pub fn default_retry_backoff() -> f64 {
    0.001
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_distribution_specs() {
        assert_eq!(
            "exp:10".parse::<DistributionSpec>().unwrap(),
            DistributionSpec::Exponential { rate: 10.0 }
        );
        assert_eq!(
            "pareto:2.5:1.0".parse::<DistributionSpec>().unwrap(),
            DistributionSpec::Pareto {
                shape: 2.5,
                scale: 1.0
            }
        );
        assert_eq!(
            "erlang:4:0.1".parse::<DistributionSpec>().unwrap(),
            DistributionSpec::Erlang { k: 4, mean: 0.1 }
        );
        assert_eq!(
            " Det : 0.25 ".parse::<DistributionSpec>().unwrap(),
            DistributionSpec::Deterministic { value: 0.25 }
        );
    }

    #[test]
    fn rejects_malformed_distribution_specs() {
        assert!("exp".parse::<DistributionSpec>().is_err());
        assert!("exp:ten".parse::<DistributionSpec>().is_err());
        assert!("pareto:2.5".parse::<DistributionSpec>().is_err());
        assert!("erlang:2.5:1".parse::<DistributionSpec>().is_err());
        assert!("gaussian:1:1".parse::<DistributionSpec>().is_err());
        let err = "uniform:1".parse::<DistributionSpec>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid distribution spec 'uniform:1': expected family:param[:param]"
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let spec = DistributionSpec::Weibull {
            shape: 1.5,
            scale: 0.2,
        };
        assert_eq!(spec.to_string(), "weibull:1.5:0.2");
        assert_eq!(spec.to_string().parse::<DistributionSpec>().unwrap(), spec);
    }

    #[test]
    fn lognormal_from_moments_matches_target_mean() {
        let DistributionSpec::Lognormal { mu, sigma } =
            DistributionSpec::lognormal_from_moments(0.1, 4.0)
        else {
            panic!("expected lognormal");
        };
        let mean = (mu + sigma * sigma / 2.0).exp();
        assert!((mean - 0.1).abs() < 1e-12);
        assert!(((sigma * sigma).exp() - 1.0 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn tandem_config_defaults_fill_in_from_toml() {
        let config: ExperimentConfig = toml::from_str(
            r#"
model = "tandem"
arrival_rate = 100.0
duration = 50.0

[broker]
name = "broker"
servers = 10
service = { family = "exponential", rate = 20.0 }

[receiver]
name = "receiver"
servers = 10
service = { family = "erlang", k = 2, mean = 0.05 }
"#,
        )
        .expect("toml should parse");

        let ExperimentConfig::Tandem(config) = config else {
            panic!("expected tandem config");
        };
        assert_eq!(config.failure_probability, 0.0);
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.retry_backoff, 0.001);
        assert_eq!(config.failure_detection, FailureDetection::AtReceiver);
        assert_eq!(config.network_delay, default_network_delay());
        assert_eq!(config.seed, 0);
    }
}
