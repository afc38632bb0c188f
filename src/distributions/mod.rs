mod deterministic;
mod erlang;
mod exponential;
mod lognormal;
mod pareto;
mod weibull;

use rand::RngCore;
use std::f64::consts::PI;
use std::fmt;

use crate::error::{Error, Result};
use crate::models::DistributionSpec;

pub use deterministic::Deterministic;
pub use erlang::Erlang;
pub use exponential::Exponential;
pub use lognormal::Lognormal;
pub use pareto::Pareto;
pub use weibull::Weibull;

/// A service-time (or delay) distribution with fixed parameters.
///
/// Implementations are immutable once built and shared read-only by every job
/// of a run; all randomness comes from the generator passed to `sample`.
pub trait ServiceTimeDistribution: fmt::Debug + Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore) -> f64;
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;

    /// Squared coefficient of variation, Var[S] / E[S]^2.
    fn cv_squared(&self) -> f64 {
        let mean = self.mean();
        self.variance() / (mean * mean)
    }

    /// Closed-form quantile, for families that have one.
    fn quantile(&self, _p: f64) -> Option<f64> {
        None
    }

    /// Whether Gaussian tail approximations are unreliable for this shape.
    fn is_heavy_tailed(&self) -> bool {
        false
    }

    fn spec(&self) -> DistributionSpec;
}

pub fn build_distribution(spec: &DistributionSpec) -> Result<Box<dyn ServiceTimeDistribution>> {
    let dist: Box<dyn ServiceTimeDistribution> = match *spec {
        DistributionSpec::Exponential { rate } => Box::new(Exponential::new(rate)?),
        DistributionSpec::Pareto { shape, scale } => Box::new(Pareto::new(shape, scale)?),
        DistributionSpec::Erlang { k, mean } => Box::new(Erlang::new(k, mean)?),
        DistributionSpec::Lognormal { mu, sigma } => Box::new(Lognormal::new(mu, sigma)?),
        DistributionSpec::Weibull { shape, scale } => Box::new(Weibull::new(shape, scale)?),
        DistributionSpec::Deterministic { value } => Box::new(Deterministic::new(value)?),
    };
    Ok(dist)
}

pub fn families() -> &'static [(&'static str, &'static str)] {
    &[
        ("exp:<rate>", "exponential, CV^2 = 1"),
        ("pareto:<shape>:<scale>", "pareto (heavy-tailed for shape < 3)"),
        ("erlang:<k>:<mean>", "erlang-k, CV^2 = 1/k"),
        ("lognormal:<mu>:<sigma>", "lognormal of ln-space mean and std-dev"),
        ("weibull:<shape>:<scale>", "weibull (heavy-tailed for shape < 1)"),
        ("det:<value>", "deterministic, CV^2 = 0"),
    ]
}

pub(crate) fn require_positive(family: &str, name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidDistribution {
            family: family.to_string(),
            reason: format!("{} must be finite and > 0 (got {})", name, value),
        })
    }
}

pub(crate) fn invalid(family: &str, err: impl fmt::Display) -> Error {
    Error::InvalidDistribution {
        family: family.to_string(),
        reason: err.to_string(),
    }
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function via the Lanczos approximation (g = 7).
pub(crate) fn gamma_fn(x: f64) -> f64 {
    if x < 0.5 {
        return PI / ((PI * x).sin() * gamma_fn(1.0 - x));
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEFFS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFS[0], |acc, (idx, coeff)| {
            acc + coeff / (x + idx as f64)
        });
    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * series
}
