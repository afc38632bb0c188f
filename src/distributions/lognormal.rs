use rand::RngCore;
use rand_distr::{Distribution, LogNormal};

use crate::distributions::{invalid, require_positive, ServiceTimeDistribution};
use crate::error::{Error, Result};
use crate::models::DistributionSpec;

#[derive(Clone, Debug)]
pub struct Lognormal {
    mu: f64,
    sigma: f64,
    inner: LogNormal<f64>,
}

impl Lognormal {
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        if !mu.is_finite() {
            return Err(Error::InvalidDistribution {
                family: "lognormal".to_string(),
                reason: format!("mu must be finite (got {})", mu),
            });
        }
        let sigma = require_positive("lognormal", "sigma", sigma)?;
        let inner = LogNormal::new(mu, sigma).map_err(|err| invalid("lognormal", err))?;
        Ok(Self { mu, sigma, inner })
    }
}

impl ServiceTimeDistribution for Lognormal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.inner.sample(rng)
    }

    fn mean(&self) -> f64 {
        (self.mu + self.sigma * self.sigma / 2.0).exp()
    }

    fn variance(&self) -> f64 {
        let s2 = self.sigma * self.sigma;
        (s2.exp() - 1.0) * (2.0 * self.mu + s2).exp()
    }

    fn cv_squared(&self) -> f64 {
        (self.sigma * self.sigma).exp() - 1.0
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Lognormal {
            mu: self.mu,
            sigma: self.sigma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::test_support::sample_moments;

    #[test]
    fn moment_matched_parameters_round_trip() {
        let DistributionSpec::Lognormal { mu, sigma } =
            DistributionSpec::lognormal_from_moments(0.5, 2.0)
        else {
            panic!("expected lognormal");
        };
        let dist = Lognormal::new(mu, sigma).unwrap();
        assert!((dist.mean() - 0.5).abs() < 1e-12);
        assert!((dist.cv_squared() - 2.0).abs() < 1e-9);
        assert!((dist.variance() / (dist.mean() * dist.mean()) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sampled_mean_converges() {
        let dist = Lognormal::new(-1.0, 0.5).unwrap();
        let (mean, _) = sample_moments(&dist, 100_000, 5);
        assert!((mean - dist.mean()).abs() / dist.mean() < 0.02, "mean {}", mean);
    }
}
