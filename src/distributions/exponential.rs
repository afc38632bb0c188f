use rand::RngCore;
use rand_distr::{Distribution, Exp};

use crate::distributions::{invalid, require_positive, ServiceTimeDistribution};
use crate::error::Result;
use crate::models::DistributionSpec;

#[derive(Clone, Debug)]
pub struct Exponential {
    rate: f64,
    inner: Exp<f64>,
}

impl Exponential {
    pub fn new(rate: f64) -> Result<Self> {
        let rate = require_positive("exponential", "rate", rate)?;
        let inner = Exp::new(rate).map_err(|err| invalid("exponential", err))?;
        Ok(Self { rate, inner })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl ServiceTimeDistribution for Exponential {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.inner.sample(rng)
    }

    fn mean(&self) -> f64 {
        1.0 / self.rate
    }

    fn variance(&self) -> f64 {
        1.0 / (self.rate * self.rate)
    }

    fn quantile(&self, p: f64) -> Option<f64> {
        (0.0..1.0).contains(&p).then(|| -(1.0 - p).ln() / self.rate)
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Exponential { rate: self.rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::test_support::sample_moments;

    #[test]
    fn moments_follow_rate() {
        let dist = Exponential::new(4.0).unwrap();
        assert_eq!(dist.mean(), 0.25);
        assert_eq!(dist.variance(), 0.0625);
        assert!((dist.cv_squared() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sampled_mean_converges() {
        let dist = Exponential::new(4.0).unwrap();
        let (mean, _) = sample_moments(&dist, 100_000, 3);
        assert!((mean - 0.25).abs() / 0.25 < 0.02, "mean {}", mean);
    }

    #[test]
    fn quantile_inverts_cdf() {
        let dist = Exponential::new(2.0).unwrap();
        let q = dist.quantile(0.99).unwrap();
        assert!((1.0 - (-2.0 * q).exp() - 0.99).abs() < 1e-12);
        assert_eq!(dist.quantile(1.0), None);
    }
}
