use rand::RngCore;
use rand_distr::{Distribution, Gamma};

use crate::distributions::{invalid, require_positive, ServiceTimeDistribution};
use crate::error::{Error, Result};
use crate::models::DistributionSpec;

/// Erlang-k: the sum of `k` exponential phases, parameterised by its overall mean.
#[derive(Clone, Debug)]
pub struct Erlang {
    k: u32,
    mean: f64,
    inner: Gamma<f64>,
}

impl Erlang {
    pub fn new(k: u32, mean: f64) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidDistribution {
                family: "erlang".to_string(),
                reason: "k must be at least 1".to_string(),
            });
        }
        let mean = require_positive("erlang", "mean", mean)?;
        let inner = Gamma::new(k as f64, mean / k as f64).map_err(|err| invalid("erlang", err))?;
        Ok(Self { k, mean, inner })
    }
}

impl ServiceTimeDistribution for Erlang {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.inner.sample(rng)
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn variance(&self) -> f64 {
        self.mean * self.mean / self.k as f64
    }

    fn quantile(&self, p: f64) -> Option<f64> {
        if self.k != 1 || !(0.0..1.0).contains(&p) {
            return None;
        }
        Some(-(1.0 - p).ln() * self.mean)
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Erlang {
            k: self.k,
            mean: self.mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::test_support::sample_moments;

    #[test]
    fn cv_squared_is_inverse_of_phases() {
        for k in [1, 2, 4, 8] {
            let dist = Erlang::new(k, 0.2).unwrap();
            assert!((dist.cv_squared() - 1.0 / k as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn measured_cv_squared_matches_phases() {
        for (k, seed) in [(1, 1), (2, 2), (4, 4), (8, 8)] {
            let dist = Erlang::new(k, 0.2).unwrap();
            let (mean, variance) = sample_moments(&dist, 100_000, seed);
            let measured = variance / (mean * mean);
            let expected = 1.0 / k as f64;
            assert!(
                (measured - expected).abs() / expected < 0.05,
                "k={} measured cv2 {}",
                k,
                measured
            );
        }
    }

    #[test]
    fn only_single_phase_has_closed_form_quantile() {
        assert!(Erlang::new(1, 1.0).unwrap().quantile(0.5).is_some());
        assert!(Erlang::new(3, 1.0).unwrap().quantile(0.5).is_none());
    }
}
