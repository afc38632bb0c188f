use rand::RngCore;
use rand_distr::Distribution;

use crate::distributions::{gamma_fn, invalid, require_positive, ServiceTimeDistribution};
use crate::error::Result;
use crate::models::DistributionSpec;

#[derive(Clone, Debug)]
pub struct Weibull {
    shape: f64,
    scale: f64,
    inner: rand_distr::Weibull<f64>,
}

impl Weibull {
    pub fn new(shape: f64, scale: f64) -> Result<Self> {
        let shape = require_positive("weibull", "shape", shape)?;
        let scale = require_positive("weibull", "scale", scale)?;
        let inner =
            rand_distr::Weibull::new(scale, shape).map_err(|err| invalid("weibull", err))?;
        Ok(Self {
            shape,
            scale,
            inner,
        })
    }
}

impl ServiceTimeDistribution for Weibull {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.inner.sample(rng)
    }

    fn mean(&self) -> f64 {
        self.scale * gamma_fn(1.0 + 1.0 / self.shape)
    }

    fn variance(&self) -> f64 {
        let g1 = gamma_fn(1.0 + 1.0 / self.shape);
        let g2 = gamma_fn(1.0 + 2.0 / self.shape);
        self.scale * self.scale * (g2 - g1 * g1)
    }

    fn quantile(&self, p: f64) -> Option<f64> {
        (0.0..1.0)
            .contains(&p)
            .then(|| self.scale * (-(1.0 - p).ln()).powf(1.0 / self.shape))
    }

    // Stretched-exponential tails decay slower than any exponential below shape 1.
    fn is_heavy_tailed(&self) -> bool {
        self.shape < 1.0
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Weibull {
            shape: self.shape,
            scale: self.scale,
        }
    }
}
