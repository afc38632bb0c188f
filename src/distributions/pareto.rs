use rand::RngCore;
use rand_distr::Distribution;

use crate::distributions::{invalid, require_positive, ServiceTimeDistribution};
use crate::error::Result;
use crate::models::DistributionSpec;

/// Pareto (type I) with tail index `shape` and minimum `scale`.
///
/// The mean is infinite for `shape <= 1` and the variance for `shape <= 2`;
/// both are reported as `f64::INFINITY` rather than rejected, so the stability
/// check downstream can refuse the configuration with a precise reason.
#[derive(Clone, Debug)]
pub struct Pareto {
    shape: f64,
    scale: f64,
    inner: rand_distr::Pareto<f64>,
}

impl Pareto {
    pub fn new(shape: f64, scale: f64) -> Result<Self> {
        let shape = require_positive("pareto", "shape", shape)?;
        let scale = require_positive("pareto", "scale", scale)?;
        let inner = rand_distr::Pareto::new(scale, shape).map_err(|err| invalid("pareto", err))?;
        Ok(Self {
            shape,
            scale,
            inner,
        })
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }
}

impl ServiceTimeDistribution for Pareto {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.inner.sample(rng)
    }

    fn mean(&self) -> f64 {
        if self.shape <= 1.0 {
            return f64::INFINITY;
        }
        self.shape * self.scale / (self.shape - 1.0)
    }

    fn variance(&self) -> f64 {
        if self.shape <= 2.0 {
            return f64::INFINITY;
        }
        let a = self.shape;
        self.scale * self.scale * a / ((a - 1.0) * (a - 1.0) * (a - 2.0))
    }

    fn quantile(&self, p: f64) -> Option<f64> {
        (0.0..1.0)
            .contains(&p)
            .then(|| self.scale / (1.0 - p).powf(1.0 / self.shape))
    }

    fn is_heavy_tailed(&self) -> bool {
        self.shape < 3.0
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Pareto {
            shape: self.shape,
            scale: self.scale,
        }
    }
}
