use rand::RngCore;

use crate::distributions::{require_positive, ServiceTimeDistribution};
use crate::error::Result;
use crate::models::DistributionSpec;

#[derive(Clone, Debug)]
pub struct Deterministic {
    value: f64,
}

impl Deterministic {
    pub fn new(value: f64) -> Result<Self> {
        let value = require_positive("deterministic", "value", value)?;
        Ok(Self { value })
    }
}

impl ServiceTimeDistribution for Deterministic {
    fn sample(&self, _rng: &mut dyn RngCore) -> f64 {
        self.value
    }

    fn mean(&self) -> f64 {
        self.value
    }

    fn variance(&self) -> f64 {
        0.0
    }

    fn quantile(&self, p: f64) -> Option<f64> {
        (0.0..1.0).contains(&p).then_some(self.value)
    }

    fn spec(&self) -> DistributionSpec {
        DistributionSpec::Deterministic { value: self.value }
    }
}
