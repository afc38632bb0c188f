//! High-percentile estimation for latency samples.
//!
//! Three estimators are offered: the plain empirical quantile, a percentile
//! bootstrap with a confidence interval, and a peaks-over-threshold fit of
//! the Generalized Pareto Distribution. The Hill estimator is a diagnostic
//! for the tail index. Heavy-tailed inputs need the GPD fit; a normal
//! approximation is provided only to show how far off it is.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::distributions::ServiceTimeDistribution;
use crate::error::{Error, Result};
use crate::metrics::{mean, percentile_sorted, sample_variance};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailMethod {
    Empirical,
    Bootstrap,
    Evt,
    Normal,
}

impl fmt::Display for TailMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailMethod::Empirical => write!(f, "empirical"),
            TailMethod::Bootstrap => write!(f, "bootstrap"),
            TailMethod::Evt => write!(f, "evt"),
            TailMethod::Normal => write!(f, "normal"),
        }
    }
}

/// Method to use for a sample drawn from `dist`: the GPD fit for heavy
/// tails, the distribution-free bootstrap otherwise.
pub fn recommended_method(dist: &dyn ServiceTimeDistribution) -> TailMethod {
    if dist.is_heavy_tailed() {
        TailMethod::Evt
    } else {
        TailMethod::Bootstrap
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PercentileEstimate {
    pub method: TailMethod,
    pub percentile: f64,
    pub estimate: f64,
    pub interval: Option<ConfidenceInterval>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootstrapOptions {
    pub resamples: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            resamples: 10_000,
            confidence: 0.95,
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvtOptions {
    /// Sample quantile used as the exceedance threshold.
    pub threshold_quantile: f64,
    pub min_exceedances: usize,
}

impl Default for EvtOptions {
    fn default() -> Self {
        Self {
            threshold_quantile: 0.90,
            min_exceedances: 20,
        }
    }
}

fn check_sample(sample: &[f64]) -> Result<()> {
    if sample.len() < 2 {
        return Err(Error::DegenerateSample { len: sample.len() });
    }
    if let Some(bad) = sample.iter().find(|x| !x.is_finite()) {
        return Err(Error::InvalidSample(bad.to_string()));
    }
    Ok(())
}

fn check_percentile(p: f64) -> Result<()> {
    if !(p > 0.0 && p < 1.0) {
        return Err(Error::InvalidPercentile(p));
    }
    Ok(())
}

fn sorted(sample: &[f64]) -> Vec<f64> {
    let mut sorted = sample.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
}

pub fn empirical_percentile(sample: &[f64], p: f64) -> Result<f64> {
    check_sample(sample)?;
    check_percentile(p)?;
    percentile_sorted(&sorted(sample), p).ok_or(Error::InvalidPercentile(p))
}

/// Interpolated quantile of an unsorted buffer, reordering it in place.
fn select_quantile(buf: &mut [f64], q: f64) -> f64 {
    let h = (buf.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let (_, lo_value, upper) = buf.select_nth_unstable_by(lo, f64::total_cmp);
    let lo_value = *lo_value;
    let hi_value = upper.iter().copied().fold(f64::INFINITY, f64::min);
    if hi_value.is_finite() {
        lo_value + (h - lo as f64) * (hi_value - lo_value)
    } else {
        lo_value
    }
}

/// Percentile bootstrap: the point estimate is the sample percentile, the
/// interval comes from the percentile of `resamples` resampled estimates.
pub fn bootstrap_percentile(
    sample: &[f64],
    p: f64,
    options: &BootstrapOptions,
) -> Result<PercentileEstimate> {
    check_sample(sample)?;
    check_percentile(p)?;
    if options.resamples == 0 || !(options.confidence > 0.0 && options.confidence < 1.0) {
        return Err(Error::InvalidBootstrap);
    }

    let n = sample.len();
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut buf = vec![0.0; n];
    let mut estimates = Vec::with_capacity(options.resamples);
    for _ in 0..options.resamples {
        for slot in buf.iter_mut() {
            *slot = sample[rng.gen_range(0..n)];
        }
        estimates.push(select_quantile(&mut buf, p));
    }
    estimates.sort_unstable_by(f64::total_cmp);

    let alpha = 1.0 - options.confidence;
    let lower = percentile_sorted(&estimates, alpha / 2.0).ok_or(Error::InvalidBootstrap)?;
    let upper = percentile_sorted(&estimates, 1.0 - alpha / 2.0).ok_or(Error::InvalidBootstrap)?;
    debug!(resamples = options.resamples, lower, upper, "bootstrap interval");

    Ok(PercentileEstimate {
        method: TailMethod::Bootstrap,
        percentile: p,
        estimate: empirical_percentile(sample, p)?,
        interval: Some(ConfidenceInterval {
            lower,
            upper,
            confidence: options.confidence,
        }),
    })
}

/// Generalized Pareto fit to the exceedances over `threshold`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GpdFit {
    pub threshold: f64,
    /// ξ; positive for power-law tails, where the tail index is 1/ξ.
    pub shape: f64,
    /// σ
    pub scale: f64,
    pub exceedances: usize,
    pub sample_size: usize,
}

impl GpdFit {
    pub fn exceedance_rate(&self) -> f64 {
        self.exceedances as f64 / self.sample_size as f64
    }

    pub fn tail_index(&self) -> Option<f64> {
        (self.shape > 0.0).then(|| 1.0 / self.shape)
    }

    /// Inverts the fitted tail. Only quantiles above the threshold are
    /// defined, i.e. `1 - p` must be below the exceedance rate.
    pub fn quantile(&self, p: f64) -> Result<f64> {
        check_percentile(p)?;
        let zeta = self.exceedance_rate();
        let tail = 1.0 - p;
        if tail >= zeta {
            return Err(Error::InvalidPercentile(p));
        }
        if self.shape.abs() < 1e-9 {
            return Ok(self.threshold + self.scale * (zeta / tail).ln());
        }
        Ok(self.threshold + self.scale / self.shape * ((tail / zeta).powf(-self.shape) - 1.0))
    }
}

/// Profile log-likelihood of the GPD at θ = ξ/σ, with the ξ and σ that
/// maximise it for that θ.
struct Profile<'a> {
    excesses: &'a [f64],
    max: f64,
    mean: f64,
}

impl Profile<'_> {
    fn at(&self, theta: f64) -> (f64, f64, f64) {
        let k = self.excesses.len() as f64;
        if (theta * self.max).abs() < 1e-9 {
            return (-k * (self.mean.ln() + 1.0), 0.0, self.mean);
        }
        if self.excesses.iter().any(|y| 1.0 + theta * y <= 0.0) {
            return (f64::NEG_INFINITY, 0.0, 0.0);
        }
        let xi = self.excesses.iter().map(|y| (theta * y).ln_1p()).sum::<f64>() / k;
        let sigma = xi / theta;
        if sigma <= 0.0 {
            return (f64::NEG_INFINITY, xi, sigma);
        }
        (-k * (sigma.ln() + 1.0 + xi), xi, sigma)
    }

    fn grid(&self) -> Vec<f64> {
        let mut grid: Vec<f64> = (1..100)
            .rev()
            .map(|i| -(i as f64 / 100.0) / self.max * 0.999)
            .collect();
        grid.push(0.0);
        let (lo, hi) = (1e-4f64.log10(), 50f64.log10());
        grid.extend((0..200).map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / 199.0) / self.mean));
        grid
    }

    /// Grid search followed by golden-section refinement around the best
    /// grid point.
    fn maximise(&self) -> (f64, f64) {
        let grid = self.grid();
        let best = grid
            .iter()
            .enumerate()
            .map(|(i, theta)| (i, self.at(*theta).0))
            .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc })
            .0;
        let mut a = grid[best.saturating_sub(1)];
        let mut c = grid[(best + 1).min(grid.len() - 1)];

        let g = (5f64.sqrt() - 1.0) / 2.0;
        let mut x1 = c - g * (c - a);
        let mut x2 = a + g * (c - a);
        let mut f1 = self.at(x1).0;
        let mut f2 = self.at(x2).0;
        for _ in 0..100 {
            if f1 < f2 {
                a = x1;
                x1 = x2;
                f1 = f2;
                x2 = a + g * (c - a);
                f2 = self.at(x2).0;
            } else {
                c = x2;
                x2 = x1;
                f2 = f1;
                x1 = c - g * (c - a);
                f1 = self.at(x1).0;
            }
        }
        let (_, xi, sigma) = self.at((a + c) / 2.0);
        (xi, sigma)
    }
}

/// Maximum-likelihood GPD fit to the exceedances over the configured
/// threshold quantile.
pub fn fit_gpd(sample: &[f64], options: &EvtOptions) -> Result<GpdFit> {
    check_sample(sample)?;
    check_percentile(options.threshold_quantile)?;
    let sorted = sorted(sample);
    let threshold = percentile_sorted(&sorted, options.threshold_quantile)
        .ok_or(Error::InvalidPercentile(options.threshold_quantile))?;
    let excesses: Vec<f64> = sorted
        .iter()
        .filter(|x| **x > threshold)
        .map(|x| x - threshold)
        .collect();
    if excesses.len() < options.min_exceedances.max(2) {
        return Err(Error::InsufficientTailData {
            available: excesses.len(),
            required: options.min_exceedances.max(2),
        });
    }

    let profile = Profile {
        excesses: &excesses,
        max: excesses.iter().copied().fold(0.0, f64::max),
        mean: mean(&excesses),
    };
    let (shape, scale) = profile.maximise();
    if !(scale.is_finite() && scale > 0.0) {
        return Err(Error::DegenerateSample { len: sample.len() });
    }
    debug!(threshold, shape, scale, exceedances = excesses.len(), "gpd fit");

    Ok(GpdFit {
        threshold,
        shape,
        scale,
        exceedances: excesses.len(),
        sample_size: sample.len(),
    })
}

pub fn evt_percentile(sample: &[f64], p: f64, options: &EvtOptions) -> Result<PercentileEstimate> {
    let fit = fit_gpd(sample, options)?;
    Ok(PercentileEstimate {
        method: TailMethod::Evt,
        percentile: p,
        estimate: fit.quantile(p)?,
        interval: None,
    })
}

/// Hill estimate of the tail index α from the `k` largest order statistics.
pub fn hill_estimator(sample: &[f64], k: usize) -> Result<f64> {
    check_sample(sample)?;
    if k == 0 || k >= sample.len() {
        return Err(Error::InsufficientTailData {
            available: sample.len() - 1,
            required: k.max(1),
        });
    }
    let mut descending = sorted(sample);
    descending.reverse();
    let floor = descending[k];
    if floor <= 0.0 {
        return Err(Error::DegenerateSample { len: sample.len() });
    }
    let sum: f64 = descending[..k].iter().map(|x| (x / floor).ln()).sum();
    if sum <= 0.0 {
        return Err(Error::DegenerateSample { len: sample.len() });
    }
    Ok(k as f64 / sum)
}

/// Mean plus `z_p` standard deviations.
pub fn normal_approximation(sample: &[f64], p: f64) -> Result<f64> {
    check_sample(sample)?;
    check_percentile(p)?;
    let sd = sample_variance(sample)
        .ok_or(Error::DegenerateSample { len: sample.len() })?
        .sqrt();
    Ok(mean(sample) + standard_normal_quantile(p) * sd)
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Every estimator applied to one sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TailReport {
    pub samples: usize,
    pub percentile: f64,
    pub empirical: f64,
    pub bootstrap: PercentileEstimate,
    /// `None` when the tail is too thin to fit or `p` sits below the threshold.
    pub evt: Option<PercentileEstimate>,
    pub gpd: Option<GpdFit>,
    pub hill_tail_index: Option<f64>,
    pub normal: f64,
}

pub fn analyze_tail(
    sample: &[f64],
    p: f64,
    bootstrap: &BootstrapOptions,
    evt: &EvtOptions,
) -> Result<TailReport> {
    let empirical = empirical_percentile(sample, p)?;
    let bootstrap = bootstrap_percentile(sample, p, bootstrap)?;
    let normal = normal_approximation(sample, p)?;

    let gpd = match fit_gpd(sample, evt) {
        Ok(fit) => Some(fit),
        Err(err @ Error::InsufficientTailData { .. }) => {
            warn!(%err, "skipping GPD fit");
            None
        }
        Err(err) => return Err(err),
    };
    let evt = match gpd.map(|fit| fit.quantile(p)).transpose() {
        Ok(estimate) => estimate.map(|estimate| PercentileEstimate {
            method: TailMethod::Evt,
            percentile: p,
            estimate,
            interval: None,
        }),
        Err(err) => {
            warn!(%err, "percentile lies below the GPD threshold");
            None
        }
    };
    let hill_tail_index = gpd.and_then(|fit| hill_estimator(sample, fit.exceedances).ok());

    Ok(TailReport {
        samples: sample.len(),
        percentile: p,
        empirical,
        bootstrap,
        evt,
        gpd,
        hill_tail_index,
        normal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Exponential, Pareto};

    const PARETO_P99: f64 = 6.309_573_444_801_933;

    /// Evenly spaced quantiles of Pareto(2.5, 1).
    fn stratified_pareto(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (1.0 - (i as f64 + 0.5) / n as f64).powf(-1.0 / 2.5))
            .collect()
    }

    #[test]
    fn empirical_percentile_interpolates() {
        let sample = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(empirical_percentile(&sample, 0.5).unwrap(), 3.0);
        assert_eq!(empirical_percentile(&sample, 0.375).unwrap(), 2.5);
    }

    #[test]
    fn degenerate_inputs_are_typed_errors() {
        assert!(matches!(
            empirical_percentile(&[1.0], 0.5),
            Err(Error::DegenerateSample { len: 1 })
        ));
        assert!(matches!(
            empirical_percentile(&[1.0, 2.0], 1.0),
            Err(Error::InvalidPercentile(_))
        ));
        assert!(matches!(
            normal_approximation(&[1.0, f64::NAN], 0.9),
            Err(Error::InvalidSample(_))
        ));
    }

    #[test]
    fn evt_recovers_pareto_p99_where_normal_fails() {
        let sample = stratified_pareto(20_000);
        let fit = fit_gpd(&sample, &EvtOptions::default()).unwrap();
        assert_eq!(fit.exceedances, 2_000);
        let evt = fit.quantile(0.99).unwrap();
        assert!(
            (evt - PARETO_P99).abs() / PARETO_P99 < 0.10,
            "evt {}",
            evt
        );
        let tail_index = fit.tail_index().unwrap();
        assert!((tail_index - 2.5).abs() / 2.5 < 0.15, "1/xi {}", tail_index);

        let normal = normal_approximation(&sample, 0.99).unwrap();
        assert!(
            (normal - PARETO_P99).abs() / PARETO_P99 > 0.20,
            "normal {}",
            normal
        );
        assert!(normal < PARETO_P99);
    }

    #[test]
    fn evt_handles_exponential_tail() {
        let n = 20_000;
        let sample: Vec<f64> = (0..n)
            .map(|i| -(1.0 - (i as f64 + 0.5) / n as f64).ln() / 2.0)
            .collect();
        let fit = fit_gpd(&sample, &EvtOptions::default()).unwrap();
        assert!(fit.shape.abs() < 0.05, "xi {}", fit.shape);
        let truth = -(0.01f64).ln() / 2.0;
        let estimate = fit.quantile(0.99).unwrap();
        assert!((estimate - truth).abs() / truth < 0.02);
    }

    #[test]
    fn too_few_exceedances_is_insufficient_tail_data() {
        let sample = stratified_pareto(100);
        let err = fit_gpd(&sample, &EvtOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientTailData {
                available: 10,
                required: 20
            }
        ));
        assert_eq!(
            err.to_string(),
            "insufficient tail data: 10 exceedances above threshold, need at least 20"
        );
    }

    #[test]
    fn quantile_below_threshold_is_rejected() {
        let fit = fit_gpd(&stratified_pareto(20_000), &EvtOptions::default()).unwrap();
        assert!(matches!(fit.quantile(0.5), Err(Error::InvalidPercentile(_))));
        assert!(matches!(fit.quantile(0.9), Err(Error::InvalidPercentile(_))));
    }

    #[test]
    fn hill_estimates_pareto_tail_index() {
        let alpha = hill_estimator(&stratified_pareto(20_000), 2_000).unwrap();
        assert!((alpha - 2.5).abs() / 2.5 < 0.05, "alpha {}", alpha);
        assert!(matches!(
            hill_estimator(&[1.0, 2.0, 3.0], 3),
            Err(Error::InsufficientTailData { .. })
        ));
    }

    #[test]
    fn bootstrap_interval_brackets_estimate_and_is_seeded() {
        let sample = stratified_pareto(2_000);
        let options = BootstrapOptions {
            resamples: 300,
            confidence: 0.9,
            seed: 11,
        };
        let a = bootstrap_percentile(&sample, 0.95, &options).unwrap();
        let b = bootstrap_percentile(&sample, 0.95, &options).unwrap();
        assert_eq!(a, b);
        let interval = a.interval.unwrap();
        assert!(interval.lower <= a.estimate && a.estimate <= interval.upper);
        assert!(interval.lower < interval.upper);

        let bad = BootstrapOptions {
            resamples: 0,
            ..options
        };
        assert!(matches!(
            bootstrap_percentile(&sample, 0.95, &bad),
            Err(Error::InvalidBootstrap)
        ));
    }

    #[test]
    fn select_quantile_matches_sorted_percentile() {
        let sample = stratified_pareto(101);
        let sorted = sorted(&sample);
        let mut buf: Vec<f64> = sample.iter().rev().copied().collect();
        for q in [0.0, 0.33, 0.5, 0.99, 1.0] {
            let expected = percentile_sorted(&sorted, q).unwrap();
            assert!((select_quantile(&mut buf, q) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn normal_quantile_matches_tables() {
        assert_eq!(standard_normal_quantile(0.5), 0.0);
        assert!((standard_normal_quantile(0.975) - 1.959_964).abs() < 1e-6);
        assert!((standard_normal_quantile(0.99) - 2.326_348).abs() < 1e-6);
        assert!((standard_normal_quantile(0.001) + 3.090_232).abs() < 1e-6);
    }

    #[test]
    fn heavy_tails_recommend_evt() {
        let pareto = Pareto::new(2.5, 1.0).unwrap();
        let exponential = Exponential::new(1.0).unwrap();
        assert_eq!(recommended_method(&pareto), TailMethod::Evt);
        assert_eq!(recommended_method(&exponential), TailMethod::Bootstrap);
    }

    #[test]
    fn report_skips_evt_for_thin_samples() {
        let report = analyze_tail(
            &stratified_pareto(100),
            0.99,
            &BootstrapOptions {
                resamples: 50,
                ..BootstrapOptions::default()
            },
            &EvtOptions::default(),
        )
        .unwrap();
        assert!(report.evt.is_none());
        assert!(report.gpd.is_none());
        assert!(report.hill_tail_index.is_none());
        assert_eq!(report.samples, 100);
    }
}
