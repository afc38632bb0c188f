use thiserror::Error;

use crate::state::JobPhase;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "unstable configuration at stage '{stage}': utilization {utilization:.4} >= 1 \
         (arrival rate {arrival_rate}, {servers} servers at service rate {service_rate})"
    )]
    UnstableConfiguration {
        stage: String,
        arrival_rate: f64,
        servers: usize,
        service_rate: f64,
        utilization: f64,
    },
    #[error("invalid {family} distribution: {reason}")]
    InvalidDistribution { family: String, reason: String },
    #[error("invalid distribution spec '{0}': expected family:param[:param]")]
    InvalidDistributionSpec(String),
    #[error("server count must be at least 1 (got {0})")]
    InvalidServerCount(usize),
    #[error("arrival rate must be > 0 (got {0})")]
    InvalidArrivalRate(f64),
    #[error("warmup must be >= 0 and below duration (warmup {warmup}, duration {duration})")]
    InvalidDuration { warmup: f64, duration: f64 },
    #[error("failure probability must be in [0, 1) (got {0})")]
    InvalidFailureProbability(f64),
    #[error("max attempts must be at least 1")]
    InvalidMaxAttempts,
    #[error("retry backoff must be >= 0 (got {0})")]
    InvalidBackoff(f64),
    #[error("insufficient tail data: {available} exceedances above threshold, need at least {required}")]
    InsufficientTailData { available: usize, required: usize },
    #[error("degenerate sample of size {len}")]
    DegenerateSample { len: usize },
    #[error("percentile must be in (0, 1) and above the tail threshold (got {0})")]
    InvalidPercentile(f64),
    #[error("bootstrap needs at least one resample and confidence in (0, 1)")]
    InvalidBootstrap,
    #[error("job {job}: invalid transition {from:?} -> {to:?}")]
    InvalidJobTransition {
        job: usize,
        from: JobPhase,
        to: JobPhase,
    },
    #[error("server pool '{0}' released with no busy server")]
    IdleRelease(String),
    #[error("invalid sample value '{0}'")]
    InvalidSample(String),
    #[error("{0}")]
    ConfigIo(String),
    #[error("{0}")]
    ConfigParse(String),
    #[error("unsupported config format '{0}'")]
    UnsupportedConfigFormat(String),
    #[error("{0}")]
    Cli(String),
    #[error("failed to render output: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, Error>;
