use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::analytics::ApproximationMethod;
use crate::error::{Error, Result};
use crate::logging::DEFAULT_LEVEL;
use crate::models::{
    default_network_delay, default_retry_backoff, DistributionSpec, ExperimentConfig,
    FailureDetection, SingleStageConfig, StageConfig, TandemConfig,
};
use crate::tail::{BootstrapOptions, EvtOptions};

#[derive(Parser, Debug)]
#[command(name = "broker-sim", about = "Broker/receiver queueing simulator and estimators")]
pub struct Args {
    #[arg(long, value_enum, global = true, default_value_t = FormatArg::Human)]
    pub format: FormatArg,
    #[arg(long, global = true, default_value = DEFAULT_LEVEL)]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Human,
    Summary,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate one N-server pool.
    Single(SingleArgs),
    /// Simulate broker -> network -> receiver with retries.
    Tandem(TandemArgs),
    /// Closed-form M/M/N and M/G/N estimates; no simulation.
    Analyze(AnalyzeArgs),
    /// Estimate a high percentile from newline-separated samples.
    Tail(TailArgs),
    /// Print the validated configuration without running it.
    ShowConfig {
        #[command(subcommand)]
        model: ModelCommand,
    },
    /// List the accepted distribution specs.
    ListDistributions,
}

#[derive(Subcommand, Debug)]
pub enum ModelCommand {
    Single(SingleArgs),
    Tandem(TandemArgs),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SingleArgs {
    /// TOML or JSON experiment file; flags given alongside override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub arrival_rate: Option<f64>,
    #[arg(long)]
    pub servers: Option<usize>,
    /// Service-time distribution, e.g. `exp:10` or `pareto:2.5:0.06`.
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub warmup: Option<f64>,
    #[arg(long)]
    pub duration: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionArg {
    InTransit,
    AtReceiver,
}

impl From<DetectionArg> for FailureDetection {
    fn from(value: DetectionArg) -> Self {
        match value {
            DetectionArg::InTransit => FailureDetection::InTransit,
            DetectionArg::AtReceiver => FailureDetection::AtReceiver,
        }
    }
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TandemArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub arrival_rate: Option<f64>,
    #[arg(long)]
    pub broker_servers: Option<usize>,
    #[arg(long)]
    pub broker_service: Option<String>,
    #[arg(long)]
    pub receiver_servers: Option<usize>,
    #[arg(long)]
    pub receiver_service: Option<String>,
    #[arg(long)]
    pub network_delay: Option<String>,
    #[arg(long)]
    pub failure_probability: Option<f64>,
    #[arg(long)]
    pub max_attempts: Option<u32>,
    #[arg(long)]
    pub retry_backoff: Option<f64>,
    #[arg(long, value_enum)]
    pub failure_detection: Option<DetectionArg>,
    #[arg(long)]
    pub warmup: Option<f64>,
    #[arg(long)]
    pub duration: Option<f64>,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodArg {
    Kingman,
    Whitt,
    AllenCunneen,
}

impl From<MethodArg> for ApproximationMethod {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Kingman => ApproximationMethod::Kingman,
            MethodArg::Whitt => ApproximationMethod::Whitt,
            MethodArg::AllenCunneen => ApproximationMethod::AllenCunneen,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Analyze a single or tandem experiment file instead of the flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub arrival_rate: Option<f64>,
    #[arg(long)]
    pub servers: Option<usize>,
    #[arg(long)]
    pub service: Option<String>,
    /// Repeatable; every method is reported when omitted.
    #[arg(long = "method", value_enum)]
    pub methods: Vec<MethodArg>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TailArgs {
    /// Sample file, one value per line; `-` reads stdin.
    pub input: String,
    #[arg(long, default_value_t = 0.99)]
    pub percentile: f64,
    #[arg(long, default_value_t = 10_000)]
    pub resamples: usize,
    #[arg(long, default_value_t = 0.95)]
    pub confidence: f64,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Sample quantile used as the GPD threshold.
    #[arg(long, default_value_t = 0.90)]
    pub threshold: f64,
    #[arg(long, default_value_t = 20)]
    pub min_exceedances: usize,
}

impl TailArgs {
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            resamples: self.resamples,
            confidence: self.confidence,
            seed: self.seed,
        }
    }

    pub fn evt_options(&self) -> EvtOptions {
        EvtOptions {
            threshold_quantile: self.threshold,
            min_exceedances: self.min_exceedances,
        }
    }
}

pub fn parse_args() -> Result<Args> {
    Args::try_parse().map_err(|e| Error::Cli(e.to_string()))
}

pub fn load_config(path: &Path) -> Result<ExperimentConfig> {
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::ConfigIo(format!(
            "failed to read config '{}': {}",
            path.display(),
            err
        ))
    })?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("");

    match ext {
        "toml" => toml::from_str(&contents)
            .map_err(|err| Error::ConfigParse(format!("failed to parse TOML: {}", err))),
        "json" => serde_json::from_str(&contents)
            .map_err(|err| Error::ConfigParse(format!("failed to parse JSON: {}", err))),
        "" => Err(Error::UnsupportedConfigFormat("unknown".to_string())),
        _ => Err(Error::UnsupportedConfigFormat(ext.to_string())),
    }
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| Error::Cli(format!("missing {} (or pass --config)", flag)))
}

fn parse_spec(value: Option<&str>, flag: &str) -> Result<DistributionSpec> {
    required(value, flag)?.parse()
}

fn wrong_model(path: &Path, expected: &str) -> Error {
    Error::Cli(format!(
        "config '{}' does not describe a {} model",
        path.display(),
        expected
    ))
}

/// Resolves `single` flags (and optional file) into a validated config.
pub fn build_single(args: &SingleArgs) -> Result<SingleStageConfig> {
    let mut config = match &args.config {
        Some(path) => match load_config(path)? {
            ExperimentConfig::Single(config) => config,
            ExperimentConfig::Tandem(_) => return Err(wrong_model(path, "single")),
        },
        None => SingleStageConfig {
            arrival_rate: required(args.arrival_rate, "--arrival-rate")?,
            stage: StageConfig {
                name: "broker".to_string(),
                servers: required(args.servers, "--servers")?,
                service: parse_spec(args.service.as_deref(), "--service")?,
            },
            warmup: 0.0,
            duration: required(args.duration, "--duration")?,
            seed: 0,
        },
    };

    if let Some(rate) = args.arrival_rate {
        config.arrival_rate = rate;
    }
    if let Some(servers) = args.servers {
        config.stage.servers = servers;
    }
    if let Some(service) = &args.service {
        config.stage.service = service.parse()?;
    }
    if let Some(name) = &args.name {
        config.stage.name = name.clone();
    }
    if let Some(warmup) = args.warmup {
        config.warmup = warmup;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    config.validate()?;
    Ok(config)
}

/// Resolves `tandem` flags (and optional file) into a validated config.
pub fn build_tandem(args: &TandemArgs) -> Result<TandemConfig> {
    let mut config = match &args.config {
        Some(path) => match load_config(path)? {
            ExperimentConfig::Tandem(config) => config,
            ExperimentConfig::Single(_) => return Err(wrong_model(path, "tandem")),
        },
        None => TandemConfig {
            arrival_rate: required(args.arrival_rate, "--arrival-rate")?,
            broker: StageConfig {
                name: "broker".to_string(),
                servers: required(args.broker_servers, "--broker-servers")?,
                service: parse_spec(args.broker_service.as_deref(), "--broker-service")?,
            },
            receiver: StageConfig {
                name: "receiver".to_string(),
                servers: required(args.receiver_servers, "--receiver-servers")?,
                service: parse_spec(args.receiver_service.as_deref(), "--receiver-service")?,
            },
            network_delay: default_network_delay(),
            failure_probability: 0.0,
            max_attempts: None,
            retry_backoff: default_retry_backoff(),
            failure_detection: FailureDetection::default(),
            warmup: 0.0,
            duration: required(args.duration, "--duration")?,
            seed: 0,
        },
    };

    if let Some(rate) = args.arrival_rate {
        config.arrival_rate = rate;
    }
    if let Some(servers) = args.broker_servers {
        config.broker.servers = servers;
    }
    if let Some(service) = &args.broker_service {
        config.broker.service = service.parse()?;
    }
    if let Some(servers) = args.receiver_servers {
        config.receiver.servers = servers;
    }
    if let Some(service) = &args.receiver_service {
        config.receiver.service = service.parse()?;
    }
    if let Some(delay) = &args.network_delay {
        config.network_delay = delay.parse()?;
    }
    if let Some(p) = args.failure_probability {
        config.failure_probability = p;
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    if let Some(backoff) = args.retry_backoff {
        config.retry_backoff = backoff;
    }
    if let Some(detection) = args.failure_detection {
        config.failure_detection = detection.into();
    }
    if let Some(warmup) = args.warmup {
        config.warmup = warmup;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    config.validate()?;
    Ok(config)
}

/// What `analyze` should evaluate.
#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisTarget {
    Single {
        stage: StageConfig,
        arrival_rate: f64,
    },
    Tandem(TandemConfig),
}

pub fn build_analysis(args: &AnalyzeArgs) -> Result<(AnalysisTarget, Vec<ApproximationMethod>)> {
    let methods = if args.methods.is_empty() {
        ApproximationMethod::ALL.to_vec()
    } else {
        args.methods.iter().map(|method| (*method).into()).collect()
    };

    let target = match &args.config {
        Some(path) => match load_config(path)? {
            ExperimentConfig::Single(config) => {
                config.validate()?;
                AnalysisTarget::Single {
                    stage: config.stage,
                    arrival_rate: config.arrival_rate,
                }
            }
            ExperimentConfig::Tandem(config) => {
                config.validate()?;
                AnalysisTarget::Tandem(config)
            }
        },
        None => {
            let stage = StageConfig {
                name: "broker".to_string(),
                servers: required(args.servers, "--servers")?,
                service: parse_spec(args.service.as_deref(), "--service")?,
            };
            stage.validate()?;
            AnalysisTarget::Single {
                stage,
                arrival_rate: required(args.arrival_rate, "--arrival-rate")?,
            }
        }
    };
    Ok((target, methods))
}

/// Reads one finite value per non-blank line from `input` (`-` for stdin).
pub fn load_samples(input: &str) -> Result<Vec<f64>> {
    if input == "-" {
        return read_samples(io::stdin().lock());
    }
    let file = fs::File::open(input)
        .map_err(|err| Error::ConfigIo(format!("failed to read samples '{}': {}", input, err)))?;
    read_samples(BufReader::new(file))
}

pub fn read_samples(reader: impl BufRead) -> Result<Vec<f64>> {
    let mut samples = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| Error::ConfigIo(format!("failed to read samples: {}", err)))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .map_err(|_| Error::InvalidSample(trimmed.to_string()))?;
        if !value.is_finite() {
            return Err(Error::InvalidSample(trimmed.to_string()));
        }
        samples.push(value);
    }
    Ok(samples)
}
