use std::fmt::{self, Write};

use serde::Serialize;

use crate::analytics::{AnalysisReport, Approximation, StageAnalysis, TandemAnalysis};
use crate::error::{Error, Result};
use crate::metrics::{LatencySummary, RunSummary, StageSummary};
use crate::models::{ExperimentConfig, StageConfig};
use crate::tail::{PercentileEstimate, TailReport};

pub trait Formatter {
    fn run(&self, summary: &RunSummary) -> Result<String>;
    fn analysis(&self, report: &AnalysisReport) -> Result<String>;
    fn tail(&self, report: &TailReport) -> Result<String>;
    fn config(&self, config: &ExperimentConfig) -> Result<String>;
}

/// Metadata, totals and a per-stage breakdown.
pub struct HumanFormatter;

/// Metadata and totals only.
pub struct SummaryFormatter;

pub struct JsonFormatter;

fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> Result<String> {
    let mut out = String::new();
    write(&mut out).map_err(|err| Error::Output(err.to_string()))?;
    Ok(out)
}

fn opt(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.4}", value),
        None => "-".to_string(),
    }
}

fn latency_line(latency: &LatencySummary) -> String {
    format!(
        "mean {:.4}, p50 {}, p95 {}, p99 {}, max {}",
        latency.mean,
        opt(latency.p50),
        opt(latency.p95),
        opt(latency.p99),
        opt(latency.max)
    )
}

fn write_metadata(out: &mut String, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "Metadata:")?;
    writeln!(out, "model: {}", summary.model)?;
    writeln!(out, "seed: {}", summary.seed)?;
    writeln!(out, "window: [{}, {})", summary.warmup, summary.duration)?;
    writeln!(out, "events: {}", summary.events_processed)
}

fn write_totals(out: &mut String, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "Summary:")?;
    writeln!(
        out,
        "jobs: {} (delivered {}, dead-lettered {})",
        summary.jobs, summary.delivered, summary.dead_lettered
    )?;
    writeln!(out, "arrival_rate: {:.4}", summary.arrival_rate)?;
    writeln!(out, "throughput: {:.4}", summary.throughput)?;
    writeln!(out, "mean_attempts: {:.4}", summary.mean_attempts)?;
    writeln!(out, "mean_network_time: {:.4}", summary.mean_network_time)?;
    writeln!(out, "latency: {}", latency_line(&summary.latency))?;
    writeln!(out, "utilization: {:.4}", summary.utilization)
}

fn write_stage(out: &mut String, stage: &StageSummary) -> fmt::Result {
    writeln!(
        out,
        "{}: {} servers, {} arrivals (rate {:.4}), utilization {:.4}",
        stage.name, stage.servers, stage.arrivals, stage.arrival_rate, stage.utilization
    )?;
    writeln!(
        out,
        "  wait: mean {:.4}, prob_wait {:.4}; service: mean {:.4}",
        stage.mean_wait, stage.prob_wait, stage.mean_service
    )?;
    writeln!(out, "  response: {}", latency_line(&stage.response))?;
    writeln!(
        out,
        "  queue: time-average {:.4}, seen at arrival {:.4}; busy servers {:.4}",
        stage.mean_queue_length, stage.mean_queue_seen_at_arrival, stage.mean_busy_servers
    )
}

fn approximation_line(approx: &Approximation) -> String {
    let line = format!(
        "{}: mean_wait {:.4}, mean_response {:.4}, correction {:.4}",
        approx.method, approx.mean_wait, approx.mean_response, approx.correction
    );
    match &approx.regime_warning {
        Some(reason) => format!("{} [outside regime: {}]", line, reason),
        None => line,
    }
}

fn write_stage_analysis(out: &mut String, analysis: &StageAnalysis) -> fmt::Result {
    writeln!(out, "Analysis:")?;
    writeln!(out, "stage: {}", analysis.name)?;
    writeln!(out, "arrival_rate: {}", analysis.arrival_rate)?;
    writeln!(out, "servers: {}", analysis.servers)?;
    writeln!(out, "mean_service: {:.4}", analysis.mean_service)?;
    writeln!(out, "cv_squared: {:.4}", analysis.cv_squared)?;
    writeln!(out, "utilization: {:.4}", analysis.mmn.utilization)?;
    writeln!(out, "M/M/N:")?;
    writeln!(out, "prob_wait: {:.4}", analysis.mmn.prob_wait)?;
    writeln!(out, "mean_queue_length: {:.4}", analysis.mmn.mean_queue_length)?;
    writeln!(out, "mean_wait: {:.4}", analysis.mmn.mean_wait)?;
    writeln!(out, "mean_response: {:.4}", analysis.mmn.mean_response)?;
    writeln!(out, "wait_p95: {:.4}", analysis.mmn_wait_p95)?;
    writeln!(out, "wait_p99: {:.4}", analysis.mmn_wait_p99)?;
    if !analysis.approximations.is_empty() {
        writeln!(out, "Approximations:")?;
        for approx in &analysis.approximations {
            writeln!(out, "{}", approximation_line(approx))?;
        }
    }
    Ok(())
}

fn write_tandem_analysis(out: &mut String, estimates: &[TandemAnalysis]) -> fmt::Result {
    let Some(first) = estimates.first() else {
        return Ok(());
    };
    writeln!(out, "Analysis:")?;
    writeln!(out, "expected_attempts: {:.4}", first.expected_attempts)?;
    writeln!(out, "effective_arrival_rate: {:.4}", first.effective_arrival_rate)?;
    writeln!(out, "broker_utilization: {:.4}", first.broker_utilization)?;
    writeln!(out, "receiver_utilization: {:.4}", first.receiver_utilization)?;
    writeln!(out, "network_time: {:.4}", first.network_time)?;
    for estimate in estimates {
        writeln!(out, "{}:", estimate.broker.method)?;
        writeln!(out, "  broker {}", approximation_line(&estimate.broker))?;
        writeln!(out, "  receiver {}", approximation_line(&estimate.receiver))?;
        writeln!(out, "  total_latency: {:.4}", estimate.total_latency)?;
    }
    Ok(())
}

fn estimate_line(estimate: &PercentileEstimate) -> String {
    match &estimate.interval {
        Some(interval) => format!(
            "{:.4} [{:.4}, {:.4}] at {}% confidence",
            estimate.estimate,
            interval.lower,
            interval.upper,
            interval.confidence * 100.0
        ),
        None => format!("{:.4}", estimate.estimate),
    }
}

fn write_tail(out: &mut String, report: &TailReport) -> fmt::Result {
    writeln!(out, "Tail:")?;
    writeln!(out, "samples: {}", report.samples)?;
    writeln!(out, "percentile: {}", report.percentile)?;
    writeln!(out, "empirical: {:.4}", report.empirical)?;
    writeln!(out, "bootstrap: {}", estimate_line(&report.bootstrap))?;
    match (&report.evt, &report.gpd) {
        (Some(evt), Some(fit)) => writeln!(
            out,
            "evt: {} (threshold {:.4}, shape {:.4}, scale {:.4}, {} exceedances)",
            estimate_line(evt),
            fit.threshold,
            fit.shape,
            fit.scale,
            fit.exceedances
        )?,
        _ => writeln!(out, "evt: unavailable")?,
    }
    writeln!(out, "hill_tail_index: {}", opt(report.hill_tail_index))?;
    writeln!(out, "normal_approximation: {:.4}", report.normal)
}

fn stage_line(stage: &StageConfig) -> String {
    format!(
        "{} ({} servers, service {})",
        stage.name, stage.servers, stage.service
    )
}

fn write_config(out: &mut String, config: &ExperimentConfig) -> fmt::Result {
    match config {
        ExperimentConfig::Single(config) => {
            writeln!(out, "Model: single")?;
            writeln!(out, "Arrival rate: {}", config.arrival_rate)?;
            writeln!(out, "Stage: {}", stage_line(&config.stage))?;
            writeln!(out, "Window: [{}, {})", config.warmup, config.duration)?;
            writeln!(out, "Seed: {}", config.seed)
        }
        ExperimentConfig::Tandem(config) => {
            writeln!(out, "Model: tandem")?;
            writeln!(out, "Arrival rate: {}", config.arrival_rate)?;
            writeln!(out, "Broker: {}", stage_line(&config.broker))?;
            writeln!(out, "Receiver: {}", stage_line(&config.receiver))?;
            writeln!(out, "Network delay: {}", config.network_delay)?;
            writeln!(out, "Failure probability: {}", config.failure_probability)?;
            match config.max_attempts {
                Some(max) => writeln!(out, "Max attempts: {}", max)?,
                None => writeln!(out, "Max attempts: unbounded")?,
            }
            writeln!(out, "Retry backoff: {}", config.retry_backoff)?;
            writeln!(out, "Failure detection: {}", config.failure_detection)?;
            writeln!(out, "Window: [{}, {})", config.warmup, config.duration)?;
            writeln!(out, "Seed: {}", config.seed)
        }
    }
}

fn write_analysis(out: &mut String, report: &AnalysisReport) -> fmt::Result {
    match report {
        AnalysisReport::Single(analysis) => write_stage_analysis(out, analysis),
        AnalysisReport::Tandem { estimates } => write_tandem_analysis(out, estimates),
    }
}

impl Formatter for HumanFormatter {
    fn run(&self, summary: &RunSummary) -> Result<String> {
        render(|out| {
            write_metadata(out, summary)?;
            write_totals(out, summary)?;
            writeln!(out, "Stages:")?;
            for stage in &summary.stages {
                write_stage(out, stage)?;
            }
            Ok(())
        })
    }

    fn analysis(&self, report: &AnalysisReport) -> Result<String> {
        render(|out| write_analysis(out, report))
    }

    fn tail(&self, report: &TailReport) -> Result<String> {
        render(|out| write_tail(out, report))
    }

    fn config(&self, config: &ExperimentConfig) -> Result<String> {
        render(|out| write_config(out, config))
    }
}

impl Formatter for SummaryFormatter {
    fn run(&self, summary: &RunSummary) -> Result<String> {
        render(|out| {
            write_metadata(out, summary)?;
            write_totals(out, summary)
        })
    }

    fn analysis(&self, report: &AnalysisReport) -> Result<String> {
        render(|out| write_analysis(out, report))
    }

    fn tail(&self, report: &TailReport) -> Result<String> {
        render(|out| write_tail(out, report))
    }

    fn config(&self, config: &ExperimentConfig) -> Result<String> {
        render(|out| write_config(out, config))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut out =
        serde_json::to_string_pretty(value).map_err(|err| Error::Output(err.to_string()))?;
    out.push('\n');
    Ok(out)
}

impl Formatter for JsonFormatter {
    fn run(&self, summary: &RunSummary) -> Result<String> {
        to_json(summary)
    }

    fn analysis(&self, report: &AnalysisReport) -> Result<String> {
        to_json(report)
    }

    fn tail(&self, report: &TailReport) -> Result<String> {
        to_json(report)
    }

    fn config(&self, config: &ExperimentConfig) -> Result<String> {
        to_json(config)
    }
}
