use serde::Serialize;

use crate::state::{Job, JobOutcome, StageVisit};

/// Time integral of a piecewise-constant signal, clipped to `[start, end]`.
#[derive(Clone, Debug)]
pub struct TimeWeighted {
    start: f64,
    end: f64,
    last_time: f64,
    value: f64,
    integral: f64,
}

impl TimeWeighted {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            last_time: 0.0,
            value: 0.0,
            integral: 0.0,
        }
    }

    pub fn set(&mut self, now: f64, value: f64) {
        self.advance(now);
        self.value = value;
    }

    pub fn advance(&mut self, now: f64) {
        let lo = self.last_time.max(self.start);
        let hi = now.min(self.end);
        if hi > lo {
            self.integral += self.value * (hi - lo);
        }
        self.last_time = self.last_time.max(now);
    }

    pub fn average(&self) -> f64 {
        let span = self.end - self.start;
        if span <= 0.0 {
            return 0.0;
        }
        self.integral / span
    }
}

/// One completed stage visit, tagged by whether it arrived inside the
/// measurement window.
#[derive(Clone, Debug, PartialEq)]
pub struct VisitSample {
    pub enqueued_at: f64,
    pub wait: f64,
    pub service: f64,
    pub response: f64,
    pub queue_len_at_arrival: usize,
    pub post_warmup: bool,
}

/// Terminal record of one job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobSample {
    pub arrival_time: f64,
    pub sojourn: f64,
    pub attempts: u32,
    pub network_time: f64,
    pub outcome: JobOutcome,
    pub post_warmup: bool,
}

#[derive(Clone, Debug)]
pub struct StageRecord {
    pub name: String,
    pub servers: usize,
    pub visits: Vec<VisitSample>,
    queue_length: TimeWeighted,
    busy_servers: TimeWeighted,
}

impl StageRecord {
    fn new(name: &str, servers: usize, warmup: f64, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            servers,
            visits: Vec::new(),
            queue_length: TimeWeighted::new(warmup, duration),
            busy_servers: TimeWeighted::new(warmup, duration),
        }
    }

    pub fn post_warmup(&self) -> impl Iterator<Item = &VisitSample> {
        self.visits.iter().filter(|sample| sample.post_warmup)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    SingleStage,
    Tandem,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::SingleStage => write!(f, "single-stage"),
            ModelKind::Tandem => write!(f, "tandem"),
        }
    }
}

/// Append-only collector owned by a running simulation.
#[derive(Debug)]
pub(crate) struct RunRecorder {
    model: ModelKind,
    seed: u64,
    warmup: f64,
    duration: f64,
    stages: Vec<StageRecord>,
    jobs: Vec<JobSample>,
}

impl RunRecorder {
    pub(crate) fn new(
        model: ModelKind,
        seed: u64,
        warmup: f64,
        duration: f64,
        stages: &[(&str, usize)],
    ) -> Self {
        Self {
            model,
            seed,
            warmup,
            duration,
            stages: stages
                .iter()
                .map(|(name, servers)| StageRecord::new(name, *servers, warmup, duration))
                .collect(),
            jobs: Vec::new(),
        }
    }

    fn in_window(&self, time: f64) -> bool {
        time >= self.warmup && time < self.duration
    }

    /// Records the pool occupancy in effect from `now` onwards.
    pub(crate) fn observe_pool(&mut self, stage: usize, now: f64, queue_len: usize, busy: usize) {
        let record = &mut self.stages[stage];
        record.queue_length.set(now, queue_len as f64);
        record.busy_servers.set(now, busy as f64);
    }

    pub(crate) fn record_visit(&mut self, visit: &StageVisit) {
        let (Some(wait), Some(service), Some(response)) =
            (visit.wait(), visit.service(), visit.response())
        else {
            return;
        };
        let post_warmup = self.in_window(visit.enqueued_at);
        self.stages[visit.stage].visits.push(VisitSample {
            enqueued_at: visit.enqueued_at,
            wait,
            service,
            response,
            queue_len_at_arrival: visit.queue_len_at_arrival,
            post_warmup,
        });
    }

    pub(crate) fn record_job(&mut self, job: &Job) {
        let (Some(outcome), Some(sojourn)) = (job.outcome(), job.sojourn()) else {
            return;
        };
        let post_warmup = self.in_window(job.arrival_time);
        self.jobs.push(JobSample {
            arrival_time: job.arrival_time,
            sojourn,
            attempts: job.attempts,
            network_time: job.network_time,
            outcome,
            post_warmup,
        });
    }

    pub(crate) fn freeze(mut self, arrivals: u64, events_processed: u64, now: f64) -> RunRecord {
        for stage in &mut self.stages {
            stage.queue_length.advance(now.max(self.duration));
            stage.busy_servers.advance(now.max(self.duration));
        }
        RunRecord {
            model: self.model,
            seed: self.seed,
            warmup: self.warmup,
            duration: self.duration,
            stages: self.stages,
            jobs: self.jobs,
            arrivals,
            events_processed,
            finished_at: now,
        }
    }
}

/// Frozen output of one simulation run.
#[derive(Clone, Debug)]
pub struct RunRecord {
    pub model: ModelKind,
    pub seed: u64,
    pub warmup: f64,
    pub duration: f64,
    pub stages: Vec<StageRecord>,
    pub jobs: Vec<JobSample>,
    /// External arrivals generated over the whole run.
    pub arrivals: u64,
    pub events_processed: u64,
    pub finished_at: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    pub mean: f64,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_unstable_by(f64::total_cmp);
        Self {
            mean: mean(&samples),
            p50: percentile_sorted(&samples, 0.50),
            p95: percentile_sorted(&samples, 0.95),
            p99: percentile_sorted(&samples, 0.99),
            max: samples.last().copied(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub servers: usize,
    pub arrivals: u64,
    pub arrival_rate: f64,
    pub mean_wait: f64,
    pub mean_service: f64,
    pub prob_wait: f64,
    pub response: LatencySummary,
    pub utilization: f64,
    /// Time-averaged number of waiting jobs.
    pub mean_queue_length: f64,
    pub mean_busy_servers: f64,
    /// Wait-list length seen by arriving jobs; not a time average.
    pub mean_queue_seen_at_arrival: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub model: ModelKind,
    pub seed: u64,
    pub warmup: f64,
    pub duration: f64,
    pub jobs: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    pub arrival_rate: f64,
    pub throughput: f64,
    pub mean_attempts: f64,
    pub mean_network_time: f64,
    pub latency: LatencySummary,
    /// Highest stage utilization.
    pub utilization: f64,
    pub stages: Vec<StageSummary>,
    pub events_processed: u64,
}

impl RunRecord {
    pub fn window(&self) -> f64 {
        self.duration - self.warmup
    }

    pub fn post_warmup_jobs(&self) -> impl Iterator<Item = &JobSample> {
        self.jobs.iter().filter(|job| job.post_warmup)
    }

    /// End-to-end latencies of delivered, post-warmup jobs.
    pub fn latencies(&self) -> Vec<f64> {
        self.post_warmup_jobs()
            .filter(|job| job.outcome == JobOutcome::Delivered)
            .map(|job| job.sojourn)
            .collect()
    }

    pub fn stage_summary(&self, stage: &StageRecord) -> StageSummary {
        let window = self.window();
        let samples: Vec<&VisitSample> = stage.post_warmup().collect();
        let count = samples.len();
        let waits: Vec<f64> = samples.iter().map(|s| s.wait).collect();
        let services: Vec<f64> = samples.iter().map(|s| s.service).collect();
        let waited = waits.iter().filter(|w| **w > 0.0).count();
        let seen: Vec<f64> = samples
            .iter()
            .map(|s| s.queue_len_at_arrival as f64)
            .collect();
        let mean_busy_servers = stage.busy_servers.average();

        StageSummary {
            name: stage.name.clone(),
            servers: stage.servers,
            arrivals: count as u64,
            arrival_rate: count as f64 / window,
            mean_wait: mean(&waits),
            mean_service: mean(&services),
            prob_wait: if count == 0 {
                0.0
            } else {
                waited as f64 / count as f64
            },
            response: LatencySummary::from_samples(samples.iter().map(|s| s.response).collect()),
            utilization: mean_busy_servers / stage.servers as f64,
            mean_queue_length: stage.queue_length.average(),
            mean_busy_servers,
            mean_queue_seen_at_arrival: mean(&seen),
        }
    }

    /// Pure reduction over post-warmup samples; callable any number of times.
    pub fn summary(&self) -> RunSummary {
        let window = self.window();
        let jobs: Vec<&JobSample> = self.post_warmup_jobs().collect();
        let delivered = jobs
            .iter()
            .filter(|job| job.outcome == JobOutcome::Delivered)
            .count() as u64;
        let attempts: Vec<f64> = jobs.iter().map(|job| job.attempts as f64).collect();
        let network: Vec<f64> = jobs.iter().map(|job| job.network_time).collect();
        let stages: Vec<StageSummary> = self
            .stages
            .iter()
            .map(|stage| self.stage_summary(stage))
            .collect();
        let utilization = stages
            .iter()
            .map(|stage| stage.utilization)
            .fold(0.0, f64::max);

        RunSummary {
            model: self.model,
            seed: self.seed,
            warmup: self.warmup,
            duration: self.duration,
            jobs: jobs.len() as u64,
            delivered,
            dead_lettered: jobs.len() as u64 - delivered,
            arrival_rate: jobs.len() as f64 / window,
            throughput: delivered as f64 / window,
            mean_attempts: mean(&attempts),
            mean_network_time: mean(&network),
            latency: LatencySummary::from_samples(self.latencies()),
            utilization,
            stages,
            events_processed: self.events_processed,
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; `None` below two samples.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let sum_sq = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>();
    Some(sum_sq / (values.len() - 1) as f64)
}

/// Linearly interpolated quantile of an ascending slice, `q` in `[0, 1]`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}
