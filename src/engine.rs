use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, trace};

use crate::analytics::check_stability;
use crate::distributions::{build_distribution, Exponential, ServiceTimeDistribution};
use crate::error::Result;
use crate::events::{Event, EventQueue, JobId};
use crate::metrics::{ModelKind, RunRecord, RunRecorder};
use crate::models::{SingleStageConfig, StageConfig};
use crate::state::{Admission, Job, JobOutcome, JobPhase, ServerPool};

const STREAM_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Independent generator for one sampling purpose, derived from the run seed.
///
/// Each purpose (arrivals, each stage's service, network delay, failures)
/// draws from its own stream, so changing one stage leaves the others'
/// draws untouched.
pub(crate) fn stream(seed: u64, purpose: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add((purpose + 1).wrapping_mul(STREAM_STRIDE)))
}

pub(crate) const ARRIVAL_STREAM: u64 = 0;
pub(crate) const SERVICE_STREAM_BASE: u64 = 16;

/// Poisson arrival source: exponential gaps on a dedicated stream, cut off
/// at the run duration.
pub(crate) struct ArrivalProcess {
    gaps: Exponential,
    rng: StdRng,
    horizon: f64,
    next_id: JobId,
}

impl ArrivalProcess {
    pub(crate) fn new(rate: f64, horizon: f64, seed: u64) -> Result<Self> {
        Ok(Self {
            gaps: Exponential::new(rate)?,
            rng: stream(seed, ARRIVAL_STREAM),
            horizon,
            next_id: 0,
        })
    }

    /// Schedules the next arrival after `now`, unless it falls past the horizon.
    pub(crate) fn schedule_next(&mut self, queue: &mut EventQueue) {
        let at = queue.now() + self.gaps.sample(&mut self.rng);
        if at < self.horizon {
            queue.schedule_at(at, Event::Arrival {
                job_id: self.next_id,
            });
            self.next_id += 1;
        }
    }

    pub(crate) fn generated(&self) -> u64 {
        self.next_id as u64
    }
}

/// A server pool plus the service-time distribution and generator feeding it.
#[derive(Debug)]
pub(crate) struct Stage {
    pub index: usize,
    pub pool: ServerPool,
    pub service: Box<dyn ServiceTimeDistribution>,
    rng: StdRng,
}

impl Stage {
    /// Expects a validated `config`.
    pub(crate) fn build(index: usize, config: &StageConfig, seed: u64) -> Result<Self> {
        Ok(Self {
            index,
            pool: ServerPool::new(config.name.clone(), config.servers),
            service: build_distribution(&config.service)?,
            rng: stream(seed, SERVICE_STREAM_BASE + index as u64),
        })
    }

    pub(crate) fn service_rate(&self) -> f64 {
        1.0 / self.service.mean()
    }

    pub(crate) fn check_stability(&self, arrival_rate: f64) -> Result<f64> {
        check_stability(
            self.pool.name(),
            arrival_rate,
            self.pool.capacity(),
            self.service_rate(),
        )
    }

    fn in_service_phase(&self) -> JobPhase {
        if self.index == 0 {
            JobPhase::InStage1
        } else {
            JobPhase::InStage2
        }
    }

    /// Opens a visit for `job` and starts service if a server is free.
    pub(crate) fn enter(
        &mut self,
        job: &mut Job,
        queue: &mut EventQueue,
        recorder: &mut RunRecorder,
    ) -> Result<()> {
        let now = queue.now();
        job.begin_visit(self.index, now, self.pool.queue_len());
        if self.pool.admit(job.id) == Admission::Started {
            self.start(job, queue)?;
        }
        self.observe(now, recorder);
        Ok(())
    }

    /// Draws the service time at service start and schedules completion.
    pub(crate) fn start(&mut self, job: &mut Job, queue: &mut EventQueue) -> Result<()> {
        job.transition(self.in_service_phase())?;
        let now = queue.now();
        if let Some(visit) = job.current_visit_mut() {
            visit.service_start = Some(now);
        }
        let service_time = self.service.sample(&mut self.rng);
        queue.schedule_at(
            now + service_time,
            Event::ServiceComplete {
                stage: self.index,
                job_id: job.id,
            },
        );
        Ok(())
    }

    /// Closes the visit and frees the server; returns the job that takes it over.
    pub(crate) fn finish(
        &mut self,
        job: &mut Job,
        now: f64,
        recorder: &mut RunRecorder,
    ) -> Result<Option<JobId>> {
        if let Some(visit) = job.current_visit_mut() {
            visit.service_end = Some(now);
        }
        if let Some(visit) = job.visits.last() {
            recorder.record_visit(visit);
        }
        let next = self.pool.release()?;
        self.observe(now, recorder);
        Ok(next)
    }

    fn observe(&self, now: f64, recorder: &mut RunRecorder) {
        recorder.observe_pool(self.index, now, self.pool.queue_len(), self.pool.busy());
    }
}

/// Poisson arrivals into one N-server FIFO pool.
pub struct SimulationEngine {
    pub config: SingleStageConfig,
    stage: Stage,
    arrivals: ArrivalProcess,
    queue: EventQueue,
    jobs: Vec<Job>,
    recorder: RunRecorder,
}

impl SimulationEngine {
    /// Validates the configuration; nothing is scheduled unless it is sound.
    pub fn new(config: SingleStageConfig) -> Result<Self> {
        config.validate()?;
        let stage = Stage::build(0, &config.stage, config.seed)?;
        stage.check_stability(config.arrival_rate)?;

        let arrivals = ArrivalProcess::new(config.arrival_rate, config.duration, config.seed)?;
        let recorder = RunRecorder::new(
            ModelKind::SingleStage,
            config.seed,
            config.warmup,
            config.duration,
            &[(config.stage.name.as_str(), config.stage.servers)],
        );

        Ok(Self {
            config,
            stage,
            arrivals,
            queue: EventQueue::new(),
            jobs: Vec::new(),
            recorder,
        })
    }

    pub fn events_processed(&self) -> u64 {
        self.queue.processed()
    }

    pub fn run(mut self) -> Result<RunRecord> {
        info!(
            model = "single-stage",
            seed = self.config.seed,
            arrival_rate = self.config.arrival_rate,
            servers = self.config.stage.servers,
            service = %self.config.stage.service,
            "run started"
        );
        self.arrivals.schedule_next(&mut self.queue);

        while let Some(scheduled) = self.queue.pop() {
            trace!(time = scheduled.time, event = ?scheduled.event, "event");
            match scheduled.event {
                Event::Arrival { job_id } => self.on_arrival(job_id)?,
                Event::ServiceComplete { job_id, .. } => self.on_service_complete(job_id)?,
                Event::TransferComplete { .. } | Event::RetryReady { .. } => {}
            }
        }

        let record = self.recorder.freeze(
            self.arrivals.generated(),
            self.queue.processed(),
            self.queue.now(),
        );
        info!(
            jobs = record.jobs.len(),
            events = record.events_processed,
            finished_at = record.finished_at,
            "run finished"
        );
        Ok(record)
    }

    fn on_arrival(&mut self, job_id: JobId) -> Result<()> {
        let now = self.queue.now();
        self.jobs.push(Job::new(job_id, now));
        self.arrivals.schedule_next(&mut self.queue);
        self.stage
            .enter(&mut self.jobs[job_id], &mut self.queue, &mut self.recorder)
    }

    fn on_service_complete(&mut self, job_id: JobId) -> Result<()> {
        let now = self.queue.now();
        let job = &mut self.jobs[job_id];
        let next = self.stage.finish(job, now, &mut self.recorder)?;
        job.finish(JobOutcome::Delivered, now)?;
        self.recorder.record_job(job);
        if let Some(next) = next {
            self.stage.start(&mut self.jobs[next], &mut self.queue)?;
        }
        Ok(())
    }
}

pub fn run_single_stage(config: &SingleStageConfig) -> Result<RunRecord> {
    SimulationEngine::new(config.clone())?.run()
}
