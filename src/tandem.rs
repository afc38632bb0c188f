use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, trace};

use crate::analytics::effective_arrival_rate;
use crate::distributions::{build_distribution, ServiceTimeDistribution};
use crate::engine::{stream, ArrivalProcess, Stage};
use crate::error::Result;
use crate::events::{Event, EventQueue, JobId};
use crate::metrics::{ModelKind, RunRecord, RunRecorder};
use crate::models::{FailureDetection, TandemConfig};
use crate::state::{Job, JobOutcome, JobPhase};

const NETWORK_STREAM: u64 = 1;
const FAILURE_STREAM: u64 = 2;

const BROKER: usize = 0;
const RECEIVER: usize = 1;

/// Broker pool -> lossy network transfer -> receiver pool, with failed
/// deliveries resubmitted to the broker after a backoff.
pub struct TandemEngine {
    pub config: TandemConfig,
    stages: [Stage; 2],
    network_delay: Box<dyn ServiceTimeDistribution>,
    network_rng: StdRng,
    failure_rng: StdRng,
    arrivals: ArrivalProcess,
    queue: EventQueue,
    jobs: Vec<Job>,
    recorder: RunRecorder,
}

impl TandemEngine {
    /// Validates the configuration and checks both stages against the
    /// retry-inflated arrival rate before anything is scheduled.
    pub fn new(config: TandemConfig) -> Result<Self> {
        config.validate()?;
        let arrival_rate = config.arrival_rate;

        let broker = Stage::build(BROKER, &config.broker, config.seed)?;
        let receiver = Stage::build(RECEIVER, &config.receiver, config.seed)?;
        let network_delay = build_distribution(&config.network_delay)?;

        let inflated = effective_arrival_rate(
            arrival_rate,
            config.failure_probability,
            config.max_attempts,
        )?;
        debug!(nominal = arrival_rate, inflated, "retry-inflated arrival rate");
        broker.check_stability(inflated)?;
        receiver.check_stability(inflated)?;

        let arrivals = ArrivalProcess::new(arrival_rate, config.duration, config.seed)?;
        let recorder = RunRecorder::new(
            ModelKind::Tandem,
            config.seed,
            config.warmup,
            config.duration,
            &[
                (config.broker.name.as_str(), config.broker.servers),
                (config.receiver.name.as_str(), config.receiver.servers),
            ],
        );

        Ok(Self {
            network_rng: stream(config.seed, NETWORK_STREAM),
            failure_rng: stream(config.seed, FAILURE_STREAM),
            config,
            stages: [broker, receiver],
            network_delay,
            arrivals,
            queue: EventQueue::new(),
            jobs: Vec::new(),
            recorder,
        })
    }

    pub fn events_processed(&self) -> u64 {
        self.queue.processed()
    }

    /// Processes events until every generated job is terminal.
    fn drain(&mut self) -> Result<()> {
        self.arrivals.schedule_next(&mut self.queue);
        while let Some(scheduled) = self.queue.pop() {
            trace!(time = scheduled.time, event = ?scheduled.event, "event");
            match scheduled.event {
                Event::Arrival { job_id } => self.on_arrival(job_id)?,
                Event::ServiceComplete {
                    stage: BROKER,
                    job_id,
                } => self.on_broker_complete(job_id)?,
                Event::ServiceComplete { job_id, .. } => self.on_receiver_complete(job_id)?,
                Event::TransferComplete { job_id } => self.on_transfer_complete(job_id)?,
                Event::RetryReady { job_id } => self.on_retry_ready(job_id)?,
            }
        }
        Ok(())
    }

    pub fn run(mut self) -> Result<RunRecord> {
        info!(
            model = "tandem",
            seed = self.config.seed,
            arrival_rate = self.config.arrival_rate,
            failure_probability = self.config.failure_probability,
            failure_detection = %self.config.failure_detection,
            "run started"
        );
        self.drain()?;

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
        self.stages[BROKER].enter(&mut self.jobs[job_id], &mut self.queue, &mut self.recorder)
    }

    fn on_broker_complete(&mut self, job_id: JobId) -> Result<()> {
        let now = self.queue.now();
        let job = &mut self.jobs[job_id];
        let next = self.stages[BROKER].finish(job, now, &mut self.recorder)?;

        job.transition(JobPhase::InTransfer)?;
        let delay = self.network_delay.sample(&mut self.network_rng);
        job.network_time += delay;
        self.queue
            .schedule_at(now + delay, Event::TransferComplete { job_id });

        if let Some(next) = next {
            self.stages[BROKER].start(&mut self.jobs[next], &mut self.queue)?;
        }
        Ok(())
    }

    fn on_transfer_complete(&mut self, job_id: JobId) -> Result<()> {
        if self.config.failure_detection == FailureDetection::InTransit && self.delivery_fails() {
            return self.on_failed_attempt(job_id);
        }
        self.jobs[job_id].transition(JobPhase::AwaitingStage2)?;
        self.stages[RECEIVER].enter(&mut self.jobs[job_id], &mut self.queue, &mut self.recorder)
    }

    fn on_receiver_complete(&mut self, job_id: JobId) -> Result<()> {
        let now = self.queue.now();
        let next = self.stages[RECEIVER].finish(&mut self.jobs[job_id], now, &mut self.recorder)?;

        if self.config.failure_detection == FailureDetection::AtReceiver && self.delivery_fails() {
            self.on_failed_attempt(job_id)?;
        } else {
            let job = &mut self.jobs[job_id];
            job.finish(JobOutcome::Delivered, now)?;
            self.recorder.record_job(job);
        }

        if let Some(next) = next {
            self.stages[RECEIVER].start(&mut self.jobs[next], &mut self.queue)?;
        }
        Ok(())
    }

    fn on_failed_attempt(&mut self, job_id: JobId) -> Result<()> {
        let now = self.queue.now();
        let job = &mut self.jobs[job_id];
        let exhausted = self
            .config
            .max_attempts
            .is_some_and(|max| job.attempts >= max);

        if exhausted {
            debug!(job_id, attempts = job.attempts, "dead-lettered");
            job.finish(JobOutcome::DeadLettered, now)?;
            self.recorder.record_job(job);
            return Ok(());
        }

        job.transition(JobPhase::BackingOff)?;
        self.queue
            .schedule_at(now + self.config.retry_backoff, Event::RetryReady { job_id });
        Ok(())
    }

    fn on_retry_ready(&mut self, job_id: JobId) -> Result<()> {
        let job = &mut self.jobs[job_id];
        job.attempts += 1;
        job.transition(JobPhase::AwaitingStage1)?;
        self.stages[BROKER].enter(job, &mut self.queue, &mut self.recorder)
    }

    fn delivery_fails(&mut self) -> bool {
        self.failure_rng.gen_bool(self.config.failure_probability)
    }
}

pub fn run_tandem(config: &TandemConfig) -> Result<RunRecord> {
    TandemEngine::new(config.clone())?.run()
}
