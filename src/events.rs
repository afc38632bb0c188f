use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

pub type JobId = usize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// External arrival of a new job into the first stage.
    Arrival { job_id: JobId },
    /// A server at `stage` finished serving `job_id`.
    ServiceComplete { stage: usize, job_id: JobId },
    /// The network transfer for the job's current attempt finished.
    TransferComplete { job_id: JobId },
    /// Retry backoff expired; the job re-enters first-stage admission.
    RetryReady { job_id: JobId },
}

impl Event {
    /// Same-time ordering: releases happen before new demand is admitted.
    fn priority(&self) -> u8 {
        match self {
            Event::ServiceComplete { .. } => 0,
            Event::TransferComplete { .. } => 1,
            Event::RetryReady { .. } => 2,
            Event::Arrival { .. } => 3,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Event::Arrival { job_id }
            | Event::ServiceComplete { job_id, .. }
            | Event::TransferComplete { job_id }
            | Event::RetryReady { job_id } => *job_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScheduledEvent {
    pub time: f64,
    pub seq: u64,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: f64, seq: u64, event: Event) -> Self {
        Self { time, seq, event }
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.event.priority().cmp(&other.event.priority()))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

/// Virtual clock plus the pending-event set of one run.
///
/// Events pop in non-decreasing time; equal times resolve by event kind and
/// then by insertion order, so a seeded run replays identically.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    next_seq: u64,
    now: f64,
    processed: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `event` at an absolute time, never earlier than the clock.
    pub fn schedule_at(&mut self, time: f64, event: Event) {
        debug_assert!(time >= self.now, "event scheduled in the past");
        let time = time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap
            .push(Reverse(ScheduledEvent::new(time, seq, event)));
    }

    pub fn schedule_in(&mut self, delay: f64, event: Event) {
        self.schedule_at(self.now + delay.max(0.0), event);
    }

    /// Pops the earliest event and advances the clock to it.
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        let Reverse(scheduled) = self.heap.pop()?;
        self.now = scheduled.time;
        self.processed += 1;
        Some(scheduled)
    }
}
