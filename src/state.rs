use serde::Serialize;
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::events::JobId;

/// Lifecycle of a simulated message.
///
/// ```text
/// AwaitingStage1 -> InStage1 -> InTransfer -> AwaitingStage2 -> InStage2 -> Delivered
///        ^                          |                               |
///        +------- BackingOff <------+-------------------------------+
///                                   |                               |
///                                   +--------> DeadLettered <-------+
/// ```
///
/// Single-stage runs go straight from `InStage1` to `Delivered`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPhase {
    AwaitingStage1,
    InStage1,
    InTransfer,
    BackingOff,
    AwaitingStage2,
    InStage2,
    Delivered,
    DeadLettered,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Delivered | JobPhase::DeadLettered)
    }

    fn can_become(self, next: JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (AwaitingStage1, InStage1)
                | (InStage1, InTransfer)
                | (InStage1, Delivered)
                | (InTransfer, AwaitingStage2)
                | (InTransfer, BackingOff)
                | (InTransfer, DeadLettered)
                | (AwaitingStage2, InStage2)
                | (InStage2, Delivered)
                | (InStage2, BackingOff)
                | (InStage2, DeadLettered)
                | (BackingOff, AwaitingStage1)
        )
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobOutcome {
    Delivered,
    DeadLettered,
}

/// One pass of a job through one stage's server pool.
#[derive(Clone, Debug, PartialEq)]
pub struct StageVisit {
    pub stage: usize,
    pub enqueued_at: f64,
    pub queue_len_at_arrival: usize,
    pub service_start: Option<f64>,
    pub service_end: Option<f64>,
}

impl StageVisit {
    pub fn wait(&self) -> Option<f64> {
        self.service_start.map(|start| start - self.enqueued_at)
    }

    pub fn service(&self) -> Option<f64> {
        Some(self.service_end? - self.service_start?)
    }

    pub fn response(&self) -> Option<f64> {
        self.service_end.map(|end| end - self.enqueued_at)
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub arrival_time: f64,
    pub attempts: u32,
    pub phase: JobPhase,
    pub visits: Vec<StageVisit>,
    pub network_time: f64,
    pub completed_at: Option<f64>,
}

impl Job {
    pub fn new(id: JobId, arrival_time: f64) -> Self {
        Self {
            id,
            arrival_time,
            attempts: 1,
            phase: JobPhase::AwaitingStage1,
            visits: Vec::new(),
            network_time: 0.0,
            completed_at: None,
        }
    }

    pub fn transition(&mut self, next: JobPhase) -> Result<()> {
        if !self.phase.can_become(next) {
            return Err(Error::InvalidJobTransition {
                job: self.id,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Records the terminal phase and the time it was reached.
    pub fn finish(&mut self, outcome: JobOutcome, now: f64) -> Result<()> {
        let next = match outcome {
            JobOutcome::Delivered => JobPhase::Delivered,
            JobOutcome::DeadLettered => JobPhase::DeadLettered,
        };
        self.transition(next)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        match self.phase {
            JobPhase::Delivered => Some(JobOutcome::Delivered),
            JobPhase::DeadLettered => Some(JobOutcome::DeadLettered),
            _ => None,
        }
    }

    pub fn begin_visit(&mut self, stage: usize, now: f64, queue_len_at_arrival: usize) {
        self.visits.push(StageVisit {
            stage,
            enqueued_at: now,
            queue_len_at_arrival,
            service_start: None,
            service_end: None,
        });
    }

    pub fn current_visit_mut(&mut self) -> Option<&mut StageVisit> {
        self.visits.last_mut()
    }

    /// End-to-end latency from first arrival to the terminal outcome.
    pub fn sojourn(&self) -> Option<f64> {
        self.completed_at.map(|done| done - self.arrival_time)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Started,
    Queued,
}

/// N parallel servers with a FIFO wait list.
///
/// `busy` never exceeds `capacity`; a released slot passes straight to the
/// head of the wait list when one is waiting.
#[derive(Clone, Debug)]
pub struct ServerPool {
    name: String,
    capacity: usize,
    busy: usize,
    wait_list: VecDeque<JobId>,
}

impl ServerPool {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            busy: 0,
            wait_list: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn queue_len(&self) -> usize {
        self.wait_list.len()
    }

    /// Takes a free slot for `job`, or parks it at the back of the wait list.
    pub fn admit(&mut self, job: JobId) -> Admission {
        if self.busy < self.capacity {
            self.busy += 1;
            Admission::Started
        } else {
            self.wait_list.push_back(job);
            Admission::Queued
        }
    }

    /// Frees a slot; returns the waiting job that now holds it, if any.
    pub fn release(&mut self) -> Result<Option<JobId>> {
        if self.busy == 0 {
            return Err(Error::IdleRelease(self.name.clone()));
        }
        Ok(match self.wait_list.pop_front() {
            Some(next) => Some(next),
            None => {
                self.busy -= 1;
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_never_exceeds_capacity() {
        let mut pool = ServerPool::new("broker", 2);
        assert_eq!(pool.admit(1), Admission::Started);
        assert_eq!(pool.admit(2), Admission::Started);
        assert_eq!(pool.admit(3), Admission::Queued);
        assert_eq!(pool.admit(4), Admission::Queued);
        assert_eq!(pool.busy(), 2);
        assert_eq!(pool.queue_len(), 2);
    }

    #[test]
    fn release_hands_slot_to_waiters_in_fifo_order() {
        let mut pool = ServerPool::new("broker", 1);
        pool.admit(1);
        pool.admit(2);
        pool.admit(3);
        assert_eq!(pool.release().unwrap(), Some(2));
        assert_eq!(pool.release().unwrap(), Some(3));
        assert_eq!(pool.busy(), 1);
        assert_eq!(pool.release().unwrap(), None);
        assert_eq!(pool.busy(), 0);
    }

    #[test]
    fn release_on_idle_pool_is_an_error() {
        let mut pool = ServerPool::new("receiver", 2);
        assert!(matches!(pool.release(), Err(Error::IdleRelease(name)) if name == "receiver"));
        pool.admit(1);
        assert_eq!(pool.release().unwrap(), None);
        assert!(matches!(pool.release(), Err(Error::IdleRelease(_))));
        assert_eq!(pool.busy(), 0);
    }

    #[test]
    fn job_follows_retry_cycle() {
        let mut job = Job::new(0, 0.0);
        for phase in [
            JobPhase::InStage1,
            JobPhase::InTransfer,
            JobPhase::BackingOff,
            JobPhase::AwaitingStage1,
            JobPhase::InStage1,
            JobPhase::InTransfer,
            JobPhase::AwaitingStage2,
            JobPhase::InStage2,
        ] {
            job.transition(phase).expect("transition should be allowed");
        }
        job.finish(JobOutcome::Delivered, 4.0).unwrap();
        assert_eq!(job.outcome(), Some(JobOutcome::Delivered));
        assert_eq!(job.sojourn(), Some(4.0));
    }

    #[test]
    fn terminal_jobs_reject_further_transitions() {
        let mut job = Job::new(3, 1.0);
        job.transition(JobPhase::InStage1).unwrap();
        job.finish(JobOutcome::Delivered, 2.0).unwrap();
        let err = job.transition(JobPhase::AwaitingStage1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "job 3: invalid transition Delivered -> AwaitingStage1"
        );
        assert!(job.phase.is_terminal());
    }

    #[test]
    fn visit_timings_derive_wait_and_service() {
        let mut job = Job::new(0, 1.0);
        job.begin_visit(0, 1.0, 2);
        let visit = job.current_visit_mut().unwrap();
        visit.service_start = Some(1.5);
        visit.service_end = Some(2.25);
        let visit = &job.visits[0];
        assert_eq!(visit.wait(), Some(0.5));
        assert_eq!(visit.service(), Some(0.75));
        assert_eq!(visit.response(), Some(1.25));
    }
}
