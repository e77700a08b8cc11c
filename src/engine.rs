//! Job engine: queueing, coalescing and the single in-flight slot.
//!
//! The engine is a plain state machine with no I/O. The scheduler feeds it
//! events and performs whatever dispatch it hands back, which keeps every
//! ordering rule testable without a compiler process.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{JobError, JobOutcome};
use crate::job::{Job, JobId, JobRequest};

/// Channel a waiting caller receives its job outcome on.
pub type Responder = oneshot::Sender<JobOutcome>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Waiting for the compiler to report readiness.
    NotReady,
    /// Idle and able to dispatch.
    Ready,
    /// One job is in flight.
    Busy,
    /// The compiler is gone; nothing is dispatched until a restart.
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub pending: usize,
    pub in_flight: Option<JobId>,
}

/// A job whose result has been matched against the in-flight slot.
#[derive(Debug)]
pub struct CompletedJob {
    pub job: Job,
    pub outcome: JobOutcome,
}

#[derive(Debug)]
struct Queued {
    job: Job,
    responder: Option<Responder>,
}

#[derive(Debug)]
pub struct JobEngine {
    state: EngineState,
    queue: VecDeque<Queued>,
    in_flight: Option<Queued>,
    next_id: u64,
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEngine {
    pub fn new() -> Self {
        Self {
            state: EngineState::NotReady,
            queue: VecDeque::new(),
            in_flight: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<JobId> {
        self.in_flight.as_ref().map(|queued| queued.job.id)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            pending: self.pending(),
            in_flight: self.in_flight(),
        }
    }

    /// Queue a request.
    ///
    /// A coalescable request replaces a queued request with the same key in
    /// place. Returns the new job id, or `None` when the compiler has exited
    /// and the request was refused.
    pub fn submit(&mut self, request: JobRequest, responder: Option<Responder>) -> Option<JobId> {
        if self.state == EngineState::Exited {
            log::debug!("Refusing {} job: compiler has exited", request.kind());
            resolve(responder, Err(JobError::CompilerUnavailable));
            return None;
        }

        let id = JobId(self.next_id);
        self.next_id += 1;
        let key = request.coalesce_key();
        let job = Job { id, request };

        if let Some(key) = key {
            let existing = self
                .queue
                .iter_mut()
                .find(|queued| queued.job.request.coalesce_key().as_ref() == Some(&key));
            if let Some(slot) = existing {
                log::debug!("Job {} ({}) supersedes queued job {}", id, job.kind(), slot.job.id);
                let superseded = std::mem::replace(slot, Queued { job, responder });
                resolve(superseded.responder, Err(JobError::Superseded));
                return Some(id);
            }
        }

        log::debug!("Queued job {} ({})", id, job.kind());
        self.queue.push_back(Queued { job, responder });
        Some(id)
    }

    /// Move the head of the queue into flight and return it for dispatch.
    pub fn drive(&mut self) -> Option<Job> {
        if self.state != EngineState::Ready || self.in_flight.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        let job = next.job.clone();
        self.in_flight = Some(next);
        self.state = EngineState::Busy;
        Some(job)
    }

    /// Match a compiler result against the in-flight job.
    ///
    /// Results for any other id are stale and dropped without resolving anyone.
    pub fn on_result(&mut self, id: JobId, outcome: JobOutcome) -> Option<CompletedJob> {
        if self.in_flight() != Some(id) {
            log::debug!("Discarding stale result for job {}", id);
            return None;
        }
        let Queued { job, responder } = self.in_flight.take()?;
        if self.state == EngineState::Busy {
            self.state = EngineState::Ready;
        }
        resolve(responder, outcome.clone());
        Some(CompletedJob { job, outcome })
    }

    /// The compiler went away. Fails everything outstanding.
    pub fn on_compiler_exit(&mut self) -> usize {
        self.state = EngineState::Exited;
        self.fail_outstanding()
    }

    /// Reset to an empty queue awaiting readiness from a new compiler.
    pub fn restart(&mut self) -> usize {
        let failed = self.fail_outstanding();
        self.state = EngineState::NotReady;
        failed
    }

    /// Returns whether the engine transitioned into `Ready`.
    pub fn mark_ready(&mut self) -> bool {
        match self.state {
            EngineState::NotReady => {
                self.state = EngineState::Ready;
                true
            }
            EngineState::Exited => {
                log::warn!("Ignoring readiness signal after compiler exit");
                false
            }
            EngineState::Ready | EngineState::Busy => false,
        }
    }

    fn fail_outstanding(&mut self) -> usize {
        let mut failed = 0;
        for queued in self.in_flight.take().into_iter().chain(self.queue.drain(..)) {
            log::debug!("Failing job {} ({})", queued.job.id, queued.job.kind());
            resolve(queued.responder, Err(JobError::CompilerUnavailable));
            failed += 1;
        }
        failed
    }
}

fn resolve(responder: Option<Responder>, outcome: JobOutcome) {
    if let Some(tx) = responder {
        // The caller may have been cancelled; nobody is left to tell.
        let _ = tx.send(outcome);
    }
}
