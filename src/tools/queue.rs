//! Execution job queue with at-least-once delivery
//!
//! A job is "in flight" from the moment a worker takes it until it is acked.
//! RUNNING executions are persisted before they are enqueued, so after a
//! restart [`ExecutionQueue::recover`] can rebuild the queue from the store.

use crate::error::Result;
use crate::storage::ToolStore;
use crate::tools::ExecutionStatus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One delivery of an execution to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionJob {
    pub execution_id: Uuid,
    /// 1-based delivery attempt
    pub attempt: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    attempt: u32,
    delivered_at: DateTime<Utc>,
}

/// Unbounded FIFO of execution jobs with an in-flight table
pub struct ExecutionQueue {
    sender: mpsc::UnboundedSender<ExecutionJob>,
    receiver: Mutex<mpsc::UnboundedReceiver<ExecutionJob>>,
    in_flight: DashMap<Uuid, InFlight>,
    queued: AtomicUsize,
    max_attempts: u32,
}

impl ExecutionQueue {
    pub fn new(max_attempts: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            in_flight: DashMap::new(),
            queued: AtomicUsize::new(0),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn enqueue(&self, execution_id: Uuid) {
        self.push(ExecutionJob {
            execution_id,
            attempt: 1,
        });
    }

    fn push(&self, job: ExecutionJob) {
        // The queue owns a sender and a receiver, so the channel cannot be closed.
        if self.sender.send(job).is_ok() {
            self.queued.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Enqueued execution: execution_id={}, attempt={}",
                job.execution_id, job.attempt
            );
        }
    }

    /// Wait for the next job and mark it in flight
    pub async fn next(&self) -> Option<ExecutionJob> {
        let job = self.receiver.lock().await.recv().await?;
        self.mark_delivered(job);
        Some(job)
    }

    /// Take a job if one is immediately available
    pub async fn try_next(&self) -> Option<ExecutionJob> {
        let job = self.receiver.lock().await.try_recv().ok()?;
        self.mark_delivered(job);
        Some(job)
    }

    fn mark_delivered(&self, job: ExecutionJob) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.insert(
            job.execution_id,
            InFlight {
                attempt: job.attempt,
                delivered_at: Utc::now(),
            },
        );
    }

    /// The job finished (successfully or not); forget it
    pub fn ack(&self, execution_id: Uuid) {
        self.in_flight.remove(&execution_id);
    }

    /// The job could not be processed; redeliver unless attempts are exhausted.
    ///
    /// Returns whether the job was requeued.
    pub fn nack(&self, job: ExecutionJob) -> bool {
        self.in_flight.remove(&job.execution_id);
        if job.attempt >= self.max_attempts {
            warn!(
                "Dropping execution job after {} attempts: execution_id={}",
                job.attempt, job.execution_id
            );
            return false;
        }
        self.push(ExecutionJob {
            execution_id: job.execution_id,
            attempt: job.attempt + 1,
        });
        true
    }

    pub fn is_in_flight(&self, execution_id: Uuid) -> bool {
        self.in_flight.contains_key(&execution_id)
    }

    /// In-flight jobs with the time they were handed out
    pub fn in_flight(&self) -> Vec<(Uuid, u32, DateTime<Utc>)> {
        self.in_flight
            .iter()
            .map(|e| (*e.key(), e.attempt, e.delivered_at))
            .collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Re-enqueue every persisted RUNNING execution not currently in flight.
    ///
    /// Meant to run once at startup; an execution that is enqueued twice is
    /// harmless because processing a non-RUNNING record is a no-op.
    pub async fn recover(&self, store: &dyn ToolStore) -> Result<usize> {
        let running = store.executions_with_status(ExecutionStatus::Running).await?;
        let mut recovered = 0;
        for execution in running {
            if self.is_in_flight(execution.id) {
                continue;
            }
            self.enqueue(execution.id);
            recovered += 1;
        }
        if recovered > 0 {
            info!("Recovered {} running executions into the queue", recovered);
        }
        Ok(recovered)
    }
}
