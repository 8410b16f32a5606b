//! Background workers draining the execution queue

use super::state_machine::ToolExecutionStateMachine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct ExecutionWorker {
    id: usize,
    machine: Arc<ToolExecutionStateMachine>,
    shutdown: watch::Receiver<bool>,
}

impl ExecutionWorker {
    pub fn new(
        id: usize,
        machine: Arc<ToolExecutionStateMachine>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            machine,
            shutdown,
        }
    }

    /// Process jobs until the shutdown flag flips to true
    pub async fn run(mut self) {
        info!("Execution worker {} started", self.id);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                job = self.machine.queue().next() => {
                    let Some(job) = job else { break };
                    match self.machine.handle_job(job).await {
                        Ok(execution) => debug!(
                            "Worker {} finished job: execution_id={}, status={}",
                            self.id, execution.id, execution.status
                        ),
                        Err(e) => error!(
                            "Worker {} job failed: execution_id={}, error={}",
                            self.id, job.execution_id, e
                        ),
                    }
                }
            }
        }
        info!("Execution worker {} stopped", self.id);
    }
}

/// Spawn `count` workers sharing one state machine
pub fn spawn_workers(
    machine: Arc<ToolExecutionStateMachine>,
    count: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| {
            let worker = ExecutionWorker::new(id, machine.clone(), shutdown.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}
