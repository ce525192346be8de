// src/print_job/runner.rs - Drives a shared controller on the tokio runtime
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::controller::{PrintJobController, TickOutcome};
use super::dispatcher::CommandDispatcher;
use super::JobPhase;

/// Ticks a controller until its job reaches a terminal phase.
///
/// The lock is held for one tick at a time, so `pause`, `cancel` and status
/// reads from other tasks interleave between batches.
pub struct JobRunner<D: CommandDispatcher> {
    controller: Arc<Mutex<PrintJobController<D>>>,
    idle_poll: Duration,
}

impl<D: CommandDispatcher> JobRunner<D> {
    pub fn new(controller: Arc<Mutex<PrintJobController<D>>>, idle_poll: Duration) -> Self {
        Self {
            controller,
            idle_poll,
        }
    }

    /// Returns the phase the job ended in, or `Standby` when there was no
    /// job to run.
    pub async fn run(&self) -> JobPhase {
        loop {
            let (outcome, phase) = {
                let mut controller = self.controller.lock().await;
                let outcome = controller.tick();
                (outcome, controller.state().phase)
            };
            match outcome {
                TickOutcome::Yield => tokio::task::yield_now().await,
                TickOutcome::Backoff(delay) => tokio::time::sleep(delay).await,
                TickOutcome::Idle if phase == JobPhase::Standby => return phase,
                TickOutcome::Idle => tokio::time::sleep(self.idle_poll).await,
                TickOutcome::Finished(phase) => {
                    tracing::info!("Job runner stopped: job {}", phase);
                    return phase;
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<JobPhase>
    where
        D: 'static,
    {
        tokio::spawn(async move { self.run().await })
    }
}
