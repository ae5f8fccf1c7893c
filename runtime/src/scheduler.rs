//! Periodic settlement jobs.
//!
//! Three loops share one [`SettlementWorker`]: the closing sweep, results
//! reconciliation and the payout pass. Each run is wrapped in the configured
//! retry policy; a run that still fails is logged and the loop waits for the
//! next tick. Every loop stops when the shutdown signal is broadcast.

use crate::error::SettlementError;
use crate::retry::retry;
use crate::settlement::SettlementWorker;
use rifa_core::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A scheduled settlement job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Close raffles whose sales window ended
    CloseDue,
    /// Probe results for raffles near their end date
    Reconcile,
    /// Pay unpaid winners
    Payouts,
}

impl Job {
    /// Every job, in start order.
    pub const ALL: [Self; 3] = [Self::CloseDue, Self::Reconcile, Self::Payouts];

    /// Name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CloseDue => "close_due_raffles",
            Self::Reconcile => "reconcile_results",
            Self::Payouts => "process_payouts",
        }
    }
}

/// Runs settlement jobs on their configured cadence.
pub struct Scheduler<S: Store> {
    worker: Arc<SettlementWorker<S>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: Store> Scheduler<S> {
    /// Create a scheduler around a worker.
    #[must_use]
    pub fn new(worker: Arc<SettlementWorker<S>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            worker,
            shutdown_tx,
        }
    }

    /// Start one loop per job. Each ticks immediately, then every interval.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        Job::ALL
            .into_iter()
            .map(|job| {
                let worker = Arc::clone(&self.worker);
                let shutdown = self.shutdown_tx.subscribe();
                let period = interval_for(&worker, job);
                tokio::spawn(run_loop(worker, job, period, shutdown))
            })
            .collect()
    }

    /// Signal every loop to stop after its current run.
    pub fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            tracing::warn!("No scheduler loops listening for shutdown: {}", e);
        }
    }

    /// Run one job now, with retries.
    ///
    /// # Errors
    ///
    /// Returns the last [`SettlementError`] once retries are exhausted or on a
    /// non-retryable failure.
    pub async fn run_once(&self, job: Job) -> Result<(), SettlementError> {
        run_job(&self.worker, job).await
    }
}

fn interval_for<S: Store>(worker: &SettlementWorker<S>, job: Job) -> Duration {
    let config = worker.config();
    match job {
        Job::CloseDue => config.close_interval,
        Job::Reconcile => config.reconcile_interval,
        Job::Payouts => config.payout_interval,
    }
}

async fn run_loop<S: Store>(
    worker: Arc<SettlementWorker<S>>,
    job: Job,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(job = job.name(), period_secs = period.as_secs(), "Scheduled job started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(job = job.name(), "Scheduled job stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(error) = run_job(&worker, job).await {
                    tracing::error!(job = job.name(), error = %error, "Scheduled job failed");
                }
            }
        }
    }
}

async fn run_job<S: Store>(worker: &SettlementWorker<S>, job: Job) -> Result<(), SettlementError> {
    let policy = &worker.config().retry;
    match job {
        Job::CloseDue => {
            retry(policy, job.name(), || worker.close_due_raffles()).await?;
        }
        Job::Reconcile => {
            retry(policy, job.name(), || worker.reconcile()).await?;
        }
        Job::Payouts => {
            retry(policy, job.name(), || worker.process_payouts(None)).await?;
        }
    }
    Ok(())
}
