//! Periodic detection of insurance policies whose coverage has ended.
//!
//! Each run logs every expired, not yet logged policy exactly once. Safety
//! against overlapping runs (threads, processes or hosts) comes from the
//! repository: PostgreSQL locks the selected rows with `SKIP LOCKED` and a
//! unique constraint on the log's policy reference backs it up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::insurance::domain::ExpiryLogEntry;
use crate::insurance::repository::{InsuranceRepository, RepositoryError};

pub const DEFAULT_BATCH_SIZE: u32 = 500;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct ExpiryJob<R> {
    repository: Arc<R>,
    batch_size: u32,
}

impl<R> Clone for ExpiryJob<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            batch_size: self.batch_size,
        }
    }
}

impl<R> ExpiryJob<R>
where
    R: InsuranceRepository + 'static,
{
    pub fn new(repository: Arc<R>, batch_size: u32) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
        }
    }

    /// Logs every policy ending on or before `today`, in batches, until none remain.
    ///
    /// A short batch ends the run: either nothing is left, or the remainder is
    /// locked by a concurrent run that will log it.
    pub async fn run_once(&self, today: NaiveDate) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        info!(%today, "starting policy expiry run");

        let mut logged = Vec::new();
        loop {
            let batch = self
                .repository
                .log_expired_policies(today, Utc::now(), self.batch_size)
                .await?;
            let batch_len = batch.len();

            for entry in &batch {
                info!(
                    policy_id = %entry.policy,
                    car_id = %entry.car,
                    logged_at = %entry.logged_at,
                    "logged policy expiration"
                );
            }
            logged.extend(batch);

            if batch_len < self.batch_size as usize {
                break;
            }
        }

        info!(%today, logged = logged.len(), "policy expiry run completed");
        Ok(logged)
    }

    pub async fn run_today(&self) -> Result<Vec<ExpiryLogEntry>, RepositoryError> {
        self.run_once(Local::now().date_naive()).await
    }
}

/// Handle to a running scheduler; dropping it also stops the loop.
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "expiry scheduler task failed");
        }
    }
}

pub struct ExpiryScheduler;

impl ExpiryScheduler {
    /// Runs the job immediately and then once per `every`.
    ///
    /// Runs never overlap within one scheduler; ticks missed while a run is
    /// in progress are skipped. Failed runs are logged and retried on the next tick.
    pub fn spawn<R>(job: ExpiryJob<R>, every: Duration) -> SchedulerHandle
    where
        R: InsuranceRepository + 'static,
    {
        let every = every.max(MIN_INTERVAL);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "expiry scheduler started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = job.run_today().await {
                            error!(error = %err, "policy expiry run failed");
                        }
                    }
                }
            }

            info!("expiry scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}
