use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{StoreError, WebhookStore};
use crate::outbound::webhook::executor::DeliveryExecutor;
use crate::outbound::webhook::schemas::{DeliveryAttempt, DeliveryStatus};

/// Sweep tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    /// Age after which a `retrying` row is treated as abandoned. Must exceed
    /// the longest subscription timeout.
    pub claim_timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
            concurrency: 16,
            claim_timeout: Duration::from_secs(600),
        }
    }
}

/// Outcome counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due rows returned by the store
    pub due: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Rows another invocation got to first, or whose subscription vanished
    pub skipped: usize,
    /// Abandoned claims put back to `pending` before the due query
    pub released: usize,
}

enum Outcome {
    Finished(DeliveryStatus),
    Skipped,
}

/// Periodically re-executes deliveries whose retry time has come.
///
/// The scheduler only stores `next_retry_at`; this task is what turns those
/// timestamps into attempts.
pub struct RetrySweeper {
    store: Arc<dyn WebhookStore>,
    executor: Arc<DeliveryExecutor>,
    settings: SweepSettings,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        executor: Arc<DeliveryExecutor>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            executor,
            settings,
        }
    }

    /// Start the sweep loop on its own task. Runs until the handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            interval = ?self.settings.interval,
            batch_size = self.settings.batch_size,
            "Retry sweeper starting"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.sweep_once().await {
                    Ok(report) if report.due > 0 => info!(
                        due = report.due,
                        succeeded = report.succeeded,
                        rescheduled = report.rescheduled,
                        failed = report.failed,
                        skipped = report.skipped,
                        released = report.released,
                        "Retry sweep completed"
                    ),
                    Ok(_) => debug!("Retry sweep found nothing due"),
                    Err(e) => error!(error = %e, "Retry sweep failed"),
                }
            }
        })
    }

    /// Execute every delivery due now, up to the batch size.
    ///
    /// Abandoned claims are released first. A storage outage on any row is
    /// returned after the whole batch has been attempted.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = OffsetDateTime::now_utc();

        let released = match time::Duration::try_from(self.settings.claim_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub(timeout))
        {
            Some(claimed_before) => self.store.release_stale_claims(claimed_before).await?,
            None => 0,
        };

        let due = self
            .store
            .due_deliveries(now, self.settings.batch_size)
            .await?;

        let mut report = SweepReport {
            due: due.len(),
            released,
            ..SweepReport::default()
        };

        let outcomes: Vec<_> = stream::iter(due)
            .map(|delivery| self.retry(delivery))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut store_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Outcome::Finished(DeliveryStatus::Success)) => report.succeeded += 1,
                Ok(Outcome::Finished(DeliveryStatus::Failed)) => report.failed += 1,
                Ok(Outcome::Finished(_)) => report.rescheduled += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) if e.is_systemic() => {
                    store_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(error = %e, "Due delivery vanished during the sweep");
                    report.skipped += 1;
                }
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn retry(&self, delivery: DeliveryAttempt) -> Result<Outcome, StoreError> {
        let Some(subscription) = self.store.get_subscription(delivery.subscription_id).await?
        else {
            return Ok(Outcome::Skipped);
        };

        debug!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            retry_count = delivery.retry_count,
            "Retrying due delivery"
        );

        Ok(match self.executor.execute(&subscription, delivery.id).await? {
            Some(finished) => Outcome::Finished(finished.status),
            None => Outcome::Skipped,
        })
    }
}
