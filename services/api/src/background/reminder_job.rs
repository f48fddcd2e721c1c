//! Periodic reminder pass over every active client.
//!
//! Runs on a fixed interval using `tokio::time::interval`. Each tick lists the
//! active clients and evaluates them with bounded concurrency; a client that is
//! still being evaluated from a manual request is skipped until the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use engagement_core::ports::ClientDirectory;
use engagement_core::scheduler::{ReminderScheduler, SchedulerError};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Totals for one tick across all clients.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub clients: usize,
    pub busy: usize,
    pub errors: usize,
    pub sent: u32,
    pub suppressed: u32,
    pub failed: u32,
}

/// Run the reminder loop until `cancel` is triggered.
pub async fn run(
    scheduler: Arc<ReminderScheduler>,
    directory: Arc<dyn ClientDirectory>,
    every: Duration,
    concurrency: usize,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = every.as_secs(),
        concurrency,
        "Reminder job started"
    );

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reminder job stopping");
                break;
            }
            _ = interval.tick() => {
                match run_tick(&scheduler, directory.as_ref(), concurrency, Utc::now()).await {
                    Ok(summary) => {
                        if summary.sent + summary.suppressed + summary.failed > 0 {
                            tracing::info!(?summary, "Reminder pass complete");
                        } else {
                            tracing::debug!(clients = summary.clients, "Reminder pass: nothing to do");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reminder pass: could not list clients");
                    }
                }
            }
        }
    }
}

/// Evaluates every active client once at `now`.
pub async fn run_tick(
    scheduler: &ReminderScheduler,
    directory: &dyn ClientDirectory,
    concurrency: usize,
    now: DateTime<Utc>,
) -> Result<TickSummary, engagement_core::ports::PortError> {
    let clients = directory.list_active_clients().await?;
    let totals = Mutex::new(TickSummary {
        clients: clients.len(),
        ..TickSummary::default()
    });

    stream::iter(clients)
        .for_each_concurrent(concurrency.max(1), |client| {
            let totals = &totals;
            async move {
                let outcome = scheduler.run_scheduled_pass(client.id, now).await;
                let mut totals = totals.lock().await;
                match outcome {
                    Ok(summary) => {
                        totals.sent += summary.sent_count;
                        totals.suppressed += summary.suppressed_count;
                        totals.failed += summary.failed_count;
                    }
                    Err(SchedulerError::Busy(client_id)) => {
                        tracing::debug!(%client_id, "Client busy, skipping this tick");
                        totals.busy += 1;
                    }
                    Err(e) => {
                        tracing::error!(client_id = %client.id, error = %e, "Reminder pass failed");
                        totals.errors += 1;
                    }
                }
            }
        })
        .await;

    Ok(totals.into_inner())
}
