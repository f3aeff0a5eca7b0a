//! Weekday scheduled trigger.
//!
//! Registers one `tokio-cron-scheduler` job in the configured timezone that
//! calls [`Orchestrator::run_scheduled`] for the local date. Overlapping
//! firings are skipped while a run is still in progress.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::orchestrator::Orchestrator;

pub fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Unknown timezone: {}", value))
}

/// The calendar date right now in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Check a 6-field cron expression without scheduling anything.
pub fn validate_cron(expr: &str) -> Result<()> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
}

/// One evaluation of the scheduled trigger. Errors are logged, never raised.
pub async fn fire(orchestrator: &Orchestrator, tz: Tz) {
    let today = today_in(tz);
    match orchestrator.run_scheduled(today).await {
        Ok(Some(report)) => info!(
            "Scheduled run for {} done: {} tasks, {} failed, next {}",
            report.date, report.tasks, report.failed, report.next_processing_date
        ),
        Ok(None) => {}
        Err(e) => error!("Scheduled run for {} aborted: {}", today, e),
    }
}

/// Run the scheduler until Ctrl-C.
pub async fn run_schedule(config: &ScheduleConfig, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let tz = parse_timezone(&config.timezone)?;
    validate_cron(&config.cron)?;

    let mut scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;
    let in_flight = Arc::new(Mutex::new(()));

    let job = Job::new_async_tz(config.cron.as_str(), tz, move |_uuid, _lock| {
        let orchestrator = orchestrator.clone();
        let in_flight = in_flight.clone();
        Box::pin(async move {
            let Ok(_running) = in_flight.try_lock() else {
                warn!("Previous scheduled run still in progress; skipping");
                return;
            };
            fire(&orchestrator, tz).await;
        })
    })
    .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", config.cron, e))?;

    scheduler.add(job).await.context("Failed to register job")?;
    scheduler.start().await.context("Failed to start scheduler")?;
    info!("Scheduler started: '{}' ({})", config.cron, tz.name());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down scheduler");

    if let Err(e) = scheduler.shutdown().await {
        warn!("Error during scheduler shutdown: {}", e);
    }
    Ok(())
}
