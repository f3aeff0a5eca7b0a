//! Catch-up orchestrator.
//!
//! Drives ingestion one calendar day at a time. A cycle for date `D`:
//!
//! 1. Loads the checkpoint and resolves `D` (requested, else the stored
//!    next date, else the configured epoch).
//! 2. Decides whether `D` reaches the present (`min(today, run_until)`); if so
//!    this cycle completes catch-up. Once caught up, a `D` past the present
//!    is refused.
//! 3. Fans out one [`ReferenceTask`] per (agency, reference) pair, at most
//!    `max_concurrency` at a time and never two for the same reference hash.
//!    The last task in iteration order is the designated follow-up task.
//! 4. Waits for every task, then applies the failure-rate breaker.
//! 5. Advances the checkpoint from the designated task's follow-up.
//!
//! [`Orchestrator::run`] repeats cycles from a queue while catch-up continues;
//! [`Orchestrator::run_scheduled`] is the weekday trigger once caught up.

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::agencies::AgencyStore;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::embed_sync::EmbeddingSync;
use crate::embedding::create_embedder;
use crate::error::CycleError;
use crate::history::HistoryStore;
use crate::locks::KeyedLocks;
use crate::processor::{FollowUp, ReferenceProcessor, ReferenceTask, TaskOutcome};
use crate::source::{ContentSource, EcfrSource};

/// Summary of one committed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub date: NaiveDate,
    pub tasks: usize,
    pub failed: usize,
    pub sections: usize,
    pub delta: i64,
    pub embedded: usize,
    pub is_caught_up: bool,
    pub next_processing_date: NaiveDate,
    pub continue_with: Option<NaiveDate>,
}

pub struct Orchestrator {
    checkpoint: CheckpointStore,
    agencies: AgencyStore,
    processor: Arc<ReferenceProcessor>,
    locks: KeyedLocks,
    epoch: NaiveDate,
    max_concurrency: usize,
    failure_threshold: f64,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        pool: SqlitePool,
        source: Arc<dyn ContentSource>,
        embeddings: EmbeddingSync,
    ) -> anyhow::Result<Self> {
        let processor = ReferenceProcessor::new(source, HistoryStore::new(pool.clone()), embeddings);
        Ok(Self {
            checkpoint: CheckpointStore::new(pool.clone()),
            agencies: AgencyStore::new(pool),
            processor: Arc::new(processor),
            locks: KeyedLocks::new(),
            epoch: config.ingest.epoch_date()?,
            max_concurrency: config.ingest.max_concurrency.max(1),
            failure_threshold: config.ingest.failure_threshold,
        })
    }

    /// Wire the production source and embedding provider from config.
    pub fn from_config(config: &Config, pool: SqlitePool) -> anyhow::Result<Self> {
        let source = EcfrSource::new(&config.source)?;
        let embedder = create_embedder(&config.embedding, config.source.retry_policy())?;
        if embedder.is_none() {
            info!("Embedding provider disabled; embeddings will not be maintained");
        }
        let embeddings = EmbeddingSync::new(
            pool.clone(),
            embedder,
            config.chunking.max_tokens,
            config.embedding.batch_size,
        );
        Self::new(config, pool, Arc::new(source), embeddings)
    }

    /// Run one cycle, then keep going while catch-up continues.
    ///
    /// At most `max_days` cycles run in this call; the checkpoint records
    /// where the next call resumes.
    pub async fn run(
        &self,
        requested: Option<NaiveDate>,
        today: NaiveDate,
        max_days: Option<usize>,
    ) -> Result<Vec<CycleReport>, CycleError> {
        let mut queue: VecDeque<Option<NaiveDate>> = VecDeque::from([requested]);
        let mut reports = Vec::new();

        while let Some(date) = queue.pop_front() {
            let report = self.run_cycle(date, today).await?;
            let next = report.continue_with;
            reports.push(report);

            match next {
                Some(next) if max_days.map_or(true, |max| reports.len() < max) => {
                    info!("Continuing catch-up with {}", next);
                    queue.push_back(Some(next));
                }
                Some(next) => info!("Stopping after {} days; next date is {}", reports.len(), next),
                None => info!("Caught up; waiting for the scheduled trigger"),
            }
        }

        Ok(reports)
    }

    /// The weekday trigger: runs only for the checkpoint's next date once caught up.
    pub async fn run_scheduled(&self, today: NaiveDate) -> Result<Option<CycleReport>, CycleError> {
        let checkpoint = self
            .checkpoint
            .load()
            .await?
            .ok_or(CycleError::MissingCheckpoint)?;

        if !checkpoint.is_caught_up {
            info!("Not caught up yet, skipping scheduled run");
            return Ok(None);
        }

        let expected = checkpoint.next_processing_date.unwrap_or(self.epoch);
        if today != expected {
            error!(
                "Scheduled run for {} but next processing date is {}",
                today, expected
            );
            return Err(CycleError::SchedulingDrift {
                requested: today,
                expected,
            });
        }

        info!("Scheduled run for {}", today);
        self.run_cycle(Some(today), today).await.map(Some)
    }

    /// Process every (agency, reference) pair for one date and commit the checkpoint.
    pub async fn run_cycle(
        &self,
        requested: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<CycleReport, CycleError> {
        let checkpoint = self
            .checkpoint
            .load()
            .await?
            .ok_or(CycleError::MissingCheckpoint)?;

        let date = match (requested, checkpoint.next_processing_date) {
            (Some(requested), Some(expected)) if requested != expected => {
                return Err(CycleError::SchedulingDrift { requested, expected });
            }
            (Some(requested), _) => requested,
            (None, Some(expected)) => expected,
            (None, None) => self.epoch,
        };

        let present = checkpoint.run_until.map_or(today, |cap| cap.min(today));
        if checkpoint.is_caught_up && date > present {
            warn!("Next processing date {} is after the present {}; not ingesting", date, present);
            return Err(CycleError::NotYetDue { date, present });
        }
        let is_today = date >= present;
        let is_first_catchup = is_today && !checkpoint.is_caught_up;
        let is_caught_up = checkpoint.is_caught_up || is_today;
        if is_first_catchup {
            info!("Reached the present at {}; catch-up completes this cycle", date);
        }

        let agencies = self
            .agencies
            .list()
            .await
            .context("Failed to load agency work list")?;

        let mut tasks = Vec::new();
        for agency in &agencies {
            for reference in &agency.references {
                tasks.push(ReferenceTask {
                    date,
                    agency_id: agency.id.clone(),
                    agency_name: agency.name.clone(),
                    reference_hash: reference.content_hash(),
                    reference: reference.clone(),
                    is_catchup: !is_caught_up,
                    is_first_catchup,
                    trigger_follow_up: false,
                });
            }
        }
        if let Some(last) = tasks.last_mut() {
            last.trigger_follow_up = true;
        }

        info!(
            "Ingesting {} ({} agencies, {} references, caught up: {})",
            date,
            agencies.len(),
            tasks.len(),
            is_caught_up
        );

        let total = tasks.len();
        let results = self.dispatch(tasks).await;

        let mut failed = 0usize;
        let mut designated: Option<Result<FollowUp, ()>> = None;
        let mut report = CycleReport {
            date,
            tasks: total,
            failed: 0,
            sections: 0,
            delta: 0,
            embedded: 0,
            is_caught_up,
            next_processing_date: date,
            continue_with: None,
        };

        for (task, result) in results {
            match result {
                Ok(outcome) => {
                    report.sections += outcome.sections;
                    report.delta += outcome.delta;
                    report.embedded += outcome.embedded;
                    if task.trigger_follow_up {
                        designated = Some(outcome.follow_up.ok_or(()));
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        "Failed to process {} for {}: {:#}",
                        task.reference_hash, task.agency_id, e
                    );
                    if task.trigger_follow_up {
                        designated = Some(Err(()));
                    }
                }
            }
        }
        report.failed = failed;

        if total > 0 && failed as f64 / total as f64 >= self.failure_threshold {
            error!("{} of {} tasks failed for {}; checkpoint unchanged", failed, total, date);
            return Err(CycleError::FailureRate { failed, total });
        }
        if failed > 0 {
            warn!("{} of {} tasks failed for {}; below threshold", failed, total, date);
        }

        let follow_up = match designated {
            Some(Ok(follow_up)) => follow_up,
            Some(Err(())) => return Err(CycleError::DesignatedTaskFailed { date }),
            // Nothing to dispatch: the day is trivially complete.
            None => {
                warn!("No agency references to process for {}", date);
                FollowUp {
                    processed: date,
                    is_caught_up,
                    continue_with: (!is_caught_up).then(|| date + chrono::Duration::days(1)),
                }
            }
        };

        let next = self
            .checkpoint
            .advance(follow_up.processed, follow_up.is_caught_up)
            .await?;
        info!("Last processed: {}, next processing date: {}", date, next);

        report.is_caught_up = follow_up.is_caught_up;
        report.next_processing_date = next;
        report.continue_with = follow_up.continue_with;
        Ok(report)
    }

    /// Run every task to completion. Failures never cancel siblings.
    async fn dispatch(
        &self,
        tasks: Vec<ReferenceTask>,
    ) -> Vec<(ReferenceTask, anyhow::Result<TaskOutcome>)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();

        for (index, task) in tasks.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let locks = self.locks.clone();
            let processor = self.processor.clone();
            set.spawn(async move {
                let _key = locks.lock(&task.reference_hash).await;
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => processor.process(&task).await,
                    Err(e) => Err(anyhow::anyhow!("Concurrency limiter closed: {}", e)),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<anyhow::Result<TaskOutcome>>> =
            (0..tasks.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Reference task panicked: {}", e),
            }
        }

        tasks
            .into_iter()
            .zip(slots)
            .map(|(task, slot)| {
                let result =
                    slot.unwrap_or_else(|| Err(anyhow::anyhow!("Reference task did not complete")));
                (task, result)
            })
            .collect()
    }
}
