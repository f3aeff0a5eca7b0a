//! Reference processor: one unit of work per (agency, reference, date).
//!
//! For each section version the source lists under the reference, the
//! processor fetches and extracts the section text, applies it to the
//! agency's history as a diff, and keeps embeddings in step according to
//! the task's [`EmbedMode`]. Removed or absent sections take the same path
//! with empty text.
//!
//! The task designated by the orchestrator as the last one for a date
//! returns a [`FollowUp`]; the orchestrator decides whether to apply it.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info};

use crate::embed_sync::{EmbedMode, EmbeddingSync};
use crate::extract::{extract, fragments_to_text};
use crate::history::HistoryStore;
use crate::models::{CfrReference, ContentVersion, Snapshot};
use crate::source::ContentSource;

#[derive(Debug, Clone)]
pub struct ReferenceTask {
    pub date: NaiveDate,
    pub agency_id: String,
    pub agency_name: String,
    pub reference: CfrReference,
    pub reference_hash: String,
    /// Historical backfill; no embeddings are maintained.
    pub is_catchup: bool,
    /// The cycle on which catch-up completes.
    pub is_first_catchup: bool,
    /// Set on exactly one task per date.
    pub trigger_follow_up: bool,
}

/// Checkpoint advance requested by the designated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    pub processed: NaiveDate,
    pub is_caught_up: bool,
    /// Next date to run when catch-up continues.
    pub continue_with: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub sections: usize,
    pub removed: usize,
    pub absent: usize,
    pub delta: i64,
    pub embedded: usize,
    pub follow_up: Option<FollowUp>,
}

pub struct ReferenceProcessor {
    source: Arc<dyn ContentSource>,
    history: HistoryStore,
    embeddings: EmbeddingSync,
}

impl ReferenceProcessor {
    pub fn new(source: Arc<dyn ContentSource>, history: HistoryStore, embeddings: EmbeddingSync) -> Self {
        Self {
            source,
            history,
            embeddings,
        }
    }

    pub async fn process(&self, task: &ReferenceTask) -> Result<TaskOutcome> {
        let mode = EmbedMode::select(task.is_catchup, task.is_first_catchup);

        let versions = self
            .source
            .fetch_versions(&task.reference, task.date)
            .await
            .with_context(|| format!("Failed to list versions for {}", task.reference))?;

        // Appendix content cannot be fetched by section, so only sections are tracked.
        let sections: Vec<&ContentVersion> = versions.iter().filter(|v| v.is_section()).collect();
        debug!(
            "Found {} sections on {} for {} ({})",
            sections.len(),
            task.date,
            task.reference,
            task.agency_name
        );

        let mut outcome = TaskOutcome {
            sections: sections.len(),
            ..TaskOutcome::default()
        };

        for version in sections {
            let text = if version.removed {
                outcome.removed += 1;
                String::new()
            } else {
                match self
                    .source
                    .fetch_content(task.date, version)
                    .await
                    .with_context(|| format!("Failed to fetch {}", version.content_id()))?
                {
                    Some(xml) => {
                        let fragments = extract(&xml)
                            .with_context(|| format!("Failed to parse {}", version.content_id()))?;
                        fragments_to_text(&fragments)
                    }
                    None => {
                        outcome.absent += 1;
                        String::new()
                    }
                }
            };

            let unit = Snapshot {
                agency_id: task.agency_id.clone(),
                content_id: version.content_id(),
                reference_hash: task.reference_hash.clone(),
                title: version.title,
                identifier: version.identifier.clone(),
                kind: version.kind.clone(),
                text,
            };

            let update = self.history.update_history(task.date, &unit).await?;
            outcome.delta += update.delta;

            if mode != EmbedMode::Skip && update.changed && unit.text.is_empty() {
                self.embeddings
                    .remove(&unit.agency_id, &unit.content_id)
                    .await?;
            }
        }

        // Changed text is embedded after the loop from the pending set, which
        // also holds units a failed provider call left behind on earlier passes.
        if mode == EmbedMode::Maintain && self.embeddings.is_enabled() {
            let pending = self
                .history
                .pending_embeddings(&task.agency_id, &task.reference_hash)
                .await?;
            outcome.embedded += self
                .embeddings
                .embed_all(&pending)
                .await
                .with_context(|| format!("Failed to embed {} ({})", task.reference, task.agency_name))?;
        }

        if mode == EmbedMode::Bootstrap && self.embeddings.is_enabled() {
            let units = self
                .history
                .snapshots_for_reference(&task.agency_id, &task.reference_hash)
                .await?;
            outcome.embedded += self
                .embeddings
                .embed_all(&units)
                .await
                .with_context(|| format!("Failed to bootstrap embeddings for {}", task.reference))?;
            info!(
                "Bootstrapped {} embeddings over {} sections for {} ({})",
                outcome.embedded,
                units.len(),
                task.reference,
                task.agency_name
            );
        }

        if task.trigger_follow_up {
            let is_caught_up = !task.is_catchup;
            outcome.follow_up = Some(FollowUp {
                processed: task.date,
                is_caught_up,
                continue_with: (!is_caught_up).then(|| task.date + Duration::days(1)),
            });
        }

        Ok(outcome)
    }
}
