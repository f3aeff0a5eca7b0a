//! Diff & history store.
//!
//! Each agency has a date-ordered word-count series in `agency_history` and
//! one snapshot per content unit it covers in `section_snapshots`. A content
//! unit's new text is applied as a diff against its snapshot:
//!
//! ```text
//! previous = latest row with date <= D            (0 if none)
//! current  = earliest row with date >= D           (created at D, seeded with previous)
//! delta    = words(new text) - words(snapshot)
//! current += delta; snapshot = new text            (deleted when new text is empty)
//! ```
//!
//! Every update runs in one SQLite transaction, and all history writes in the
//! process pass through a single write gate so the read-then-write sequence
//! never races with another processor touching the same agency row.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::parse_date;
use crate::extract::word_count;
use crate::models::{HistoryEntry, HistoryUpdate, Snapshot};

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Apply `unit.text` as the new content of a unit on `date`.
    ///
    /// An empty text removes the unit: its words leave the running total and
    /// the snapshot is deleted.
    pub async fn update_history(&self, date: NaiveDate, unit: &Snapshot) -> Result<HistoryUpdate> {
        let day = date.to_string();
        let _gate = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        let previous: i64 = sqlx::query_scalar(
            "SELECT word_count FROM agency_history WHERE agency_id = ? AND date <= ? ORDER BY date DESC LIMIT 1",
        )
        .bind(&unit.agency_id)
        .bind(&day)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        let current_row = sqlx::query(
            "SELECT date, word_count FROM agency_history WHERE agency_id = ? AND date >= ? ORDER BY date ASC LIMIT 1",
        )
        .bind(&unit.agency_id)
        .bind(&day)
        .fetch_optional(&mut *tx)
        .await?;

        let (current_date, current_count) = match current_row {
            Some(row) => (row.get::<String, _>("date"), row.get::<i64, _>("word_count")),
            None => {
                sqlx::query("INSERT INTO agency_history (agency_id, date, word_count) VALUES (?, ?, ?)")
                    .bind(&unit.agency_id)
                    .bind(&day)
                    .bind(previous)
                    .execute(&mut *tx)
                    .await?;
                (day.clone(), previous)
            }
        };

        let stored: Option<String> = sqlx::query_scalar(
            "SELECT text FROM section_snapshots WHERE agency_id = ? AND content_id = ?",
        )
        .bind(&unit.agency_id)
        .bind(&unit.content_id)
        .fetch_optional(&mut *tx)
        .await?;

        let stored_text = stored.unwrap_or_default();
        let delta = word_count(&unit.text) - word_count(&stored_text);
        let changed = stored_text != unit.text;

        if delta != 0 {
            sqlx::query(
                "UPDATE agency_history SET word_count = word_count + ? WHERE agency_id = ? AND date = ?",
            )
            .bind(delta)
            .bind(&unit.agency_id)
            .bind(&current_date)
            .execute(&mut *tx)
            .await?;
        }

        if unit.text.is_empty() {
            sqlx::query("DELETE FROM section_snapshots WHERE agency_id = ? AND content_id = ?")
                .bind(&unit.agency_id)
                .bind(&unit.content_id)
                .execute(&mut *tx)
                .await?;
        } else if changed {
            sqlx::query(
                r#"
                INSERT INTO section_snapshots
                    (agency_id, content_id, reference_hash, title, identifier, kind, text, updated_on, embedded)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                ON CONFLICT(agency_id, content_id) DO UPDATE SET
                    reference_hash = excluded.reference_hash,
                    title = excluded.title,
                    identifier = excluded.identifier,
                    kind = excluded.kind,
                    text = excluded.text,
                    updated_on = excluded.updated_on,
                    embedded = 0
                "#,
            )
            .bind(&unit.agency_id)
            .bind(&unit.content_id)
            .bind(&unit.reference_hash)
            .bind(unit.title as i64)
            .bind(&unit.identifier)
            .bind(&unit.kind)
            .bind(&unit.text)
            .bind(&day)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit history for {}", unit.content_id))?;

        Ok(HistoryUpdate {
            previous_word_count: previous,
            current_word_count: current_count + delta,
            delta,
            changed,
        })
    }

    pub async fn snapshot(&self, agency_id: &str, content_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT agency_id, content_id, reference_hash, title, identifier, kind, text
            FROM section_snapshots WHERE agency_id = ? AND content_id = ?
            "#,
        )
        .bind(agency_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| snapshot_from_row(&r)))
    }

    /// Every stored snapshot an agency holds under one reference.
    pub async fn snapshots_for_reference(
        &self,
        agency_id: &str,
        reference_hash: &str,
    ) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT agency_id, content_id, reference_hash, title, identifier, kind, text
            FROM section_snapshots WHERE agency_id = ? AND reference_hash = ?
            ORDER BY content_id
            "#,
        )
        .bind(agency_id)
        .bind(reference_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(snapshot_from_row).collect())
    }

    /// Snapshots under one reference whose embeddings do not match their text yet.
    ///
    /// A unit stays pending after a failed embedding call, so the next pass picks it up.
    pub async fn pending_embeddings(
        &self,
        agency_id: &str,
        reference_hash: &str,
    ) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT agency_id, content_id, reference_hash, title, identifier, kind, text
            FROM section_snapshots
            WHERE agency_id = ? AND reference_hash = ? AND embedded = 0
            ORDER BY content_id
            "#,
        )
        .bind(agency_id)
        .bind(reference_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(snapshot_from_row).collect())
    }

    /// The agency's full series, oldest first.
    pub async fn series(&self, agency_id: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT agency_id, date, word_count FROM agency_history WHERE agency_id = ? ORDER BY date ASC",
        )
        .bind(agency_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// The most recent row, i.e. the agency's current total.
    pub async fn latest(&self, agency_id: &str) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            "SELECT agency_id, date, word_count FROM agency_history WHERE agency_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(agency_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> Snapshot {
    Snapshot {
        agency_id: row.get("agency_id"),
        content_id: row.get("content_id"),
        reference_hash: row.get("reference_hash"),
        title: row.get::<i64, _>("title") as u32,
        identifier: row.get("identifier"),
        kind: row.get("kind"),
        text: row.get("text"),
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEntry> {
    let date: String = row.get("date");
    Ok(HistoryEntry {
        agency_id: row.get("agency_id"),
        date: parse_date(&date)?,
        word_count: row.get("word_count"),
    })
}
