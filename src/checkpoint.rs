//! The singleton ingestion checkpoint.
//!
//! One row in `application_state` records the next date to ingest and
//! whether historical catch-up has finished. The orchestrator is the only
//! writer; [`CheckpointStore::advance`] enforces that the cursor moves
//! forward by exactly one day.

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::parse_date;
use crate::models::Checkpoint;

pub const APPLICATION_STATE_ID: &str = "application-state";

#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT next_processing_date, is_caught_up, run_until FROM application_state WHERE id = ?",
        )
        .bind(APPLICATION_STATE_ID)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let next: Option<String> = row.get("next_processing_date");
        let run_until: Option<String> = row.get("run_until");
        let is_caught_up: i64 = row.get("is_caught_up");

        Ok(Some(Checkpoint {
            next_processing_date: next.as_deref().map(parse_date).transpose()?,
            is_caught_up: is_caught_up != 0,
            run_until: run_until.as_deref().map(parse_date).transpose()?,
        }))
    }

    /// Create the checkpoint row if it does not exist yet. Never overwrites progress.
    pub async fn bootstrap(&self, run_until: Option<NaiveDate>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO application_state (id, next_processing_date, is_caught_up, run_until, updated_at)
            VALUES (?, NULL, 0, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(APPLICATION_STATE_ID)
        .bind(run_until.map(|d| d.to_string()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Created application state");
        }
        Ok(())
    }

    /// Record that `processed` committed: the cursor becomes `processed + 1`.
    ///
    /// Fails without writing if `processed` is not the stored next date, so
    /// the cursor can neither regress nor skip a day.
    pub async fn advance(&self, processed: NaiveDate, is_caught_up: bool) -> Result<NaiveDate> {
        let mut tx = self.pool.begin().await?;

        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT next_processing_date FROM application_state WHERE id = ?")
                .bind(APPLICATION_STATE_ID)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(current) = current else {
            bail!("Application state not found");
        };

        if let Some(expected) = current.as_deref().map(parse_date).transpose()? {
            if expected != processed {
                bail!(
                    "Refusing to advance checkpoint from {} after processing {}",
                    expected,
                    processed
                );
            }
        }

        let next = processed + Duration::days(1);
        sqlx::query(
            "UPDATE application_state SET next_processing_date = ?, is_caught_up = ?, updated_at = ? WHERE id = ?",
        )
        .bind(next.to_string())
        .bind(is_caught_up as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(APPLICATION_STATE_ID)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    pub async fn set_run_until(&self, run_until: Option<NaiveDate>) -> Result<()> {
        sqlx::query("UPDATE application_state SET run_until = ?, updated_at = ? WHERE id = ?")
            .bind(run_until.map(|d| d.to_string()))
            .bind(chrono::Utc::now().timestamp())
            .bind(APPLICATION_STATE_ID)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
