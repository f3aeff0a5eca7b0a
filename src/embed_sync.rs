//! Embedding synchronizer.
//!
//! Keeps the `embeddings` table in step with current section text. Which
//! work happens is decided per task by [`EmbedMode`]:
//!
//! - **Skip** during historical catch-up; nothing is embedded.
//! - **Bootstrap** on the cycle where catch-up completes; every stored
//!   snapshot under the reference is chunked and embedded once.
//! - **Maintain** afterwards; a unit whose text changed, or whose last
//!   embedding attempt failed, has its records deleted and re-created.
//!
//! Vectors are computed before anything is written. The delete, the inserts
//! and clearing the snapshot's pending flag share one transaction, so a
//! failed provider call leaves the unit pending with its old records intact.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use crate::chunk::chunk_text;
use crate::embedding::{vec_to_blob, Embedder};
use crate::models::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Skip,
    Bootstrap,
    Maintain,
}

impl EmbedMode {
    pub fn select(is_catchup: bool, is_first_catchup: bool) -> Self {
        if is_first_catchup {
            EmbedMode::Bootstrap
        } else if is_catchup {
            EmbedMode::Skip
        } else {
            EmbedMode::Maintain
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingSync {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
    max_tokens: usize,
    batch_size: usize,
}

impl EmbeddingSync {
    pub fn new(
        pool: SqlitePool,
        embedder: Option<Arc<dyn Embedder>>,
        max_tokens: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            embedder,
            max_tokens,
            batch_size: batch_size.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    /// Re-create the records for one unit from its text and mark its snapshot
    /// embedded. Returns the number inserted.
    pub async fn replace(&self, unit: &Snapshot) -> Result<usize> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(0);
        };

        let chunks = chunk_text(&unit.text, self.max_tokens);
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(embedder.embed(&texts).await?);
        }
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Embedding provider returned {} vectors for {} chunks of {}",
                vectors.len(),
                chunks.len(),
                unit.content_id
            );
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embeddings WHERE agency_id = ? AND content_id = ?")
            .bind(&unit.agency_id)
            .bind(&unit.content_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO embeddings
                    (id, content_id, agency_id, title, identifier, kind, chunk_index, chunk_hash, text, vector, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&unit.content_id)
            .bind(&unit.agency_id)
            .bind(unit.title as i64)
            .bind(&unit.identifier)
            .bind(&unit.kind)
            .bind(chunk.chunk_index)
            .bind(&chunk.hash)
            .bind(&chunk.text)
            .bind(vec_to_blob(vector))
            .bind(embedder.model_name())
            .bind(embedder.dims() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE section_snapshots SET embedded = 1 WHERE agency_id = ? AND content_id = ? AND text = ?",
        )
        .bind(&unit.agency_id)
        .bind(&unit.content_id)
        .bind(&unit.text)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Embedded {} chunks for {}", chunks.len(), unit.content_id);
        Ok(chunks.len())
    }

    /// Embed each unit in turn; used both for the one-time bootstrap over a
    /// reference and for catching up units left pending.
    pub async fn embed_all(&self, units: &[Snapshot]) -> Result<usize> {
        let mut total = 0;
        for unit in units {
            total += self.replace(unit).await?;
        }
        Ok(total)
    }

    pub async fn remove(&self, agency_id: &str, content_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE agency_id = ? AND content_id = ?")
            .bind(agency_id)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbedError;
    use crate::migrate::migrate;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct RejectingEmbedder;

    #[async_trait]
    impl Embedder for RejectingEmbedder {
        fn model_name(&self) -> &str {
            "rejecting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Api {
                status: 400,
                body: "bad request".into(),
            })
        }
    }

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn unit(text: &str) -> Snapshot {
        Snapshot {
            agency_id: "a".into(),
            content_id: "7:5.1".into(),
            reference_hash: "ref".into(),
            title: 7,
            identifier: "5.1".into(),
            kind: "section".into(),
            text: text.into(),
        }
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(EmbedMode::select(true, false), EmbedMode::Skip);
        assert_eq!(EmbedMode::select(true, true), EmbedMode::Bootstrap);
        assert_eq!(EmbedMode::select(false, true), EmbedMode::Bootstrap);
        assert_eq!(EmbedMode::select(false, false), EmbedMode::Maintain);
    }

    #[tokio::test]
    async fn test_replace_deletes_before_insert() {
        let pool = pool().await;
        let embedder = Arc::new(CountingEmbedder::default());
        let sync = EmbeddingSync::new(pool.clone(), Some(embedder.clone()), 5, 64);

        let inserted = sync
            .replace(&unit("First sentence here.\nSecond sentence here."))
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(count(&pool).await, 2);

        sync.replace(&unit("Only one now.")).await.unwrap();
        assert_eq!(count(&pool).await, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batches_by_size() {
        let pool = pool().await;
        let embedder = Arc::new(CountingEmbedder::default());
        let sync = EmbeddingSync::new(pool.clone(), Some(embedder.clone()), 1, 2);

        sync.replace(&unit("Aaaa.\nBbbb.\nCccc.")).await.unwrap();
        assert_eq!(count(&pool).await, 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_replace_stores_chunk_hashes_and_marks_snapshot() {
        let pool = pool().await;
        let sync = EmbeddingSync::new(pool.clone(), Some(Arc::new(CountingEmbedder::default())), 256, 64);
        sqlx::query(
            r#"
            INSERT INTO section_snapshots (agency_id, content_id, reference_hash, title, identifier, kind, text, updated_on)
            VALUES ('a', '7:5.1', 'ref', 7, '5.1', 'section', 'Some text.', '2017-01-01')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sync.replace(&unit("Some text.")).await.unwrap();

        let hash: String = sqlx::query_scalar("SELECT chunk_hash FROM embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(hash, chunk_text("Some text.", 256)[0].hash);
        let embedded: i64 = sqlx::query_scalar("SELECT embedded FROM section_snapshots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(embedded, 1);
    }

    #[tokio::test]
    async fn test_failed_provider_keeps_old_records() {
        let pool = pool().await;
        let sync = EmbeddingSync::new(pool.clone(), Some(Arc::new(CountingEmbedder::default())), 256, 64);
        sync.replace(&unit("Old text.")).await.unwrap();

        let failing = EmbeddingSync::new(pool.clone(), Some(Arc::new(RejectingEmbedder)), 256, 64);
        assert!(failing.replace(&unit("New text.")).await.is_err());
        let text: String = sqlx::query_scalar("SELECT text FROM embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(text, "Old text.");
    }

    #[tokio::test]
    async fn test_remove() {
        let pool = pool().await;
        let sync = EmbeddingSync::new(pool.clone(), Some(Arc::new(CountingEmbedder::default())), 256, 64);
        sync.replace(&unit("Some text.")).await.unwrap();
        assert_eq!(sync.remove("a", "7:5.1").await.unwrap(), 1);
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let pool = pool().await;
        let sync = EmbeddingSync::new(pool.clone(), None, 256, 64);
        assert!(!sync.is_enabled());
        assert_eq!(sync.replace(&unit("Some text.")).await.unwrap(), 0);
        assert_eq!(count(&pool).await, 0);
    }
}
