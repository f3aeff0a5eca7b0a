//! Read-only queries over ingested data.
//!
//! These back both the HTTP API and the `history` / `search` / `status`
//! commands. Nothing here writes.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::checkpoint::CheckpointStore;
use crate::config::parse_date;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, Embedder};
use crate::models::{Checkpoint, HistoryEntry};

pub const SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencySummary {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyWordCount {
    pub id: String,
    pub name: String,
    pub short_name: Option<String>,
    pub parent_id: Option<String>,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AgencyWordCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub content_id: String,
    pub agency_id: String,
    pub title: u32,
    pub identifier: String,
    pub kind: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub checkpoint: Option<Checkpoint>,
    pub agencies: i64,
    pub history_rows: i64,
    pub snapshots: i64,
    pub embeddings: i64,
}

pub async fn list_agencies(pool: &SqlitePool) -> Result<Vec<AgencySummary>> {
    let rows = sqlx::query("SELECT id, display_name FROM agencies ORDER BY display_name ASC")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|r| AgencySummary {
            id: r.get("id"),
            display_name: r.get("display_name"),
        })
        .collect())
}

/// Date-ordered history, for one agency or all of them.
pub async fn agency_history(pool: &SqlitePool, agency_id: Option<&str>) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT agency_id, date, word_count FROM agency_history
        WHERE (? IS NULL OR agency_id = ?)
        ORDER BY date ASC, agency_id ASC
        "#,
    )
    .bind(agency_id)
    .bind(agency_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            let date: String = r.get("date");
            Ok(HistoryEntry {
                agency_id: r.get("agency_id"),
                date: parse_date(&date)?,
                word_count: r.get("word_count"),
            })
        })
        .collect()
}

/// Departments with their latest word counts; a department's total includes its children.
pub async fn agency_word_counts(pool: &SqlitePool) -> Result<Vec<AgencyWordCount>> {
    let rows = sqlx::query(
        r#"
        SELECT a.id, a.name, a.short_name, a.parent_id,
               COALESCE((SELECT h.word_count FROM agency_history h
                         WHERE h.agency_id = a.id ORDER BY h.date DESC LIMIT 1), 0) AS word_count
        FROM agencies a
        ORDER BY a.name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let all: Vec<AgencyWordCount> = rows
        .iter()
        .map(|r| AgencyWordCount {
            id: r.get("id"),
            name: r.get("name"),
            short_name: r.get("short_name"),
            parent_id: r.get("parent_id"),
            word_count: r.get("word_count"),
            children: Vec::new(),
        })
        .collect();

    let (mut departments, children): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|a| a.parent_id.is_none());

    for child in children {
        if let Some(parent) = departments
            .iter_mut()
            .find(|d| Some(&d.id) == child.parent_id.as_ref())
        {
            parent.word_count += child.word_count;
            parent.children.push(child);
        }
    }

    Ok(departments)
}

/// Nearest-neighbour search over stored embeddings, optionally within one agency.
pub async fn search(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    agency_id: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let query_vec = embed_query(embedder, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT content_id, agency_id, title, identifier, kind, text, vector
        FROM embeddings
        WHERE model = ? AND (? IS NULL OR agency_id = ?)
        "#,
    )
    .bind(embedder.model_name())
    .bind(agency_id)
    .bind(agency_id)
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<SearchHit> = rows
        .iter()
        .map(|r| {
            let blob: Vec<u8> = r.get("vector");
            SearchHit {
                content_id: r.get("content_id"),
                agency_id: r.get("agency_id"),
                title: r.get::<i64, _>("title") as u32,
                identifier: r.get("identifier"),
                kind: r.get("kind"),
                text: r.get("text"),
                score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    Ok(hits)
}

pub async fn status(pool: &SqlitePool) -> Result<StatusReport> {
    let checkpoint = CheckpointStore::new(pool.clone()).load().await?;

    Ok(StatusReport {
        checkpoint,
        agencies: count_rows(pool, "agencies").await?,
        history_rows: count_rows(pool, "agency_history").await?,
        snapshots: count_rows(pool, "section_snapshots").await?,
        embeddings: count_rows(pool, "embeddings").await?,
    })
}

async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    Ok(sqlx::query_scalar(&sql).fetch_one(pool).await?)
}
