//! Agency directory: the loader that seeds agencies from the upstream admin
//! API, and the store the orchestrator reads its work list from.
//!
//! Departments are upserted first, then their sub-agencies with the
//! department as parent. Agencies are keyed by slug so ids stay stable
//! across reloads, and each agency's reference list is replaced wholesale.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::models::{Agency, CfrReference};
use crate::source::EcfrSource;

pub const AGENCIES_PATH: &str = "/api/admin/v1/agencies.json";

#[derive(Debug, Deserialize)]
pub struct DirectoryResponse {
    pub agencies: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    pub display_name: String,
    pub sortable_name: String,
    pub slug: String,
    #[serde(default)]
    pub cfr_references: Vec<CfrReference>,
    #[serde(default)]
    pub children: Vec<DirectoryEntry>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub departments: usize,
    pub agencies: usize,
    pub references: usize,
}

#[derive(Clone)]
pub struct AgencyStore {
    pool: SqlitePool,
}

impl AgencyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a full directory listing.
    pub async fn load(&self, directory: &DirectoryResponse) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        for department in &directory.agencies {
            let department_id = self.upsert(department, None).await?;
            summary.departments += 1;
            summary.references += department.cfr_references.len();

            for child in &department.children {
                self.upsert(child, Some(&department_id)).await?;
                summary.agencies += 1;
                summary.references += child.cfr_references.len();
            }
        }
        Ok(summary)
    }

    /// Insert or update one agency by slug; returns its id.
    async fn upsert(&self, entry: &DirectoryEntry, parent_id: Option<&str>) -> Result<String> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM agencies WHERE slug = ?")
            .bind(&entry.slug)
            .fetch_optional(&mut *tx)
            .await?;
        let id = existing.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO agencies (id, slug, name, short_name, display_name, sortable_name, parent_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                short_name = excluded.short_name,
                display_name = excluded.display_name,
                sortable_name = excluded.sortable_name,
                parent_id = excluded.parent_id
            "#,
        )
        .bind(&id)
        .bind(&entry.slug)
        .bind(&entry.name)
        .bind(&entry.short_name)
        .bind(&entry.display_name)
        .bind(&entry.sortable_name)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM agency_references WHERE agency_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for (position, reference) in entry.cfr_references.iter().enumerate() {
            sqlx::query(
                "INSERT INTO agency_references (agency_id, position, reference_json, content_hash) VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(serde_json::to_string(reference)?)
            .bind(reference.content_hash())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Every agency with its ordered references, sorted by name.
    pub async fn list(&self) -> Result<Vec<Agency>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slug, name, short_name, display_name, sortable_name, parent_id
            FROM agencies ORDER BY name ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut agencies = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let references = self.references(&id).await?;
            agencies.push(Agency {
                id,
                slug: row.get("slug"),
                name: row.get("name"),
                short_name: row.get("short_name"),
                display_name: row.get("display_name"),
                sortable_name: row.get("sortable_name"),
                parent_id: row.get("parent_id"),
                references,
            });
        }
        Ok(agencies)
    }

    async fn references(&self, agency_id: &str) -> Result<Vec<CfrReference>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT reference_json FROM agency_references WHERE agency_id = ? ORDER BY position ASC",
        )
        .bind(agency_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json)
                    .with_context(|| format!("Corrupt reference for agency {}", agency_id))
            })
            .collect()
    }
}

/// Fetch the upstream directory through the shared retry policy.
pub async fn fetch_directory(source: &EcfrSource) -> Result<DirectoryResponse> {
    let directory: DirectoryResponse = source
        .get_json(AGENCIES_PATH, &[])
        .await
        .context("Failed to fetch agency directory")?;
    info!(
        "Found {} top-level agencies in directory",
        directory.agencies.len()
    );
    Ok(directory)
}
