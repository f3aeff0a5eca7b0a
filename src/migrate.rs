use anyhow::Result;
use sqlx::SqlitePool;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    let run_until = config.ingest.run_until_date()?;
    let checkpoint = CheckpointStore::new(pool.clone());
    checkpoint.bootstrap(run_until).await?;
    // Re-running init picks up a changed cap without touching progress.
    checkpoint.set_run_until(run_until).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Singleton checkpoint row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS application_state (
            id TEXT PRIMARY KEY,
            next_processing_date TEXT,
            is_caught_up INTEGER NOT NULL DEFAULT 0,
            run_until TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agencies (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            short_name TEXT,
            display_name TEXT NOT NULL,
            sortable_name TEXT NOT NULL,
            parent_id TEXT,
            FOREIGN KEY (parent_id) REFERENCES agencies(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agency_references (
            agency_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            reference_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            PRIMARY KEY (agency_id, position),
            FOREIGN KEY (agency_id) REFERENCES agencies(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agency_history (
            agency_id TEXT NOT NULL,
            date TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            PRIMARY KEY (agency_id, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS section_snapshots (
            agency_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            reference_hash TEXT NOT NULL,
            title INTEGER NOT NULL,
            identifier TEXT NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            updated_on TEXT NOT NULL,
            -- 1 once embeddings match `text`
            embedded INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (agency_id, content_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            agency_id TEXT NOT NULL,
            title INTEGER NOT NULL,
            identifier TEXT NOT NULL,
            kind TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_hash TEXT NOT NULL,
            text TEXT NOT NULL,
            vector BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agencies_parent ON agencies(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_reference ON section_snapshots(agency_id, reference_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_content ON embeddings(agency_id, content_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
