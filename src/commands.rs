//! Command implementations for the `regobs` binary.
//!
//! Each `run_*` opens what it needs from the config, does one job, and
//! prints a short plain-text summary to stdout.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::agencies::{fetch_directory, AgencyStore};
use crate::checkpoint::CheckpointStore;
use crate::config::{parse_date, Config};
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::orchestrator::{CycleReport, Orchestrator};
use crate::query;
use crate::schedule::{self, parse_timezone, today_in};
use crate::source::EcfrSource;

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_load_agencies(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let source = EcfrSource::new(&config.source)?;

    let directory = fetch_directory(&source).await?;
    let summary = AgencyStore::new(pool.clone()).load(&directory).await?;
    CheckpointStore::new(pool.clone())
        .bootstrap(config.ingest.run_until_date()?)
        .await?;

    println!("agencies load");
    println!("  departments: {}", summary.departments);
    println!("  sub-agencies: {}", summary.agencies);
    println!("  references: {}", summary.references);
    println!("ok");

    pool.close().await;
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("ingest {}", report.date);
    println!("  tasks: {} ({} failed)", report.tasks, report.failed);
    println!("  sections: {}", report.sections);
    println!("  word delta: {:+}", report.delta);
    if report.embedded > 0 {
        println!("  embeddings written: {}", report.embedded);
    }
    println!("  caught up: {}", report.is_caught_up);
    println!("  next processing date: {}", report.next_processing_date);
}

pub async fn run_ingest(config: &Config, date: Option<String>, max_days: Option<usize>) -> Result<()> {
    let requested = date.as_deref().map(parse_date).transpose()?;
    if max_days == Some(0) {
        bail!("--max-days must be at least 1");
    }

    let pool = db::connect(config).await?;
    let orchestrator = Orchestrator::from_config(config, pool.clone())?;
    let today = today_in(parse_timezone(&config.schedule.timezone)?);

    let reports = orchestrator.run(requested, today, max_days).await?;
    for report in &reports {
        print_report(report);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Evaluate the scheduled trigger once, now.
pub async fn run_cron(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let orchestrator = Orchestrator::from_config(config, pool.clone())?;
    let today = today_in(parse_timezone(&config.schedule.timezone)?);

    match orchestrator.run_scheduled(today).await? {
        Some(report) => print_report(&report),
        None => println!("cron: not caught up, skipped"),
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_schedule(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let orchestrator = Arc::new(Orchestrator::from_config(config, pool.clone())?);
    schedule::run_schedule(&config.schedule, orchestrator).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = query::status(&pool).await?;

    println!("status");
    match &report.checkpoint {
        Some(checkpoint) => {
            let next = checkpoint
                .next_processing_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| format!("{} (epoch)", config.ingest.epoch));
            println!("  next processing date: {}", next);
            println!("  caught up: {}", checkpoint.is_caught_up);
            if let Some(run_until) = checkpoint.run_until {
                println!("  run until: {}", run_until);
            }
        }
        None => println!("  checkpoint: missing (run `regobs init`)"),
    }
    println!("  agencies: {}", report.agencies);
    println!("  history rows: {}", report.history_rows);
    println!("  snapshots: {}", report.snapshots);
    println!("  embeddings: {}", report.embeddings);

    pool.close().await;
    Ok(())
}

pub async fn run_history(config: &Config, agency_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let entries = query::agency_history(&pool, Some(agency_id)).await?;

    if entries.is_empty() {
        println!("No history.");
    }
    for entry in &entries {
        println!("{}  {}", entry.date, entry.word_count);
    }

    pool.close().await;
    Ok(())
}

pub async fn run_search(
    config: &Config,
    text: &str,
    agency_id: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let Some(embedder) = create_embedder(&config.embedding, config.source.retry_policy())? else {
        bail!("Search requires an embedding provider. Set [embedding] provider in config.");
    };
    let pool = db::connect(config).await?;

    let hits = query::search(
        &pool,
        embedder.as_ref(),
        text,
        agency_id,
        limit.unwrap_or(query::SEARCH_LIMIT),
    )
    .await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} CFR {} ({})",
            i + 1,
            hit.score,
            hit.title,
            hit.identifier,
            hit.agency_id
        );
        println!("    {}", hit.text);
    }

    pool.close().await;
    Ok(())
}
