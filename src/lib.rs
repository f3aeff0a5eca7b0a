//! # Regulatory Observatory
//!
//! Tracks how the text of federal regulations changes over time. Ingestion
//! walks the corpus one calendar day at a time from a historical epoch to
//! the present, attributes word-count deltas to the agencies responsible for
//! each citation, and, once caught up, keeps a vector index of current text
//! for semantic search.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Orchestrator │──▶│   Processor   │──▶│    SQLite    │
//! │ day by day   │   │ fetch+diff+emb│   │ history+vecs │
//! └──────┬───────┘   └───────┬───────┘   └──────┬───────┘
//!        │                   │                  │
//!   ┌────▼─────┐       ┌─────▼─────┐      ┌─────▼─────┐
//!   │checkpoint│       │ eCFR API  │      │ HTTP API  │
//!   └──────────┘       └───────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! regobs init                  # create database + checkpoint
//! regobs agencies load         # seed agencies and their references
//! regobs ingest --max-days 30  # catch up a month at a time
//! regobs schedule              # weekday trigger once caught up
//! regobs serve                 # read-only JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | eCFR versioner client |
//! | [`extract`] | Section XML → text fragments, word counting |
//! | [`history`] | Word-count series and section snapshots |
//! | [`embed_sync`] | Embedding lifecycle (skip / bootstrap / maintain) |
//! | [`processor`] | Per (agency, reference, date) unit of work |
//! | [`orchestrator`] | Day-by-day catch-up driver |
//! | [`checkpoint`] | Ingestion progress cursor |
//! | [`schedule`] | Weekday cron trigger |
//! | [`agencies`] | Agency directory loader |
//! | [`query`], [`server`] | Read-only queries and HTTP API |

pub mod agencies;
pub mod checkpoint;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embed_sync;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod query;
pub mod retry;
pub mod schedule;
pub mod server;
pub mod source;
