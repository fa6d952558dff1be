//! # Event Vectorizer
//!
//! A policy-driven pipeline that turns raw application events into
//! embedding-ready vector rows and entity graph links.
//!
//! Every event is normalized into a Canonical Feature Document (CFD) using
//! a per-event-type extraction policy, embedded into one or two vector
//! views (content, entity), written idempotently into SQLite, and linked
//! into an entity graph. Embedding failures degrade to placeholder rows so
//! coverage always reaches 100% of enabled events.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌───────────┐   ┌──────────┐
//! │ RawEvent  │──▶│ Policy+CFD  │──▶│ Embedding │──▶│  SQLite  │
//! │ (JSON)    │   │ extraction  │   │ (http/…)  │   │ vectors  │
//! └───────────┘   └──────┬──────┘   └───────────┘   └──────────┘
//!                        │
//!                        ▼
//!                  ┌───────────┐
//!                  │  Entity   │
//!                  │  graph    │
//!                  └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! evx init                              # create database
//! evx vectorize event.json             # process one event
//! evx backfill events.jsonl --dry-run  # preview a historical replay
//! evx backfill events.jsonl            # run it
//! evx coverage                          # how much is vectorized?
//! evx search "coffee purchases"        # semantic search
//! evx qa                                # end-to-end self-check
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types (events, CFDs, vector rows) |
//! | [`policy`] | Extraction policies and entity/relationship tables |
//! | [`cfd`] | Canonical Feature Document construction |
//! | [`embedder`] | Embedding provider abstraction |
//! | [`vector_store`] | Idempotent vector row storage and search |
//! | [`graph_store`] | Graph transaction backend |
//! | [`linker`] | Entity upserts and event relationships |
//! | [`pipeline`] | Per-event orchestration |
//! | [`backfill`] | Historical replay with filters and resume |
//! | [`qa`] | End-to-end QA harness over in-memory backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backfill;
pub mod cfd;
pub mod config;
pub mod db;
pub mod embedder;
pub mod graph_store;
pub mod linker;
pub mod migrate;
pub mod models;
pub mod path;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod qa;
pub mod stats;
pub mod vector_store;
