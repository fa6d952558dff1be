//! # Event Vectorizer CLI (`evx`)
//!
//! The `evx` binary is the primary interface for the event vectorization
//! pipeline. It provides commands for database initialization, single-event
//! and historical processing, coverage inspection, semantic search, and the
//! end-to-end QA harness.
//!
//! ## Usage
//!
//! ```bash
//! evx --config ./config/evx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `evx init` | Create the SQLite database and run schema migrations |
//! | `evx vectorize <event.json>` | Process a single raw event |
//! | `evx backfill <events.jsonl>` | Replay a historical event file |
//! | `evx coverage` | Print coverage statistics |
//! | `evx search "<query>"` | Semantic search over vectorized events |
//! | `evx qa` | Run the built-in QA suite (in-memory, no config needed) |
//! | `evx policies` | List resolved extraction policies |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! evx init --config ./config/evx.toml
//!
//! # Preview a backfill without writing anything
//! evx backfill events.jsonl --dry-run --event-type browser.visit
//!
//! # Run it in batches of 100, capped at 5000 events
//! evx backfill events.jsonl --batch-size 100 --max-events 5000
//!
//! # Resume a capped run from its final cursor
//! evx backfill events.jsonl --cursor evt_4999
//!
//! # Search finance events only
//! evx search "coffee purchases" --domain finance --limit 5
//! ```

mod backfill;
mod cfd;
mod config;
mod db;
mod embedder;
mod graph_store;
mod linker;
mod migrate;
mod models;
mod path;
mod pipeline;
mod policy;
mod progress;
mod qa;
mod stats;
mod vector_store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::backfill::{BackfillJob, BackfillOptions};
use crate::graph_store::{GraphStore, HttpGraphStore};
use crate::linker::EntityLinker;
use crate::models::RawEvent;
use crate::pipeline::Pipeline;
use crate::policy::{EntityTypeMap, PolicyStore, RelationshipMap};
use crate::progress::ProgressMode;
use crate::vector_store::{SearchFilter, SqliteVectorStore, VectorStore};

/// Event Vectorizer CLI — turn raw application events into embedding-ready
/// vector rows and entity graph links.
///
/// All commands except `qa` accept a `--config` flag pointing to a TOML
/// configuration file. See `config/evx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "evx",
    about = "Event Vectorizer — policy-driven event-to-vector pipeline",
    version,
    long_about = "Event Vectorizer normalizes raw application events into Canonical Feature \
    Documents using per-event-type extraction policies, embeds them into content and entity \
    views, writes idempotent vector rows into SQLite, and links referenced entities into a graph."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/evx.toml`. Database, embedding, graph, and
    /// policy settings are read from this file.
    #[arg(long, global = true, default_value = "./config/evx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the vector_events table with
    /// its indexes. This command is idempotent — running it multiple times
    /// is safe.
    Init,

    /// Process a single raw event from a JSON file.
    ///
    /// Builds the CFD, generates embeddings, writes vector rows, and links
    /// entities. Re-running on an already-vectorized event is a skip.
    Vectorize {
        /// Path to a JSON file holding one raw event.
        event: PathBuf,
    },

    /// Replay a historical event file (one JSON event per line).
    ///
    /// Events are filtered, capped, and processed in order. Already
    /// vectorized events are skipped, so re-running after a partial run is
    /// safe. A capped or aborted run prints a resume cursor.
    Backfill {
        /// Path to a JSONL file (one raw event per line).
        events: PathBuf,

        /// Only process events of these types (repeatable).
        #[arg(long = "event-type")]
        event_types: Vec<String>,

        /// Only process events in these domains (repeatable).
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Only process events with timestamp_ms >= this value.
        #[arg(long)]
        since_ms: Option<i64>,

        /// Only process events with timestamp_ms <= this value.
        #[arg(long)]
        until_ms: Option<i64>,

        /// Maximum number of events to process (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        max_events: usize,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Count matching events without processing anything.
        #[arg(long)]
        dry_run: bool,

        /// Skip events that already have vector rows (the default). Pass
        /// `false` to re-embed them; duplicate rows are still refused at
        /// the store level.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        skip_vectorized: bool,

        /// Resume after this event id (from a previous run's cursor).
        #[arg(long)]
        cursor: Option<String>,

        /// Progress output: `off`, `human`, or `json`. Defaults to `human`
        /// when stderr is a TTY, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Print coverage statistics.
    ///
    /// Shows total vector rows, distinct covered events, placeholder
    /// counts, and a per-event-type breakdown.
    Coverage,

    /// Semantic search over vectorized events.
    ///
    /// Embeds the query with the configured provider and ranks stored rows
    /// by cosine similarity. Requires a non-disabled embedding provider.
    Search {
        /// The search query string.
        query: String,

        /// Filter to a specific user id.
        #[arg(long)]
        user: Option<String>,

        /// Filter to specific event types (repeatable).
        #[arg(long = "event-type")]
        event_types: Vec<String>,

        /// Filter to specific domains (repeatable).
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Filter to a privacy scope: `private`, `social`, or `public`.
        #[arg(long)]
        scope: Option<String>,

        /// Filter to a vector view: `content` or `entity`.
        #[arg(long)]
        view: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Run the built-in QA suite.
    ///
    /// Exercises the whole pipeline against in-memory backends and the
    /// deterministic stub embedder. Needs no config and touches no files.
    /// Exits nonzero when any case fails.
    Qa,

    /// List resolved extraction policies.
    ///
    /// Shows the effective policy per known event type after config
    /// overrides are layered over the builtins.
    Policies,
}

/// Wire a pipeline from config: SQLite vectors, configured embedder, and an
/// HTTP graph linker when graph linking is enabled.
async fn build_pipeline(cfg: &config::Config) -> Result<(Pipeline, sqlx::SqlitePool)> {
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;

    let vectors: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
    let client = embedder::create_client(&cfg.embedding)?;
    let generator =
        embedder::EmbeddingGenerator::new(client).with_batch_size(cfg.embedding.batch_size);

    let linker = if cfg.graph.enabled {
        let graph: Arc<dyn GraphStore> = Arc::new(HttpGraphStore::new(&cfg.graph)?);
        Some(EntityLinker::new(graph, RelationshipMap::builtin()))
    } else {
        None
    };

    let policies = PolicyStore::builtin()
        .with_overrides(cfg.policy.default.clone(), cfg.policy.overrides.clone());

    Ok((
        Pipeline::new(
            policies,
            EntityTypeMap::builtin(),
            generator,
            vectors,
            linker,
        ),
        pool,
    ))
}

/// Load one raw event from a JSON file.
fn load_event(path: &PathBuf) -> Result<RawEvent> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse event JSON: {}", path.display()))
}

/// Load raw events from a JSONL file, one event per non-empty line.
fn load_events(path: &PathBuf) -> Result<Vec<RawEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {}", path.display()))?;

    let mut events = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(line).with_context(|| {
            format!("Invalid event on line {} of {}", line_number + 1, path.display())
        })?;
        events.push(event);
    }
    Ok(events)
}

async fn run_vectorize(cfg: &config::Config, event_path: &PathBuf) -> Result<()> {
    let event = load_event(event_path)?;
    let (pipeline, pool) = build_pipeline(cfg).await?;

    let result = pipeline.process_event(&event).await;
    pool.close().await;

    if result.skipped {
        let reason = result
            .skip_reason
            .map(|r| r.as_str())
            .unwrap_or("unknown");
        println!("Skipped {} ({})", result.event_id, reason);
        return Ok(());
    }
    if !result.success {
        anyhow::bail!(
            "Failed to vectorize {}: {}",
            result.event_id,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    println!(
        "Vectorized {} — {} row{} written, {} entit{} linked{} ({} ms)",
        result.event_id,
        result.rows_written,
        if result.rows_written == 1 { "" } else { "s" },
        result.entities_linked,
        if result.entities_linked == 1 { "y" } else { "ies" },
        if result.used_placeholder {
            " [placeholder]"
        } else {
            ""
        },
        result.elapsed_ms
    );
    Ok(())
}

async fn run_backfill(
    cfg: &config::Config,
    events_path: &PathBuf,
    options: BackfillOptions,
    progress: Option<String>,
    skip_vectorized: bool,
) -> Result<bool> {
    let events = load_events(events_path)?;
    let (pipeline, pool) = build_pipeline(cfg).await?;
    let pipeline = pipeline.with_skip_vectorized(skip_vectorized);

    let mode = match progress {
        Some(mode) => ProgressMode::parse(&mode)?,
        None => ProgressMode::default_for_tty(),
    };

    let dry_run = options.dry_run;
    let job = BackfillJob::new(&pipeline, options).with_reporter(mode.reporter());
    let result = job.run(&events).await;
    pool.close().await;

    println!(
        "Backfill{}: {} matched, {} processed — {} ok, {} skipped, {} failed ({} ms)",
        if dry_run { " (dry run)" } else { "" },
        result.total_matched,
        result.processed,
        result.succeeded,
        result.skipped,
        result.failed,
        result.elapsed_ms
    );
    if result.has_more {
        match &result.final_cursor {
            Some(cursor) => println!("More events remain. Resume with: --cursor {}", cursor),
            None => println!("More events remain."),
        }
    }
    for error in result.errors.iter().take(10) {
        eprintln!("  {} failed: {}", error.event_id, error.message);
    }
    if result.errors.len() > 10 {
        eprintln!("  ... and {} more failures", result.errors.len() - 10);
    }

    Ok(result.failed > 0)
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    cfg: &config::Config,
    query: &str,
    user: Option<String>,
    event_types: Vec<String>,
    domains: Vec<String>,
    scope: Option<String>,
    view: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        anyhow::bail!(
            "Search requires an embedding provider. Set [embedding] provider to 'http' or 'stub'."
        );
    }

    let filter = SearchFilter {
        user_id: user,
        event_types,
        domains,
        privacy_scope: scope.as_deref().map(str::parse).transpose()?,
        view: view.as_deref().map(str::parse).transpose()?,
    };

    let client = embedder::create_client(&cfg.embedding)?;
    let vectors = client.embed(&[query.to_string()]).await?;
    let query_vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response for query"))?;

    let pool = db::connect(cfg).await?;
    let store = SqliteVectorStore::new(pool.clone());
    let limit = limit.unwrap_or(cfg.pipeline.search_limit);
    let hits = store.search(&query_vector, &filter, limit).await?;
    pool.close().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Results for: {}", query);
    println!();
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>3}. [{:.4}] {} ({}, {})",
            rank + 1,
            hit.score,
            hit.event_id,
            hit.event_type,
            hit.view.as_str()
        );
        println!("     {}", hit.snippet);
    }
    Ok(())
}

fn run_policies(cfg: &config::Config) {
    let policies = PolicyStore::builtin()
        .with_overrides(cfg.policy.default.clone(), cfg.policy.overrides.clone());

    println!("Extraction Policies");
    println!("===================");
    println!();
    for (event_type, policy) in policies.event_types() {
        println!(
            "  {:<36} {:<10} {}",
            event_type,
            policy.modality_hint.as_str(),
            if policy.enabled { "enabled" } else { "disabled" }
        );
        if !policy.embed_text_fields.is_empty() {
            println!("      text:     {}", policy.embed_text_fields.join(", "));
        }
        if !policy.embed_structured_fields.is_empty() {
            println!(
                "      struct:   {}",
                policy.embed_structured_fields.join(", ")
            );
        }
        if !policy.redact_fields.is_empty() {
            println!("      redact:   {}", policy.redact_fields.join(", "));
        }
        if !policy.entity_ref_paths.is_empty() {
            println!("      entities: {}", policy.entity_ref_paths.join(", "));
        }
    }
    println!();
    let default = policies.default_policy();
    println!(
        "  (default)                            {:<10} {}",
        default.modality_hint.as_str(),
        if default.enabled { "enabled" } else { "disabled" }
    );
    println!("      text:     {}", default.embed_text_fields.join(", "));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // QA needs no config: it runs entirely against in-memory backends.
    if let Commands::Qa = &cli.command {
        let harness = qa::QaHarness::new();
        let report = harness.run_suite(&qa::builtin_cases()).await;
        print!("{}", report.render());
        if !report.all_passed() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Vectorize { event } => {
            run_vectorize(&cfg, &event).await?;
        }
        Commands::Backfill {
            events,
            event_types,
            domains,
            since_ms,
            until_ms,
            max_events,
            batch_size,
            dry_run,
            skip_vectorized,
            cursor,
            progress,
        } => {
            let options = BackfillOptions {
                event_types,
                domains,
                start_timestamp_ms: since_ms,
                end_timestamp_ms: until_ms,
                max_events,
                batch_size: batch_size.unwrap_or(cfg.pipeline.backfill_batch_size),
                dry_run,
                resume_cursor: cursor,
            };
            let had_failures =
                run_backfill(&cfg, &events, options, progress, skip_vectorized).await?;
            if had_failures {
                std::process::exit(1);
            }
        }
        Commands::Coverage => {
            stats::run_coverage(&cfg).await?;
        }
        Commands::Search {
            query,
            user,
            event_types,
            domains,
            scope,
            view,
            limit,
        } => {
            run_search(&cfg, &query, user, event_types, domains, scope, view, limit).await?;
        }
        Commands::Qa => unreachable!(),
        Commands::Policies => {
            run_policies(&cfg);
        }
    }

    Ok(())
}
