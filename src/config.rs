use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::policy::ExtractionPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `http`, or `stub`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on concurrent embed calls when processing a batch of
    /// documents.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            url: None,
            model: None,
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    16
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Entity linking is skipped entirely when disabled.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_graph_database")]
    pub database: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            database: default_graph_database(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_graph_database() -> String {
    "neo4j".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Backfill batch size (events per batch; batches run one at a time).
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch_size: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backfill_batch_size: default_backfill_batch(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_backfill_batch() -> usize {
    50
}
fn default_search_limit() -> i64 {
    12
}

/// Policy section: optional replacement default plus per-event-type
/// overrides layered over the builtins.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub default: Option<ExtractionPolicy>,
    #[serde(default)]
    pub overrides: BTreeMap<String, ExtractionPolicy>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "stub" => {}
        "http" => {
            if config.embedding.url.is_none() {
                anyhow::bail!("embedding.url must be set when provider is 'http'");
            }
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, http, or stub.",
            other
        ),
    }

    if config.graph.enabled && config.graph.url.is_none() {
        anyhow::bail!("graph.url must be set when graph.enabled is true");
    }

    if config.pipeline.backfill_batch_size == 0 {
        anyhow::bail!("pipeline.backfill_batch_size must be > 0");
    }

    Ok(config)
}
