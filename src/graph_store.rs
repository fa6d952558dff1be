//! Graph store client: transactional batches of parameterized statements.
//!
//! The [`GraphStore`] trait is deliberately narrow — submit one ordered
//! batch, get one ordered list of per-statement outcomes back. Partial
//! failure is the store's documented behavior: statements that applied stay
//! applied, and the caller decides what a failed statement means (the
//! entity linker records it and moves on).

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GraphConfig;

/// One parameterized graph statement.
#[derive(Debug, Clone)]
pub struct GraphStatement {
    pub query: String,
    pub parameters: serde_json::Value,
}

/// Result of one statement within a batch, in submission order.
#[derive(Debug, Clone)]
pub struct StatementOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl StatementOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
        }
    }
}

/// Abstract graph storage backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute a batch of statements in one transaction, returning one
    /// outcome per statement in submission order. An `Err` means the batch
    /// could not be submitted at all (transport failure).
    async fn execute(&self, statements: &[GraphStatement]) -> Result<Vec<StatementOutcome>>;
}

// ============ HTTP Store ============

/// Client for a Neo4j-style transactional HTTP endpoint:
/// `POST {url}/db/{database}/tx/commit` with a `statements` array. Errors
/// in the response carry a `statement` index so outcomes can be attributed
/// per statement.
pub struct HttpGraphStore {
    url: String,
    database: String,
    client: reqwest::Client,
}

impl HttpGraphStore {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("graph.url required when graph is enabled"))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            client,
        })
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn execute(&self, statements: &[GraphStatement]) -> Result<Vec<StatementOutcome>> {
        let body = serde_json::json!({
            "statements": statements
                .iter()
                .map(|s| serde_json::json!({
                    "statement": s.query,
                    "parameters": s.parameters,
                }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!("{}/db/{}/tx/commit", self.url, self.database))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Graph API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(parse_outcomes(&json, statements.len()))
    }
}

/// Map a transactional response onto ordered per-statement outcomes.
///
/// Errors with a `statement` index mark that statement failed; an error
/// without one poisons the whole batch (the store gave no attribution).
fn parse_outcomes(json: &serde_json::Value, statement_count: usize) -> Vec<StatementOutcome> {
    let mut outcomes = vec![StatementOutcome::ok(); statement_count];

    let Some(errors) = json.get("errors").and_then(|e| e.as_array()) else {
        return outcomes;
    };

    for error in errors {
        let message = format!(
            "{}: {}",
            error.get("code").and_then(|c| c.as_str()).unwrap_or("unknown"),
            error.get("message").and_then(|m| m.as_str()).unwrap_or(""),
        );
        match error
            .get("statement")
            .and_then(|s| s.as_u64())
            .map(|s| s as usize)
        {
            Some(index) if index < statement_count => {
                outcomes[index] = StatementOutcome::failed(message);
            }
            _ => {
                for outcome in outcomes.iter_mut() {
                    if outcome.success {
                        *outcome = StatementOutcome::failed(message.clone());
                    }
                }
            }
        }
    }

    outcomes
}

// ============ In-Memory Store ============

/// In-memory graph store for the QA harness and tests. Records every
/// executed statement; can be told to fail statements containing a marker
/// substring to exercise partial-failure paths.
pub struct MemoryGraphStore {
    statements: RwLock<Vec<GraphStatement>>,
    fail_containing: Option<String>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            statements: RwLock::new(Vec::new()),
            fail_containing: None,
        }
    }

    /// Fail any statement whose query contains `marker`.
    pub fn failing_on(marker: &str) -> Self {
        Self {
            statements: RwLock::new(Vec::new()),
            fail_containing: Some(marker.to_string()),
        }
    }

    /// All statements executed so far, in order.
    pub fn statements(&self) -> Vec<GraphStatement> {
        self.statements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn execute(&self, statements: &[GraphStatement]) -> Result<Vec<StatementOutcome>> {
        let mut stored = self.statements.write().unwrap_or_else(|e| e.into_inner());
        let mut outcomes = Vec::with_capacity(statements.len());

        for statement in statements {
            let fails = self
                .fail_containing
                .as_ref()
                .is_some_and(|marker| statement.query.contains(marker));
            if fails {
                outcomes.push(StatementOutcome::failed(
                    "Neo.ClientError.Statement.Simulated: rejected".to_string(),
                ));
            } else {
                stored.push(statement.clone());
                outcomes.push(StatementOutcome::ok());
            }
        }

        Ok(outcomes)
    }
}
