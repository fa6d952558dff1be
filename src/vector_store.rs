//! Vector row persistence and similarity search.
//!
//! The [`VectorStore`] trait is the pipeline's storage seam: the SQLite
//! implementation backs the CLI, and the in-memory implementation backs the
//! QA harness and tests. Writes are conditional inserts keyed on
//! `(event_id, view)` — a duplicate key is a skip, never an error — which
//! makes the at-most-once guarantee hold even when two workers race past
//! the `has_vector` probe.
//!
//! Vectors are stored as little-endian f32 BLOBs; similarity search is
//! brute-force cosine over the metadata-filtered candidate set.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{EmbeddingView, PrivacyScope, VectorEventRow, PLACEHOLDER_MODEL};

/// Outcome of a row batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub skipped: usize,
}

/// Coverage summary over the whole store.
#[derive(Debug, Clone, Default)]
pub struct CoverageStats {
    pub total_rows: i64,
    /// Distinct events with at least one vector row.
    pub covered_events: i64,
    pub placeholder_rows: i64,
    /// Distinct covered events per event type, descending.
    pub by_event_type: Vec<(String, i64)>,
}

/// Metadata predicate for similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub user_id: Option<String>,
    pub event_types: Vec<String>,
    pub domains: Vec<String>,
    pub privacy_scope: Option<PrivacyScope>,
    pub view: Option<EmbeddingView>,
}

/// A scored similarity-search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub event_id: String,
    pub view: EmbeddingView,
    pub event_type: String,
    pub domain: String,
    pub timestamp_ms: i64,
    pub score: f32,
    pub snippet: String,
}

/// Abstract vector storage backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotency probe: does any vector row exist for this event?
    async fn has_vector(&self, event_id: &str) -> Result<bool>;

    /// Insert rows that do not already exist. Existing `(event_id, view)`
    /// keys are counted as skipped.
    async fn write_rows(&self, rows: &[VectorEventRow]) -> Result<WriteOutcome>;

    /// Aggregate coverage statistics.
    async fn coverage_stats(&self) -> Result<CoverageStats>;

    /// Cosine similarity search over rows matching the filter. Placeholder
    /// rows are excluded — their zero vectors carry no signal.
    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: i64,
    ) -> Result<Vec<SearchHit>>;
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

fn matches_filter(row: &VectorEventRow, filter: &SearchFilter) -> bool {
    if let Some(user_id) = &filter.user_id {
        if &row.user_id != user_id {
            return false;
        }
    }
    if !filter.event_types.is_empty() && !filter.event_types.contains(&row.event_type) {
        return false;
    }
    if !filter.domains.is_empty() && !filter.domains.contains(&row.domain) {
        return false;
    }
    if let Some(scope) = filter.privacy_scope {
        if row.privacy_scope != scope {
            return false;
        }
    }
    if let Some(view) = filter.view {
        if row.view != view {
            return false;
        }
    }
    true
}

fn snippet_of(text: &str) -> String {
    const SNIPPET_LEN: usize = 160;
    match text.char_indices().nth(SNIPPET_LEN) {
        Some((byte_index, _)) => format!("{}…", &text[..byte_index]),
        None => text.to_string(),
    }
}

// ============ SQLite Store ============

/// SQLite-backed vector store (table `vector_events`, see `migrate`).
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn has_vector(&self, event_id: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_events WHERE event_id = ?")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn write_rows(&self, rows: &[VectorEventRow]) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome::default();
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO vector_events
                    (event_id, view, user_id, event_type, domain, timestamp_ms,
                     privacy_scope, dedupe_key, vector, embedded_text, model,
                     dimensions, generated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(event_id, view) DO NOTHING
                "#,
            )
            .bind(&row.event_id)
            .bind(row.view.as_str())
            .bind(&row.user_id)
            .bind(&row.event_type)
            .bind(&row.domain)
            .bind(row.timestamp_ms)
            .bind(row.privacy_scope.as_str())
            .bind(&row.dedupe_key)
            .bind(vec_to_blob(&row.vector))
            .bind(&row.embedded_text)
            .bind(&row.model)
            .bind(row.dimensions as i64)
            .bind(row.generated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.written += 1;
            } else {
                outcome.skipped += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn coverage_stats(&self) -> Result<CoverageStats> {
        let total_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_events")
            .fetch_one(&self.pool)
            .await?;
        let covered_events: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT event_id) FROM vector_events")
                .fetch_one(&self.pool)
                .await?;
        let placeholder_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_events WHERE model = ?")
                .bind(PLACEHOLDER_MODEL)
                .fetch_one(&self.pool)
                .await?;

        let type_rows = sqlx::query(
            r#"
            SELECT event_type, COUNT(DISTINCT event_id) AS events
            FROM vector_events
            GROUP BY event_type
            ORDER BY events DESC, event_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_event_type = type_rows
            .iter()
            .map(|row| (row.get::<String, _>("event_type"), row.get::<i64, _>("events")))
            .collect();

        Ok(CoverageStats {
            total_rows,
            covered_events,
            placeholder_rows,
            by_event_type,
        })
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        // Metadata filtering happens in SQL; scoring happens in-process.
        let mut sql = String::from(
            "SELECT event_id, view, event_type, domain, timestamp_ms, vector, embedded_text \
             FROM vector_events WHERE model != ?",
        );
        let mut binds: Vec<String> = vec![PLACEHOLDER_MODEL.to_string()];

        if let Some(user_id) = &filter.user_id {
            sql.push_str(" AND user_id = ?");
            binds.push(user_id.clone());
        }
        if !filter.event_types.is_empty() {
            sql.push_str(&format!(
                " AND event_type IN ({})",
                vec!["?"; filter.event_types.len()].join(", ")
            ));
            binds.extend(filter.event_types.iter().cloned());
        }
        if !filter.domains.is_empty() {
            sql.push_str(&format!(
                " AND domain IN ({})",
                vec!["?"; filter.domains.len()].join(", ")
            ));
            binds.extend(filter.domains.iter().cloned());
        }
        if let Some(scope) = filter.privacy_scope {
            sql.push_str(" AND privacy_scope = ?");
            binds.push(scope.as_str().to_string());
        }
        if let Some(view) = filter.view {
            sql.push_str(" AND view = ?");
            binds.push(view.as_str().to_string());
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter_map(|row| {
                let candidate = blob_to_vec(row.get::<Vec<u8>, _>("vector").as_slice());
                let view: EmbeddingView = row.get::<String, _>("view").parse().ok()?;
                Some(SearchHit {
                    event_id: row.get("event_id"),
                    view,
                    event_type: row.get("event_type"),
                    domain: row.get("domain"),
                    timestamp_ms: row.get("timestamp_ms"),
                    score: cosine_similarity(vector, &candidate),
                    snippet: snippet_of(&row.get::<String, _>("embedded_text")),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

// ============ In-Memory Store ============

/// In-memory store for the QA harness and tests. Same insert-if-absent
/// semantics as the SQLite store.
pub struct MemoryVectorStore {
    rows: RwLock<HashMap<(String, EmbeddingView), VectorEventRow>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// All stored rows, unordered. Test/QA convenience.
    pub fn rows(&self) -> Vec<VectorEventRow> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn has_vector(&self, event_id: &str) -> Result<bool> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.keys().any(|(id, _)| id == event_id))
    }

    async fn write_rows(&self, rows: &[VectorEventRow]) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome::default();
        let mut stored = self.rows.write().unwrap_or_else(|e| e.into_inner());
        for row in rows {
            let key = (row.event_id.clone(), row.view);
            if stored.contains_key(&key) {
                outcome.skipped += 1;
            } else {
                stored.insert(key, row.clone());
                outcome.written += 1;
            }
        }
        Ok(outcome)
    }

    async fn coverage_stats(&self) -> Result<CoverageStats> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());

        let mut events: HashMap<&str, ()> = HashMap::new();
        let mut by_type: HashMap<String, std::collections::HashSet<&str>> = HashMap::new();
        let mut placeholder_rows = 0i64;

        for row in rows.values() {
            events.insert(&row.event_id, ());
            by_type
                .entry(row.event_type.clone())
                .or_default()
                .insert(&row.event_id);
            if row.model == PLACEHOLDER_MODEL {
                placeholder_rows += 1;
            }
        }

        let mut by_event_type: Vec<(String, i64)> = by_type
            .into_iter()
            .map(|(event_type, ids)| (event_type, ids.len() as i64))
            .collect();
        by_event_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(CoverageStats {
            total_rows: rows.len() as i64,
            covered_events: events.len() as i64,
            placeholder_rows,
            by_event_type,
        })
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<SearchHit> = rows
            .values()
            .filter(|row| row.model != PLACEHOLDER_MODEL && matches_filter(row, filter))
            .map(|row| SearchHit {
                event_id: row.event_id.clone(),
                view: row.view,
                event_type: row.event_type.clone(),
                domain: row.domain.clone(),
                timestamp_ms: row.timestamp_ms,
                score: cosine_similarity(vector, &row.vector),
                snippet: snippet_of(&row.embedded_text),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}
