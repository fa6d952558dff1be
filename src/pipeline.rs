//! Pipeline orchestration: one event from raw payload to vector rows and
//! graph links.
//!
//! Per-event flow: policy gate → CFD build → idempotency gate → embedding
//! (placeholder on failure) → row write → best-effort entity linking. The
//! only fatal per-event outcome is a storage failure; everything else
//! degrades so that every enabled event ends up with at least one vector
//! row.
//!
//! Batch processing stages events in input order, embeds the pending CFDs
//! concurrently (bounded by the generator's batch size), then writes and
//! links strictly in input order. Embedding is the only concurrent stage.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::embedder::EmbeddingGenerator;
use crate::linker::EntityLinker;
use crate::models::{
    CanonicalFeatureDocument, GeneratedEmbedding, RawEvent, VectorEventRow,
};
use crate::policy::{EntityTypeMap, PolicyStore};
use crate::vector_store::VectorStore;

/// Why an event was skipped. Skips are successes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PolicyDisabled,
    AlreadyVectorized,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::PolicyDisabled => "policy-disabled",
            SkipReason::AlreadyVectorized => "already-vectorized",
        }
    }
}

/// Outcome of processing one event.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub event_id: String,
    pub success: bool,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
    pub embeddings_generated: usize,
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub entities_linked: usize,
    pub used_placeholder: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// Carried for diagnostics; present whenever a CFD was built.
    pub cfd: Option<CanonicalFeatureDocument>,
}

impl PipelineResult {
    fn start(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            success: false,
            skipped: false,
            skip_reason: None,
            embeddings_generated: 0,
            rows_written: 0,
            rows_skipped: 0,
            entities_linked: 0,
            used_placeholder: false,
            error: None,
            elapsed_ms: 0,
            cfd: None,
        }
    }

    fn finish_skip(
        mut self,
        reason: SkipReason,
        cfd: Option<CanonicalFeatureDocument>,
        started: Instant,
    ) -> Self {
        self.success = true;
        self.skipped = true;
        self.skip_reason = Some(reason);
        self.cfd = cfd;
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }

    fn finish_error(
        mut self,
        error: String,
        cfd: CanonicalFeatureDocument,
        started: Instant,
    ) -> Self {
        self.error = Some(error);
        self.cfd = Some(cfd);
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Aggregate counts for a processed batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<PipelineResult>,
}

impl BatchSummary {
    fn push(&mut self, result: PipelineResult) {
        self.processed += 1;
        if result.skipped {
            self.skipped += 1;
        } else if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

pub struct Pipeline {
    policies: PolicyStore,
    entity_types: EntityTypeMap,
    generator: EmbeddingGenerator,
    vectors: Arc<dyn VectorStore>,
    linker: Option<EntityLinker>,
    skip_vectorized: bool,
}

impl Pipeline {
    pub fn new(
        policies: PolicyStore,
        entity_types: EntityTypeMap,
        generator: EmbeddingGenerator,
        vectors: Arc<dyn VectorStore>,
        linker: Option<EntityLinker>,
    ) -> Self {
        Self {
            policies,
            entity_types,
            generator,
            vectors,
            linker,
            skip_vectorized: true,
        }
    }

    /// Whether already-vectorized events are skipped (default true). With
    /// `false` the `has_vector` probe is bypassed and embeddings are
    /// recomputed, but the row-level insert-if-absent guard still refuses
    /// duplicate `(event_id, view)` rows, so at-most-once storage holds
    /// either way.
    pub fn with_skip_vectorized(mut self, skip_vectorized: bool) -> Self {
        self.skip_vectorized = skip_vectorized;
        self
    }

    /// Process one event end to end. Never returns an error: failures are
    /// reported in the result so batch callers can aggregate them.
    pub async fn process_event(&self, event: &RawEvent) -> PipelineResult {
        let started = Instant::now();
        let result = PipelineResult::start(&event.event_id);

        if !self.policies.resolve(&event.event_type).enabled {
            return result.finish_skip(SkipReason::PolicyDisabled, None, started);
        }

        let cfd = crate::cfd::build_cfd(event, &self.policies, &self.entity_types);

        if self.skip_vectorized {
            match self.vectors.has_vector(&event.event_id).await {
                Ok(true) => {
                    return result.finish_skip(SkipReason::AlreadyVectorized, Some(cfd), started);
                }
                Ok(false) => {}
                Err(e) => {
                    return result.finish_error(
                        format!("vector store probe failed: {}", e),
                        cfd,
                        started,
                    );
                }
            }
        }

        let embeddings = self.generator.generate_all(&cfd).await;
        self.finish_event(result, cfd, embeddings, started).await
    }

    /// Shared tail of event processing: placeholder substitution, row
    /// write, best-effort linking.
    async fn finish_event(
        &self,
        mut result: PipelineResult,
        cfd: CanonicalFeatureDocument,
        embeddings: Result<Vec<GeneratedEmbedding>>,
        started: Instant,
    ) -> PipelineResult {
        // Embedding failure never fails the event: substitute a single
        // placeholder row so coverage still reaches 100%.
        let embeddings: Vec<GeneratedEmbedding> = match embeddings {
            Ok(embeddings) => embeddings,
            Err(e) => {
                result.used_placeholder = true;
                vec![GeneratedEmbedding::placeholder(
                    &cfd.event_id,
                    self.generator.dims(),
                    &e.to_string(),
                )]
            }
        };
        result.embeddings_generated = embeddings.len();

        let rows: Vec<VectorEventRow> = embeddings
            .iter()
            .map(|emb| VectorEventRow::from_parts(&cfd, emb))
            .collect();

        match self.vectors.write_rows(&rows).await {
            Ok(outcome) => {
                result.rows_written = outcome.written;
                result.rows_skipped = outcome.skipped;
            }
            Err(e) => {
                return result.finish_error(format!("vector write failed: {}", e), cfd, started);
            }
        }

        // Entity linking is best-effort: failures are logged, not fatal.
        if let Some(linker) = &self.linker {
            if !cfd.entity_refs.is_empty() {
                match linker.link_entities(&cfd).await {
                    Ok(linking) => {
                        result.entities_linked = linking.relationships_created;
                        for error in &linking.errors {
                            eprintln!(
                                "Warning: entity link failed for {}: {}",
                                cfd.event_id, error
                            );
                        }
                    }
                    Err(e) => {
                        eprintln!("Warning: entity linking failed for {}: {}", cfd.event_id, e);
                    }
                }
            }
        }

        result.success = true;
        result.cfd = Some(cfd);
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    /// Process a batch: gates and CFD builds run in input order, then one
    /// concurrent embedding pass over the pending documents, then writes
    /// and links again in input order.
    ///
    /// An event id repeated within the batch counts as an idempotency skip,
    /// the same outcome a prior-run duplicate gets.
    pub async fn process_batch(&self, events: &[RawEvent]) -> BatchSummary {
        let mut slots: Vec<Option<PipelineResult>> = Vec::new();
        slots.resize_with(events.len(), || None);

        let mut pending: Vec<(usize, CanonicalFeatureDocument, Instant)> = Vec::new();
        let mut staged_ids: HashSet<String> = HashSet::new();

        for (index, event) in events.iter().enumerate() {
            let started = Instant::now();
            let result = PipelineResult::start(&event.event_id);

            if !self.policies.resolve(&event.event_type).enabled {
                slots[index] =
                    Some(result.finish_skip(SkipReason::PolicyDisabled, None, started));
                continue;
            }

            let cfd = crate::cfd::build_cfd(event, &self.policies, &self.entity_types);

            if self.skip_vectorized {
                if staged_ids.contains(&event.event_id) {
                    slots[index] = Some(result.finish_skip(
                        SkipReason::AlreadyVectorized,
                        Some(cfd),
                        started,
                    ));
                    continue;
                }
                match self.vectors.has_vector(&event.event_id).await {
                    Ok(true) => {
                        slots[index] = Some(result.finish_skip(
                            SkipReason::AlreadyVectorized,
                            Some(cfd),
                            started,
                        ));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        slots[index] = Some(result.finish_error(
                            format!("vector store probe failed: {}", e),
                            cfd,
                            started,
                        ));
                        continue;
                    }
                }
                staged_ids.insert(event.event_id.clone());
            }

            pending.push((index, cfd, started));
        }

        if !pending.is_empty() {
            let cfds: Vec<CanonicalFeatureDocument> =
                pending.iter().map(|(_, cfd, _)| cfd.clone()).collect();
            let embedded = self.generator.generate_batch(&cfds).await;

            for ((index, cfd, started), (_, embeddings)) in
                pending.into_iter().zip(embedded.into_iter())
            {
                let result = PipelineResult::start(&cfd.event_id);
                slots[index] = Some(self.finish_event(result, cfd, embeddings, started).await);
            }
        }

        let mut summary = BatchSummary::default();
        for result in slots.into_iter().flatten() {
            summary.push(result);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{DisabledClient, StubEmbeddingClient};
    use crate::graph_store::MemoryGraphStore;
    use crate::models::PrivacyScope;
    use crate::policy::{ExtractionPolicy, RelationshipMap};
    use crate::vector_store::MemoryVectorStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn event(event_id: &str, event_type: &str, payload: serde_json::Value) -> RawEvent {
        RawEvent {
            event_id: event_id.to_string(),
            trace_id: String::new(),
            user_id: "u_1".to_string(),
            event_type: event_type.to_string(),
            source_app: "test-app".to_string(),
            domain: String::new(),
            timestamp_ms: 1_700_000_000_000,
            received_at_ms: 0,
            privacy_scope: PrivacyScope::Private,
            consent_version: "v1".to_string(),
            payload,
            blob_refs: Vec::new(),
        }
    }

    fn pipeline_with(
        vectors: Arc<MemoryVectorStore>,
        stub: bool,
        graph: Option<Arc<MemoryGraphStore>>,
    ) -> Pipeline {
        let client: Arc<dyn crate::embedder::EmbeddingClient> = if stub {
            Arc::new(StubEmbeddingClient::new(8))
        } else {
            Arc::new(DisabledClient::new(8))
        };
        let linker = graph.map(|g| {
            EntityLinker::new(g as Arc<dyn crate::graph_store::GraphStore>, RelationshipMap::builtin())
        });
        Pipeline::new(
            PolicyStore::builtin(),
            EntityTypeMap::builtin(),
            EmbeddingGenerator::new(client),
            vectors,
            linker,
        )
    }

    #[tokio::test]
    async fn successful_event_writes_both_views_and_links() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let graph = Arc::new(MemoryGraphStore::new());
        let pipeline = pipeline_with(vectors.clone(), true, Some(graph));

        let result = pipeline
            .process_event(&event(
                "evt_1",
                "finance.transaction_created",
                json!({"merchant": "Coffee Shop", "merchantId": "m_1", "amount": 42.5}),
            ))
            .await;

        assert!(result.success);
        assert!(!result.skipped);
        assert_eq!(result.embeddings_generated, 2);
        assert_eq!(result.rows_written, 2);
        assert_eq!(result.entities_linked, 1);
        assert!(!result.used_placeholder);
        assert_eq!(vectors.rows().len(), 2);
    }

    #[tokio::test]
    async fn second_run_is_idempotent_skip() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(vectors.clone(), true, None);
        let evt = event("evt_1", "browser.visit", json!({"title": "Rust docs"}));

        let first = pipeline.process_event(&evt).await;
        assert!(first.success && !first.skipped);

        let second = pipeline.process_event(&evt).await;
        assert!(second.success);
        assert!(second.skipped);
        assert_eq!(second.skip_reason, Some(SkipReason::AlreadyVectorized));
        assert!(second.cfd.is_some());
        // Still exactly one row per view.
        assert_eq!(vectors.rows().len(), 1);
    }

    #[tokio::test]
    async fn skip_vectorized_off_reembeds_without_duplicate_rows() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(vectors.clone(), true, None).with_skip_vectorized(false);
        let evt = event("evt_1", "browser.visit", json!({"title": "Rust docs"}));

        let first = pipeline.process_event(&evt).await;
        assert_eq!(first.rows_written, 1);

        // Second pass regenerates the embedding; the row-level guard
        // refuses the duplicate key.
        let second = pipeline.process_event(&evt).await;
        assert!(second.success);
        assert!(!second.skipped);
        assert_eq!(second.embeddings_generated, 1);
        assert_eq!(second.rows_written, 0);
        assert_eq!(second.rows_skipped, 1);
        assert_eq!(vectors.rows().len(), 1);
    }

    #[tokio::test]
    async fn disabled_policy_skips_without_building() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "noise.heartbeat".to_string(),
            ExtractionPolicy {
                enabled: false,
                ..ExtractionPolicy::default()
            },
        );
        let pipeline = Pipeline::new(
            PolicyStore::builtin().with_overrides(None, overrides),
            EntityTypeMap::builtin(),
            EmbeddingGenerator::new(Arc::new(StubEmbeddingClient::new(8))),
            vectors.clone(),
            None,
        );

        let result = pipeline
            .process_event(&event("evt_1", "noise.heartbeat", json!({})))
            .await;
        assert!(result.success);
        assert_eq!(result.skip_reason, Some(SkipReason::PolicyDisabled));
        assert!(result.cfd.is_none());
        assert!(vectors.rows().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_placeholder() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(vectors.clone(), false, None);

        let result = pipeline
            .process_event(&event("evt_1", "browser.visit", json!({"title": "Rust docs"})))
            .await;

        assert!(result.success);
        assert!(result.used_placeholder);
        assert_eq!(result.rows_written, 1);
        let rows = vectors.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model, crate::models::PLACEHOLDER_MODEL);
        assert!(rows[0].vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn batch_counts_are_aggregated() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(vectors, true, None);

        let events = vec![
            event("evt_1", "browser.visit", json!({"title": "one"})),
            event("evt_1", "browser.visit", json!({"title": "one"})),
            event("evt_2", "browser.visit", json!({"title": "two"})),
        ];
        // The repeated id becomes an idempotency skip within the batch.
        let summary = pipeline.process_batch(&events).await;
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        // Results stay in input order.
        assert_eq!(
            summary.results[1].skip_reason,
            Some(SkipReason::AlreadyVectorized)
        );
        assert_eq!(summary.results[2].event_id, "evt_2");
    }

    #[tokio::test]
    async fn batch_embedding_failure_degrades_each_event() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(vectors.clone(), false, None);

        let events = vec![
            event("evt_1", "browser.visit", json!({"title": "one page"})),
            event("evt_2", "browser.visit", json!({"title": "two page"})),
        ];
        let summary = pipeline.process_batch(&events).await;
        assert_eq!(summary.succeeded, 2);
        assert!(summary.results.iter().all(|r| r.used_placeholder));
        assert_eq!(vectors.rows().len(), 2);
    }
}
