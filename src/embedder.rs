//! Embedding generation for canonical feature documents.
//!
//! Defines the [`EmbeddingClient`] trait and concrete implementations:
//! - **[`DisabledClient`]** — returns errors; every event degrades to a
//!   placeholder row (coverage is still guaranteed).
//! - **[`HttpEmbeddingClient`]** — calls an OpenAI-shaped
//!   `POST {url}/embeddings` endpoint.
//! - **[`StubEmbeddingClient`]** — deterministic hash-derived vectors for
//!   QA and tests; no network.
//!
//! Each embed call is a single attempt under the configured timeout. There
//! is no retry loop in this core: a failed content embedding becomes a
//! placeholder row, and a failed entity embedding is logged and omitted.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

use crate::config::EmbeddingConfig;
use crate::models::{CanonicalFeatureDocument, EmbeddingView, GeneratedEmbedding};

/// Content text shorter than this fails with an insufficient-text error.
const MIN_CONTENT_LEN: usize = 5;
/// Inputs are truncated to this many characters before the service call.
const MAX_INPUT_LEN: usize = 8_000;

/// Trait for embedding backends. Implementations must be `Send + Sync`.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded on generated embeddings.
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Create the appropriate [`EmbeddingClient`] based on configuration.
pub fn create_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient {
            dims: config.dims,
        })),
        "http" => Ok(Arc::new(HttpEmbeddingClient::new(config)?)),
        "stub" => Ok(Arc::new(StubEmbeddingClient::new(config.dims))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Client ============

/// A no-op client that always returns errors.
///
/// With this client every event still produces exactly one placeholder row,
/// so coverage statistics remain meaningful before a real provider is
/// configured.
pub struct DisabledClient {
    dims: usize,
}

impl DisabledClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ HTTP Client ============

/// Client for an OpenAI-shaped embeddings endpoint:
/// `POST {url}/embeddings {model, input} -> {data: [{embedding: [...]}]}`.
/// Any non-2xx response is a hard failure for that call.
pub struct HttpEmbeddingClient {
    url: String,
    model: String,
    dims: usize,
    client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for http provider"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for http provider"))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embeddings_response(&json)
    }
}

/// Extract the `data[].embedding` arrays, in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Stub Client ============

/// Deterministic, offline client: vectors are derived from a SHA-256 hash
/// of the input text. Identical text always embeds identically, which is
/// what the QA harness and tests rely on.
pub struct StubEmbeddingClient {
    dims: usize,
}

impl StubEmbeddingClient {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dims)
            .map(|i| {
                let byte = digest[i % digest.len()];
                (byte as f32 / 127.5) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for StubEmbeddingClient {
    fn model_name(&self) -> &str {
        "stub-sha256"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ============ Generator ============

/// Renders CFD views to text and drives the embedding client.
pub struct EmbeddingGenerator {
    client: Arc<dyn EmbeddingClient>,
    batch_size: usize,
}

impl EmbeddingGenerator {
    pub fn new(client: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            client,
            batch_size: 16,
        }
    }

    /// Cap on concurrent embed calls in [`generate_batch`]. Comes from
    /// `embedding.batch_size` in config.
    ///
    /// [`generate_batch`]: EmbeddingGenerator::generate_batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dims(&self) -> usize {
        self.client.dims()
    }

    /// Generate all vector views for a CFD.
    ///
    /// Content-embedding failure propagates (the caller substitutes a
    /// placeholder); entity-embedding failure is logged and omitted, so an
    /// event yields one or two embeddings, never zero by this path.
    pub async fn generate_all(
        &self,
        cfd: &CanonicalFeatureDocument,
    ) -> Result<Vec<GeneratedEmbedding>> {
        let mut embeddings = vec![self.generate_content(cfd).await?];

        match self.generate_entity(cfd).await {
            Ok(Some(entity)) => embeddings.push(entity),
            Ok(None) => {}
            Err(e) => {
                eprintln!(
                    "Warning: entity embedding failed for {}: {}",
                    cfd.event_id, e
                );
            }
        }

        Ok(embeddings)
    }

    /// Generate the required content-view embedding.
    pub async fn generate_content(
        &self,
        cfd: &CanonicalFeatureDocument,
    ) -> Result<GeneratedEmbedding> {
        let text = content_text(cfd);
        if text.len() < MIN_CONTENT_LEN {
            bail!(
                "insufficient text for embedding ({} chars): {}",
                text.len(),
                cfd.event_id
            );
        }
        self.embed_view(cfd, EmbeddingView::Content, text).await
    }

    /// Generate the optional entity-view embedding. Returns `None` when the
    /// CFD has no entity references.
    pub async fn generate_entity(
        &self,
        cfd: &CanonicalFeatureDocument,
    ) -> Result<Option<GeneratedEmbedding>> {
        let Some(text) = entity_text(cfd) else {
            return Ok(None);
        };
        Ok(Some(self.embed_view(cfd, EmbeddingView::Entity, text).await?))
    }

    async fn embed_view(
        &self,
        cfd: &CanonicalFeatureDocument,
        view: EmbeddingView,
        text: String,
    ) -> Result<GeneratedEmbedding> {
        let text = truncate_chars(&text, MAX_INPUT_LEN);
        let vectors = self.client.embed(&[text.clone()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        Ok(GeneratedEmbedding {
            event_id: cfd.event_id.clone(),
            view,
            dimensions: vector.len(),
            vector,
            embedded_text: text,
            model: self.client.model_name().to_string(),
            generated_at: Utc::now(),
        })
    }

    /// Embed a batch of CFDs, one content+entity pair per document, issuing
    /// requests concurrently in waves of at most `batch_size` documents. A
    /// failure for one document is isolated and does not cancel its
    /// siblings; results come back in input order.
    pub async fn generate_batch(
        &self,
        cfds: &[CanonicalFeatureDocument],
    ) -> Vec<(String, Result<Vec<GeneratedEmbedding>>)> {
        let mut all = Vec::with_capacity(cfds.len());
        for chunk in cfds.chunks(self.batch_size) {
            let mut set = JoinSet::new();
            for (index, cfd) in chunk.iter().enumerate() {
                let client = Arc::clone(&self.client);
                let cfd = cfd.clone();
                set.spawn(async move {
                    let generator = EmbeddingGenerator::new(client);
                    let result = generator.generate_all(&cfd).await;
                    (index, cfd.event_id, result)
                });
            }

            let mut results: Vec<Option<(String, Result<Vec<GeneratedEmbedding>>)>> = Vec::new();
            results.resize_with(chunk.len(), || None);
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, event_id, result)) => results[index] = Some((event_id, result)),
                    Err(e) => eprintln!("Warning: embedding task panicked: {}", e),
                }
            }
            // A panicked task leaves its slot empty; report it as a failed
            // embedding so every input still gets an output in order.
            for (index, slot) in results.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = Some((
                        chunk[index].event_id.clone(),
                        Err(anyhow::anyhow!("embedding task failed")),
                    ));
                }
            }
            all.extend(results.into_iter().flatten());
        }
        all
    }
}

/// Content view text: `"[event_type] | summary | Keywords: ... | Categories: ..."`.
pub fn content_text(cfd: &CanonicalFeatureDocument) -> String {
    let mut parts = vec![format!("[{}]", cfd.event_type)];
    if !cfd.text_summary.is_empty() {
        parts.push(cfd.text_summary.clone());
    }
    if !cfd.keywords.is_empty() {
        parts.push(format!("Keywords: {}", cfd.keywords.join(",")));
    }
    if !cfd.facets.categories.is_empty() {
        let categories: Vec<String> = cfd
            .facets
            .categories
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        parts.push(format!("Categories: {}", categories.join(",")));
    }
    parts.join(" | ")
}

/// Entity view text: `"Entities: type:id, ..."`; `None` when no refs.
pub fn entity_text(cfd: &CanonicalFeatureDocument) -> Option<String> {
    if cfd.entity_refs.is_empty() {
        return None;
    }
    let entities: Vec<String> = cfd
        .entity_refs
        .iter()
        .map(|r| format!("{}:{}", r.entity_type, r.id))
        .collect();
    Some(format!("Entities: {}", entities.join(", ")))
}

/// Truncate to a maximum number of characters without splitting a char.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => s[..byte_index].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfd::build_cfd;
    use crate::models::{PrivacyScope, RawEvent};
    use crate::policy::{EntityTypeMap, PolicyStore};
    use serde_json::json;

    fn cfd_for(event_type: &str, payload: serde_json::Value) -> CanonicalFeatureDocument {
        let event = RawEvent {
            event_id: "evt_1".to_string(),
            trace_id: String::new(),
            user_id: "u_1".to_string(),
            event_type: event_type.to_string(),
            source_app: String::new(),
            domain: String::new(),
            timestamp_ms: 0,
            received_at_ms: 0,
            privacy_scope: PrivacyScope::Private,
            consent_version: String::new(),
            payload,
            blob_refs: Vec::new(),
        };
        build_cfd(&event, &PolicyStore::builtin(), &EntityTypeMap::builtin())
    }

    #[test]
    fn content_text_format() {
        let cfd = cfd_for(
            "finance.transaction_created",
            json!({
                "merchant": "Coffee Shop",
                "merchantId": "m_1",
                "category": "food_and_drink"
            }),
        );
        let text = content_text(&cfd);
        assert!(text.starts_with("[finance.transaction_created] | Coffee Shop"));
        assert!(text.contains("Keywords: coffee,shop"));
        assert!(text.contains("Categories: category:food_and_drink"));
    }

    #[test]
    fn entity_text_lists_refs() {
        let cfd = cfd_for(
            "finance.transaction_created",
            json!({"merchant": "Coffee Shop", "merchantId": "m_1"}),
        );
        assert_eq!(entity_text(&cfd), Some("Entities: merchant:m_1".to_string()));

        let bare = cfd_for("browser.visit", json!({"title": "docs"}));
        assert_eq!(entity_text(&bare), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "日本語テキスト";
        assert_eq!(truncate_chars(s, 3), "日本語");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[tokio::test]
    async fn stub_client_is_deterministic() {
        let client = StubEmbeddingClient::new(16);
        let a = client.embed(&["hello".to_string()]).await.unwrap();
        let b = client.embed(&["hello".to_string()]).await.unwrap();
        let c = client.embed(&["other".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn generate_all_yields_content_and_entity_views() {
        let generator = EmbeddingGenerator::new(Arc::new(StubEmbeddingClient::new(8)));
        let cfd = cfd_for(
            "finance.transaction_created",
            json!({"merchant": "Coffee Shop", "merchantId": "m_1"}),
        );
        let embeddings = generator.generate_all(&cfd).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].view, EmbeddingView::Content);
        assert_eq!(embeddings[1].view, EmbeddingView::Entity);
        assert!(embeddings.iter().all(|e| !e.is_placeholder()));
    }

    #[tokio::test]
    async fn disabled_client_fails_content_embedding() {
        let generator = EmbeddingGenerator::new(Arc::new(DisabledClient::new(8)));
        let cfd = cfd_for("browser.visit", json!({"title": "docs"}));
        assert!(generator.generate_content(&cfd).await.is_err());
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let generator = EmbeddingGenerator::new(Arc::new(StubEmbeddingClient::new(8)));
        let cfds: Vec<_> = (0..5)
            .map(|i| {
                let mut cfd = cfd_for("browser.visit", json!({"title": "docs"}));
                cfd.event_id = format!("evt_{}", i);
                cfd
            })
            .collect();
        let results = generator.generate_batch(&cfds).await;
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["evt_0", "evt_1", "evt_2", "evt_3", "evt_4"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    /// Counts in-flight embed calls to observe the concurrency ceiling.
    struct TrackingClient {
        dims: usize,
        current: Arc<std::sync::atomic::AtomicUsize>,
        max_seen: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingClient for TrackingClient {
        fn model_name(&self) -> &str {
            "tracking"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            use std::sync::atomic::Ordering;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    #[tokio::test]
    async fn batch_concurrency_is_bounded_by_batch_size() {
        let current = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let client = TrackingClient {
            dims: 4,
            current: current.clone(),
            max_seen: max_seen.clone(),
        };

        let generator = EmbeddingGenerator::new(Arc::new(client)).with_batch_size(2);
        let cfds: Vec<_> = (0..6)
            .map(|i| {
                let mut cfd = cfd_for("browser.visit", json!({"title": "docs page"}));
                cfd.event_id = format!("evt_{}", i);
                cfd
            })
            .collect();

        let results = generator.generate_batch(&cfds).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(
            max_seen.load(std::sync::atomic::Ordering::SeqCst) <= 2,
            "in-flight embed calls exceeded the batch size"
        );
    }
}
