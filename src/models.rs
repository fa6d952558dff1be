//! Core data models used throughout the vectorization pipeline.
//!
//! These types represent the raw events, canonical feature documents, and
//! vector rows that flow from ingestion through embedding to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility scope attached to an event by its source application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyScope {
    Private,
    Social,
    Public,
}

impl PrivacyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyScope::Private => "private",
            PrivacyScope::Social => "social",
            PrivacyScope::Public => "public",
        }
    }
}

impl std::fmt::Display for PrivacyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrivacyScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(PrivacyScope::Private),
            "social" => Ok(PrivacyScope::Social),
            "public" => Ok(PrivacyScope::Public),
            other => anyhow::bail!("Unknown privacy scope: {}", other),
        }
    }
}

/// Raw event as produced by the external event store.
///
/// Immutable input to the pipeline; identified uniquely by `event_id`.
/// The payload is arbitrary nested JSON whose shape varies by source app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_id: String,
    #[serde(default)]
    pub trace_id: String,
    pub user_id: String,
    /// Dot-namespaced type, e.g. `finance.transaction_created`.
    pub event_type: String,
    #[serde(default)]
    pub source_app: String,
    /// First dot-segment of `event_type`; recomputed during CFD build.
    #[serde(default)]
    pub domain: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub received_at_ms: i64,
    #[serde(default = "default_scope")]
    pub privacy_scope: PrivacyScope,
    #[serde(default)]
    pub consent_version: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub blob_refs: Vec<String>,
}

fn default_scope() -> PrivacyScope {
    PrivacyScope::Private
}

/// Typed pointer from an event to another domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Inferred entity type (`merchant`, `contact`, `task`, ... or `entity`).
    pub entity_type: String,
    pub id: String,
    /// Payload path the reference was extracted from.
    pub source_path: String,
}

/// Typed facet buckets scanned out of the event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facets {
    pub amounts: Vec<(String, f64)>,
    pub categories: Vec<(String, String)>,
    /// Field name → ISO-8601 timestamp.
    pub timestamps: Vec<(String, String)>,
    pub counts: Vec<(String, i64)>,
}

impl Facets {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
            && self.categories.is_empty()
            && self.timestamps.is_empty()
            && self.counts.is_empty()
    }
}

/// Canonical Feature Document: the deterministic, policy-derived projection
/// of one raw event. Created fresh per event and never updated once
/// embedded; superseding an event requires a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFeatureDocument {
    pub event_id: String,
    pub event_type: String,
    pub timestamp_ms: i64,
    pub user_id: String,
    pub privacy_scope: PrivacyScope,
    pub consent_version: String,
    pub source_app: String,
    pub domain: String,
    pub entity_refs: Vec<EntityRef>,
    pub modality: String,
    /// Concatenated embeddable text; empty string for degenerate events.
    pub text_summary: String,
    pub keywords: Vec<String>,
    pub facets: Facets,
    pub source_refs: Vec<String>,
    /// `userId:eventType:eventId` — the at-most-once vectorization key.
    pub dedupe_key: String,
    pub trace_id: String,
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// Which projection of the CFD a vector encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingView {
    /// Text summary + keywords + category facets.
    Content,
    /// Entity references only.
    Entity,
}

impl EmbeddingView {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingView::Content => "content",
            EmbeddingView::Entity => "entity",
        }
    }
}

impl std::fmt::Display for EmbeddingView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingView {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(EmbeddingView::Content),
            "entity" => Ok(EmbeddingView::Entity),
            other => anyhow::bail!("Unknown embedding view: {}", other),
        }
    }
}

/// Model name recorded on placeholder embeddings.
pub const PLACEHOLDER_MODEL: &str = "placeholder";

/// One named vector view generated for a CFD.
#[derive(Debug, Clone)]
pub struct GeneratedEmbedding {
    pub event_id: String,
    pub view: EmbeddingView,
    pub vector: Vec<f32>,
    pub embedded_text: String,
    pub model: String,
    pub dimensions: usize,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedEmbedding {
    /// Zero-filled stand-in written when real embedding generation fails,
    /// so every event still gets a vector row. The failure reason is kept
    /// in `embedded_text` for diagnostics.
    pub fn placeholder(event_id: &str, dims: usize, reason: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            view: EmbeddingView::Content,
            vector: vec![0.0; dims],
            embedded_text: reason.to_string(),
            model: PLACEHOLDER_MODEL.to_string(),
            dimensions: dims,
            generated_at: Utc::now(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.model == PLACEHOLDER_MODEL
    }
}

/// Flattened CFD + embedding: the unit persisted to the vector store.
/// One row per `(event_id, view)`.
#[derive(Debug, Clone)]
pub struct VectorEventRow {
    pub event_id: String,
    pub view: EmbeddingView,
    pub user_id: String,
    pub event_type: String,
    pub domain: String,
    pub timestamp_ms: i64,
    pub privacy_scope: PrivacyScope,
    pub dedupe_key: String,
    pub vector: Vec<f32>,
    pub embedded_text: String,
    pub model: String,
    pub dimensions: usize,
    pub generated_at: DateTime<Utc>,
}

impl VectorEventRow {
    /// Join a CFD with one of its generated embeddings.
    pub fn from_parts(cfd: &CanonicalFeatureDocument, emb: &GeneratedEmbedding) -> Self {
        Self {
            event_id: cfd.event_id.clone(),
            view: emb.view,
            user_id: cfd.user_id.clone(),
            event_type: cfd.event_type.clone(),
            domain: cfd.domain.clone(),
            timestamp_ms: cfd.timestamp_ms,
            privacy_scope: cfd.privacy_scope,
            dedupe_key: cfd.dedupe_key.clone(),
            vector: emb.vector.clone(),
            embedded_text: emb.embedded_text.clone(),
            model: emb.model.clone(),
            dimensions: emb.dimensions,
            generated_at: emb.generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privacy_scope_roundtrip() {
        for scope in [
            PrivacyScope::Private,
            PrivacyScope::Social,
            PrivacyScope::Public,
        ] {
            let parsed: PrivacyScope = scope.as_str().parse().unwrap();
            assert_eq!(parsed, scope);
        }
        assert!("internal".parse::<PrivacyScope>().is_err());
    }

    #[test]
    fn raw_event_deserializes_with_defaults() {
        let event: RawEvent = serde_json::from_str(
            r#"{
                "eventId": "evt_1",
                "userId": "u_1",
                "eventType": "finance.transaction_created",
                "timestampMs": 1700000000000
            }"#,
        )
        .unwrap();
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.privacy_scope, PrivacyScope::Private);
        assert!(event.payload.is_null());
        assert!(event.blob_refs.is_empty());
    }

    #[test]
    fn placeholder_embedding_shape() {
        let emb = GeneratedEmbedding::placeholder("evt_1", 8, "embedding service unavailable");
        assert!(emb.is_placeholder());
        assert_eq!(emb.vector.len(), 8);
        assert!(emb.vector.iter().all(|v| *v == 0.0));
        assert_eq!(emb.embedded_text, "embedding service unavailable");
    }
}
