//! Extraction policies and static lookup tables.
//!
//! A policy tells the CFD builder which payload fields to embed as text,
//! which to fold into the structured fallback, which to redact, and which
//! carry entity references. One default policy applies to every event type
//! without an override. Policies are resolved at CFD-build time and never
//! mutated after load.
//!
//! The entity-type and relationship tables are immutable maps built at
//! startup and injected where needed, so per-tenant overrides can be layered
//! in without touching the builder or linker.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Modality hint carried on a policy. Only `structured` changes behavior in
/// this pipeline (it enables the structured-text fallback); the media hints
/// are carried through to the CFD for downstream extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalityHint {
    Text,
    Structured,
    Audio,
    Video,
    Image,
}

impl Default for ModalityHint {
    fn default() -> Self {
        ModalityHint::Text
    }
}

impl ModalityHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModalityHint::Text => "text",
            ModalityHint::Structured => "structured",
            ModalityHint::Audio => "audio",
            ModalityHint::Video => "video",
            ModalityHint::Image => "image",
        }
    }
}

/// Per-event-type extraction policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionPolicy {
    /// Payload paths whose string-coerced values form the text summary.
    #[serde(default)]
    pub embed_text_fields: Vec<String>,
    /// Payload paths folded into the structured-text fallback.
    #[serde(default)]
    pub embed_structured_fields: Vec<String>,
    /// Payload paths pruned before any extraction runs.
    #[serde(default)]
    pub redact_fields: Vec<String>,
    /// Payload paths holding entity references (string or string array).
    #[serde(default)]
    pub entity_ref_paths: Vec<String>,
    #[serde(default)]
    pub modality_hint: ModalityHint,
    /// Disabled policies skip CFD building entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            embed_text_fields: vec![
                "title".to_string(),
                "name".to_string(),
                "description".to_string(),
                "text".to_string(),
                "summary".to_string(),
            ],
            embed_structured_fields: Vec::new(),
            redact_fields: Vec::new(),
            entity_ref_paths: Vec::new(),
            modality_hint: ModalityHint::Text,
            enabled: true,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Policy lookup: a default policy plus per-event-type overrides.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    default: ExtractionPolicy,
    overrides: BTreeMap<String, ExtractionPolicy>,
}

impl PolicyStore {
    /// Built-in policies for the well-known event types. Config overrides
    /// merge over these.
    pub fn builtin() -> Self {
        let mut overrides = BTreeMap::new();

        overrides.insert(
            "finance.transaction_created".to_string(),
            ExtractionPolicy {
                embed_text_fields: strings(&["merchant", "description", "note"]),
                embed_structured_fields: strings(&["amount", "currency", "category"]),
                redact_fields: strings(&["cardNumber", "accountNumber"]),
                entity_ref_paths: strings(&["merchantId", "accountId"]),
                modality_hint: ModalityHint::Structured,
                enabled: true,
            },
        );
        overrides.insert(
            "browser.visit".to_string(),
            ExtractionPolicy {
                embed_text_fields: strings(&["title", "url"]),
                embed_structured_fields: strings(&["durationMs"]),
                redact_fields: Vec::new(),
                entity_ref_paths: Vec::new(),
                modality_hint: ModalityHint::Text,
                enabled: true,
            },
        );
        overrides.insert(
            "email.received".to_string(),
            ExtractionPolicy {
                embed_text_fields: strings(&["subject", "snippet"]),
                embed_structured_fields: Vec::new(),
                redact_fields: strings(&["body"]),
                entity_ref_paths: strings(&["senderId", "threadId"]),
                modality_hint: ModalityHint::Text,
                enabled: true,
            },
        );
        overrides.insert(
            "tasks.task_created".to_string(),
            ExtractionPolicy {
                embed_text_fields: strings(&["title", "notes", "tags"]),
                embed_structured_fields: strings(&["dueDate", "priority"]),
                redact_fields: Vec::new(),
                entity_ref_paths: strings(&["taskId", "projectId"]),
                modality_hint: ModalityHint::Text,
                enabled: true,
            },
        );
        overrides.insert(
            "social.post_created".to_string(),
            ExtractionPolicy {
                embed_text_fields: strings(&["text", "tags"]),
                embed_structured_fields: strings(&["likes", "shares"]),
                redact_fields: Vec::new(),
                entity_ref_paths: strings(&["authorId", "mentionIds"]),
                modality_hint: ModalityHint::Text,
                enabled: true,
            },
        );

        Self {
            default: ExtractionPolicy::default(),
            overrides,
        }
    }

    /// Layer config-supplied policies over the builtins. A supplied default
    /// replaces the builtin default wholesale.
    pub fn with_overrides(
        mut self,
        default: Option<ExtractionPolicy>,
        overrides: BTreeMap<String, ExtractionPolicy>,
    ) -> Self {
        if let Some(default) = default {
            self.default = default;
        }
        for (event_type, policy) in overrides {
            self.overrides.insert(event_type, policy);
        }
        self
    }

    /// Resolve the policy for an event type.
    pub fn resolve(&self, event_type: &str) -> &ExtractionPolicy {
        self.overrides.get(event_type).unwrap_or(&self.default)
    }

    /// All configured event types with explicit policies, in sorted order.
    pub fn event_types(&self) -> impl Iterator<Item = (&str, &ExtractionPolicy)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn default_policy(&self) -> &ExtractionPolicy {
        &self.default
    }
}

/// Field-name → entity-type inference table.
///
/// Keyed by the last segment of an entity-ref path; unmapped names fall
/// back to the generic `entity` type so inference is total.
#[derive(Debug, Clone)]
pub struct EntityTypeMap {
    map: BTreeMap<String, String>,
}

impl EntityTypeMap {
    pub fn builtin() -> Self {
        let mut map = BTreeMap::new();
        for (field, entity_type) in [
            ("merchantId", "merchant"),
            ("accountId", "account"),
            ("contactId", "contact"),
            ("senderId", "contact"),
            ("recipientId", "contact"),
            ("authorId", "contact"),
            ("mentionIds", "contact"),
            ("taskId", "task"),
            ("projectId", "project"),
            ("threadId", "thread"),
            ("businessId", "business"),
            ("placeId", "place"),
            ("documentId", "document"),
            ("postId", "post"),
        ] {
            map.insert(field.to_string(), entity_type.to_string());
        }
        Self { map }
    }

    /// Infer the entity type for a payload field name.
    pub fn infer(&self, field_name: &str) -> String {
        self.map
            .get(field_name)
            .cloned()
            .unwrap_or_else(|| "entity".to_string())
    }
}

/// Entity-type → graph relationship name table, fallback `REFERENCES`.
#[derive(Debug, Clone)]
pub struct RelationshipMap {
    map: BTreeMap<String, String>,
}

impl RelationshipMap {
    pub fn builtin() -> Self {
        let mut map = BTreeMap::new();
        for (entity_type, relationship) in [
            ("merchant", "TRANSACTED_WITH"),
            ("account", "USES_ACCOUNT"),
            ("contact", "COMMUNICATED_WITH"),
            ("task", "TRACKS"),
            ("project", "CONTRIBUTES_TO"),
            ("thread", "PARTICIPATES_IN"),
            ("business", "ENGAGED_WITH"),
            ("place", "VISITED"),
            ("document", "DERIVED_FROM"),
            ("post", "AUTHORED"),
        ] {
            map.insert(entity_type.to_string(), relationship.to_string());
        }
        Self { map }
    }

    pub fn relationship_for(&self, entity_type: &str) -> String {
        self.map
            .get(entity_type)
            .cloned()
            .unwrap_or_else(|| "REFERENCES".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_default() {
        let store = PolicyStore::builtin();
        let policy = store.resolve("music.track_played");
        assert!(policy.enabled);
        assert!(policy.embed_text_fields.contains(&"title".to_string()));
    }

    #[test]
    fn resolve_prefers_override() {
        let store = PolicyStore::builtin();
        let policy = store.resolve("finance.transaction_created");
        assert_eq!(policy.modality_hint, ModalityHint::Structured);
        assert!(policy.entity_ref_paths.contains(&"merchantId".to_string()));
    }

    #[test]
    fn config_overrides_layer_over_builtins() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "browser.visit".to_string(),
            ExtractionPolicy {
                enabled: false,
                ..ExtractionPolicy::default()
            },
        );
        let store = PolicyStore::builtin().with_overrides(None, overrides);
        assert!(!store.resolve("browser.visit").enabled);
        // Untouched builtins survive the merge.
        assert!(store.resolve("email.received").enabled);
    }

    #[test]
    fn entity_type_inference_is_total() {
        let types = EntityTypeMap::builtin();
        assert_eq!(types.infer("merchantId"), "merchant");
        assert_eq!(types.infer("senderId"), "contact");
        assert_eq!(types.infer("frobnicatorId"), "entity");
    }

    #[test]
    fn relationship_fallback() {
        let rels = RelationshipMap::builtin();
        assert_eq!(rels.relationship_for("merchant"), "TRANSACTED_WITH");
        assert_eq!(rels.relationship_for("entity"), "REFERENCES");
    }
}
