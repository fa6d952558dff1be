//! Canonical Feature Document builder.
//!
//! `build_cfd` is the pure normalization step of the pipeline: it projects
//! an arbitrary raw event into a deterministic CFD using the resolved
//! extraction policy. It is total for well-formed input — missing fields,
//! empty payloads, and malformed array elements degrade to an empty summary
//! or skipped values, never an error.

use chrono::Utc;

use crate::models::{CanonicalFeatureDocument, EntityRef, Facets, RawEvent};
use crate::path::{as_count, as_number, as_text, get_path, last_segment, remove_path};
use crate::policy::{EntityTypeMap, ExtractionPolicy, ModalityHint, PolicyStore};

/// Separator between text-field values in the summary.
const SUMMARY_SEPARATOR: &str = " | ";

/// Keyword tokens must be at least this long...
const KEYWORD_MIN_LEN: usize = 3;
/// ...and strictly shorter than this.
const KEYWORD_MAX_LEN: usize = 30;
/// Hard cap on extracted keywords, first-seen order.
const KEYWORD_CAP: usize = 20;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "have", "has", "was", "were", "are",
    "you", "your", "not", "but", "they", "them", "their", "will", "can", "all", "its", "out",
    "get", "been", "what", "when", "where", "who", "how", "why", "our", "one", "two", "about",
    "into", "over", "just", "than", "then", "also", "very", "more", "some", "such", "only",
];

/// Payload field names bucketed as amount facets (numeric values).
const AMOUNT_FIELDS: &[&str] = &["amount", "total", "price", "value", "balance", "subtotal", "cost"];
/// Field names bucketed as category facets (string values).
const CATEGORY_FIELDS: &[&str] = &["category", "subcategory", "genre", "label", "folder", "status"];
/// Field names bucketed as timestamp facets (epoch-ms or ISO strings).
const TIMESTAMP_FIELDS: &[&str] = &[
    "dueDate",
    "scheduledAt",
    "completedAt",
    "publishedAt",
    "startTime",
    "endTime",
    "date",
    "timestamp",
];
/// Field names bucketed as count facets (integer values).
const COUNT_FIELDS: &[&str] = &["count", "quantity", "likes", "comments", "shares", "views", "steps"];

/// First dot-segment of an event type, e.g. `finance.transaction_created`
/// → `finance`.
pub fn domain_of(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

/// Build the CFD for an event under the resolved policy.
///
/// Redacted fields are pruned from a working copy of the payload before any
/// extraction, so they cannot leak into the summary, keywords, facets, or
/// entity refs.
pub fn build_cfd(
    event: &RawEvent,
    policies: &PolicyStore,
    entity_types: &EntityTypeMap,
) -> CanonicalFeatureDocument {
    let policy = policies.resolve(&event.event_type);

    let mut payload = event.payload.clone();
    for field in &policy.redact_fields {
        remove_path(&mut payload, field);
    }

    let mut text_summary = build_text_summary(&payload, policy);
    if text_summary.is_empty() && policy.modality_hint == ModalityHint::Structured {
        text_summary = structured_summary(&payload, policy);
    }

    let keywords = extract_keywords(&text_summary);
    let entity_refs = extract_entity_refs(&payload, policy, entity_types);
    let facets = extract_facets(&payload);

    CanonicalFeatureDocument {
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        timestamp_ms: event.timestamp_ms,
        user_id: event.user_id.clone(),
        privacy_scope: event.privacy_scope,
        consent_version: event.consent_version.clone(),
        source_app: event.source_app.clone(),
        domain: domain_of(&event.event_type).to_string(),
        entity_refs,
        modality: policy.modality_hint.as_str().to_string(),
        text_summary,
        keywords,
        facets,
        source_refs: event.blob_refs.clone(),
        dedupe_key: format!("{}:{}:{}", event.user_id, event.event_type, event.event_id),
        trace_id: event.trace_id.clone(),
        generated_at: Utc::now(),
        schema_version: 1,
    }
}

fn build_text_summary(payload: &serde_json::Value, policy: &ExtractionPolicy) -> String {
    let parts: Vec<String> = policy
        .embed_text_fields
        .iter()
        .filter_map(|field| get_path(payload, field).and_then(as_text))
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(SUMMARY_SEPARATOR)
}

/// Deterministic `"field: value; field: value"` rendering of the structured
/// fields, used so structured-only events still produce embeddable text.
fn structured_summary(payload: &serde_json::Value, policy: &ExtractionPolicy) -> String {
    let parts: Vec<String> = policy
        .embed_structured_fields
        .iter()
        .filter_map(|field| {
            get_path(payload, field)
                .and_then(as_text)
                .map(|value| format!("{}: {}", last_segment(field), value))
        })
        .collect();
    parts.join("; ")
}

/// Extract deduplicated keywords from a text summary.
///
/// Lowercases, strips non-alphanumerics, splits on whitespace, keeps tokens
/// with length in `[3, 30)`, drops stop words, and caps at 20 tokens in
/// first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for token in normalized.split_whitespace() {
        // Length bounds count characters, not bytes: multi-byte tokens
        // like CJK words must not be rejected by their encoded width.
        let char_len = token.chars().count();
        if char_len < KEYWORD_MIN_LEN || char_len >= KEYWORD_MAX_LEN {
            continue;
        }
        if STOP_WORDS.contains(&token) {
            continue;
        }
        if keywords.iter().any(|k| k == token) {
            continue;
        }
        keywords.push(token.to_string());
        if keywords.len() == KEYWORD_CAP {
            break;
        }
    }
    keywords
}

fn extract_entity_refs(
    payload: &serde_json::Value,
    policy: &ExtractionPolicy,
    entity_types: &EntityTypeMap,
) -> Vec<EntityRef> {
    let mut refs = Vec::new();
    for ref_path in &policy.entity_ref_paths {
        let Some(value) = get_path(payload, ref_path) else {
            continue;
        };
        let entity_type = entity_types.infer(last_segment(ref_path));
        match value {
            serde_json::Value::String(id) if !id.is_empty() => {
                refs.push(EntityRef {
                    entity_type,
                    id: id.clone(),
                    source_path: ref_path.clone(),
                });
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    // Non-string elements are silently skipped.
                    if let Some(id) = item.as_str().filter(|s| !s.is_empty()) {
                        refs.push(EntityRef {
                            entity_type: entity_type.clone(),
                            id: id.to_string(),
                            source_path: ref_path.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    refs
}

fn extract_facets(payload: &serde_json::Value) -> Facets {
    let mut facets = Facets::default();
    let Some(map) = payload.as_object() else {
        return facets;
    };

    for field in AMOUNT_FIELDS {
        if let Some(n) = map.get(*field).and_then(as_number) {
            facets.amounts.push((field.to_string(), n));
        }
    }
    for field in CATEGORY_FIELDS {
        if let Some(s) = map.get(*field).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                facets.categories.push((field.to_string(), s.to_string()));
            }
        }
    }
    for field in TIMESTAMP_FIELDS {
        if let Some(ts) = map.get(*field).and_then(normalize_timestamp) {
            facets.timestamps.push((field.to_string(), ts));
        }
    }
    for field in COUNT_FIELDS {
        if let Some(n) = map.get(*field).and_then(as_count) {
            facets.counts.push((field.to_string(), n));
        }
    }
    facets
}

/// Normalize a timestamp facet value to ISO-8601.
///
/// Numbers are treated as epoch milliseconds; strings are kept only when
/// they already parse as RFC3339. Anything else is dropped rather than
/// guessed at.
fn normalize_timestamp(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => {
            let millis = n.as_i64()?;
            chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.to_rfc3339())
        }
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|_| s.clone()),
        _ => None,
    }
}
