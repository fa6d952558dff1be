//! Entity linking: CFD entity refs → graph upserts and relationships.
//!
//! For each entity reference the linker emits two statements — an
//! idempotent entity upsert (owner and creation metadata set only on first
//! create, `updatedAt`/`lastEventId` bumped on every touch) and an
//! event→entity relationship whose name comes from the injected
//! relationship table. All statements for one CFD go to the store as a
//! single transactional batch. Linking is best-effort relative to
//! vectorization: statement failures are recorded, never raised.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::graph_store::{GraphStatement, GraphStore};
use crate::models::{CanonicalFeatureDocument, EntityRef};
use crate::policy::RelationshipMap;

/// Per-CFD linking summary.
#[derive(Debug, Clone, Default)]
pub struct EntityLinkingResult {
    pub entities_processed: usize,
    pub relationships_created: usize,
    pub errors: Vec<String>,
}

pub struct EntityLinker {
    graph: Arc<dyn GraphStore>,
    relationships: RelationshipMap,
}

impl EntityLinker {
    pub fn new(graph: Arc<dyn GraphStore>, relationships: RelationshipMap) -> Self {
        Self {
            graph,
            relationships,
        }
    }

    /// Link all entity refs of a CFD. No-op success for an empty ref list.
    /// An `Err` here means the batch never reached the store; the pipeline
    /// treats both paths as non-fatal.
    pub async fn link_entities(
        &self,
        cfd: &CanonicalFeatureDocument,
    ) -> Result<EntityLinkingResult> {
        if cfd.entity_refs.is_empty() {
            return Ok(EntityLinkingResult::default());
        }

        let now = Utc::now().to_rfc3339();
        let mut statements = Vec::with_capacity(cfd.entity_refs.len() * 2);
        for entity_ref in &cfd.entity_refs {
            statements.push(self.entity_upsert(cfd, entity_ref, &now));
            statements.push(self.event_relationship(cfd, entity_ref, &now));
        }

        let outcomes = self.graph.execute(&statements).await?;

        // Statements alternate upsert/relationship per ref.
        let mut result = EntityLinkingResult::default();
        for (index, outcome) in outcomes.iter().enumerate() {
            if outcome.success {
                if index % 2 == 0 {
                    result.entities_processed += 1;
                } else {
                    result.relationships_created += 1;
                }
            } else if let Some(error) = &outcome.error {
                let entity_ref = &cfd.entity_refs[index / 2];
                result.errors.push(format!(
                    "{}:{}: {}",
                    entity_ref.entity_type, entity_ref.id, error
                ));
            }
        }
        Ok(result)
    }

    fn entity_upsert(
        &self,
        cfd: &CanonicalFeatureDocument,
        entity_ref: &EntityRef,
        now: &str,
    ) -> GraphStatement {
        GraphStatement {
            query: "MERGE (n:Entity {entityType: $type, id: $id}) \
                    ON CREATE SET n.ownerId = $userId, n.createdAt = $now \
                    SET n.updatedAt = $now, n.lastEventId = $eventId"
                .to_string(),
            parameters: serde_json::json!({
                "type": entity_ref.entity_type,
                "id": entity_ref.id,
                "userId": cfd.user_id,
                "eventId": cfd.event_id,
                "now": now,
            }),
        }
    }

    fn event_relationship(
        &self,
        cfd: &CanonicalFeatureDocument,
        entity_ref: &EntityRef,
        now: &str,
    ) -> GraphStatement {
        // Relationship names cannot be parameterized; they come from the
        // static table, so interpolation is safe.
        let relationship = self.relationships.relationship_for(&entity_ref.entity_type);
        GraphStatement {
            query: format!(
                "MERGE (ev:Event {{id: $eventId}}) \
                 ON CREATE SET ev.eventType = $eventType, ev.userId = $userId, \
                 ev.timestampMs = $timestampMs, ev.createdAt = $now \
                 MERGE (n:Entity {{entityType: $type, id: $id}}) \
                 MERGE (ev)-[:{}]->(n)",
                relationship
            ),
            parameters: serde_json::json!({
                "eventId": cfd.event_id,
                "eventType": cfd.event_type,
                "userId": cfd.user_id,
                "timestampMs": cfd.timestamp_ms,
                "type": entity_ref.entity_type,
                "id": entity_ref.id,
                "now": now,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfd::build_cfd;
    use crate::graph_store::MemoryGraphStore;
    use crate::models::{PrivacyScope, RawEvent};
    use crate::policy::{EntityTypeMap, PolicyStore};
    use serde_json::json;

    fn cfd_with_refs() -> CanonicalFeatureDocument {
        let event = RawEvent {
            event_id: "evt_1".to_string(),
            trace_id: String::new(),
            user_id: "u_1".to_string(),
            event_type: "finance.transaction_created".to_string(),
            source_app: String::new(),
            domain: String::new(),
            timestamp_ms: 1_700_000_000_000,
            received_at_ms: 0,
            privacy_scope: PrivacyScope::Private,
            consent_version: String::new(),
            payload: json!({
                "merchant": "Coffee Shop",
                "merchantId": "m_1",
                "accountId": "a_1"
            }),
            blob_refs: Vec::new(),
        };
        build_cfd(&event, &PolicyStore::builtin(), &EntityTypeMap::builtin())
    }

    #[tokio::test]
    async fn empty_refs_is_noop_success() {
        let mut cfd = cfd_with_refs();
        cfd.entity_refs.clear();
        let store = Arc::new(MemoryGraphStore::new());
        let linker = EntityLinker::new(store.clone(), RelationshipMap::builtin());

        let result = linker.link_entities(&cfd).await.unwrap();
        assert_eq!(result.entities_processed, 0);
        assert!(result.errors.is_empty());
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn links_every_ref_with_typed_relationship() {
        let cfd = cfd_with_refs();
        let store = Arc::new(MemoryGraphStore::new());
        let linker = EntityLinker::new(store.clone(), RelationshipMap::builtin());

        let result = linker.link_entities(&cfd).await.unwrap();
        assert_eq!(result.entities_processed, 2);
        assert_eq!(result.relationships_created, 2);
        assert!(result.errors.is_empty());

        let statements = store.statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[1].query.contains("[:TRANSACTED_WITH]"));
        assert!(statements[3].query.contains("[:USES_ACCOUNT]"));
        assert_eq!(statements[0].parameters["id"], "m_1");
    }

    #[tokio::test]
    async fn statement_failure_is_recorded_not_raised() {
        let cfd = cfd_with_refs();
        // Relationship statements mention Event nodes; fail those only.
        let store = Arc::new(MemoryGraphStore::failing_on("ev:Event"));
        let linker = EntityLinker::new(store, RelationshipMap::builtin());

        let result = linker.link_entities(&cfd).await.unwrap();
        assert_eq!(result.entities_processed, 2);
        assert_eq!(result.relationships_created, 0);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].starts_with("merchant:m_1:"));
    }
}
