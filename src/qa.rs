//! QA harness: end-to-end pipeline verification without live backends.
//!
//! Each test case generates a synthetic raw event from the built-in
//! generator table, runs it through a real [`Pipeline`] wired to in-memory
//! stores and the deterministic stub embedder, and evaluates declarative
//! assertions against the result and its CFD. Assertion mismatches are
//! reported per test, never thrown.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use crate::embedder::{EmbeddingGenerator, StubEmbeddingClient};
use crate::graph_store::MemoryGraphStore;
use crate::linker::EntityLinker;
use crate::models::{CanonicalFeatureDocument, PrivacyScope, RawEvent};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::policy::{EntityTypeMap, PolicyStore, RelationshipMap};
use crate::vector_store::MemoryVectorStore;

/// Outcome of one assertion within a test.
#[derive(Debug, Clone)]
pub struct AssertionOutcome {
    pub description: String,
    pub passed: bool,
}

/// Build an assertion outcome from a condition.
pub fn check(description: &str, passed: bool) -> AssertionOutcome {
    AssertionOutcome {
        description: description.to_string(),
        passed,
    }
}

/// What the pipeline is expected to report for the test event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOutcome {
    Success,
    Skipped,
}

type AssertionFn =
    Box<dyn Fn(&PipelineResult, &CanonicalFeatureDocument) -> Vec<AssertionOutcome> + Send + Sync>;

/// Declarative test case.
pub struct QaCase {
    pub name: String,
    pub event_type: String,
    pub expected_outcome: ExpectedOutcome,
    /// Run the event through the pipeline twice and assert on the second
    /// result (exercises the idempotency gate).
    pub process_twice: bool,
    pub assertions: AssertionFn,
}

/// Result of one executed test case.
#[derive(Debug, Clone)]
pub struct QaTestResult {
    pub name: String,
    pub event_type: String,
    pub passed: bool,
    pub assertions: Vec<AssertionOutcome>,
    pub error: Option<String>,
}

/// Aggregate suite outcome.
#[derive(Debug, Default)]
pub struct QaSuiteReport {
    pub results: Vec<QaTestResult>,
    pub passed: usize,
    pub failed: usize,
}

impl QaSuiteReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Render a human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("QA Suite — Vectorization Pipeline\n");
        out.push_str("=================================\n\n");
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!(
                "  {} {:<44} [{}]\n",
                status, result.name, result.event_type
            ));
            if let Some(error) = &result.error {
                out.push_str(&format!("       error: {}\n", error));
            }
            for assertion in &result.assertions {
                if !assertion.passed {
                    out.push_str(&format!("       failed: {}\n", assertion.description));
                }
            }
        }
        out.push_str(&format!(
            "\n  {} passed, {} failed\n",
            self.passed, self.failed
        ));
        out
    }
}

/// Generate a synthetic raw event for a known event type.
pub fn sample_event(event_type: &str) -> Result<RawEvent> {
    let payload = match event_type {
        "finance.transaction_created" => json!({
            "amount": 42.50,
            "currency": "USD",
            "merchant": "Coffee Shop",
            "merchantId": "m_1",
            "accountId": "a_1",
            "category": "food_and_drink",
            "cardNumber": "4111111111111111"
        }),
        "browser.visit" => json!({
            "title": "Rust async book — pinning chapter",
            "url": "https://rust-lang.github.io/async-book/",
            "durationMs": 184000
        }),
        "email.received" => json!({
            "subject": "Quarterly planning notes",
            "snippet": "Attached are the planning notes from the offsite",
            "body": "Full confidential body text",
            "senderId": "c_7",
            "threadId": "t_3"
        }),
        "tasks.task_created" => json!({
            "title": "File expense report",
            "notes": "Include the conference receipts",
            "tags": ["finance", "deadline"],
            "dueDate": 1_750_000_000_000i64,
            "priority": 2,
            "taskId": "task_9",
            "projectId": "proj_2"
        }),
        "social.post_created" => json!({
            "text": "Great coffee meetup today",
            "tags": ["coffee", "community"],
            "likes": 12,
            "shares": 3,
            "authorId": "c_1",
            "mentionIds": ["c_2", "c_3"]
        }),
        other => anyhow::bail!("No sample generator for event type: {}", other),
    };

    let privacy_scope = if event_type == "social.post_created" {
        PrivacyScope::Social
    } else {
        PrivacyScope::Private
    };

    Ok(RawEvent {
        event_id: format!("qa_{}", Uuid::new_v4()),
        trace_id: format!("qa_trace_{}", Uuid::new_v4()),
        user_id: "qa_user".to_string(),
        event_type: event_type.to_string(),
        source_app: "qa-harness".to_string(),
        domain: String::new(),
        timestamp_ms: 1_700_000_000_000,
        received_at_ms: 1_700_000_000_250,
        privacy_scope,
        consent_version: "v1".to_string(),
        payload,
        blob_refs: Vec::new(),
    })
}

/// The standard suite covering the pipeline contracts.
pub fn builtin_cases() -> Vec<QaCase> {
    vec![
        QaCase {
            name: "finance transaction links merchant and account".to_string(),
            event_type: "finance.transaction_created".to_string(),
            expected_outcome: ExpectedOutcome::Success,
            process_twice: false,
            assertions: Box::new(|result, cfd| {
                vec![
                    check(
                        "entity ref of type merchant present",
                        cfd.entity_refs
                            .iter()
                            .any(|r| r.entity_type == "merchant" && r.id == "m_1"),
                    ),
                    check(
                        "amount facet captured",
                        cfd.facets.amounts.contains(&("amount".to_string(), 42.50)),
                    ),
                    check(
                        "category facet captured",
                        cfd.facets
                            .categories
                            .contains(&("category".to_string(), "food_and_drink".to_string())),
                    ),
                    check(
                        "redacted card number absent from summary",
                        !cfd.text_summary.contains("4111"),
                    ),
                    check("content and entity rows written", result.rows_written == 2),
                    check("relationships created", result.entities_linked == 2),
                ]
            }),
        },
        QaCase {
            name: "browser visit preserves privacy scope".to_string(),
            event_type: "browser.visit".to_string(),
            expected_outcome: ExpectedOutcome::Success,
            process_twice: false,
            assertions: Box::new(|result, cfd| {
                vec![
                    check(
                        "privacy scope preserved",
                        cfd.privacy_scope == PrivacyScope::Private,
                    ),
                    check(
                        "keyword extracted from title",
                        cfd.keywords.iter().any(|k| k == "pinning"),
                    ),
                    check("domain derived from event type", cfd.domain == "browser"),
                    check("single content row", result.rows_written == 1),
                ]
            }),
        },
        QaCase {
            name: "email body is redacted, contacts linked".to_string(),
            event_type: "email.received".to_string(),
            expected_outcome: ExpectedOutcome::Success,
            process_twice: false,
            assertions: Box::new(|_result, cfd| {
                vec![
                    check(
                        "redacted body absent from summary",
                        !cfd.text_summary.contains("confidential"),
                    ),
                    check(
                        "sender inferred as contact",
                        cfd.entity_refs
                            .iter()
                            .any(|r| r.entity_type == "contact" && r.id == "c_7"),
                    ),
                    check(
                        "thread ref present",
                        cfd.entity_refs.iter().any(|r| r.entity_type == "thread"),
                    ),
                ]
            }),
        },
        QaCase {
            name: "task due date becomes timestamp facet".to_string(),
            event_type: "tasks.task_created".to_string(),
            expected_outcome: ExpectedOutcome::Success,
            process_twice: false,
            assertions: Box::new(|_result, cfd| {
                vec![
                    check(
                        "dueDate normalized to ISO-8601",
                        cfd.facets
                            .timestamps
                            .iter()
                            .any(|(k, v)| k == "dueDate" && v.contains('T')),
                    ),
                    check(
                        "keyword extracted from tag",
                        cfd.keywords.iter().any(|k| k == "deadline"),
                    ),
                    check(
                        "task ref present",
                        cfd.entity_refs
                            .iter()
                            .any(|r| r.entity_type == "task" && r.id == "task_9"),
                    ),
                ]
            }),
        },
        QaCase {
            name: "social post counts likes and mentions".to_string(),
            event_type: "social.post_created".to_string(),
            expected_outcome: ExpectedOutcome::Success,
            process_twice: false,
            assertions: Box::new(|_result, cfd| {
                vec![
                    check(
                        "likes captured as count facet",
                        cfd.facets.counts.contains(&("likes".to_string(), 12)),
                    ),
                    check(
                        "mention array yields one ref per id",
                        cfd.entity_refs.iter().filter(|r| r.entity_type == "contact").count() == 3,
                    ),
                    check(
                        "social scope preserved",
                        cfd.privacy_scope == PrivacyScope::Social,
                    ),
                ]
            }),
        },
        QaCase {
            name: "second pass is an idempotency skip".to_string(),
            event_type: "browser.visit".to_string(),
            expected_outcome: ExpectedOutcome::Skipped,
            process_twice: true,
            assertions: Box::new(|result, _cfd| {
                vec![
                    check("second run reports skip", result.skipped),
                    check("skip is still a success", result.success),
                    check("no new rows written", result.rows_written == 0),
                ]
            }),
        },
    ]
}

/// Runs QA cases against a pipeline wired to in-memory backends.
pub struct QaHarness {
    pipeline: Pipeline,
}

impl QaHarness {
    /// Harness over fresh in-memory stores and the stub embedder.
    pub fn new() -> Self {
        let vectors = Arc::new(MemoryVectorStore::new());
        let graph = Arc::new(MemoryGraphStore::new());
        let linker = EntityLinker::new(graph, RelationshipMap::builtin());
        let pipeline = Pipeline::new(
            PolicyStore::builtin(),
            EntityTypeMap::builtin(),
            EmbeddingGenerator::new(Arc::new(StubEmbeddingClient::new(64))),
            vectors,
            Some(linker),
        );
        Self { pipeline }
    }

    pub async fn run_case(&self, case: &QaCase) -> QaTestResult {
        let event = match sample_event(&case.event_type) {
            Ok(event) => event,
            Err(e) => {
                return QaTestResult {
                    name: case.name.clone(),
                    event_type: case.event_type.clone(),
                    passed: false,
                    assertions: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let mut result = self.pipeline.process_event(&event).await;
        if case.process_twice {
            result = self.pipeline.process_event(&event).await;
        }

        let outcome_matches = match case.expected_outcome {
            ExpectedOutcome::Success => result.success && !result.skipped,
            ExpectedOutcome::Skipped => result.success && result.skipped,
        };

        let mut assertions = vec![check(
            match case.expected_outcome {
                ExpectedOutcome::Success => "pipeline reports success",
                ExpectedOutcome::Skipped => "pipeline reports skip",
            },
            outcome_matches,
        )];

        match &result.cfd {
            Some(cfd) => {
                let cfd = cfd.clone();
                assertions.extend((case.assertions)(&result, &cfd));
            }
            None => assertions.push(check("CFD was produced", false)),
        }

        let passed = assertions.iter().all(|a| a.passed);
        QaTestResult {
            name: case.name.clone(),
            event_type: case.event_type.clone(),
            passed,
            assertions,
            error: None,
        }
    }

    /// Run a whole suite, aggregating pass/fail counts.
    pub async fn run_suite(&self, cases: &[QaCase]) -> QaSuiteReport {
        let mut report = QaSuiteReport::default();
        for case in cases {
            let result = self.run_case(case).await;
            if result.passed {
                report.passed += 1;
            } else {
                report.failed += 1;
            }
            report.results.push(result);
        }
        report
    }
}

impl Default for QaHarness {
    fn default() -> Self {
        Self::new()
    }
}
