use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::classifier::{Classification, ClassifyError, DropReason, EventClassifier};
use crate::signature::{AuthenticationError, SignatureVerifier};
use crate::store::{ActivityStore, StoreError};
use crate::timestamp::TimestampNormalizer;
use crate::types::ActivityRecord;

/// One inbound webhook delivery as seen by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct InboundNotification<'a> {
    /// Value of the `X-GitHub-Event` header.
    pub event_kind: Option<&'a str>,
    /// Value of the `X-Hub-Signature-256` header.
    pub signature: Option<&'a str>,
    /// Raw, unparsed request body.
    pub body: &'a [u8],
}

/// Successful terminal states of [`IngestionPipeline::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Recorded { id: String, record: ActivityRecord },
    Ignored(DropReason),
}

impl IngestOutcome {
    /// Identifier reported back to the sender; `None` for ignored events.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Recorded { id, .. } => Some(id),
            Self::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request body is missing or not a JSON document")]
    BadRequest,
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("payload rejected: {0}")]
    InvalidPayload(#[from] ClassifyError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<AuthenticationError> for IngestError {
    fn from(err: AuthenticationError) -> Self {
        match err {
            AuthenticationError::MissingSignature => Self::MissingSignature,
            AuthenticationError::InvalidSignature => Self::InvalidSignature,
        }
    }
}

/// Verify, classify and persist webhook deliveries.
#[derive(Clone)]
pub struct IngestionPipeline {
    verifier: SignatureVerifier,
    normalizer: TimestampNormalizer,
    store: Arc<dyn ActivityStore>,
}

impl IngestionPipeline {
    pub fn new(
        verifier: SignatureVerifier,
        normalizer: TimestampNormalizer,
        store: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            verifier,
            normalizer,
            store,
        }
    }

    pub async fn ingest(
        &self,
        notification: InboundNotification<'_>,
    ) -> Result<IngestOutcome, IngestError> {
        let payload = parse_body(notification.body).ok_or(IngestError::BadRequest)?;

        self.verifier
            .verify(notification.body, notification.signature)?;

        let record = match EventClassifier::classify(
            notification.event_kind,
            &payload,
            &self.normalizer,
        )? {
            Classification::Record(record) => record,
            Classification::Drop(reason) => return Ok(IngestOutcome::Ignored(reason)),
        };

        let id = self.store.insert(&record).await?;
        Ok(IngestOutcome::Recorded { id, record })
    }
}

/// Parses the body, treating empty JSON values (`null`, `{}`, `[]`, `""`,
/// `false`, `0`) as absent.
fn parse_body(body: &[u8]) -> Option<Value> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let empty = match &value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    };
    (!empty).then_some(value)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::*;
    use crate::store::MemoryActivityStore;
    use crate::types::{ActivityAction, StoredActivity};

    const SECRET: &[u8] = b"pipeline-secret";

    struct FailingStore;

    #[async_trait]
    impl ActivityStore for FailingStore {
        async fn insert(&self, _record: &ActivityRecord) -> Result<String, StoreError> {
            Err(StoreError::new("disk full"))
        }

        async fn fetch_latest(&self) -> Result<Option<StoredActivity>, StoreError> {
            Err(StoreError::new("disk full"))
        }
    }

    fn pipeline(store: Arc<dyn ActivityStore>) -> IngestionPipeline {
        let now = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc);
        IngestionPipeline::new(
            SignatureVerifier::new(SECRET.to_vec()),
            TimestampNormalizer::new(Arc::new(move || now)),
            store,
        )
    }

    fn sign(body: &[u8]) -> String {
        SignatureVerifier::new(SECRET.to_vec())
            .sign(body)
            .expect("sign")
    }

    fn opened_body() -> Vec<u8> {
        json!({
            "action": "opened",
            "pull_request": {
                "id": 55,
                "user": {"login": "contributor"},
                "head": {"ref": "topic"},
                "base": {"ref": "main"},
                "created_at": "2024-01-01T10:00:00-05:00"
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn records_relevant_events() {
        let store = Arc::new(MemoryActivityStore::new());
        let pipeline = pipeline(store.clone());
        let body = opened_body();
        let signature = sign(&body);

        let outcome = pipeline
            .ingest(InboundNotification {
                event_kind: Some("pull_request"),
                signature: Some(&signature),
                body: &body,
            })
            .await
            .expect("ingest");

        let (id, record) = match outcome {
            IngestOutcome::Recorded { id, record } => (id, record),
            other => panic!("expected record, got {other:?}"),
        };
        assert_eq!(record.action, ActivityAction::PullRequest);
        assert_eq!(record.request_id, "55");
        assert_eq!(record.timestamp, "2024-01-01T15:00:00Z");

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
    }

    #[tokio::test]
    async fn ignored_events_are_not_stored() {
        let store = Arc::new(MemoryActivityStore::new());
        let pipeline = pipeline(store.clone());
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let signature = sign(body);

        let outcome = pipeline
            .ingest(InboundNotification {
                event_kind: Some("ping"),
                signature: Some(&signature),
                body,
            })
            .await
            .expect("ingest");

        assert_eq!(outcome.record_id(), None);
        assert!(matches!(
            outcome,
            IngestOutcome::Ignored(DropReason::UnsupportedEvent(Some(ref kind))) if kind == "ping"
        ));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_is_checked_before_signature() {
        let pipeline = pipeline(Arc::new(MemoryActivityStore::new()));
        for body in [&b""[..], &b"not json"[..], &b"{}"[..], &b"null"[..]] {
            let err = pipeline
                .ingest(InboundNotification {
                    event_kind: Some("push"),
                    signature: None,
                    body,
                })
                .await
                .expect_err("bad request");
            assert!(matches!(err, IngestError::BadRequest));
        }
    }

    #[tokio::test]
    async fn missing_signature_rejects_any_valid_body() {
        let pipeline = pipeline(Arc::new(MemoryActivityStore::new()));
        for (kind, body) in [
            (Some("pull_request"), opened_body()),
            (Some("issues"), br#"{"action":"opened"}"#.to_vec()),
            (None, br#"[1]"#.to_vec()),
        ] {
            let err = pipeline
                .ingest(InboundNotification {
                    event_kind: kind,
                    signature: None,
                    body: &body,
                })
                .await
                .expect_err("missing signature");
            assert!(matches!(err, IngestError::MissingSignature));
        }
    }

    #[tokio::test]
    async fn invalid_signature_stops_before_classification() {
        let store = Arc::new(MemoryActivityStore::new());
        let pipeline = pipeline(store.clone());
        let body = opened_body();
        let signature = sign(b"different body");

        let err = pipeline
            .ingest(InboundNotification {
                event_kind: Some("pull_request"),
                signature: Some(&signature),
                body: &body,
            })
            .await
            .expect_err("invalid signature");
        assert!(matches!(err, IngestError::InvalidSignature));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn malformed_authenticated_payload_is_rejected() {
        let store = Arc::new(MemoryActivityStore::new());
        let pipeline = pipeline(store.clone());
        let body = json!({
            "action": "closed",
            "pull_request": {
                "id": 9,
                "user": {"login": "contributor"},
                "merged_by": null,
                "merged_at": null,
                "head": {"ref": "topic"},
                "base": {"ref": "main"}
            }
        })
        .to_string()
        .into_bytes();
        let signature = sign(&body);

        let err = pipeline
            .ingest(InboundNotification {
                event_kind: Some("pull_request"),
                signature: Some(&signature),
                body: &body,
            })
            .await
            .expect_err("unmerged closure");
        assert!(matches!(
            err,
            IngestError::InvalidPayload(ClassifyError::MissingField("pull_request.merged_by"))
        ));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let pipeline = pipeline(Arc::new(FailingStore));
        let body = opened_body();
        let signature = sign(&body);

        let err = pipeline
            .ingest(InboundNotification {
                event_kind: Some("pull_request"),
                signature: Some(&signature),
                body: &body,
            })
            .await
            .expect_err("storage failure");
        assert!(matches!(err, IngestError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
