use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, warn};

use repo_activity_core::classifier::ClassifyError;
use repo_activity_core::pipeline::{InboundNotification, IngestError, IngestOutcome};

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const HEADER_EVENT: &str = "X-GitHub-Event";
pub const HEADER_SIGNATURE: &str = "X-Hub-Signature-256";
const HEADER_DELIVERY: &str = "X-GitHub-Delivery";

/// Acknowledgement returned for every authenticated delivery.
#[derive(Debug, Serialize)]
pub struct Receipt {
    status: &'static str,
    id: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Receipt>, ProblemResponse> {
    let start = Instant::now();
    let event_kind = optional_header(&headers, HEADER_EVENT);
    let delivery = optional_header(&headers, HEADER_DELIVERY).unwrap_or("-");
    let event_label = event_metric_label(event_kind);

    let result = state
        .pipeline()
        .ingest(InboundNotification {
            event_kind,
            signature: optional_header(&headers, HEADER_SIGNATURE),
            body: &body,
        })
        .await;

    histogram!("webhook_ack_latency_seconds", "event" => event_label)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            let outcome_label = match &outcome {
                IngestOutcome::Recorded { id, record } => {
                    counter!("activity_records_total", "action" => record.action.as_str())
                        .increment(1);
                    info!(
                        stage = "ingress",
                        %delivery,
                        event = event_kind.unwrap_or("-"),
                        record_id = %id,
                        action = %record.action,
                        request_id = %record.request_id,
                        "activity recorded"
                    );
                    "recorded"
                }
                IngestOutcome::Ignored(reason) => {
                    info!(
                        stage = "classifier",
                        %delivery,
                        event = event_kind.unwrap_or("-"),
                        reason = reason.metric_label(),
                        "delivery ignored"
                    );
                    reason.metric_label()
                }
            };
            counter!("webhook_ingress_total", "event" => event_label, "outcome" => outcome_label)
                .increment(1);

            Ok(Json(Receipt {
                status: "received",
                id: outcome.record_id().map(str::to_string),
            }))
        }
        Err(err) => {
            let problem = reject(err, delivery);
            counter!(
                "webhook_ingress_total",
                "event" => event_label,
                "outcome" => problem.problem_type()
            )
            .increment(1);
            Err(problem)
        }
    }
}

fn reject(err: IngestError, delivery: &str) -> ProblemResponse {
    match err {
        IngestError::BadRequest => {
            warn!(stage = "ingress", %delivery, "rejected delivery without JSON body");
            ProblemResponse::bad_request(
                "invalid_json",
                "request body must be a non-empty JSON document",
            )
        }
        IngestError::MissingSignature => {
            counter!("webhook_invalid_signature_total", "reason" => "missing").increment(1);
            warn!(stage = "ingress", %delivery, "rejected delivery without signature");
            ProblemResponse::bad_request("missing_signature", "missing signature")
        }
        IngestError::InvalidSignature => {
            counter!("webhook_invalid_signature_total", "reason" => "mismatch").increment(1);
            warn!(stage = "ingress", %delivery, "rejected delivery with invalid signature");
            ProblemResponse::unauthorized("invalid_signature", "invalid signature")
        }
        IngestError::InvalidPayload(err) => {
            warn!(stage = "classifier", %delivery, error = %err, "authenticated payload is malformed");
            ProblemResponse::bad_request("invalid_payload", payload_detail(&err))
        }
        IngestError::Storage(err) => {
            error!(stage = "storage", %delivery, error = %err, "failed to persist activity record");
            ProblemResponse::internal("storage_error", "failed to persist activity record")
        }
    }
}

fn payload_detail(err: &ClassifyError) -> String {
    match err {
        ClassifyError::MissingField(field) => format!("missing required field: {field}"),
        ClassifyError::Json(_) => "payload does not match the event schema".to_string(),
        ClassifyError::Timestamp { field, .. } => format!("invalid timestamp in field: {field}"),
    }
}

fn optional_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn event_metric_label(event_kind: Option<&str>) -> &'static str {
    match event_kind {
        Some("push") => "push",
        Some("pull_request") => "pull_request",
        Some(_) => "other",
        None => "missing",
    }
}
