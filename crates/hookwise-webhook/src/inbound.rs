//! HTTP intake
//!
//! Thin axum adapter over [`PipelineOrchestrator`]: turns requests into
//! commands and outcomes into status codes.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use hookwise_core::DeliveryId;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::dead_letter::{DeadLetterId, DeadLetterItem};
use crate::pipeline::{IngestOutcome, PipelineOrchestrator, ReplayRequestOutcome};
use crate::state::{Rejection, WebhookCommand};
use crate::WebhookError;

pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Create Axum router for webhook intake and replay administration
pub fn create_webhook_router(orchestrator: Arc<PipelineOrchestrator>) -> Router {
    Router::new()
        .route("/webhooks", post(handle_webhook))
        .route("/deliveries/:delivery_id/replay", post(handle_replay))
        .route("/dead-letters", get(list_dead_letters))
        .route("/dead-letters/stats", get(dead_letter_stats))
        .route("/dead-letters/:id/requeue", post(requeue_dead_letter))
        .route("/dead-letters/:id", delete(delete_dead_letter))
        .with_state(orchestrator)
}

/// Dead-letter entry as listed over HTTP
#[derive(Debug, Serialize)]
pub struct DeadLetterSummary {
    pub id: DeadLetterId,
    pub delivery_id: DeliveryId,
    pub event: String,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl From<&DeadLetterItem> for DeadLetterSummary {
    fn from(item: &DeadLetterItem) -> Self {
        Self {
            id: item.id,
            delivery_id: item.task.delivery.id().clone(),
            event: item.task.delivery.qualified_event(),
            attempts: item.task.attempt(),
            reason: item.reason.clone(),
            failed_at: item.failed_at,
            last_error: item.last_error.clone(),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

async fn handle_webhook(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let command = WebhookCommand::new(
        header(&headers, DELIVERY_HEADER).unwrap_or_default(),
        header(&headers, EVENT_HEADER).unwrap_or_default(),
        header(&headers, SIGNATURE_HEADER),
        body.to_vec(),
    );

    match orchestrator.ingest(command).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => unavailable(e),
    }
}

fn outcome_response(outcome: IngestOutcome) -> Response {
    match outcome {
        IngestOutcome::Processed { delivery_id, report } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "delivery_id": delivery_id,
                "handlers": report.invoked,
            })),
        )
            .into_response(),
        IngestOutcome::Duplicate { delivery_id } => (
            StatusCode::OK,
            Json(json!({ "status": "duplicate", "delivery_id": delivery_id })),
        )
            .into_response(),
        IngestOutcome::Rejected { delivery_id, reason } => {
            let status = match reason {
                Rejection::MissingSignature | Rejection::InvalidSignature => StatusCode::UNAUTHORIZED,
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(json!({
                    "status": "rejected",
                    "delivery_id": delivery_id,
                    "error": reason.to_string(),
                })),
            )
                .into_response()
        }
        IngestOutcome::RetryScheduled {
            delivery_id,
            attempt,
            delay,
            ..
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "retry_scheduled",
                "delivery_id": delivery_id,
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64,
            })),
        )
            .into_response(),
        IngestOutcome::DeadLettered {
            delivery_id,
            dead_letter_id,
            ..
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "dead_lettered",
                "delivery_id": delivery_id,
                "dead_letter_id": dead_letter_id,
            })),
        )
            .into_response(),
    }
}

fn unavailable(e: WebhookError) -> Response {
    error!(error = %e, "Webhook pipeline unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "unavailable", "error": e.to_string() })),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{} not found", what) }))).into_response()
}

fn parse_dead_letter_id(raw: &str) -> Result<DeadLetterId, Response> {
    raw.parse().map_err(|_| {
        warn!(id = %raw, "Invalid dead-letter id");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid dead-letter id" }))).into_response()
    })
}

async fn handle_replay(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    Path(delivery_id): Path<String>,
) -> Response {
    match orchestrator.request_replay(&DeliveryId::new(delivery_id)).await {
        Ok(ReplayRequestOutcome::Enqueued { task_id }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "enqueued", "task_id": task_id })),
        )
            .into_response(),
        Ok(ReplayRequestOutcome::NotFound) => not_found("delivery"),
        Err(e) => unavailable(e),
    }
}

async fn dead_letter_stats(State(orchestrator): State<Arc<PipelineOrchestrator>>) -> Response {
    match orchestrator.dead_letter_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn list_dead_letters(State(orchestrator): State<Arc<PipelineOrchestrator>>) -> Response {
    match orchestrator.list_dead_letters().await {
        Ok(items) => {
            let summaries: Vec<DeadLetterSummary> = items.iter().map(DeadLetterSummary::from).collect();
            Json(summaries).into_response()
        }
        Err(e) => unavailable(e),
    }
}

async fn requeue_dead_letter(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_dead_letter_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match orchestrator.requeue_dead_letter(&id).await {
        Ok(Some(task_id)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "requeued", "task_id": task_id })),
        )
            .into_response(),
        Ok(None) => not_found("dead-letter item"),
        Err(e) => unavailable(e),
    }
}

async fn delete_dead_letter(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_dead_letter_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match orchestrator.delete_dead_letter(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("dead-letter item"),
        Err(e) => unavailable(e),
    }
}
