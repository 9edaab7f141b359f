//! Ingestion state machine
//!
//! A delivery moves strictly forward through four immutable stages, each one
//! owning its predecessor:
//!
//! `Untrusted` -> `Validated` -> `VerifiedUnique` -> `Persisted`
//!
//! Every transition consumes the previous stage, so going backwards or
//! skipping a stage does not type-check. Only a [`Persisted`] delivery can be
//! routed.

use chrono::{DateTime, Utc};
use hookwise_core::{DeliveryId, WebhookDelivery};
use serde::Serialize;
use thiserror::Error;

use crate::signature::{payload_hash, SignatureValidator};

/// Why a delivery was refused. Terminal: rejected deliveries are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Contract violation inside the orchestrator; never caused by input.
    #[error("Missing state: {0}")]
    MissingState(&'static str),

    #[error("State mismatch: expected delivery {expected}, got {actual}")]
    StateMismatch { expected: String, actual: String },
}

/// Raw delivery as handed over by the front door
#[derive(Debug, Clone)]
pub struct WebhookCommand {
    pub delivery_id: DeliveryId,
    pub event: String,
    pub signature: Option<String>,
    pub body: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl WebhookCommand {
    pub fn new(
        delivery_id: impl Into<DeliveryId>,
        event: impl Into<String>,
        signature: Option<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            event: event.into(),
            signature,
            body: body.into(),
            received_at: Utc::now(),
        }
    }
}

/// How the Untrusted -> Validated transition was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// HMAC matched the shared secret
    Signature,
    /// Re-processing of a delivery that passed signature checks on first ingestion
    Replay,
}

/// Stage 1: received, nothing checked yet
#[derive(Debug, Clone)]
pub struct Untrusted {
    command: WebhookCommand,
}

impl Untrusted {
    /// Wrap a raw command; the delivery id and event name are required
    pub fn new(command: WebhookCommand) -> Result<Self, Rejection> {
        if command.delivery_id.is_empty() {
            return Err(Rejection::MissingField("delivery id"));
        }
        if command.event.trim().is_empty() {
            return Err(Rejection::MissingField("event name"));
        }
        Ok(Self { command })
    }

    /// Rebuild a command from a stored delivery for replay
    pub fn from_delivery(delivery: &WebhookDelivery) -> Result<Self, Rejection> {
        Self::new(WebhookCommand {
            delivery_id: delivery.id().clone(),
            event: delivery.event().to_string(),
            signature: None,
            body: delivery.payload().to_vec(),
            received_at: delivery.received_at(),
        })
    }

    pub fn command(&self) -> &WebhookCommand {
        &self.command
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        &self.command.delivery_id
    }
}

/// Stage 2: authenticity established and the body parsed
#[derive(Debug, Clone)]
pub struct Validated {
    untrusted: Untrusted,
    verification: Verification,
    payload: serde_json::Value,
}

impl Validated {
    /// Verify the HMAC signature, then parse the body. Fails closed.
    pub fn verify(untrusted: Untrusted, validator: &SignatureValidator) -> Result<Self, Rejection> {
        let command = untrusted.command();
        let signature = command
            .signature
            .as_deref()
            .ok_or(Rejection::MissingSignature)?;

        if !validator.is_valid(&command.body, signature) {
            return Err(Rejection::InvalidSignature);
        }

        Self::parse(untrusted, Verification::Signature)
    }

    /// Accept a replayed delivery without a signature check.
    ///
    /// The signature header is not persisted, so a replay cannot be
    /// re-verified; it was verified when the delivery was first ingested.
    pub fn replayed(untrusted: Untrusted) -> Result<Self, Rejection> {
        Self::parse(untrusted, Verification::Replay)
    }

    fn parse(untrusted: Untrusted, verification: Verification) -> Result<Self, Rejection> {
        let payload = serde_json::from_slice(&untrusted.command().body)
            .map_err(|e| Rejection::MalformedPayload(e.to_string()))?;

        Ok(Self {
            untrusted,
            verification,
            payload,
        })
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        self.untrusted.delivery_id()
    }

    pub fn event(&self) -> &str {
        &self.untrusted.command().event
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// `action` field of the body, if any
    pub fn action(&self) -> Option<&str> {
        self.payload.get("action").and_then(|v| v.as_str())
    }

    /// `installation.id` field of the body, if any
    pub fn installation_id(&self) -> Option<i64> {
        self.payload
            .get("installation")
            .and_then(|i| i.get("id"))
            .and_then(|v| v.as_i64())
    }
}

/// Stage 3: the idempotency key was recorded by this ingestion
#[derive(Debug, Clone)]
pub struct VerifiedUnique {
    validated: Validated,
    idempotency_key: String,
}

impl VerifiedUnique {
    /// Requires the key that `IdempotencyStore::record` accepted
    pub fn new(validated: Validated, idempotency_key: impl Into<String>) -> Result<Self, Rejection> {
        let idempotency_key = idempotency_key.into();
        if idempotency_key.is_empty() {
            return Err(Rejection::MissingState("idempotency key"));
        }
        Ok(Self {
            validated,
            idempotency_key,
        })
    }

    pub fn validated(&self) -> &Validated {
        &self.validated
    }

    pub fn delivery_id(&self) -> &DeliveryId {
        self.validated.delivery_id()
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Build the record to hand to the storage port
    pub fn to_delivery(&self) -> WebhookDelivery {
        let command = self.validated.untrusted.command();
        WebhookDelivery::new(command.delivery_id.clone(), command.event.clone(), command.body.clone())
            .with_action(self.validated.action().map(String::from))
            .with_installation(self.validated.installation_id())
            .with_payload_hash(payload_hash(&command.body))
            .with_received_at(command.received_at)
    }
}

/// Stage 4: durably stored; the only stage eligible for routing
#[derive(Debug, Clone)]
pub struct Persisted {
    unique: VerifiedUnique,
    delivery: WebhookDelivery,
}

impl Persisted {
    /// Requires the storage-confirmed record for the same delivery id
    pub fn new(unique: VerifiedUnique, delivery: WebhookDelivery) -> Result<Self, Rejection> {
        if delivery.id() != unique.delivery_id() {
            return Err(Rejection::StateMismatch {
                expected: unique.delivery_id().to_string(),
                actual: delivery.id().to_string(),
            });
        }
        Ok(Self { unique, delivery })
    }

    pub fn delivery(&self) -> &WebhookDelivery {
        &self.delivery
    }

    pub fn payload(&self) -> &serde_json::Value {
        self.unique.validated.payload()
    }

    pub fn idempotency_key(&self) -> &str {
        self.unique.idempotency_key()
    }

    pub fn verification(&self) -> Verification {
        self.unique.validated.verification()
    }
}
