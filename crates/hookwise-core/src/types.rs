use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Newtype wrappers for type safety

/// Provider-issued delivery identifier (opaque, globally unique).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for DeliveryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeliveryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Delivery records

/// One inbound webhook event instance.
///
/// Built once by the orchestrator and handed to the storage port. There are
/// no setters: after construction the record is only ever read or cloned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    id: DeliveryId,
    event: String,
    action: Option<String>,
    payload: Vec<u8>,
    received_at: DateTime<Utc>,
    installation_id: Option<i64>,
    payload_hash: Option<String>,
}

impl WebhookDelivery {
    pub fn new(id: DeliveryId, event: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            event: event.into(),
            action: None,
            payload: payload.into(),
            received_at: Utc::now(),
            installation_id: None,
            payload_hash: None,
        }
    }

    pub fn with_action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn with_installation(mut self, installation_id: Option<i64>) -> Self {
        self.installation_id = installation_id;
        self
    }

    pub fn with_payload_hash(mut self, hash: impl Into<String>) -> Self {
        self.payload_hash = Some(hash.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn id(&self) -> &DeliveryId {
        &self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Raw body bytes as received on the wire.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn installation_id(&self) -> Option<i64> {
        self.installation_id
    }

    pub fn payload_hash(&self) -> Option<&str> {
        self.payload_hash.as_deref()
    }

    /// Decode the raw body as JSON.
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }

    /// `event` or `event.action`, used in logs and stats.
    pub fn qualified_event(&self) -> String {
        match &self.action {
            Some(action) => format!("{}.{}", self.event, action),
            None => self.event.clone(),
        }
    }
}

/// Marker that a key was processed (or is in flight) until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl IdempotencyRecord {
    pub fn new(key: impl Into<String>, ttl: std::time::Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_delivery_id_display_and_empty() {
        let id = DeliveryId::new("72d3162e-cc78-11e3-81ab-4c9367dc0958");
        assert_eq!(id.to_string(), "72d3162e-cc78-11e3-81ab-4c9367dc0958");
        assert!(!id.is_empty());
        assert!(DeliveryId::new("  ").is_empty());
    }

    #[test]
    fn test_delivery_builder() {
        let delivery = WebhookDelivery::new("d-1".into(), "issues", br#"{"action":"opened"}"#.to_vec())
            .with_action(Some("opened".to_string()))
            .with_installation(Some(42))
            .with_payload_hash("abc");

        assert_eq!(delivery.id().as_str(), "d-1");
        assert_eq!(delivery.event(), "issues");
        assert_eq!(delivery.action(), Some("opened"));
        assert_eq!(delivery.installation_id(), Some(42));
        assert_eq!(delivery.payload_hash(), Some("abc"));
        assert_eq!(delivery.qualified_event(), "issues.opened");
        assert_eq!(delivery.payload_json().unwrap()["action"], "opened");
    }

    #[test]
    fn test_qualified_event_without_action() {
        let delivery = WebhookDelivery::new("d-2".into(), "push", b"{}".to_vec());
        assert_eq!(delivery.qualified_event(), "push");
    }

    #[test]
    fn test_idempotency_record_expiry() {
        let record = IdempotencyRecord::new("key", Duration::from_secs(60));
        assert!(!record.is_expired());
        assert!(record.is_expired_at(record.created_at + chrono::Duration::seconds(60)));
        assert!(!record.is_expired_at(record.created_at + chrono::Duration::seconds(59)));
    }

    #[test]
    fn test_idempotency_record_huge_ttl_saturates() {
        let record = IdempotencyRecord::new("key", Duration::from_secs(u64::MAX));
        assert!(!record.is_expired());
    }
}
