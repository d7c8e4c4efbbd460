// Copyright 2025 Cowboy AI, LLC.

//! Dead-letter path for events that cannot be applied

use crate::errors::{EventValidationError, PublishError, SyncError};
use crate::events::EventEnvelope;
use crate::identifiers::EventId;
use async_nats::jetstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// An event parked for operator attention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Event identifier, when the envelope could be read
    pub event_id: Option<EventId>,
    /// Event type, when the envelope could be read
    pub event_type: Option<String>,
    /// Entity key, when the envelope could be read
    pub entity_id: Option<String>,
    /// Machine-readable cause
    pub error_kind: String,
    /// Human-readable cause
    pub reason: String,
    /// Apply attempts made before parking
    pub attempts: u32,
    /// The event as received
    pub payload: Value,
    /// When the event was parked
    pub parked_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Park a parsed event that failed to apply
    pub fn from_envelope(envelope: &EventEnvelope, err: &SyncError, attempts: u32) -> Self {
        Self {
            event_id: Some(envelope.event_id.clone()),
            event_type: Some(envelope.event_type.clone()),
            entity_id: Some(envelope.entity_id.clone()),
            error_kind: err.kind().to_string(),
            reason: err.to_string(),
            attempts,
            payload: envelope.raw.clone(),
            parked_at: Utc::now(),
        }
    }

    /// Park bytes that never became an envelope
    pub fn unparseable(bytes: &[u8], err: &EventValidationError) -> Self {
        let payload = serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));
        let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            event_id: field("event_id").map(EventId::new),
            event_type: field("event_type"),
            entity_id: field("entity_id"),
            error_kind: "malformed".to_string(),
            reason: err.to_string(),
            attempts: 0,
            payload,
            parked_at: Utc::now(),
        }
    }
}

/// Destination for dead letters
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Park one event
    async fn park(&self, letter: DeadLetter) -> Result<(), PublishError>;
}

/// Dead letters kept in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Parked letters in arrival order
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    /// Number of parked letters
    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    /// Whether nothing was parked
    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn park(&self, letter: DeadLetter) -> Result<(), PublishError> {
        error!(
            event_id = ?letter.event_id,
            event_type = ?letter.event_type,
            reason = %letter.reason,
            "Event dead-lettered"
        );
        self.letters.write().await.push(letter);
        Ok(())
    }
}

/// Dead letters published to a JetStream subject
pub struct JetStreamDeadLetterSink {
    context: jetstream::Context,
    subject: String,
}

impl JetStreamDeadLetterSink {
    /// Publish to `<prefix>.dlq`
    pub fn new(context: jetstream::Context, prefix: &str) -> Self {
        Self {
            context,
            subject: format!("{}.dlq", prefix),
        }
    }

    /// Subject letters are published on
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl DeadLetterSink for JetStreamDeadLetterSink {
    async fn park(&self, letter: DeadLetter) -> Result<(), PublishError> {
        error!(
            event_id = ?letter.event_id,
            event_type = ?letter.event_type,
            subject = %self.subject,
            reason = %letter.reason,
            "Event dead-lettered"
        );
        let payload = serde_json::to_vec(&letter)?;
        self.context
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| PublishError::Broker(format!("Failed to publish dead letter: {}", e)))?
            .await
            .map_err(|e| PublishError::Broker(format!("Dead letter not acknowledged: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unparseable_keeps_what_it_can() {
        let bytes = br#"{"event_id": "e-9", "event_type": "LOAD_CREATED", "entity_id": "L1"}"#;
        let err = EventValidationError::MalformedEnvelope("missing timestamp".into());
        let letter = DeadLetter::unparseable(bytes, &err);
        assert_eq!(letter.event_id, Some(EventId::new("e-9")));
        assert_eq!(letter.entity_id.as_deref(), Some("L1"));
        assert_eq!(letter.error_kind, "malformed");
    }

    #[test]
    fn test_unparseable_binary_is_kept_as_text() {
        let err = EventValidationError::MalformedEnvelope("eof".into());
        let letter = DeadLetter::unparseable(b"not-json", &err);
        assert_eq!(letter.payload, Value::String("not-json".into()));
        assert!(letter.event_id.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_sink_collects() {
        let sink = InMemoryDeadLetterSink::new();
        let err = EventValidationError::MalformedEnvelope("eof".into());
        sink.park(DeadLetter::unparseable(b"{}", &err)).await.unwrap();
        assert_eq!(sink.len().await, 1);
        assert!(!sink.is_empty().await);
    }
}
