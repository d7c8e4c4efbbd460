// Copyright 2025 Cowboy AI, LLC.

//! Result event publication

use crate::errors::PublishError;
use crate::events::{OutboundEnvelope, ResultEvent};
use async_nats::jetstream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Egress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Prefix of every published subject
    pub subject_prefix: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "logistics".to_string(),
        }
    }
}

/// Publishes result events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one enveloped event
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError>;

    /// Envelope and publish a result event
    async fn publish_event(
        &self,
        event: ResultEvent,
        correlation_id: Option<String>,
    ) -> Result<(), PublishError> {
        self.publish(event.into_envelope(correlation_id)?).await
    }
}

/// Publisher backed by JetStream
pub struct JetStreamEventPublisher {
    context: jetstream::Context,
    prefix: String,
}

impl JetStreamEventPublisher {
    /// Publish below `config.subject_prefix`
    pub fn new(context: jetstream::Context, config: &EgressConfig) -> Self {
        Self {
            context,
            prefix: config.subject_prefix.clone(),
        }
    }

    /// Subject an envelope is published on
    pub fn subject_for(&self, envelope: &OutboundEnvelope) -> String {
        format!("{}.{}", self.prefix, envelope.subject_suffix)
    }
}

#[async_trait]
impl EventPublisher for JetStreamEventPublisher {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError> {
        let subject = self.subject_for(&envelope);
        let payload = serde_json::to_vec(&envelope)?;
        self.context
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| PublishError::Broker(format!("Failed to publish event: {}", e)))?
            .await
            .map_err(|e| PublishError::Broker(format!("Failed to get ack: {}", e)))?;
        debug!(
            subject = %subject,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "Result event published"
        );
        Ok(())
    }
}

/// Publisher that records events for tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<OutboundEnvelope>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryEventPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Published envelopes in order
    pub async fn published(&self) -> Vec<OutboundEnvelope> {
        self.published.read().await.clone()
    }

    /// Published envelopes of one type
    pub async fn of_type(&self, event_type: &str) -> Vec<OutboundEnvelope> {
        self.published
            .read()
            .await
            .iter()
            .filter(|envelope| envelope.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Make subsequent publishes fail
    pub async fn set_failing(&self, failing: bool) {
        *self.fail.write().await = failing;
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), PublishError> {
        if *self.fail.read().await {
            return Err(PublishError::Broker("publisher unavailable".to_string()));
        }
        self.published.write().await.push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RouteOptimized;
    use crate::identifiers::{LoadId, RouteId, VehicleId};
    use crate::optimizer::routing::AlgorithmUsed;

    fn route_optimized() -> ResultEvent {
        ResultEvent::RouteOptimized(RouteOptimized {
            route_id: RouteId::new("R1"),
            load_id: LoadId::new("L1"),
            vehicle_id: VehicleId::new("V1"),
            driver_id: None,
            distance: 12.5,
            duration_minutes: 25.0,
            optimization_score: 81.0,
            algorithm_used: AlgorithmUsed::StraightLineFallback,
            traffic_considered: false,
        })
    }

    #[tokio::test]
    async fn test_envelope_carries_route_key() {
        let publisher = InMemoryEventPublisher::new();
        publisher
            .publish_event(route_optimized(), Some("req-1".to_string()))
            .await
            .unwrap();

        let published = publisher.of_type("ROUTE_OPTIMIZED").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].entity_id, "R1");
        assert_eq!(published[0].entity_type, "route");
        assert_eq!(published[0].subject_suffix, "route.optimized");
        assert_eq!(published[0].data["algorithm_used"], "straight_line_fallback");
    }

    #[tokio::test]
    async fn test_failing_publisher() {
        let publisher = InMemoryEventPublisher::new();
        publisher.set_failing(true).await;
        assert!(publisher.publish_event(route_optimized(), None).await.is_err());
        assert!(publisher.published().await.is_empty());
    }
}
