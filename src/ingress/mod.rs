// Copyright 2025 Cowboy AI, LLC.

//! Partitioned ingress worker pool
//!
//! Events are routed to one of N workers by a stable hash of their entity
//! key, so all events for one entity are applied in arrival order while
//! different entities proceed in parallel. Store outages are retried with
//! exponential backoff; anything else that fails is parked in the
//! dead-letter sink and the worker moves on.

pub mod jetstream;

use crate::errors::EventValidationError;
use crate::events::EventEnvelope;
use crate::metrics::{names, EngineMetrics, MetricsTimer};
use crate::sync::{Ack, DeadLetter, DeadLetterSink, GraphSynchronizer};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use self::jetstream::JetStreamEventSource;

/// Ingress failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IngressError {
    /// The pool was shut down
    #[error("Ingress pool is shut down")]
    Closed,

    /// The event source could not be opened or read
    #[error("Event source error: {0}")]
    Source(String),
}

/// Backoff for retryable apply failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt, counting from 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Ingress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Number of partition workers
    pub workers: usize,
    /// Bounded queue depth per worker
    pub queue_depth: usize,
    /// Retry policy for store outages
    pub retry: RetryPolicy,
    /// JetStream stream carrying fleet events
    pub stream_name: String,
    /// Subjects captured by the stream
    pub subjects: Vec<String>,
    /// Durable consumer name
    pub consumer_name: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
            retry: RetryPolicy::default(),
            stream_name: "FLEET_EVENTS".to_string(),
            subjects: vec!["fleet.events.>".to_string()],
            consumer_name: "logistics-graph-sync".to_string(),
        }
    }
}

/// How an event left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Applied to the graph, possibly as a no-op
    Applied(Ack),
    /// Parked in the dead-letter sink
    DeadLettered,
    /// Neither applied nor parked; the source should redeliver
    Failed,
}

impl DeliveryOutcome {
    /// Whether the source may acknowledge the message
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed)
    }

    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Applied(_) => "applied",
            DeliveryOutcome::DeadLettered => "dead_lettered",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

struct WorkItem {
    envelope: EventEnvelope,
    done: Option<oneshot::Sender<DeliveryOutcome>>,
}

struct Worker {
    index: usize,
    synchronizer: Arc<GraphSynchronizer>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: EngineMetrics,
    retry: RetryPolicy,
}

/// Partitioned pool of synchronizer workers
pub struct IngressPool {
    senders: RwLock<Option<Vec<mpsc::Sender<WorkItem>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: EngineMetrics,
}

impl IngressPool {
    /// Spawn the workers
    pub fn start(
        config: &IngressConfig,
        synchronizer: Arc<GraphSynchronizer>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: EngineMetrics,
    ) -> Self {
        let workers = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            let worker = Worker {
                index,
                synchronizer: synchronizer.clone(),
                dead_letters: dead_letters.clone(),
                metrics: metrics.clone(),
                retry: config.retry.clone(),
            };
            senders.push(tx);
            handles.push(tokio::spawn(worker.run(rx)));
        }
        info!(workers, queue_depth = config.queue_depth, "Ingress pool started");

        Self {
            senders: RwLock::new(Some(senders)),
            handles: Mutex::new(handles),
            dead_letters,
            metrics,
        }
    }

    /// Queue a validated event, returning a receiver for its outcome
    ///
    /// Waits while the target worker's queue is full.
    pub async fn dispatch(
        &self,
        envelope: EventEnvelope,
    ) -> Result<oneshot::Receiver<DeliveryOutcome>, IngressError> {
        let sender = {
            let guard = self.senders.read().await;
            let senders = guard.as_ref().ok_or(IngressError::Closed)?;
            senders[partition(envelope.partition_key(), senders.len())].clone()
        };
        let (done, receipt) = oneshot::channel();
        sender
            .send(WorkItem {
                envelope,
                done: Some(done),
            })
            .await
            .map_err(|_| IngressError::Closed)?;
        Ok(receipt)
    }

    /// Validate raw bytes and queue them; malformed events are parked at once
    pub async fn dispatch_raw(
        &self,
        bytes: &[u8],
    ) -> Result<oneshot::Receiver<DeliveryOutcome>, IngressError> {
        match EventEnvelope::parse(bytes) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(err) => {
                let outcome = self.park_malformed(bytes, &err).await;
                let (done, receipt) = oneshot::channel();
                let _ = done.send(outcome);
                Ok(receipt)
            }
        }
    }

    async fn park_malformed(&self, bytes: &[u8], err: &EventValidationError) -> DeliveryOutcome {
        warn!(error = %err, "Rejecting malformed event");
        match self.dead_letters.park(DeadLetter::unparseable(bytes, err)).await {
            Ok(()) => {
                self.metrics
                    .increment_labeled(names::EVENTS_DEAD_LETTERED, "malformed")
                    .await;
                DeliveryOutcome::DeadLettered
            }
            Err(park_err) => {
                error!(error = %park_err, "Failed to park malformed event");
                DeliveryOutcome::Failed
            }
        }
    }

    /// Stop accepting events, drain the queues and wait for the workers
    pub async fn shutdown(&self) {
        self.senders.write().await.take();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Ingress worker panicked");
            }
        }
        info!("Ingress pool stopped");
    }
}

/// Worker index for an entity key
pub fn partition(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

impl Worker {
    async fn run(self, mut queue: mpsc::Receiver<WorkItem>) {
        while let Some(item) = queue.recv().await {
            let outcome = self.process(&item.envelope).await;
            if let Some(done) = item.done {
                let _ = done.send(outcome);
            }
        }
        debug!(worker = self.index, "Ingress worker drained");
    }

    async fn process(&self, envelope: &EventEnvelope) -> DeliveryOutcome {
        let timer = MetricsTimer::new(&self.metrics, names::EVENT_APPLY);
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.synchronizer.apply(envelope).await {
                Ok(ack) => {
                    let counter = match ack {
                        Ack::Applied { .. } => names::EVENTS_APPLIED,
                        Ack::Unchanged => names::EVENTS_UNCHANGED,
                        Ack::Stale => names::EVENTS_STALE,
                        Ack::Ignored => names::EVENTS_IGNORED,
                    };
                    self.metrics
                        .increment_labeled(counter, &envelope.event_type)
                        .await;
                    break DeliveryOutcome::Applied(ack);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        event_id = %envelope.event_id,
                        entity_id = %envelope.entity_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying event after store failure"
                    );
                    self.metrics.increment(names::EVENT_RETRIES).await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let letter = DeadLetter::from_envelope(envelope, &err, attempt);
                    break match self.dead_letters.park(letter).await {
                        Ok(()) => {
                            self.metrics
                                .increment_labeled(names::EVENTS_DEAD_LETTERED, err.kind())
                                .await;
                            DeliveryOutcome::DeadLettered
                        }
                        Err(park_err) => {
                            error!(
                                event_id = %envelope.event_id,
                                error = %park_err,
                                "Failed to park event"
                            );
                            DeliveryOutcome::Failed
                        }
                    };
                }
            }
        };
        timer.record().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, InMemoryGraphStore, NodeRef};
    use crate::sync::InMemoryDeadLetterSink;
    use serde_json::json;

    fn config(workers: usize) -> IngressConfig {
        IngressConfig {
            workers,
            queue_depth: 8,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 4,
            },
            ..Default::default()
        }
    }

    fn raw(event_type: &str, entity_id: &str, minute: u32, data: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event_id": format!("e-{}-{}", entity_id, minute),
            "event_type": event_type,
            "timestamp": format!("2025-06-01T09:{:02}:00Z", minute),
            "entity_id": entity_id,
            "data": data,
        }))
        .unwrap()
    }

    fn pool(
        store: Arc<InMemoryGraphStore>,
        workers: usize,
    ) -> (IngressPool, InMemoryDeadLetterSink, EngineMetrics) {
        let sink = InMemoryDeadLetterSink::new();
        let metrics = EngineMetrics::new();
        let pool = IngressPool::start(
            &config(workers),
            Arc::new(GraphSynchronizer::new(store)),
            Arc::new(sink.clone()),
            metrics.clone(),
        );
        (pool, sink, metrics)
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_partition_is_stable() {
        assert_eq!(partition("D1", 8), partition("D1", 8));
        assert!(partition("anything", 3) < 3);
        assert_eq!(partition("D1", 0), 0);
    }

    #[tokio::test]
    async fn test_outage_is_retried() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (pool, sink, metrics) = pool(store.clone(), 2);
        store.fail_next(2);

        let receipt = pool
            .dispatch_raw(&raw("DRIVER_LOCATION_UPDATED", "D1", 0, json!({"latitude": 41.0, "longitude": -87.0})))
            .await
            .unwrap();
        assert!(matches!(receipt.await.unwrap(), DeliveryOutcome::Applied(Ack::Applied { .. })));
        assert_eq!(metrics.counter(names::EVENT_RETRIES).await, 2);
        assert!(sink.is_empty().await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_parked() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (pool, sink, _) = pool(store.clone(), 1);
        store.fail_next(10);

        let receipt = pool
            .dispatch_raw(&raw("CARRIER_REGISTERED", "C1", 0, json!({"name": "Acme"})))
            .await
            .unwrap();
        assert_eq!(receipt.await.unwrap(), DeliveryOutcome::DeadLettered);

        let letters = sink.letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].error_kind, "store_unavailable");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_event_never_reaches_workers() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (pool, sink, _) = pool(store.clone(), 1);

        let receipt = pool.dispatch_raw(b"{\"event_type\": 7}").await.unwrap();
        assert_eq!(receipt.await.unwrap(), DeliveryOutcome::DeadLettered);
        assert_eq!(sink.len().await, 1);
        assert!(store.snapshot().await.nodes.is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_events() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (pool, _, _) = pool(store.clone(), 2);

        for minute in 0..10 {
            let bytes = raw(
                "DRIVER_LOCATION_UPDATED",
                &format!("D{}", minute),
                minute,
                json!({"latitude": 40.0, "longitude": -88.0}),
            );
            pool.dispatch_raw(&bytes).await.unwrap();
        }
        pool.shutdown().await;

        assert_eq!(store.nodes_by_label(crate::graph::NodeLabel::Driver).await.unwrap().len(), 10);
        assert!(matches!(
            pool.dispatch_raw(&raw("CARRIER_REGISTERED", "C1", 0, json!({}))).await,
            Err(IngressError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_same_entity_applied_in_order() {
        let store = Arc::new(InMemoryGraphStore::new());
        let (pool, _, _) = pool(store.clone(), 4);

        let mut receipts = Vec::new();
        for (minute, lat) in [(1, 40.0), (2, 41.0), (3, 42.0)] {
            let bytes = raw(
                "DRIVER_LOCATION_UPDATED",
                "D1",
                minute,
                json!({"latitude": lat, "longitude": -88.0}),
            );
            receipts.push(pool.dispatch_raw(&bytes).await.unwrap());
        }
        for receipt in receipts {
            assert!(receipt.await.unwrap().is_settled());
        }

        let node = store.node(&NodeRef::driver("D1")).await.unwrap().unwrap();
        assert_eq!(node.properties["position"]["latitude"], json!(42.0));
        pool.shutdown().await;
    }
}
