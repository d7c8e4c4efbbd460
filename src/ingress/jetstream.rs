// Copyright 2025 Cowboy AI, LLC.

//! JetStream source feeding the ingress pool

use super::{IngressConfig, IngressError, IngressPool};
use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::{self, stream, AckKind};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Durable pull consumer over the fleet event stream
///
/// A message is acknowledged only after its event was applied or parked;
/// messages whose outcome is [`super::DeliveryOutcome::Failed`] are negatively
/// acknowledged so the server redelivers them.
pub struct JetStreamEventSource {
    consumer: PullConsumer,
    pool: Arc<IngressPool>,
}

impl JetStreamEventSource {
    /// Open the stream and durable consumer named in `config`
    pub async fn connect(
        context: &jetstream::Context,
        config: &IngressConfig,
        pool: Arc<IngressPool>,
    ) -> Result<Self, IngressError> {
        let stream = context
            .get_or_create_stream(stream::Config {
                name: config.stream_name.clone(),
                subjects: config.subjects.clone(),
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| IngressError::Source(format!("Failed to open stream: {}", e)))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| IngressError::Source(format!("Failed to create consumer: {}", e)))?;

        info!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            "Fleet event source ready"
        );
        Ok(Self { consumer, pool })
    }

    /// Pump messages into the pool until `shutdown` flips or the stream ends
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngressError> {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| IngressError::Source(format!("Failed to pull messages: {}", e)))?;

        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = messages.next() => next,
            };
            let Some(next) = next else { break };
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Failed to receive fleet event");
                    continue;
                }
            };

            let receipt = match self.pool.dispatch_raw(&message.payload).await {
                Ok(receipt) => receipt,
                Err(IngressError::Closed) => {
                    if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                        warn!(error = %e, "Failed to nak message");
                    }
                    break;
                }
                Err(e) => return Err(e),
            };

            tokio::spawn(async move {
                let settled = matches!(receipt.await, Ok(outcome) if outcome.is_settled());
                let result = if settled {
                    message.ack().await
                } else {
                    message.ack_with(AckKind::Nak(None)).await
                };
                match result {
                    Ok(()) => debug!(settled, "Fleet event acknowledged"),
                    Err(e) => warn!(error = %e, "Failed to acknowledge fleet event"),
                }
            });
        }

        info!("Fleet event source stopped");
        Ok(())
    }
}
