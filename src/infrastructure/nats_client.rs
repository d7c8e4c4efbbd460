// Copyright 2025 Cowboy AI, LLC.

//! NATS connection shared by ingress, egress and the KV-backed stores

use async_nats::jetstream::{self, stream, Context as JetStreamContext};
use async_nats::{Client, ConnectOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Connection-level failures
#[derive(Debug, Error)]
pub enum NatsError {
    /// Server unreachable or handshake refused
    #[error("nats connection failed: {0}")]
    ConnectionFailed(String),

    /// Stream or bucket setup failed
    #[error("jetstream: {0}")]
    JetStreamError(String),

    /// Settings rejected before connecting
    #[error("nats config: {0}")]
    ConfigurationError(String),
}

impl From<async_nats::Error> for NatsError {
    fn from(err: async_nats::Error) -> Self {
        NatsError::ConnectionFailed(err.to_string())
    }
}

impl From<async_nats::jetstream::Error> for NatsError {
    fn from(err: async_nats::jetstream::Error) -> Self {
        NatsError::JetStreamError(err.to_string())
    }
}

/// Connection settings, the `nats` section of the engine config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Username, paired with `password`
    pub user: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Require TLS
    pub tls_required: bool,

    /// Handshake timeout
    pub connection_timeout_secs: u64,

    /// Delay between reconnects
    pub reconnect_interval_secs: u64,

    /// Reconnect cap, 0 retries forever
    pub max_reconnects: usize,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            tls_required: false,
            connection_timeout_secs: 10,
            reconnect_interval_secs: 5,
            max_reconnects: 0,
        }
    }
}

impl NatsConfig {
    /// Reject settings the client cannot connect with
    pub fn validate(&self) -> Result<(), NatsError> {
        if self.url.trim().is_empty() {
            return Err(NatsError::ConfigurationError("url must not be empty".to_string()));
        }
        if self.user.is_some() != self.password.is_some() {
            return Err(NatsError::ConfigurationError(
                "user and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Core client plus its JetStream context
#[derive(Debug, Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Validate `config` and connect
    pub async fn connect(config: NatsConfig) -> Result<Self, NatsError> {
        config.validate()?;

        let reconnect_interval = config.reconnect_interval_secs;
        let max_reconnects = config.max_reconnects;
        let mut options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .reconnect_delay_callback(move |attempts| {
                if max_reconnects > 0 && attempts >= max_reconnects {
                    Duration::from_secs(0)
                } else {
                    Duration::from_secs(reconnect_interval)
                }
            })
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::ClientError(err) => warn!(error = %err, "NATS client error"),
                    _ => {}
                }
            });

        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }
        if config.tls_required {
            options = options.require_tls(true);
        }

        let client = options.connect(&config.url).await.map_err(|e| {
            NatsError::ConnectionFailed(format!("{}: {}", config.url, e))
        })?;
        let jetstream = jetstream::new(client.clone());
        info!(url = %config.url, "Connected to NATS");

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Core client for request-reply
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// JetStream context for streams and KV
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Settings in effect
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Round-trip probe
    pub async fn is_connected(&self) -> bool {
        self.client.flush().await.is_ok()
    }

    /// Get or create a file-backed stream over `subjects`
    pub async fn ensure_stream(
        &self,
        name: &str,
        subjects: Vec<String>,
    ) -> Result<stream::Stream, NatsError> {
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: name.to_string(),
                subjects,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| NatsError::JetStreamError(format!("stream {}: {}", name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.connection_timeout_secs, 10);
        assert_eq!(config.max_reconnects, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let config = NatsConfig {
            user: Some("dispatcher".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NatsError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NatsConfig =
            serde_json::from_str(r#"{"url": "nats://fleet:4222"}"#).unwrap();
        assert_eq!(config.url, "nats://fleet:4222");
        assert_eq!(config.reconnect_interval_secs, 5);
    }
}
