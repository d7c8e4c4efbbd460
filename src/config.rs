// Copyright 2025 Cowboy AI, LLC.

//! Engine configuration
//!
//! Every section has a usable default, so a config file only needs the
//! settings it changes. Environment overrides are applied on top of the file.

use crate::egress::EgressConfig;
use crate::graph::NatsKvGraphConfig;
use crate::infrastructure::NatsConfig;
use crate::ingress::IngressConfig;
use crate::optimizer::{DiscoveryConfig, OrchestratorConfig, RoutingConfig, ScoringConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// NATS server URL
pub const ENV_NATS_URL: &str = "NATS_URL";
/// Routing provider API key
pub const ENV_MAPS_API_KEY: &str = "MAPS_API_KEY";
/// Routing provider endpoint
pub const ENV_ROUTING_BASE_URL: &str = "ROUTING_BASE_URL";
/// Ingress worker count
pub const ENV_INGRESS_WORKERS: &str = "INGRESS_WORKERS";

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`EngineConfig`]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the engine binary needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// NATS connection
    pub nats: NatsConfig,
    /// Graph KV bucket
    pub graph: NatsKvGraphConfig,
    /// Route plan KV bucket
    pub route_bucket: String,
    /// Event consumption
    pub ingress: IngressConfig,
    /// Result publication
    pub egress: EgressConfig,
    /// Candidate discovery
    pub discovery: DiscoveryConfig,
    /// Candidate scoring
    pub scoring: ScoringConfig,
    /// Route resolution
    pub routing: RoutingConfig,
    /// Request orchestration
    pub orchestrator: OrchestratorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            graph: NatsKvGraphConfig::default(),
            route_bucket: "logistics-routes".to_string(),
            ingress: IngressConfig::default(),
            egress: EgressConfig::default(),
            discovery: DiscoveryConfig::default(),
            scoring: ScoringConfig::default(),
            routing: RoutingConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Load a JSON file; missing sections keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply the process environment on top of this config
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; blank values are ignored
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(url) = read(ENV_NATS_URL) {
            self.nats.url = url;
        }
        if let Some(key) = read(ENV_MAPS_API_KEY) {
            self.routing.api_key = Some(key);
        }
        if let Some(base_url) = read(ENV_ROUTING_BASE_URL) {
            self.routing.base_url = base_url;
        }
        if let Some(workers) = read(ENV_INGRESS_WORKERS) {
            self.ingress.workers = workers.parse().map_err(|e| {
                ConfigError::Invalid(format!("{ENV_INGRESS_WORKERS} must be a count: {e}"))
            })?;
        }
        Ok(self)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.nats
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.ingress.workers == 0 {
            return Err(ConfigError::Invalid("ingress.workers must be positive".to_string()));
        }
        if self.ingress.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ingress.retry.max_attempts must be positive".to_string(),
            ));
        }
        if self.discovery.candidate_cap == 0 {
            return Err(ConfigError::Invalid(
                "discovery.candidate_cap must be positive".to_string(),
            ));
        }
        if !self.scoring.weights.is_valid() {
            return Err(ConfigError::Invalid(
                "scoring.weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if self.scoring.utilization_low > self.scoring.utilization_high {
            return Err(ConfigError::Invalid(
                "scoring.utilization_low must not exceed utilization_high".to_string(),
            ));
        }
        if self.scoring.average_speed_mph <= 0.0 || self.routing.fallback_speed_mph <= 0.0 {
            return Err(ConfigError::Invalid("speeds must be positive".to_string()));
        }
        if self.route_bucket.trim().is_empty() || self.graph.bucket_name.trim().is_empty() {
            return Err(ConfigError::Invalid("bucket names must not be empty".to_string()));
        }
        Ok(())
    }

    /// Subject the engine answers optimization requests on
    pub fn optimize_subject(&self) -> String {
        format!("{}.optimize.request", self.egress.subject_prefix)
    }
}
