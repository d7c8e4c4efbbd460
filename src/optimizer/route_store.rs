// Copyright 2025 Cowboy AI, LLC.

//! Route plan persistence

use super::routing::AlgorithmUsed;
use super::scoring::ScoreBreakdown;
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use crate::identifiers::{DriverId, LoadId, RequestId, RouteId, VehicleId};
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Route plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutePlanStatus {
    /// Backing a committed assignment
    Planned,
    /// Written but the assignment never landed
    Discarded,
}

/// A route chosen for a load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Route key
    pub route_id: RouteId,
    /// Request that produced it
    pub request_id: RequestId,
    /// Load
    pub load_id: LoadId,
    /// Vehicle
    pub vehicle_id: VehicleId,
    /// Driver
    pub driver_id: Option<DriverId>,
    /// Polyline from pickup to delivery
    pub geometry: Vec<GeoPoint>,
    /// Route distance
    pub distance_miles: f64,
    /// Route duration
    pub duration_minutes: f64,
    /// Path that produced the geometry
    pub algorithm_used: AlgorithmUsed,
    /// Whether the duration reflects live traffic
    pub traffic_considered: bool,
    /// Sub-scores of the chosen candidate
    pub score_breakdown: ScoreBreakdown,
    /// Plan status
    pub status: RoutePlanStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Stores route plans
#[async_trait]
pub trait RoutePlanStore: Send + Sync + fmt::Debug {
    /// Insert or replace a plan
    async fn save(&self, plan: &RoutePlan) -> Result<(), GraphStoreError>;

    /// Fetch a plan
    async fn get(&self, route_id: &RouteId) -> Result<Option<RoutePlan>, GraphStoreError>;

    /// Change a plan's status; unknown plans are ignored
    async fn set_status(
        &self,
        route_id: &RouteId,
        status: RoutePlanStatus,
    ) -> Result<(), GraphStoreError> {
        if let Some(mut plan) = self.get(route_id).await? {
            if plan.status != status {
                plan.status = status;
                self.save(&plan).await?;
            }
        }
        Ok(())
    }
}

/// Route plans held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoutePlanStore {
    plans: Arc<RwLock<HashMap<RouteId, RoutePlan>>>,
}

impl InMemoryRoutePlanStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans recorded for a load
    pub async fn for_load(&self, load_id: &LoadId) -> Vec<RoutePlan> {
        let mut plans: Vec<RoutePlan> = self
            .plans
            .read()
            .await
            .values()
            .filter(|plan| &plan.load_id == load_id)
            .cloned()
            .collect();
        plans.sort_by_key(|plan| plan.created_at);
        plans
    }
}

#[async_trait]
impl RoutePlanStore for InMemoryRoutePlanStore {
    async fn save(&self, plan: &RoutePlan) -> Result<(), GraphStoreError> {
        self.plans
            .write()
            .await
            .insert(plan.route_id.clone(), plan.clone());
        Ok(())
    }

    async fn get(&self, route_id: &RouteId) -> Result<Option<RoutePlan>, GraphStoreError> {
        Ok(self.plans.read().await.get(route_id).cloned())
    }
}

/// Route plans in a JetStream KV bucket, one `route.<id>` key per plan
pub struct NatsKvRoutePlanStore {
    kv: kv::Store,
    bucket: String,
}

impl fmt::Debug for NatsKvRoutePlanStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsKvRoutePlanStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl NatsKvRoutePlanStore {
    /// Open the bucket, creating it when missing
    pub async fn new(client: Client, bucket: impl Into<String>) -> Result<Self, GraphStoreError> {
        let bucket = bucket.into();
        let js = jetstream::new(client);
        let kv = match js.get_key_value(&bucket).await {
            Ok(kv) => kv,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: bucket.clone(),
                    history: 3,
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    GraphStoreError::Unavailable(format!("Failed to create KV bucket: {}", e))
                })?,
        };
        Ok(Self { kv, bucket })
    }

    fn key(route_id: &RouteId) -> String {
        format!("route.{}", route_id)
    }
}

#[async_trait]
impl RoutePlanStore for NatsKvRoutePlanStore {
    async fn save(&self, plan: &RoutePlan) -> Result<(), GraphStoreError> {
        let key = Self::key(&plan.route_id);
        let value = serde_json::to_vec(plan)?;
        self.kv
            .put(&key, value.into())
            .await
            .map_err(|e| GraphStoreError::Unavailable(format!("Failed to write {}: {}", key, e)))?;
        debug!(key = %key, status = ?plan.status, "Route plan written");
        Ok(())
    }

    async fn get(&self, route_id: &RouteId) -> Result<Option<RoutePlan>, GraphStoreError> {
        let key = Self::key(route_id);
        let value = self
            .kv
            .get(&key)
            .await
            .map_err(|e| GraphStoreError::Unavailable(format!("Failed to read {}: {}", key, e)))?;
        Ok(value.map(|raw| serde_json::from_slice(&raw)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(route: &str) -> RoutePlan {
        RoutePlan {
            route_id: RouteId::new(route),
            request_id: RequestId::new("req-1"),
            load_id: LoadId::new("L1"),
            vehicle_id: VehicleId::new("V1"),
            driver_id: Some(DriverId::new("D1")),
            geometry: vec![GeoPoint::new(41.0, -87.0), GeoPoint::new(42.0, -88.0)],
            distance_miles: 85.0,
            duration_minutes: 170.0,
            algorithm_used: AlgorithmUsed::StraightLineFallback,
            traffic_considered: false,
            score_breakdown: ScoreBreakdown {
                proximity_score: 90.0,
                vehicle_suitability_score: 100.0,
                carrier_performance_score: 93.5,
                cost_efficiency_score: 100.0,
                timeline_feasibility_score: 100.0,
                composite_score: 96.2,
            },
            status: RoutePlanStatus::Planned,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_discard() {
        let store = InMemoryRoutePlanStore::new();
        store.save(&plan("R1")).await.unwrap();

        store
            .set_status(&RouteId::new("R1"), RoutePlanStatus::Discarded)
            .await
            .unwrap();
        let stored = store.get(&RouteId::new("R1")).await.unwrap().unwrap();
        assert_eq!(stored.status, RoutePlanStatus::Discarded);
        assert_eq!(store.for_load(&LoadId::new("L1")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_of_unknown_plan_is_ignored() {
        let store = InMemoryRoutePlanStore::new();
        assert!(store
            .set_status(&RouteId::new("missing"), RoutePlanStatus::Discarded)
            .await
            .is_ok());
    }
}
