// Copyright 2025 Cowboy AI, LLC.

//! Candidate discovery
//!
//! Reads the load and its endpoints, then walks the graph from the origin
//! for available drivers and the vehicles they can take. Discovery only
//! filters; it never ranks beyond distance order.

use super::request::OptimizationRequest;
use crate::errors::DiscoveryError;
use crate::geo::GeoPoint;
use crate::graph::{CandidateFilters, GraphStore, NodeRef, RelationshipType, VehicleAccess};
use crate::identifiers::LoadId;
use crate::model::{defaults, Carrier, Driver, Load, Location, Vehicle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Most candidates handed to the scorer
    pub candidate_cap: usize,
    /// Radius used when a request does not name one
    pub default_radius_miles: f64,
    /// Performance assumed for carriers without figures
    pub unknown_carrier_performance: f64,
    /// Carrier floor used when a request does not name one
    pub min_carrier_performance: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            candidate_cap: 50,
            default_radius_miles: 50.0,
            unknown_carrier_performance: defaults::CARRIER_PERFORMANCE,
            min_carrier_performance: 70.0,
        }
    }
}

/// A load with its resolved endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct LoadContext {
    /// The load
    pub load: Load,
    /// Pickup location
    pub origin: Location,
    /// Delivery location
    pub destination: Location,
}

impl LoadContext {
    /// Pickup coordinate
    pub fn origin_point(&self) -> Option<GeoPoint> {
        self.origin.point
    }

    /// Delivery coordinate
    pub fn destination_point(&self) -> Option<GeoPoint> {
        self.destination.point
    }

    /// Straight-line pickup to delivery distance
    pub fn load_miles(&self) -> f64 {
        match (self.origin.point, self.destination.point) {
            (Some(origin), Some(destination)) => origin.distance_miles(&destination),
            _ => 0.0,
        }
    }
}

/// A driver/vehicle pair eligible for scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Driver
    pub driver: Driver,
    /// Vehicle
    pub vehicle: Vehicle,
    /// Carrier behind the vehicle or driver
    pub carrier: Option<Carrier>,
    /// Driver to pickup distance in miles
    pub distance_miles: f64,
    /// Edge the vehicle was reached through
    pub access: VehicleAccess,
    /// Position in discovery order, used as the final tie-break
    pub discovery_rank: usize,
}

/// Finds candidates for loads
#[derive(Debug, Clone)]
pub struct CandidateDiscovery {
    store: Arc<dyn GraphStore>,
    config: DiscoveryConfig,
}

impl CandidateDiscovery {
    /// Discover over `store`
    pub fn new(store: Arc<dyn GraphStore>, config: DiscoveryConfig) -> Self {
        Self { store, config }
    }

    /// Settings in effect
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Read a load and its pickup and delivery locations
    pub async fn load(&self, load_id: &LoadId) -> Result<LoadContext, DiscoveryError> {
        let load_ref = NodeRef::load(load_id);
        let node = self
            .store
            .node(&load_ref)
            .await?
            .ok_or_else(|| DiscoveryError::LoadNotFound(load_id.clone()))?;
        let load = Load::from_node(&node)?;
        if load.status.is_none() {
            // Only referenced so far, never created
            return Err(DiscoveryError::LoadNotFound(load_id.clone()));
        }

        let origin = self
            .endpoint(&load_ref, RelationshipType::OriginAt, load_id, "pickup")
            .await?;
        let destination = self
            .endpoint(&load_ref, RelationshipType::DestinationAt, load_id, "delivery")
            .await?;

        Ok(LoadContext {
            load,
            origin,
            destination,
        })
    }

    async fn endpoint(
        &self,
        load_ref: &NodeRef,
        rel_type: RelationshipType,
        load_id: &LoadId,
        what: &str,
    ) -> Result<Location, DiscoveryError> {
        let incomplete = |reason: String| DiscoveryError::IncompleteLoad {
            load_id: load_id.clone(),
            reason,
        };
        let edge = self
            .store
            .outgoing(load_ref, rel_type)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| incomplete(format!("no {} location", what)))?;
        let node = self
            .store
            .node(&edge.to)
            .await?
            .ok_or_else(|| incomplete(format!("{} location {} is missing", what, edge.to)))?;
        let location = Location::from_node(&node)?;
        match location.point {
            Some(point) if point.is_valid() => Ok(location),
            _ => Err(incomplete(format!("{} location has no valid coordinate", what))),
        }
    }

    /// Candidates for `context` under the request's constraints
    ///
    /// Ordered by distance, then driver key, then vehicle key. An empty list
    /// is a valid answer.
    pub async fn find_candidates(
        &self,
        context: &LoadContext,
        request: &OptimizationRequest,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        let origin = context
            .origin_point()
            .ok_or_else(|| DiscoveryError::IncompleteLoad {
                load_id: context.load.id.clone(),
                reason: "pickup location has no coordinate".to_string(),
            })?;

        let mut required = context.load.required_capabilities.clone();
        if let Some(extra) = &request.required_capabilities {
            required.extend(extra.iter().cloned());
        }
        let filters = CandidateFilters {
            min_driver_rating: request.min_driver_rating,
            required_capabilities: required,
            min_weight: context.load.weight,
            min_volume: context.load.volume,
            as_of,
        };
        let radius = if request.max_driver_distance > 0.0 {
            request.max_driver_distance
        } else {
            self.config.default_radius_miles
        };
        let carrier_floor = request
            .min_carrier_performance
            .unwrap_or(self.config.min_carrier_performance);
        let cap = request.candidate_cap.unwrap_or(self.config.candidate_cap);

        let records = self.store.query_candidates(origin, radius, &filters).await?;
        let found = records.len();

        let candidates: Vec<Candidate> = records
            .into_iter()
            .filter(|record| {
                let performance = record
                    .carrier
                    .as_ref()
                    .map(|carrier| carrier.performance(self.config.unknown_carrier_performance))
                    .unwrap_or(self.config.unknown_carrier_performance);
                performance >= carrier_floor
            })
            .take(cap)
            .enumerate()
            .map(|(discovery_rank, record)| Candidate {
                driver: record.driver,
                vehicle: record.vehicle,
                carrier: record.carrier,
                distance_miles: record.distance_miles,
                access: record.access,
                discovery_rank,
            })
            .collect();

        debug!(
            load_id = %context.load.id,
            radius_miles = radius,
            found,
            kept = candidates.len(),
            "Candidates discovered"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use crate::optimizer::fixtures::{self, Fleet};

    fn discovery(store: Arc<InMemoryGraphStore>) -> CandidateDiscovery {
        CandidateDiscovery::new(store, DiscoveryConfig::default())
    }

    #[tokio::test]
    async fn test_reads_load_endpoints() {
        let store = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&store).await;

        let context = discovery(store).load(&LoadId::new("L1")).await.unwrap();
        assert_eq!(context.load.weight, 35_000.0);
        assert_eq!(context.origin.id.as_str(), "P1");
        assert!(context.load_miles() > 70.0);
    }

    #[tokio::test]
    async fn test_missing_load() {
        let store = Arc::new(InMemoryGraphStore::new());
        let result = discovery(store).load(&LoadId::new("nope")).await;
        assert!(matches!(result, Err(DiscoveryError::LoadNotFound(_))));
    }

    #[tokio::test]
    async fn test_driver_outside_radius_is_not_found() {
        let store = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&store).await;
        let discovery = discovery(store);
        let context = discovery.load(&LoadId::new("L1")).await.unwrap();

        let mut request = OptimizationRequest::new("L1");
        request.max_driver_distance = 30.0;
        let candidates = discovery
            .find_candidates(&context, &request, fixtures::as_of())
            .await
            .unwrap();

        let drivers: Vec<&str> = candidates.iter().map(|c| c.driver.id.as_str()).collect();
        assert_eq!(drivers, vec!["D1", "D3"]);
        assert_eq!(candidates[1].access, VehicleAccess::Bound);
        assert_eq!(candidates[1].discovery_rank, 1);
    }

    #[tokio::test]
    async fn test_cap_and_carrier_floor() {
        let store = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&store).await;
        let discovery = discovery(store.clone());
        let context = discovery.load(&LoadId::new("L1")).await.unwrap();

        let mut request = OptimizationRequest::new("L1");
        request.candidate_cap = Some(1);
        let capped = discovery
            .find_candidates(&context, &request, fixtures::as_of())
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].driver.id.as_str(), "D1");

        Fleet::new(&store).carrier("C1", 60.0, 90.0).await;
        let request = OptimizationRequest::new("L1");
        let floored = discovery
            .find_candidates(&context, &request, fixtures::as_of())
            .await
            .unwrap();
        assert!(floored.is_empty());
    }
}
