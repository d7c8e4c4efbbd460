// Copyright 2025 Cowboy AI, LLC.

//! Optimization request and response contract

use super::routing::AlgorithmUsed;
use super::scoring::ScoreBreakdown;
use crate::errors::{FailureReason, OptimizationError};
use crate::geo::GeoPoint;
use crate::identifiers::{DriverId, LoadId, RequestId, RouteId, VehicleId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default driver-to-pickup radius in miles
pub const DEFAULT_MAX_DRIVER_DISTANCE: f64 = 50.0;

/// Default upper bound on total trip hours
pub const DEFAULT_MAX_DURATION_HOURS: f64 = 11.0;

/// Default carrier performance floor
pub const DEFAULT_MIN_CARRIER_PERFORMANCE: f64 = 70.0;

fn default_max_driver_distance() -> f64 {
    DEFAULT_MAX_DRIVER_DISTANCE
}

fn default_max_duration_hours() -> f64 {
    DEFAULT_MAX_DURATION_HOURS
}

/// Request to select a driver and vehicle for one load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationRequest {
    /// Load to assign
    pub load_id: LoadId,
    /// Driver-to-pickup radius in miles
    #[serde(default = "default_max_driver_distance")]
    pub max_driver_distance: f64,
    /// Upper bound on deadhead plus trip plus service hours
    #[serde(default = "default_max_duration_hours")]
    pub max_duration_hours: f64,
    /// Minimum driver rating, 0 to 100
    #[serde(default)]
    pub min_driver_rating: Option<f64>,
    /// Minimum carrier performance, 0 to 100
    #[serde(default)]
    pub min_carrier_performance: Option<f64>,
    /// Ask the routing provider for traffic-aware durations
    #[serde(default)]
    pub consider_traffic: bool,
    /// Equipment tags in addition to the load's own
    #[serde(default)]
    pub required_capabilities: Option<BTreeSet<String>>,
    /// Override of the configured candidate cap
    #[serde(default)]
    pub candidate_cap: Option<usize>,
    /// Planning instant, defaults to now
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    /// Caller-supplied request identifier
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

impl OptimizationRequest {
    /// Request with default constraints
    pub fn new(load_id: impl Into<LoadId>) -> Self {
        Self {
            load_id: load_id.into(),
            max_driver_distance: DEFAULT_MAX_DRIVER_DISTANCE,
            max_duration_hours: DEFAULT_MAX_DURATION_HOURS,
            min_driver_rating: None,
            min_carrier_performance: None,
            consider_traffic: false,
            required_capabilities: None,
            candidate_cap: None,
            as_of: None,
            request_id: None,
        }
    }

    /// Reject requests no candidate could ever satisfy
    pub fn validate(&self) -> Result<(), OptimizationError> {
        if self.load_id.is_blank() {
            return Err(OptimizationError::InvalidRequest("load_id must not be blank".into()));
        }
        if !(self.max_driver_distance.is_finite() && self.max_driver_distance > 0.0) {
            return Err(OptimizationError::InvalidRequest(
                "max_driver_distance must be positive".into(),
            ));
        }
        if !(self.max_duration_hours.is_finite() && self.max_duration_hours > 0.0) {
            return Err(OptimizationError::InvalidRequest(
                "max_duration_hours must be positive".into(),
            ));
        }
        for (name, value) in [
            ("min_driver_rating", self.min_driver_rating),
            ("min_carrier_performance", self.min_carrier_performance),
        ] {
            if value.is_some_and(|v| !(0.0..=100.0).contains(&v)) {
                return Err(OptimizationError::InvalidRequest(format!(
                    "{} must be within 0..=100",
                    name
                )));
            }
        }
        if self.candidate_cap == Some(0) {
            return Err(OptimizationError::InvalidRequest(
                "candidate_cap must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Carrier floor in effect
    pub fn carrier_floor(&self) -> f64 {
        self.min_carrier_performance
            .unwrap_or(DEFAULT_MIN_CARRIER_PERFORMANCE)
    }
}

/// Outcome of an optimization request
///
/// Failures carry a reason code only; the internal error is logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationResponse {
    /// Whether an assignment was committed
    pub success: bool,
    /// Why the request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Request identifier
    pub request_id: RequestId,
    /// Load the request was for
    pub load_id: LoadId,
    /// Chosen driver
    pub selected_driver_id: Option<DriverId>,
    /// Chosen vehicle
    pub selected_vehicle_id: Option<VehicleId>,
    /// Composite score of the chosen candidate
    pub optimization_score: f64,
    /// Feasible candidates ranked
    pub alternatives_considered: usize,
    /// Candidates removed by hard constraints
    pub candidates_excluded: usize,
    /// Route distance in miles
    pub distance: f64,
    /// Route duration in minutes
    pub duration_minutes: f64,
    /// Route polyline
    pub route_geometry: Vec<GeoPoint>,
    /// Provider-backed or fallback geometry
    pub algorithm_used: Option<AlgorithmUsed>,
    /// Whether the duration accounts for live traffic
    pub traffic_considered: bool,
    /// Sub-scores of the chosen candidate
    pub score_breakdown: Option<ScoreBreakdown>,
    /// Persisted route plan
    pub route_id: Option<RouteId>,
}

impl OptimizationResponse {
    /// Failed response
    pub fn failure(
        request_id: RequestId,
        load_id: LoadId,
        reason: FailureReason,
        alternatives_considered: usize,
        candidates_excluded: usize,
    ) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            request_id,
            load_id,
            selected_driver_id: None,
            selected_vehicle_id: None,
            optimization_score: 0.0,
            alternatives_considered,
            candidates_excluded,
            distance: 0.0,
            duration_minutes: 0.0,
            route_geometry: Vec::new(),
            algorithm_used: None,
            traffic_considered: false,
            score_breakdown: None,
            route_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_minimal_json() {
        let request: OptimizationRequest = serde_json::from_value(json!({"load_id": "L1"})).unwrap();
        assert_eq!(request.max_driver_distance, 50.0);
        assert_eq!(request.max_duration_hours, 11.0);
        assert_eq!(request.carrier_floor(), 70.0);
        assert!(!request.consider_traffic);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_invalid_requests() {
        let mut request = OptimizationRequest::new("L1");
        request.max_driver_distance = 0.0;
        assert!(request.validate().is_err());

        let mut request = OptimizationRequest::new("L1");
        request.min_driver_rating = Some(140.0);
        assert!(matches!(
            request.validate(),
            Err(OptimizationError::InvalidRequest(_))
        ));

        assert!(OptimizationRequest::new(" ").validate().is_err());
    }

    #[test]
    fn test_failure_serializes_reason_code() {
        let response = OptimizationResponse::failure(
            RequestId::new("r1"),
            LoadId::new("L1"),
            FailureReason::NoFeasibleCandidate,
            0,
            3,
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["reason"], json!("NO_FEASIBLE_CANDIDATE"));
        assert_eq!(value["candidates_excluded"], json!(3));
    }
}
