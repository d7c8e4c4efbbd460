// Copyright 2025 Cowboy AI, LLC.

//! Result events published after a committed optimization

use crate::errors::PublishError;
use crate::identifiers::{DriverId, EventId, LoadId, RequestId, RouteId, VehicleId};
use crate::optimizer::routing::AlgorithmUsed;
use crate::optimizer::scoring::ScoreBreakdown;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `ROUTE_OPTIMIZED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouteOptimized {
    /// Persisted route plan
    pub route_id: RouteId,
    /// Assigned load
    pub load_id: LoadId,
    /// Selected vehicle
    pub vehicle_id: VehicleId,
    /// Selected driver
    pub driver_id: Option<DriverId>,
    /// Route distance in miles
    pub distance: f64,
    /// Route duration in minutes
    pub duration_minutes: f64,
    /// Composite score of the selected candidate
    pub optimization_score: f64,
    /// Provider-backed or fallback geometry
    pub algorithm_used: AlgorithmUsed,
    /// Whether the duration accounts for live traffic
    pub traffic_considered: bool,
}

/// Score of one ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateScore {
    /// Driver
    pub driver_id: DriverId,
    /// Vehicle
    pub vehicle_id: VehicleId,
    /// Sub-scores and composite
    pub breakdown: ScoreBreakdown,
    /// Estimated total cost
    pub estimated_cost: f64,
}

/// `ADVANCED_ROUTE_OPTIMIZED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdvancedRouteOptimized {
    /// Summary shared with `ROUTE_OPTIMIZED`
    #[serde(flatten)]
    pub route: RouteOptimized,
    /// Request that produced the assignment
    pub request_id: RequestId,
    /// Breakdown of the selected candidate
    pub score_breakdown: ScoreBreakdown,
    /// Feasible candidates ranked
    pub alternatives_considered: usize,
    /// Candidates removed by hard constraints
    pub candidates_excluded: usize,
    /// Every ranked candidate, best first
    pub candidates: Vec<CandidateScore>,
}

/// An event produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEvent {
    /// Summary event
    RouteOptimized(RouteOptimized),
    /// Detailed event with per-candidate breakdowns
    AdvancedRouteOptimized(Box<AdvancedRouteOptimized>),
}

impl ResultEvent {
    /// Wire event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ResultEvent::RouteOptimized(_) => "ROUTE_OPTIMIZED",
            ResultEvent::AdvancedRouteOptimized(_) => "ADVANCED_ROUTE_OPTIMIZED",
        }
    }

    /// Subject suffix below the configured prefix
    pub fn subject_suffix(&self) -> &'static str {
        match self {
            ResultEvent::RouteOptimized(_) => "route.optimized",
            ResultEvent::AdvancedRouteOptimized(_) => "route.optimized.advanced",
        }
    }

    fn route_id(&self) -> &RouteId {
        match self {
            ResultEvent::RouteOptimized(event) => &event.route_id,
            ResultEvent::AdvancedRouteOptimized(event) => &event.route.route_id,
        }
    }

    /// Wrap into the outbound envelope
    pub fn into_envelope(
        self,
        correlation_id: Option<String>,
    ) -> Result<OutboundEnvelope, PublishError> {
        let event_type = self.event_type().to_string();
        let subject_suffix = self.subject_suffix().to_string();
        let entity_id = self.route_id().to_string();
        let data = match self {
            ResultEvent::RouteOptimized(event) => serde_json::to_value(event)?,
            ResultEvent::AdvancedRouteOptimized(event) => serde_json::to_value(*event)?,
        };
        Ok(OutboundEnvelope {
            event_id: EventId::generate(),
            event_type,
            timestamp: Utc::now(),
            entity_type: "route".to_string(),
            entity_id,
            correlation_id,
            data,
            subject_suffix,
        })
    }
}

/// Envelope of a published event, mirroring the inbound shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Event identifier
    pub event_id: EventId,
    /// Event type
    pub event_type: String,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    /// Always `route`
    pub entity_type: String,
    /// Route plan key
    pub entity_id: String,
    /// Optimization request identifier
    pub correlation_id: Option<String>,
    /// Event payload
    pub data: Value,
    /// Subject suffix, not part of the payload
    #[serde(skip, default)]
    pub subject_suffix: String,
}
