// Copyright 2025 Cowboy AI, LLC.

//! Multi-constraint load optimizer
//!
//! A request moves through discovery, scoring, route resolution and an
//! atomic commit of the winning driver/vehicle pair. Every stage reads the
//! graph maintained by [`crate::sync`]; only the commit writes to it.

pub mod discovery;
pub mod orchestrator;
pub mod request;
pub mod route_store;
pub mod routing;
pub mod scoring;

#[cfg(test)]
pub(crate) mod fixtures;

pub use discovery::{Candidate, CandidateDiscovery, DiscoveryConfig, LoadContext};
pub use orchestrator::{
    InFlightRequests, OptimizationOrchestrator, OptimizationState, OrchestratorConfig,
};
pub use request::{OptimizationRequest, OptimizationResponse};
pub use route_store::{
    InMemoryRoutePlanStore, NatsKvRoutePlanStore, RoutePlan, RoutePlanStatus, RoutePlanStore,
};
pub use routing::{
    decode_polyline, AlgorithmUsed, FallbackGeometry, HttpRoutingProvider, ProviderRoute,
    ResolvedRoute, RouteGeometry, RouteGeometryResolver, RoutePreferences, RoutingConfig,
    RoutingProvider,
};
pub use scoring::{
    Exclusion, ExcludedCandidate, MultiConstraintScorer, ProximityDecay, ScoreBreakdown,
    ScoreWeights, ScoredCandidate, ScoringConfig, ScoringContext, ScoringOutcome, Timeline,
};
