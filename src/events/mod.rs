// Copyright 2025 Cowboy AI, LLC.

//! Consumed fleet events and produced result events

pub mod envelope;
pub mod outbound;
pub mod payloads;

pub use envelope::{EntityType, EventEnvelope, EventType, FleetEvent};
pub use outbound::{
    AdvancedRouteOptimized, CandidateScore, OutboundEnvelope, ResultEvent, RouteOptimized,
};
pub use payloads::{
    CarrierPerformanceUpdated, CarrierRegistered, DriverCreated, DriverLocationUpdated,
    DriverQualified, DriverStatusChanged, EventPayload, LoadAssigned, LoadCreated, LoadTransition,
    LocationRef, VehicleCreated, VehicleLocationUpdated, VehicleStatusChanged,
};
