// Copyright 2025 Cowboy AI, LLC.

//! # CIM Domain Logistics
//!
//! Transportation management engine for the Composable Information Machine.
//!
//! The crate keeps a relationship graph of drivers, vehicles, carriers, loads
//! and locations in step with the fleet event stream, and answers load
//! optimization requests against that graph:
//! - **Graph**: merge-by-key nodes and typed relationships behind the
//!   [`GraphStore`] trait, in memory or in a NATS KV bucket
//! - **Sync**: idempotent translation of fleet events into graph mutations
//! - **Ingress**: partitioned worker pool with retry and dead-lettering
//! - **Optimizer**: candidate discovery, multi-constraint scoring, route
//!   resolution with a straight-line fallback and an atomic commit
//! - **Egress**: publication of route optimization results
//!
//! ## Design Principles
//!
//! 1. **Convergence**: replaying any prefix of the event stream yields the same graph
//! 2. **Single assignment**: a load has at most one committed driver/vehicle pair
//! 3. **Controlled State**: load and request lifecycles are state machines
//! 4. **Stable failures**: callers see reason codes, never internal error text

#![warn(missing_docs)]

pub mod config;
pub mod egress;
pub mod errors;
pub mod events;
pub mod geo;
pub mod graph;
pub mod identifiers;
pub mod infrastructure;
pub mod ingress;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod state_machine;
pub mod sync;

pub use config::{ConfigError, EngineConfig};
pub use egress::{EgressConfig, EventPublisher, InMemoryEventPublisher, JetStreamEventPublisher};
pub use errors::{
    CommitConflict, DiscoveryError, EventValidationError, FailureReason, GraphStoreError,
    OptimizationError, PublishError, RoutingError, SyncError, TransitionError,
};
pub use events::{EventEnvelope, FleetEvent, OutboundEnvelope, ResultEvent};
pub use geo::{GeoPoint, TimeWindow};
pub use graph::{GraphMutation, GraphStore, InMemoryGraphStore, NatsKvGraphStore};
pub use identifiers::{
    CarrierId, DriverId, EventId, LoadId, LocationId, RequestId, RouteId, VehicleId,
};
pub use infrastructure::{NatsClient, NatsConfig, NatsError};
pub use ingress::{IngressConfig, IngressPool, JetStreamEventSource, RetryPolicy};
pub use metrics::EngineMetrics;
pub use optimizer::{
    OptimizationOrchestrator, OptimizationRequest, OptimizationResponse, RouteGeometryResolver,
};
pub use state_machine::{MooreMachine, MooreStateTransitions, State, StateTransition};
pub use sync::{Ack, GraphSynchronizer};
