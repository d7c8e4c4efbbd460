// Copyright 2025 Cowboy AI, LLC.

//! Graph store adapter
//!
//! Owns all access to the relationship graph. Writes are merge-by-key
//! mutations that converge under replay; reads are the traversal primitives
//! used by candidate discovery.

pub mod candidates;
pub mod memory;
pub mod mutation;
pub mod nats_kv;
pub mod node;
pub mod relationship;
pub mod store;

pub use candidates::{CandidateFilters, CandidateRecord, VehicleAccess};
pub use memory::{GraphSnapshot, InMemoryGraphStore};
pub use mutation::{BatchOutcome, GraphMutation, MutationTarget};
pub use nats_kv::{NatsKvGraphConfig, NatsKvGraphStore, NatsKvGraphStoreBuilder};
pub use node::{properties, props, Node, NodeLabel, NodeRef, Properties};
pub use relationship::{EdgeSet, PropertyGuard, Relationship, RelationshipType};
pub use store::GraphStore;
