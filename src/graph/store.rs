// Copyright 2025 Cowboy AI, LLC.

//! The graph store adapter interface

use super::candidates::{self, CandidateFilters, CandidateRecord};
use super::mutation::{BatchOutcome, GraphMutation};
use super::node::{Node, NodeLabel, NodeRef, Properties};
use super::relationship::{PropertyGuard, Relationship, RelationshipType};
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Read and write access to the relationship graph
///
/// Implementations apply each batch atomically: either every mutation of a
/// batch is visible or none is.
#[async_trait]
pub trait GraphStore: Send + Sync + Debug {
    /// Apply a batch of mutations atomically
    async fn apply(&self, batch: Vec<GraphMutation>) -> Result<BatchOutcome, GraphStoreError>;

    /// Fetch a node
    async fn node(&self, node: &NodeRef) -> Result<Option<Node>, GraphStoreError>;

    /// Fetch every node with a label
    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>, GraphStoreError>;

    /// Outgoing edges of one type, ordered by target
    async fn outgoing(
        &self,
        from: &NodeRef,
        rel_type: RelationshipType,
    ) -> Result<Vec<Relationship>, GraphStoreError>;

    /// Take an advisory lock, returning false when another owner holds it
    ///
    /// Locks expire after `ttl` and may then be taken over.
    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, GraphStoreError>;

    /// Release a lock held by `owner`; releasing a lock held by someone else is a no-op
    async fn unlock(&self, name: &str, owner: &str) -> Result<(), GraphStoreError>;

    /// Merge-by-key node upsert
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &str,
        properties: Properties,
        stamp: Option<DateTime<Utc>>,
    ) -> Result<BatchOutcome, GraphStoreError> {
        self.apply(vec![GraphMutation::node(label, key, properties, stamp)])
            .await
    }

    /// Edge upsert, replacing sibling edges of the same type when `exclusive`
    async fn upsert_relationship(
        &self,
        relationship: Relationship,
        exclusive: bool,
    ) -> Result<BatchOutcome, GraphStoreError> {
        self.apply(vec![GraphMutation::UpsertRelationship {
            relationship,
            exclusive,
        }])
        .await
    }

    /// Edge delete
    async fn delete_relationship(
        &self,
        from: &NodeRef,
        rel_type: RelationshipType,
        to: &NodeRef,
        guard: Option<PropertyGuard>,
    ) -> Result<BatchOutcome, GraphStoreError> {
        self.apply(vec![GraphMutation::unrelate(
            from.clone(),
            rel_type,
            Some(to.clone()),
            guard,
        )])
        .await
    }

    /// Available drivers within `radius_miles` of `origin` paired with reachable vehicles
    ///
    /// The default walks the read primitives; a store with a native spatial
    /// index may override it as long as it returns the same records in the
    /// same order.
    async fn query_candidates(
        &self,
        origin: GeoPoint,
        radius_miles: f64,
        filters: &CandidateFilters,
    ) -> Result<Vec<CandidateRecord>, GraphStoreError> {
        candidates::scan(self, origin, radius_miles, filters).await
    }
}
