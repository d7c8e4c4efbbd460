// Copyright 2025 Cowboy AI, LLC.

//! In-memory graph store
//!
//! One lock guards the whole graph so every batch is atomic. Used by tests
//! and by single-process deployments that rebuild the graph from the event
//! log on start.

use super::mutation::{
    apply_to_edges, apply_to_node, check_requirement, BatchOutcome, GraphMutation, MutationTarget,
};
use super::node::{Node, NodeLabel, NodeRef};
use super::relationship::{EdgeSet, Relationship, RelationshipType};
use super::store::GraphStore;
use crate::errors::GraphStoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug)]
struct LockEntry {
    owner: String,
    expires_at: Instant,
}

/// Point-in-time copy of the graph, comparable in tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    /// Nodes by reference
    pub nodes: BTreeMap<NodeRef, Node>,
    /// Non-empty edge sets by source and type
    pub edges: BTreeMap<(NodeRef, RelationshipType), EdgeSet>,
}

impl GraphSnapshot {
    /// Every edge of one type across the graph
    pub fn edges_of_type(&self, rel_type: RelationshipType) -> Vec<&Relationship> {
        self.edges
            .iter()
            .filter(|((_, t), _)| *t == rel_type)
            .flat_map(|(_, set)| set.edges.iter())
            .collect()
    }
}

#[derive(Debug, Default)]
struct GraphState {
    graph: GraphSnapshot,
    locks: HashMap<String, LockEntry>,
}

/// Graph store held entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
    failures: Arc<AtomicU32>,
    conflicts: Arc<AtomicU32>,
}

impl InMemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with [`GraphStoreError::Unavailable`]
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` batches fail with [`GraphStoreError::Conflict`]
    pub fn conflict_next(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Copy the current graph
    pub async fn snapshot(&self) -> GraphSnapshot {
        self.state.read().await.graph.clone()
    }

    fn check_available(&self) -> Result<(), GraphStoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(GraphStoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn apply(&self, batch: Vec<GraphMutation>) -> Result<BatchOutcome, GraphStoreError> {
        self.check_available()?;
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GraphStoreError::Conflict("injected conflict".to_string()));
        }
        let mut state = self.state.write().await;
        let graph = &mut state.graph;

        for mutation in &batch {
            if let GraphMutation::Require { node, .. } = mutation {
                check_requirement(graph.nodes.get(node), mutation)?;
            }
        }

        let mut outcome = BatchOutcome {
            changed: 0,
            total: batch.len(),
        };
        for mutation in &batch {
            let changed = match mutation.target() {
                MutationTarget::Node(node_ref) => {
                    let mut record = graph.nodes.remove(&node_ref);
                    let changed = apply_to_node(&mut record, mutation);
                    if let Some(node) = record {
                        graph.nodes.insert(node_ref, node);
                    }
                    changed
                }
                MutationTarget::Edges(from, rel_type) => {
                    let key = (from, rel_type);
                    let mut set = graph.edges.remove(&key).unwrap_or_default();
                    let changed = apply_to_edges(&mut set, mutation);
                    if !set.is_empty() {
                        graph.edges.insert(key, set);
                    }
                    changed
                }
            };
            if changed {
                outcome.changed += 1;
            }
        }
        Ok(outcome)
    }

    async fn node(&self, node: &NodeRef) -> Result<Option<Node>, GraphStoreError> {
        self.check_available()?;
        Ok(self.state.read().await.graph.nodes.get(node).cloned())
    }

    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>, GraphStoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .graph
            .nodes
            .iter()
            .filter(|(node_ref, _)| node_ref.label == label)
            .map(|(_, node)| node.clone())
            .collect())
    }

    async fn outgoing(
        &self,
        from: &NodeRef,
        rel_type: RelationshipType,
    ) -> Result<Vec<Relationship>, GraphStoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .graph
            .edges
            .get(&(from.clone(), rel_type))
            .map(|set| set.edges.clone())
            .unwrap_or_default())
    }

    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, GraphStoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let now = Instant::now();
        let free = match state.locks.get(name) {
            None => true,
            Some(entry) => entry.owner == owner || entry.expires_at <= now,
        };
        if free {
            state.locks.insert(
                name.to_string(),
                LockEntry {
                    owner: owner.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(free)
    }

    async fn unlock(&self, name: &str, owner: &str) -> Result<(), GraphStoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.locks.get(name).is_some_and(|entry| entry.owner == owner) {
            state.locks.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::properties;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_batch_is_applied_and_counted() {
        let store = InMemoryGraphStore::new();
        let now = Some(Utc::now());
        let outcome = store
            .apply(vec![
                GraphMutation::node(NodeLabel::Driver, "D1", properties(json!({"status": "AVAILABLE"})), now),
                GraphMutation::placeholder(NodeRef::carrier("C1")),
                GraphMutation::relate(
                    NodeRef::driver("D1"),
                    RelationshipType::WorksFor,
                    NodeRef::carrier("C1"),
                    properties(json!({})),
                    now,
                ),
            ])
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome { changed: 3, total: 3 });

        let edges = store
            .outgoing(&NodeRef::driver("D1"), RelationshipType::WorksFor)
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(store.nodes_by_label(NodeLabel::Carrier).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = InMemoryGraphStore::new();
        store.fail_next(2);
        assert!(store.node(&NodeRef::load("L1")).await.is_err());
        assert!(store.node(&NodeRef::load("L1")).await.is_err());
        assert!(store.node(&NodeRef::load("L1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_requirement_writes_nothing() {
        let store = InMemoryGraphStore::new();
        let stamp = Some(Utc::now());
        store
            .upsert_node(NodeLabel::Load, "L1", properties(json!({"status": "CANCELLED"})), stamp)
            .await
            .unwrap();
        let before = store.snapshot().await;

        let err = store
            .apply(vec![
                GraphMutation::node(NodeLabel::Load, "L1", properties(json!({"status": "ASSIGNED"})), stamp),
                GraphMutation::relate(
                    NodeRef::load("L1"),
                    RelationshipType::AssignedTo,
                    NodeRef::vehicle("V1"),
                    properties(json!({})),
                    stamp,
                ),
                GraphMutation::require(NodeRef::load("L1"), "status", [json!("CREATED")]),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, GraphStoreError::PreconditionFailed { .. }));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_injected_conflict_hits_one_batch() {
        let store = InMemoryGraphStore::new();
        store.conflict_next(1);
        let batch = vec![GraphMutation::placeholder(NodeRef::carrier("C1"))];
        assert!(matches!(
            store.apply(batch.clone()).await,
            Err(GraphStoreError::Conflict(_))
        ));
        assert_eq!(store.apply(batch).await.unwrap().changed, 1);
    }

    #[tokio::test]
    async fn test_lock_exclusion_and_release() {
        let store = InMemoryGraphStore::new();
        let ttl = Duration::from_secs(30);
        assert!(store.try_lock("load:L1", "a", ttl).await.unwrap());
        assert!(!store.try_lock("load:L1", "b", ttl).await.unwrap());
        assert!(store.try_lock("load:L1", "a", ttl).await.unwrap());

        store.unlock("load:L1", "b").await.unwrap();
        assert!(!store.try_lock("load:L1", "b", ttl).await.unwrap());

        store.unlock("load:L1", "a").await.unwrap();
        assert!(store.try_lock("load:L1", "b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_taken_over() {
        let store = InMemoryGraphStore::new();
        assert!(store.try_lock("vehicle:V1", "a", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.try_lock("vehicle:V1", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_emptied_edge_sets_are_dropped() {
        let store = InMemoryGraphStore::new();
        let load = NodeRef::load("L1");
        store
            .upsert_relationship(
                Relationship::new(
                    load.clone(),
                    RelationshipType::AssignedTo,
                    NodeRef::vehicle("V1"),
                    Default::default(),
                    Some(Utc::now()),
                ),
                true,
            )
            .await
            .unwrap();
        store
            .delete_relationship(&load, RelationshipType::AssignedTo, &NodeRef::vehicle("V1"), None)
            .await
            .unwrap();
        assert!(store.snapshot().await.edges.is_empty());
    }
}
