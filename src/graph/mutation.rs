// Copyright 2025 Cowboy AI, LLC.

//! Graph write operations
//!
//! Every write to the graph is expressed as a [`GraphMutation`]. Stores group
//! the mutations of a batch by the record they touch and apply them with the
//! merge rules in [`Node::merge`] and [`EdgeSet`]. A [`GraphMutation::Require`]
//! is checked against the record as it stood before the batch; when it fails
//! nothing in the batch is written.

use super::node::{Node, NodeLabel, NodeRef, Properties};
use super::relationship::{EdgeSet, PropertyGuard, Relationship, RelationshipType};
use crate::errors::GraphStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single graph write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphMutation {
    /// Create or merge into a node
    UpsertNode {
        /// Target node
        node: NodeRef,
        /// Properties to merge
        properties: Properties,
        /// Event time, `None` for placeholder writes
        stamp: Option<DateTime<Utc>>,
    },
    /// Create or replace an edge
    UpsertRelationship {
        /// Edge to write
        relationship: Relationship,
        /// Remove the other edges of this type from the source
        exclusive: bool,
    },
    /// Remove edges
    DeleteRelationship {
        /// Source node
        from: NodeRef,
        /// Edge type
        rel_type: RelationshipType,
        /// Target, or every target when `None`
        to: Option<NodeRef>,
        /// Only remove edges satisfying this guard
        guard: Option<PropertyGuard>,
    },
    /// Abort the batch unless a node property holds one of `one_of`
    Require {
        /// Node checked
        node: NodeRef,
        /// Property name
        property: String,
        /// Accepted values
        one_of: Vec<Value>,
    },
}

/// Record touched by a mutation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MutationTarget {
    /// A node record
    Node(NodeRef),
    /// The edge set of one type leaving one node
    Edges(NodeRef, RelationshipType),
}

impl GraphMutation {
    /// Stamped node upsert
    pub fn node(
        label: NodeLabel,
        key: impl Into<String>,
        properties: Properties,
        stamp: Option<DateTime<Utc>>,
    ) -> Self {
        GraphMutation::UpsertNode {
            node: NodeRef::new(label, key),
            properties,
            stamp,
        }
    }

    /// Ensure a node exists without asserting any property
    pub fn placeholder(node: NodeRef) -> Self {
        GraphMutation::UpsertNode {
            node,
            properties: Properties::new(),
            stamp: None,
        }
    }

    /// Edge upsert using the type's default exclusivity
    pub fn relate(
        from: NodeRef,
        rel_type: RelationshipType,
        to: NodeRef,
        properties: Properties,
        stamp: Option<DateTime<Utc>>,
    ) -> Self {
        GraphMutation::UpsertRelationship {
            relationship: Relationship::new(from, rel_type, to, properties, stamp),
            exclusive: rel_type.is_exclusive(),
        }
    }

    /// Edge delete
    pub fn unrelate(
        from: NodeRef,
        rel_type: RelationshipType,
        to: Option<NodeRef>,
        guard: Option<PropertyGuard>,
    ) -> Self {
        GraphMutation::DeleteRelationship {
            from,
            rel_type,
            to,
            guard,
        }
    }

    /// Precondition on a node property
    pub fn require(
        node: NodeRef,
        property: impl Into<String>,
        one_of: impl IntoIterator<Item = Value>,
    ) -> Self {
        GraphMutation::Require {
            node,
            property: property.into(),
            one_of: one_of.into_iter().collect(),
        }
    }

    /// Record this mutation writes to, or checks
    pub fn target(&self) -> MutationTarget {
        match self {
            GraphMutation::UpsertNode { node, .. } | GraphMutation::Require { node, .. } => {
                MutationTarget::Node(node.clone())
            }
            GraphMutation::UpsertRelationship { relationship, .. } => {
                MutationTarget::Edges(relationship.from.clone(), relationship.rel_type)
            }
            GraphMutation::DeleteRelationship { from, rel_type, .. } => {
                MutationTarget::Edges(from.clone(), *rel_type)
            }
        }
    }
}

/// Apply a node mutation to the current record, returning whether it changed
pub fn apply_to_node(current: &mut Option<Node>, mutation: &GraphMutation) -> bool {
    let GraphMutation::UpsertNode {
        node,
        properties,
        stamp,
    } = mutation
    else {
        return false;
    };

    match current {
        Some(existing) => existing.merge(properties, *stamp),
        None => {
            let mut created = Node::new(node);
            created.merge(properties, *stamp);
            *current = Some(created);
            true
        }
    }
}

/// Apply an edge mutation to the current edge set, returning whether it changed
pub fn apply_to_edges(edges: &mut EdgeSet, mutation: &GraphMutation) -> bool {
    match mutation {
        GraphMutation::UpsertRelationship {
            relationship,
            exclusive,
        } => edges.upsert(relationship.clone(), *exclusive),
        GraphMutation::DeleteRelationship { to, guard, .. } => {
            edges.remove(to.as_ref(), guard.as_ref())
        }
        GraphMutation::UpsertNode { .. } | GraphMutation::Require { .. } => false,
    }
}

/// Check a [`GraphMutation::Require`] against the stored record
///
/// Other mutations always pass. A missing node or property fails.
pub fn check_requirement(record: Option<&Node>, mutation: &GraphMutation) -> Result<(), GraphStoreError> {
    let GraphMutation::Require {
        node,
        property,
        one_of,
    } = mutation
    else {
        return Ok(());
    };
    let found = record.and_then(|n| n.properties.get(property));
    if found.is_some_and(|value| one_of.contains(value)) {
        return Ok(());
    }
    Err(GraphStoreError::PreconditionFailed {
        record: node.to_string(),
        reason: format!(
            "{} is {}",
            property,
            found.map_or_else(|| "absent".to_string(), Value::to_string)
        ),
    })
}

/// Result of applying a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Mutations that changed stored state
    pub changed: usize,
    /// Mutations in the batch
    pub total: usize,
}

impl BatchOutcome {
    /// Whether the batch left the graph as it was
    pub fn is_noop(&self) -> bool {
        self.changed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::properties;
    use serde_json::json;

    #[test]
    fn test_placeholder_creates_node_once() {
        let mut record = None;
        let placeholder = GraphMutation::placeholder(NodeRef::carrier("C1"));
        assert!(apply_to_node(&mut record, &placeholder));
        assert!(!apply_to_node(&mut record, &placeholder));
        assert!(record.unwrap().is_placeholder());
    }

    #[test]
    fn test_requirement_checks_current_value() {
        let mut record = None;
        let load = NodeRef::load("L1");
        let created = GraphMutation::require(load.clone(), "status", [json!("CREATED")]);
        assert!(matches!(
            check_requirement(record.as_ref(), &created),
            Err(GraphStoreError::PreconditionFailed { .. })
        ));

        let write = GraphMutation::node(
            NodeLabel::Load,
            "L1",
            properties(json!({"status": "CREATED"})),
            Some(Utc::now()),
        );
        apply_to_node(&mut record, &write);
        assert!(check_requirement(record.as_ref(), &created).is_ok());
        assert!(!apply_to_node(&mut record, &created));

        let cancelled = GraphMutation::require(load, "status", [json!("CANCELLED")]);
        let err = check_requirement(record.as_ref(), &cancelled).unwrap_err();
        assert_eq!(
            err,
            GraphStoreError::PreconditionFailed {
                record: "Load:L1".to_string(),
                reason: "status is \"CREATED\"".to_string(),
            }
        );
    }

    #[test]
    fn test_targets() {
        let m = GraphMutation::relate(
            NodeRef::load("L1"),
            RelationshipType::OriginAt,
            NodeRef::location("P1"),
            properties(json!({})),
            None,
        );
        assert_eq!(
            m.target(),
            MutationTarget::Edges(NodeRef::load("L1"), RelationshipType::OriginAt)
        );
        let GraphMutation::UpsertRelationship { exclusive, .. } = m else {
            panic!("expected relationship upsert");
        };
        assert!(exclusive);
    }
}
