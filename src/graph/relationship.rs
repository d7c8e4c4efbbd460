// Copyright 2025 Cowboy AI, LLC.

//! Typed relationships and the per-node edge sets that hold them

use super::node::{prefer_on_tie, NodeRef, Properties};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Relationship types between fleet nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Driver may operate vehicle
    QualifiedFor,
    /// Driver is employed by carrier
    WorksFor,
    /// Vehicle belongs to carrier
    OwnedBy,
    /// Load is picked up at location
    OriginAt,
    /// Load is delivered at location
    DestinationAt,
    /// Load is assigned to vehicle
    AssignedTo,
    /// Driver is currently operating vehicle
    CurrentlyAssigned,
}

impl RelationshipType {
    /// Type name as stored in keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::QualifiedFor => "QUALIFIED_FOR",
            RelationshipType::WorksFor => "WORKS_FOR",
            RelationshipType::OwnedBy => "OWNED_BY",
            RelationshipType::OriginAt => "ORIGIN_AT",
            RelationshipType::DestinationAt => "DESTINATION_AT",
            RelationshipType::AssignedTo => "ASSIGNED_TO",
            RelationshipType::CurrentlyAssigned => "CURRENTLY_ASSIGNED",
        }
    }

    /// Whether a node may hold at most one edge of this type
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, RelationshipType::QualifiedFor)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source node
    pub from: NodeRef,
    /// Edge type
    pub rel_type: RelationshipType,
    /// Target node
    pub to: NodeRef,
    /// Edge properties, replaced as a whole on each accepted write
    #[serde(default)]
    pub properties: Properties,
    /// Event time of the write that produced the edge
    pub stamp: Option<DateTime<Utc>>,
}

impl Relationship {
    /// Create an edge
    pub fn new(
        from: NodeRef,
        rel_type: RelationshipType,
        to: NodeRef,
        properties: Properties,
        stamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            from,
            rel_type,
            to,
            properties,
            stamp,
        }
    }

    /// Read a string property
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Whether this edge should win over `other` for the same slot
    fn supersedes(&self, other: &Relationship) -> bool {
        match (self.stamp, other.stamp) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(mine), Some(theirs)) if mine != theirs => mine > theirs,
            _ => {
                if self.to != other.to {
                    self.to > other.to
                } else {
                    prefer_on_tie(
                        &Value::Object(self.properties.clone()),
                        &Value::Object(other.properties.clone()),
                    ) || self.properties == other.properties
                }
            }
        }
    }
}

/// Condition on an edge property checked atomically with a delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyGuard {
    /// Property name
    pub name: String,
    /// Value the property must hold
    pub equals: Value,
}

impl PropertyGuard {
    /// Guard on `name == equals`
    pub fn new(name: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            equals: equals.into(),
        }
    }

    /// Whether the edge satisfies the guard
    pub fn matches(&self, relationship: &Relationship) -> bool {
        relationship.properties.get(&self.name) == Some(&self.equals)
    }
}

/// All outgoing edges of one type from one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeSet {
    /// Edges sorted by target
    pub edges: Vec<Relationship>,
}

impl EdgeSet {
    /// Upsert an edge, returning whether the set changed
    ///
    /// Exclusive upserts remove the other edges of the set. A write older
    /// than the edge it would replace is ignored.
    pub fn upsert(&mut self, relationship: Relationship, exclusive: bool) -> bool {
        let blocked = self
            .edges
            .iter()
            .filter(|edge| exclusive || edge.to == relationship.to)
            .any(|edge| !relationship.supersedes(edge));
        if blocked {
            return false;
        }

        let before = self.edges.clone();
        if exclusive {
            self.edges.clear();
        } else {
            self.edges.retain(|edge| edge.to != relationship.to);
        }
        self.edges.push(relationship);
        self.edges.sort_by(|a, b| a.to.cmp(&b.to));
        before != self.edges
    }

    /// Remove edges to `to` (or all edges when `None`) that satisfy the guard
    pub fn remove(&mut self, to: Option<&NodeRef>, guard: Option<&PropertyGuard>) -> bool {
        let before = self.edges.len();
        self.edges.retain(|edge| {
            let target_matches = to.map_or(true, |target| &edge.to == target);
            let guard_matches = guard.map_or(true, |g| g.matches(edge));
            !(target_matches && guard_matches)
        });
        before != self.edges.len()
    }

    /// Whether the set holds no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::properties;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap())
    }

    fn assigned(vehicle: &str, stamp: Option<DateTime<Utc>>) -> Relationship {
        Relationship::new(
            NodeRef::load("L1"),
            RelationshipType::AssignedTo,
            NodeRef::vehicle(vehicle),
            properties(json!({"driver_id": "D1"})),
            stamp,
        )
    }

    #[test]
    fn test_exclusive_upsert_replaces_prior_edge() {
        let mut set = EdgeSet::default();
        assert!(set.upsert(assigned("V1", at(1)), true));
        assert!(set.upsert(assigned("V2", at(2)), true));
        assert_eq!(set.edges.len(), 1);
        assert_eq!(set.edges[0].to, NodeRef::vehicle("V2"));
    }

    #[test]
    fn test_stale_exclusive_upsert_is_ignored() {
        let mut set = EdgeSet::default();
        set.upsert(assigned("V2", at(5)), true);
        assert!(!set.upsert(assigned("V1", at(1)), true));
        assert_eq!(set.edges[0].to, NodeRef::vehicle("V2"));
    }

    #[test]
    fn test_replay_is_unchanged() {
        let mut set = EdgeSet::default();
        assert!(set.upsert(assigned("V1", at(1)), true));
        assert!(!set.upsert(assigned("V1", at(1)), true));
    }

    #[test]
    fn test_non_exclusive_keeps_siblings() {
        let mut set = EdgeSet::default();
        for vehicle in ["V3", "V1", "V2"] {
            set.upsert(
                Relationship::new(
                    NodeRef::driver("D1"),
                    RelationshipType::QualifiedFor,
                    NodeRef::vehicle(vehicle),
                    Properties::new(),
                    at(1),
                ),
                false,
            );
        }
        let targets: Vec<_> = set.edges.iter().map(|e| e.to.key.as_str()).collect();
        assert_eq!(targets, vec!["V1", "V2", "V3"]);
    }

    #[test]
    fn test_guarded_remove() {
        let mut set = EdgeSet::default();
        set.upsert(
            Relationship::new(
                NodeRef::driver("D1"),
                RelationshipType::CurrentlyAssigned,
                NodeRef::vehicle("V1"),
                properties(json!({"load_id": "L2"})),
                at(1),
            ),
            true,
        );
        assert!(!set.remove(None, Some(&PropertyGuard::new("load_id", "L1"))));
        assert!(set.remove(None, Some(&PropertyGuard::new("load_id", "L2"))));
        assert!(set.is_empty());
    }
}
