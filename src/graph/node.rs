// Copyright 2025 Cowboy AI, LLC.

//! Graph nodes with last-writer-wins properties

use crate::errors::GraphStoreError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Property bag of a node or relationship
pub type Properties = serde_json::Map<String, Value>;

/// Node labels known to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    /// A driver
    Driver,
    /// A vehicle
    Vehicle,
    /// A carrier company
    Carrier,
    /// A load awaiting or undergoing transport
    Load,
    /// A pickup, delivery or depot location
    Location,
}

impl NodeLabel {
    /// Label as stored in keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Driver => "Driver",
            NodeLabel::Vehicle => "Vehicle",
            NodeLabel::Carrier => "Carrier",
            NodeLabel::Load => "Load",
            NodeLabel::Location => "Location",
        }
    }

    /// All labels
    pub const ALL: [NodeLabel; 5] = [
        NodeLabel::Driver,
        NodeLabel::Vehicle,
        NodeLabel::Carrier,
        NodeLabel::Load,
        NodeLabel::Location,
    ];
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a node: label plus entity key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node label
    pub label: NodeLabel,
    /// Entity key, unique per label
    pub key: String,
}

impl NodeRef {
    /// Create a reference
    pub fn new(label: NodeLabel, key: impl Into<String>) -> Self {
        Self {
            label,
            key: key.into(),
        }
    }

    /// Driver node reference
    pub fn driver(key: impl AsRef<str>) -> Self {
        Self::new(NodeLabel::Driver, key.as_ref())
    }

    /// Vehicle node reference
    pub fn vehicle(key: impl AsRef<str>) -> Self {
        Self::new(NodeLabel::Vehicle, key.as_ref())
    }

    /// Carrier node reference
    pub fn carrier(key: impl AsRef<str>) -> Self {
        Self::new(NodeLabel::Carrier, key.as_ref())
    }

    /// Load node reference
    pub fn load(key: impl AsRef<str>) -> Self {
        Self::new(NodeLabel::Load, key.as_ref())
    }

    /// Location node reference
    pub fn location(key: impl AsRef<str>) -> Self {
        Self::new(NodeLabel::Location, key.as_ref())
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.key)
    }
}

/// A node and the stamp of the last write to each property
///
/// A property written without a stamp is a placeholder value: it fills the
/// property only while nothing else has, and any stamped write replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node label
    pub label: NodeLabel,
    /// Entity key
    pub key: String,
    /// Current property values
    #[serde(default)]
    pub properties: Properties,
    /// Event time of the write that produced each stamped property
    #[serde(default)]
    pub stamps: BTreeMap<String, DateTime<Utc>>,
}

impl Node {
    /// Create an empty node
    pub fn new(node: &NodeRef) -> Self {
        Self {
            label: node.label,
            key: node.key.clone(),
            properties: Properties::new(),
            stamps: BTreeMap::new(),
        }
    }

    /// Reference to this node
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.label, self.key.clone())
    }

    /// Merge a property write, returning whether anything changed
    pub fn merge(&mut self, properties: &Properties, stamp: Option<DateTime<Utc>>) -> bool {
        let mut changed = false;
        for (name, value) in properties {
            let current = self.properties.get(name);
            let recorded = self.stamps.get(name).copied();

            let accept = match (current, stamp, recorded) {
                (None, _, _) => true,
                (Some(_), None, _) => false,
                (Some(_), Some(_), None) => true,
                (Some(existing), Some(incoming), Some(previous)) => {
                    incoming > previous
                        || (incoming == previous && prefer_on_tie(value, existing))
                }
            };
            if !accept {
                continue;
            }

            if current != Some(value) {
                self.properties.insert(name.clone(), value.clone());
                changed = true;
            }
            if let Some(incoming) = stamp {
                if recorded != Some(incoming) {
                    self.stamps.insert(name.clone(), incoming);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Decode a property, `None` when absent or null
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, GraphStoreError> {
        match self.properties.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                GraphStoreError::corrupt(self.node_ref(), format!("property {}: {}", name, e))
            }),
        }
    }

    /// Decode a property, falling back to `default` when absent
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, GraphStoreError> {
        Ok(self.get(name)?.unwrap_or(default))
    }

    /// Stamp of the last write to a property
    pub fn stamp_of(&self, name: &str) -> Option<DateTime<Utc>> {
        self.stamps.get(name).copied()
    }

    /// Whether the node only holds placeholder data
    pub fn is_placeholder(&self) -> bool {
        self.stamps.is_empty()
    }
}

/// Equal stamps resolve to the larger encoded value so merges commute
pub(crate) fn prefer_on_tie(incoming: &Value, existing: &Value) -> bool {
    incoming.to_string() > existing.to_string()
}

/// Build a property bag from name/value pairs, dropping nulls
pub fn props<const N: usize>(entries: [(&str, Value); N]) -> Properties {
    entries
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Turn a `json!({...})` object into a property bag
pub fn properties(value: Value) -> Properties {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect(),
        _ => Properties::new(),
    }
}
