// Copyright 2025 Cowboy AI, LLC.

//! Location view

use super::fields;
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use crate::graph::{Node, NodeLabel};
use crate::identifiers::LocationId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Location classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    /// Shipper facility
    Pickup,
    /// Consignee facility
    Delivery,
    /// Carrier yard or home base
    Depot,
}

/// A location node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    /// Location key
    pub id: LocationId,
    /// Coordinate, absent on placeholders
    pub point: Option<GeoPoint>,
    /// Classification
    pub kind: Option<LocationKind>,
    /// Display name
    pub name: Option<String>,
}

impl Location {
    /// Decode a location node
    pub fn from_node(node: &Node) -> Result<Self, GraphStoreError> {
        if node.label != NodeLabel::Location {
            return Err(GraphStoreError::corrupt(node.node_ref(), "not a location node"));
        }
        Ok(Self {
            id: LocationId::new(node.key.clone()),
            point: node.get(fields::POINT)?,
            kind: node.get(fields::KIND)?,
            name: node.get(fields::NAME)?,
        })
    }
}
