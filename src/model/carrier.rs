// Copyright 2025 Cowboy AI, LLC.

//! Carrier view

use super::fields;
use crate::errors::GraphStoreError;
use crate::graph::{Node, NodeLabel};
use crate::identifiers::CarrierId;
use serde::Serialize;

/// A carrier and its aggregate performance figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Carrier {
    /// Carrier key
    pub id: CarrierId,
    /// Company name
    pub name: Option<String>,
    /// On-time delivery rate, 0 to 100
    pub on_time_rate: Option<f64>,
    /// Safety rating, 0 to 100
    pub safety_rating: Option<f64>,
    /// Number of vehicles operated
    pub fleet_size: Option<u32>,
}

impl Carrier {
    /// Decode a carrier node
    pub fn from_node(node: &Node) -> Result<Self, GraphStoreError> {
        if node.label != NodeLabel::Carrier {
            return Err(GraphStoreError::corrupt(node.node_ref(), "not a carrier node"));
        }
        Ok(Self {
            id: CarrierId::new(node.key.clone()),
            name: node.get(fields::NAME)?,
            on_time_rate: node.get(fields::ON_TIME_RATE)?,
            safety_rating: node.get(fields::SAFETY_RATING)?,
            fleet_size: node.get(fields::FLEET_SIZE)?,
        })
    }

    /// Performance figure compared against the minimum-carrier-performance constraint
    pub fn performance(&self, unknown: f64) -> f64 {
        self.on_time_rate.unwrap_or(unknown)
    }
}
