// Copyright 2025 Cowboy AI, LLC.

//! Vehicle view

use super::{defaults, fields};
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use crate::graph::{Node, NodeLabel};
use crate::identifiers::{LocationId, VehicleId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Vehicle operating status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    /// Ready for dispatch
    Available,
    /// Carrying or committed to a load
    #[serde(alias = "ASSIGNED", alias = "IN_TRANSIT")]
    InUse,
    /// In the shop
    Maintenance,
    /// Retired or grounded
    OutOfService,
}

impl VehicleStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "AVAILABLE",
            VehicleStatus::InUse => "IN_USE",
            VehicleStatus::Maintenance => "MAINTENANCE",
            VehicleStatus::OutOfService => "OUT_OF_SERVICE",
        }
    }
}

/// A vehicle as seen by discovery and scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    /// Vehicle key
    pub id: VehicleId,
    /// Operating status, `None` for placeholder nodes
    pub status: Option<VehicleStatus>,
    /// Equipment tags
    pub capability_tags: BTreeSet<String>,
    /// Weight capacity in pounds
    pub capacity_weight: f64,
    /// Volume capacity in cubic feet
    pub capacity_volume: f64,
    /// Miles per gallon
    pub fuel_efficiency: Option<f64>,
    /// Operating cost per mile
    pub cost_per_mile: f64,
    /// Home-base location key
    pub home_base: Option<LocationId>,
    /// Last reported position
    pub position: Option<GeoPoint>,
}

impl Vehicle {
    /// Decode a vehicle node
    pub fn from_node(node: &Node) -> Result<Self, GraphStoreError> {
        if node.label != NodeLabel::Vehicle {
            return Err(GraphStoreError::corrupt(node.node_ref(), "not a vehicle node"));
        }
        Ok(Self {
            id: VehicleId::new(node.key.clone()),
            status: node.get(fields::STATUS)?,
            capability_tags: node.get_or(fields::CAPABILITY_TAGS, BTreeSet::new())?,
            capacity_weight: node.get_or(fields::CAPACITY_WEIGHT, 0.0)?,
            capacity_volume: node.get_or(fields::CAPACITY_VOLUME, 0.0)?,
            fuel_efficiency: node.get(fields::FUEL_EFFICIENCY)?,
            cost_per_mile: node.get_or(fields::COST_PER_MILE, defaults::COST_PER_MILE)?,
            home_base: node.get(fields::HOME_BASE)?,
            position: node.get(fields::POSITION)?,
        })
    }

    /// Whether the vehicle can be dispatched
    pub fn is_available(&self) -> bool {
        self.status == Some(VehicleStatus::Available)
    }

    /// Whether weight and volume fit
    ///
    /// A zero volume requirement fits any vehicle regardless of its recorded volume.
    pub fn fits(&self, weight: f64, volume: f64) -> bool {
        weight <= self.capacity_weight && (volume <= 0.0 || volume <= self.capacity_volume)
    }

    /// Whether every required tag is present
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capability_tags)
    }

    /// Tags the vehicle lacks
    pub fn missing_capabilities<'a>(&'a self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .difference(&self.capability_tags)
            .map(String::as_str)
            .collect()
    }

    /// Mean fill ratio over the dimensions the load actually uses
    pub fn utilization(&self, weight: f64, volume: f64) -> f64 {
        let mut ratios = Vec::with_capacity(2);
        if weight > 0.0 && self.capacity_weight > 0.0 {
            ratios.push(weight / self.capacity_weight);
        }
        if volume > 0.0 && self.capacity_volume > 0.0 {
            ratios.push(volume / self.capacity_volume);
        }
        if ratios.is_empty() {
            return 0.0;
        }
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}
