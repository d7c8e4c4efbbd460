// Copyright 2025 Cowboy AI, LLC.

//! Driver view

use super::{defaults, fields};
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use crate::graph::{Node, NodeLabel};
use crate::identifiers::DriverId;
use crate::state_machine::{MooreStateTransitions, State};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Driver availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    /// Free to take a load
    Available,
    /// Working an assignment
    #[serde(alias = "DRIVING", alias = "ON_DUTY")]
    Assigned,
    /// Resting or otherwise off duty
    #[serde(alias = "SLEEPER_BERTH")]
    OffDuty,
    /// No longer employed; never reactivated
    Terminated,
}

impl State for DriverStatus {
    fn name(&self) -> &'static str {
        match self {
            DriverStatus::Available => "AVAILABLE",
            DriverStatus::Assigned => "ASSIGNED",
            DriverStatus::OffDuty => "OFF_DUTY",
            DriverStatus::Terminated => "TERMINATED",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, DriverStatus::Terminated)
    }
}

impl MooreStateTransitions for DriverStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        !self.is_terminal() || self == target
    }

    fn valid_transitions(&self) -> Vec<Self> {
        if self.is_terminal() {
            return vec![];
        }
        [
            DriverStatus::Available,
            DriverStatus::Assigned,
            DriverStatus::OffDuty,
            DriverStatus::Terminated,
        ]
        .into_iter()
        .filter(|s| s != self)
        .collect()
    }
}

/// A driver as seen by discovery and scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Driver {
    /// Driver key
    pub id: DriverId,
    /// Availability, `None` for placeholder nodes
    pub status: Option<DriverStatus>,
    /// Last reported position
    pub position: Option<GeoPoint>,
    /// Home coordinate
    pub home_location: Option<GeoPoint>,
    /// License capability tags
    pub license_qualifications: BTreeSet<String>,
    /// Performance score, 0 to 1
    pub performance_score: Option<f64>,
    /// On-time percentage, 0 to 100
    pub on_time_percentage: Option<f64>,
    /// Pay per hour
    pub hourly_rate: f64,
    /// Remaining hours-of-service budget
    pub duty_hours_remaining: f64,
}

impl Driver {
    /// Decode a driver node
    pub fn from_node(node: &Node) -> Result<Self, GraphStoreError> {
        if node.label != NodeLabel::Driver {
            return Err(GraphStoreError::corrupt(node.node_ref(), "not a driver node"));
        }
        Ok(Self {
            id: DriverId::new(node.key.clone()),
            status: node.get(fields::STATUS)?,
            position: node.get(fields::POSITION)?,
            home_location: node.get(fields::HOME_LOCATION)?,
            license_qualifications: node.get_or(fields::LICENSE_QUALIFICATIONS, BTreeSet::new())?,
            performance_score: node.get(fields::PERFORMANCE_SCORE)?,
            on_time_percentage: node.get(fields::ON_TIME_PERCENTAGE)?,
            hourly_rate: node.get_or(fields::HOURLY_RATE, defaults::HOURLY_RATE)?,
            duty_hours_remaining: node.get_or(fields::DUTY_HOURS_REMAINING, defaults::DUTY_HOURS)?,
        })
    }

    /// Whether the driver can be offered a load
    pub fn is_available(&self) -> bool {
        self.status == Some(DriverStatus::Available)
    }

    /// Best known position: live position, else home
    pub fn current_position(&self) -> Option<GeoPoint> {
        self.position.or(self.home_location)
    }

    /// Rating on a 0 to 100 scale
    pub fn rating(&self) -> f64 {
        self.performance_score.unwrap_or(0.0) * 100.0
    }

    /// Whether the driver's license covers every tag
    pub fn holds_endorsements(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.license_qualifications)
    }
}
