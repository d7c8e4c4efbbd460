// Copyright 2025 Cowboy AI, LLC.

//! Load view and the load status lifecycle

use super::fields;
use crate::errors::GraphStoreError;
use crate::geo::TimeWindow;
use crate::graph::{Node, NodeLabel};
use crate::identifiers::LoadId;
use crate::state_machine::{MooreStateTransitions, State};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Load lifecycle status
///
/// ```text
/// CREATED -> ASSIGNED -> PICKED_UP -> IN_TRANSIT -> DELIVERED
///     \          \            \            \
///      +----------+------------+------------+--> CANCELLED
/// ```
///
/// Forward jumps are allowed because events from the operational store may
/// skip intermediate stages. The only way back is the compensating
/// assignment revert, ASSIGNED -> CREATED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    /// Awaiting assignment
    #[serde(alias = "PENDING")]
    Created,
    /// Assigned to a vehicle
    Assigned,
    /// Picked up at origin
    PickedUp,
    /// On the road
    InTransit,
    /// Delivered; terminal
    Delivered,
    /// Cancelled; terminal
    Cancelled,
}

impl LoadStatus {
    /// Position in the forward lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            LoadStatus::Created => 0,
            LoadStatus::Assigned => 1,
            LoadStatus::PickedUp => 2,
            LoadStatus::InTransit => 3,
            LoadStatus::Delivered | LoadStatus::Cancelled => 4,
        }
    }

    /// Whether the optimizer may assign a load in this status
    pub fn is_assignable(&self) -> bool {
        matches!(self, LoadStatus::Created)
    }
}

impl State for LoadStatus {
    fn name(&self) -> &'static str {
        match self {
            LoadStatus::Created => "CREATED",
            LoadStatus::Assigned => "ASSIGNED",
            LoadStatus::PickedUp => "PICKED_UP",
            LoadStatus::InTransit => "IN_TRANSIT",
            LoadStatus::Delivered => "DELIVERED",
            LoadStatus::Cancelled => "CANCELLED",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Delivered | LoadStatus::Cancelled)
    }
}

impl MooreStateTransitions for LoadStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        *target == LoadStatus::Cancelled || target.rank() > self.rank()
    }

    fn valid_transitions(&self) -> Vec<Self> {
        [
            LoadStatus::Created,
            LoadStatus::Assigned,
            LoadStatus::PickedUp,
            LoadStatus::InTransit,
            LoadStatus::Delivered,
            LoadStatus::Cancelled,
        ]
        .into_iter()
        .filter(|target| self.can_transition_to(target))
        .collect()
    }
}

/// What to do with an incoming status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Write the status, or re-affirm the current one
    Proceed,
    /// The event predates the recorded status; skip it
    Stale,
    /// The event would move the load backward
    Violation,
}

/// Decide whether a load may move from its recorded status to `target`
///
/// `recorded` is the current status with the stamp of the write that set it.
/// Any move carrying an older stamp than the recorded status is a late
/// delivery and is skipped; backward moves with a newer stamp break the
/// lifecycle.
pub fn decide(
    recorded: Option<(LoadStatus, Option<DateTime<Utc>>)>,
    target: LoadStatus,
    stamp: DateTime<Utc>,
    compensating: bool,
) -> LifecycleDecision {
    let Some((current, recorded_at)) = recorded else {
        return LifecycleDecision::Proceed;
    };

    if current == target {
        return LifecycleDecision::Proceed;
    }
    if recorded_at.is_some_and(|at| stamp < at) {
        return LifecycleDecision::Stale;
    }
    if compensating && current == LoadStatus::Assigned && target == LoadStatus::Created {
        return LifecycleDecision::Proceed;
    }
    if current.can_transition_to(&target) {
        return LifecycleDecision::Proceed;
    }
    match recorded_at {
        Some(at) if stamp < at => LifecycleDecision::Stale,
        _ => LifecycleDecision::Violation,
    }
}

/// Load priority tier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    /// Flexible
    Low,
    /// Normal service
    #[default]
    #[serde(alias = "NORMAL")]
    Standard,
    /// Expedited
    High,
    /// Must not slip
    Critical,
}

/// A load as seen by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Load {
    /// Load key
    pub id: LoadId,
    /// Lifecycle status, `None` for placeholder nodes
    pub status: Option<LoadStatus>,
    /// Weight in pounds
    pub weight: f64,
    /// Volume in cubic feet
    pub volume: f64,
    /// When the load may be picked up
    pub pickup_window: Option<TimeWindow>,
    /// When the load must be delivered
    pub delivery_window: Option<TimeWindow>,
    /// Priority tier
    pub priority: PriorityTier,
    /// Equipment tags required of the vehicle
    pub required_capabilities: BTreeSet<String>,
    /// License tags required of the driver
    pub required_endorsements: BTreeSet<String>,
}

impl Load {
    /// Decode a load node
    pub fn from_node(node: &Node) -> Result<Self, GraphStoreError> {
        if node.label != NodeLabel::Load {
            return Err(GraphStoreError::corrupt(node.node_ref(), "not a load node"));
        }
        Ok(Self {
            id: LoadId::new(node.key.clone()),
            status: node.get(fields::STATUS)?,
            weight: node.get_or(fields::WEIGHT, 0.0)?,
            volume: node.get_or(fields::VOLUME, 0.0)?,
            pickup_window: node.get(fields::PICKUP_WINDOW)?,
            delivery_window: node.get(fields::DELIVERY_WINDOW)?,
            priority: node.get_or(fields::PRIORITY, PriorityTier::Standard)?,
            required_capabilities: node.get_or(fields::REQUIRED_CAPABILITIES, BTreeSet::new())?,
            required_endorsements: node.get_or(fields::REQUIRED_ENDORSEMENTS, BTreeSet::new())?,
        })
    }

    /// Recorded status together with the stamp that set it
    pub fn recorded_status(node: &Node) -> Result<Option<(LoadStatus, Option<DateTime<Utc>>)>, GraphStoreError> {
        Ok(node
            .get::<LoadStatus>(fields::STATUS)?
            .map(|status| (status, node.stamp_of(fields::STATUS))))
    }
}
