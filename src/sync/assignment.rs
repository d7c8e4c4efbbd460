// Copyright 2025 Cowboy AI, LLC.

//! Assignment merge primitive
//!
//! Both the synchronizer (on `LOAD_ASSIGNED`) and the orchestrator (on
//! commit) create assignments through [`assign`], so a replayed assignment
//! event and the commit that caused it produce the same graph.

use crate::graph::{props, GraphMutation, NodeLabel, NodeRef, PropertyGuard, Relationship, RelationshipType};
use crate::identifiers::{DriverId, LoadId, RouteId, VehicleId};
use crate::model::{fields, DriverStatus, LoadStatus, VehicleStatus};
use chrono::{DateTime, Utc};
use serde_json::json;

/// A load bound to a vehicle and optionally a driver
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Load being assigned
    pub load_id: LoadId,
    /// Vehicle carrying it
    pub vehicle_id: VehicleId,
    /// Driver operating the vehicle
    pub driver_id: Option<DriverId>,
    /// Route plan behind the assignment
    pub route_id: Option<RouteId>,
    /// Event time of the assignment
    pub assigned_at: DateTime<Utc>,
}

/// Mutations that record an assignment
///
/// The load's `ASSIGNED_TO` edge and the driver's `CURRENTLY_ASSIGNED` edge
/// are written exclusively, retiring any previous edge in the same batch.
/// When the load was previously assigned to a different driver, that
/// driver's edge is retired too if it still belongs to this load.
pub fn assign(assignment: &Assignment, previous_driver: Option<&DriverId>) -> Vec<GraphMutation> {
    let stamp = Some(assignment.assigned_at);
    let load = NodeRef::load(&assignment.load_id);
    let vehicle = NodeRef::vehicle(&assignment.vehicle_id);

    let mut batch = vec![
        GraphMutation::node(
            NodeLabel::Load,
            assignment.load_id.as_str(),
            props([(fields::STATUS, json!(LoadStatus::Assigned))]),
            stamp,
        ),
        GraphMutation::node(
            NodeLabel::Vehicle,
            assignment.vehicle_id.as_str(),
            props([(fields::STATUS, json!(VehicleStatus::InUse))]),
            stamp,
        ),
        GraphMutation::UpsertRelationship {
            relationship: Relationship::new(
                load,
                RelationshipType::AssignedTo,
                vehicle.clone(),
                props([
                    (fields::DRIVER_ID, json!(assignment.driver_id)),
                    (fields::ROUTE_ID, json!(assignment.route_id)),
                    (fields::ASSIGNED_AT, json!(assignment.assigned_at)),
                ]),
                stamp,
            ),
            exclusive: true,
        },
    ];

    if let Some(previous) = previous_driver {
        if assignment.driver_id.as_ref() != Some(previous) {
            batch.push(retire_driver_binding(previous, &assignment.load_id));
        }
    }

    if let Some(driver_id) = &assignment.driver_id {
        batch.push(GraphMutation::node(
            NodeLabel::Driver,
            driver_id.as_str(),
            props([(fields::STATUS, json!(DriverStatus::Assigned))]),
            stamp,
        ));
        batch.push(GraphMutation::UpsertRelationship {
            relationship: Relationship::new(
                NodeRef::driver(driver_id),
                RelationshipType::CurrentlyAssigned,
                vehicle,
                props([
                    (fields::LOAD_ID, json!(assignment.load_id)),
                    (fields::ASSIGNED_AT, json!(assignment.assigned_at)),
                ]),
                stamp,
            ),
            exclusive: true,
        });
    }
    batch
}

/// Remove a driver's `CURRENTLY_ASSIGNED` edge only if it is bound to `load_id`
pub fn retire_driver_binding(driver_id: &DriverId, load_id: &LoadId) -> GraphMutation {
    GraphMutation::unrelate(
        NodeRef::driver(driver_id),
        RelationshipType::CurrentlyAssigned,
        None,
        Some(PropertyGuard::new(fields::LOAD_ID, load_id.as_str())),
    )
}

/// Remove a load's assignment edge and the driver binding that belongs to it
pub fn unassign(load_id: &LoadId, driver_id: Option<&DriverId>) -> Vec<GraphMutation> {
    let mut batch = vec![GraphMutation::unrelate(
        NodeRef::load(load_id),
        RelationshipType::AssignedTo,
        None,
        None,
    )];
    if let Some(driver_id) = driver_id {
        batch.push(retire_driver_binding(driver_id, load_id));
    }
    batch
}
