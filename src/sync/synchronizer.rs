// Copyright 2025 Cowboy AI, LLC.

//! Graph synchronizer
//!
//! Translates each validated fleet event into one batch of graph mutations.
//! Every batch is built from merge-by-key writes stamped with the event time,
//! so applying the same event twice, or two events in either order, leaves
//! the graph in the same state.

use crate::errors::SyncError;
use crate::events::{
    CarrierPerformanceUpdated, CarrierRegistered, DriverCreated, DriverLocationUpdated,
    DriverQualified, DriverStatusChanged, EventEnvelope, FleetEvent, LoadAssigned, LoadCreated,
    LoadTransition, LocationRef, VehicleCreated, VehicleLocationUpdated, VehicleStatusChanged,
};
use crate::events::payloads::location_kind_for;
use crate::graph::{
    props, GraphMutation, GraphStore, NodeLabel, NodeRef, Properties, Relationship,
    RelationshipType,
};
use crate::identifiers::{DriverId, LoadId, RouteId};
use crate::model::load::decide;
use crate::model::{
    fields, DriverStatus, LifecycleDecision, Load, LoadStatus, LocationKind, VehicleStatus,
};
use crate::sync::assignment::{assign, unassign, Assignment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The graph changed
    Applied {
        /// Records that changed
        changed: usize,
    },
    /// The graph already reflected the event
    Unchanged,
    /// The event predates what the graph records and was skipped
    Stale,
    /// The event type is not consumed
    Ignored,
}

impl Ack {
    /// Short name for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Ack::Applied { .. } => "applied",
            Ack::Unchanged => "unchanged",
            Ack::Stale => "stale",
            Ack::Ignored => "ignored",
        }
    }
}

/// Callback for side effects of applied events
#[async_trait]
pub trait SyncObserver: Send + Sync {
    /// A load was cancelled
    async fn load_cancelled(&self, load_id: &LoadId);
}

enum Plan {
    Write(Vec<GraphMutation>),
    Skip(Ack),
}

/// Applies fleet events to the graph
#[derive(Clone)]
pub struct GraphSynchronizer {
    store: Arc<dyn GraphStore>,
    observers: Vec<Arc<dyn SyncObserver>>,
}

impl fmt::Debug for GraphSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSynchronizer")
            .field("store", &self.store)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl GraphSynchronizer {
    /// Create a synchronizer over a store
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            observers: Vec::new(),
        }
    }

    /// Register an observer
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Apply one event
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<Ack, SyncError> {
        let stamp = envelope.timestamp;
        let plan = match &envelope.event {
            FleetEvent::Unrecognized { event_type } => {
                debug!(
                    event_id = %envelope.event_id,
                    event_type = %event_type,
                    "Ignoring unconsumed event type"
                );
                return Ok(Ack::Ignored);
            }
            FleetEvent::LoadCreated(event) => Plan::Write(load_created(event, stamp)),
            FleetEvent::LoadAssigned(event) => self.load_assigned(event, stamp).await?,
            FleetEvent::LoadPickedUp(event) => {
                self.load_progressed(event, LoadStatus::PickedUp, stamp).await?
            }
            FleetEvent::LoadInTransit(event) => {
                self.load_progressed(event, LoadStatus::InTransit, stamp).await?
            }
            FleetEvent::LoadDelivered(event) => {
                self.load_progressed(event, LoadStatus::Delivered, stamp).await?
            }
            FleetEvent::LoadCancelled(event) => {
                self.load_released(event, LoadStatus::Cancelled, stamp).await?
            }
            FleetEvent::LoadAssignmentReverted(event) => {
                self.load_released(event, LoadStatus::Created, stamp).await?
            }
            FleetEvent::VehicleCreated(event) => Plan::Write(vehicle_created(event, stamp)),
            FleetEvent::VehicleStatusChanged(event) => {
                Plan::Write(vehicle_status_changed(event, stamp))
            }
            FleetEvent::VehicleLocationUpdated(event) => {
                Plan::Write(vehicle_location_updated(event, stamp))
            }
            FleetEvent::DriverCreated(event) => self.driver_created(event, stamp).await?,
            FleetEvent::DriverStatusChanged(event) => {
                self.driver_status_changed(event, stamp).await?
            }
            FleetEvent::DriverLocationUpdated(event) => {
                Plan::Write(driver_location_updated(event, stamp))
            }
            FleetEvent::DriverQualified(event) => Plan::Write(driver_qualified(event, stamp)),
            FleetEvent::CarrierRegistered(event) => Plan::Write(carrier_registered(event, stamp)),
            FleetEvent::CarrierPerformanceUpdated(event) => {
                Plan::Write(carrier_performance_updated(event, stamp))
            }
        };

        let ack = match plan {
            Plan::Skip(ack) => ack,
            Plan::Write(batch) => {
                debug!(
                    event_id = %envelope.event_id,
                    mutations = batch.len(),
                    "Applying mutation batch"
                );
                let outcome = self.store.apply(batch).await?;
                if outcome.is_noop() {
                    Ack::Unchanged
                } else {
                    Ack::Applied {
                        changed: outcome.changed,
                    }
                }
            }
        };

        if let FleetEvent::LoadCancelled(event) = &envelope.event {
            if ack != Ack::Stale {
                for observer in &self.observers {
                    observer.load_cancelled(&event.load_id).await;
                }
            }
        }

        info!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            entity_id = %envelope.entity_id,
            outcome = ack.as_str(),
            "Event synchronized"
        );
        Ok(ack)
    }

    /// Check a load status write against the lifecycle, `Some` when it must be skipped
    async fn check_lifecycle(
        &self,
        load_id: &LoadId,
        target: LoadStatus,
        stamp: DateTime<Utc>,
        compensating: bool,
    ) -> Result<Option<Ack>, SyncError> {
        let recorded = match self.store.node(&NodeRef::load(load_id)).await? {
            Some(node) => Load::recorded_status(&node)?,
            None => None,
        };
        match decide(recorded, target, stamp, compensating) {
            LifecycleDecision::Proceed => Ok(None),
            LifecycleDecision::Stale => {
                debug!(load_id = %load_id, target = ?target, "Skipping stale load status");
                Ok(Some(Ack::Stale))
            }
            LifecycleDecision::Violation => Err(SyncError::ConstraintViolation {
                entity: NodeRef::load(load_id).to_string(),
                reason: format!(
                    "cannot move from {} to {:?}",
                    recorded
                        .map(|(status, _)| format!("{:?}", status))
                        .unwrap_or_default(),
                    target
                ),
            }),
        }
    }

    /// The load's current assignment edge
    async fn current_assignment(&self, load_id: &LoadId) -> Result<Option<Relationship>, SyncError> {
        let edges = self
            .store
            .outgoing(&NodeRef::load(load_id), RelationshipType::AssignedTo)
            .await?;
        Ok(edges.into_iter().next())
    }

    async fn load_assigned(&self, event: &LoadAssigned, stamp: DateTime<Utc>) -> Result<Plan, SyncError> {
        if let Some(ack) = self
            .check_lifecycle(&event.load_id, LoadStatus::Assigned, stamp, false)
            .await?
        {
            return Ok(Plan::Skip(ack));
        }

        let current = self.current_assignment(&event.load_id).await?;
        if current
            .as_ref()
            .and_then(|edge| edge.stamp)
            .is_some_and(|at| at > stamp)
        {
            return Ok(Plan::Skip(Ack::Stale));
        }
        let previous_driver = current
            .as_ref()
            .and_then(|edge| edge.str_property(fields::DRIVER_ID))
            .map(DriverId::new);

        let assignment = Assignment {
            load_id: event.load_id.clone(),
            vehicle_id: event.vehicle_id.clone(),
            driver_id: event.driver_id.clone(),
            route_id: event.route_id.clone().or_else(|| {
                current
                    .as_ref()
                    .filter(|edge| edge.to == NodeRef::vehicle(&event.vehicle_id))
                    .and_then(|edge| edge.str_property(fields::ROUTE_ID))
                    .map(RouteId::new)
            }),
            assigned_at: stamp,
        };
        let mut batch = assign(&assignment, previous_driver.as_ref());

        if let Some(carrier_id) = &event.carrier_id {
            batch.push(GraphMutation::placeholder(NodeRef::carrier(carrier_id)));
            batch.push(GraphMutation::UpsertRelationship {
                relationship: Relationship::new(
                    NodeRef::vehicle(&event.vehicle_id),
                    RelationshipType::OwnedBy,
                    NodeRef::carrier(carrier_id),
                    Properties::new(),
                    None,
                ),
                exclusive: true,
            });
        }
        Ok(Plan::Write(batch))
    }

    async fn load_progressed(
        &self,
        event: &LoadTransition,
        target: LoadStatus,
        stamp: DateTime<Utc>,
    ) -> Result<Plan, SyncError> {
        if let Some(ack) = self.check_lifecycle(&event.load_id, target, stamp, false).await? {
            return Ok(Plan::Skip(ack));
        }
        Ok(Plan::Write(vec![GraphMutation::node(
            NodeLabel::Load,
            event.load_id.as_str(),
            props([
                (fields::STATUS, json!(target)),
                (fields::POSITION, json!(event.position)),
            ]),
            Some(stamp),
        )]))
    }

    /// Cancellation and assignment revert: set the status and undo the assignment
    async fn load_released(
        &self,
        event: &LoadTransition,
        target: LoadStatus,
        stamp: DateTime<Utc>,
    ) -> Result<Plan, SyncError> {
        let compensating = target == LoadStatus::Created;
        if let Some(ack) = self
            .check_lifecycle(&event.load_id, target, stamp, compensating)
            .await?
        {
            return Ok(Plan::Skip(ack));
        }

        let current = self.current_assignment(&event.load_id).await?;
        if current
            .as_ref()
            .and_then(|edge| edge.stamp)
            .is_some_and(|at| at > stamp)
        {
            return Ok(Plan::Skip(Ack::Stale));
        }

        let mut batch = vec![GraphMutation::node(
            NodeLabel::Load,
            event.load_id.as_str(),
            props([(fields::STATUS, json!(target))]),
            Some(stamp),
        )];

        let Some(current) = current else {
            return Ok(Plan::Write(batch));
        };
        let driver_id = current.str_property(fields::DRIVER_ID).map(DriverId::new);
        batch.extend(unassign(&event.load_id, driver_id.as_ref()));

        if let Some(vehicle) = self.store.node(&current.to).await? {
            if vehicle.get::<VehicleStatus>(fields::STATUS)? == Some(VehicleStatus::InUse) {
                batch.push(GraphMutation::node(
                    NodeLabel::Vehicle,
                    current.to.key.clone(),
                    props([(fields::STATUS, json!(VehicleStatus::Available))]),
                    Some(stamp),
                ));
            }
        }

        if let Some(driver_id) = driver_id {
            let driver = NodeRef::driver(&driver_id);
            let bound_here = self
                .store
                .outgoing(&driver, RelationshipType::CurrentlyAssigned)
                .await?
                .iter()
                .any(|edge| edge.str_property(fields::LOAD_ID) == Some(event.load_id.as_str()));
            let assigned = match self.store.node(&driver).await? {
                Some(node) => node.get::<DriverStatus>(fields::STATUS)? == Some(DriverStatus::Assigned),
                None => false,
            };
            if bound_here && assigned {
                batch.push(GraphMutation::node(
                    NodeLabel::Driver,
                    driver_id.as_str(),
                    props([(fields::STATUS, json!(DriverStatus::Available))]),
                    Some(stamp),
                ));
            }
        }
        Ok(Plan::Write(batch))
    }

    async fn driver_created(&self, event: &DriverCreated, stamp: DateTime<Utc>) -> Result<Plan, SyncError> {
        let driver = NodeRef::driver(&event.driver_id);
        let terminated = match self.store.node(&driver).await? {
            Some(node) => node.get::<DriverStatus>(fields::STATUS)? == Some(DriverStatus::Terminated),
            None => false,
        };

        let mut properties = props([
            (fields::STATUS, json!(event.status)),
            (fields::LICENSE_QUALIFICATIONS, json!(event.license_qualifications)),
            (fields::HOME_LOCATION, json!(event.home_location)),
            (fields::PERFORMANCE_SCORE, json!(event.performance_score)),
            (fields::ON_TIME_PERCENTAGE, json!(event.on_time_percentage)),
            (fields::HOURLY_RATE, json!(event.hourly_rate)),
            (fields::DUTY_HOURS_REMAINING, json!(event.duty_hours_remaining)),
        ]);
        if terminated {
            properties.remove(fields::STATUS);
        }

        let mut batch = vec![GraphMutation::node(
            NodeLabel::Driver,
            event.driver_id.as_str(),
            properties,
            Some(stamp),
        )];
        if let Some(carrier_id) = &event.carrier_id {
            batch.push(GraphMutation::placeholder(NodeRef::carrier(carrier_id)));
            batch.push(GraphMutation::relate(
                driver,
                RelationshipType::WorksFor,
                NodeRef::carrier(carrier_id),
                Properties::new(),
                Some(stamp),
            ));
        }
        Ok(Plan::Write(batch))
    }

    async fn driver_status_changed(
        &self,
        event: &DriverStatusChanged,
        stamp: DateTime<Utc>,
    ) -> Result<Plan, SyncError> {
        let driver = NodeRef::driver(&event.driver_id);
        if let Some(node) = self.store.node(&driver).await? {
            let terminated =
                node.get::<DriverStatus>(fields::STATUS)? == Some(DriverStatus::Terminated);
            if terminated && event.status != DriverStatus::Terminated {
                return match node.stamp_of(fields::STATUS) {
                    Some(at) if stamp <= at => Ok(Plan::Skip(Ack::Stale)),
                    _ => Err(SyncError::ConstraintViolation {
                        entity: driver.to_string(),
                        reason: format!("terminated driver cannot become {:?}", event.status),
                    }),
                };
            }
        }

        let mut batch = vec![GraphMutation::node(
            NodeLabel::Driver,
            event.driver_id.as_str(),
            props([
                (fields::STATUS, json!(event.status)),
                (fields::DUTY_HOURS_REMAINING, json!(event.duty_hours_remaining)),
            ]),
            Some(stamp),
        )];
        if event.status == DriverStatus::Terminated {
            batch.push(GraphMutation::unrelate(
                driver,
                RelationshipType::CurrentlyAssigned,
                None,
                None,
            ));
        }
        Ok(Plan::Write(batch))
    }
}

fn location_node(location: &LocationRef, kind: LocationKind, stamp: DateTime<Utc>) -> GraphMutation {
    GraphMutation::node(
        NodeLabel::Location,
        location.key().as_str(),
        props([
            (fields::POINT, json!(location.point)),
            (fields::KIND, json!(kind)),
            (fields::NAME, json!(location.name)),
        ]),
        Some(stamp),
    )
}

fn load_created(event: &LoadCreated, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    let load = NodeRef::load(&event.load_id);
    let pickup = NodeRef::location(event.pickup.key());
    let delivery = NodeRef::location(event.delivery.key());
    vec![
        GraphMutation::node(
            NodeLabel::Load,
            event.load_id.as_str(),
            props([
                (fields::WEIGHT, json!(event.weight)),
                (fields::VOLUME, json!(event.volume)),
                (fields::PICKUP_WINDOW, json!(event.pickup_window)),
                (fields::DELIVERY_WINDOW, json!(event.delivery_window)),
                (fields::PRIORITY, json!(event.priority)),
                (fields::REQUIRED_CAPABILITIES, json!(event.required_capabilities)),
                (fields::REQUIRED_ENDORSEMENTS, json!(event.required_endorsements)),
            ]),
            Some(stamp),
        ),
        // Never regresses a load that already moved on
        GraphMutation::node(
            NodeLabel::Load,
            event.load_id.as_str(),
            props([(fields::STATUS, json!(LoadStatus::Created))]),
            None,
        ),
        location_node(&event.pickup, location_kind_for(true), stamp),
        location_node(&event.delivery, location_kind_for(false), stamp),
        GraphMutation::relate(
            load.clone(),
            RelationshipType::OriginAt,
            pickup,
            Properties::new(),
            Some(stamp),
        ),
        GraphMutation::relate(
            load,
            RelationshipType::DestinationAt,
            delivery,
            Properties::new(),
            Some(stamp),
        ),
    ]
}

fn vehicle_created(event: &VehicleCreated, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    let vehicle = NodeRef::vehicle(&event.vehicle_id);
    let mut batch = vec![GraphMutation::node(
        NodeLabel::Vehicle,
        event.vehicle_id.as_str(),
        props([
            (fields::STATUS, json!(event.status)),
            (fields::CAPABILITY_TAGS, json!(event.capability_tags)),
            (fields::CAPACITY_WEIGHT, json!(event.capacity_weight)),
            (fields::CAPACITY_VOLUME, json!(event.capacity_volume)),
            (fields::FUEL_EFFICIENCY, json!(event.fuel_efficiency)),
            (fields::COST_PER_MILE, json!(event.cost_per_mile)),
            (fields::HOME_BASE, json!(event.home_base.as_ref().map(LocationRef::key))),
        ]),
        Some(stamp),
    )];

    if let Some(home) = &event.home_base {
        batch.push(location_node(home, LocationKind::Depot, stamp));
        // Parked at home until the first position report
        batch.push(GraphMutation::node(
            NodeLabel::Vehicle,
            event.vehicle_id.as_str(),
            props([(fields::POSITION, json!(home.point))]),
            None,
        ));
    }
    if let Some(carrier_id) = &event.carrier_id {
        batch.push(GraphMutation::placeholder(NodeRef::carrier(carrier_id)));
        batch.push(GraphMutation::relate(
            vehicle,
            RelationshipType::OwnedBy,
            NodeRef::carrier(carrier_id),
            Properties::new(),
            Some(stamp),
        ));
    }
    batch
}

fn vehicle_status_changed(event: &VehicleStatusChanged, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    vec![GraphMutation::node(
        NodeLabel::Vehicle,
        event.vehicle_id.as_str(),
        props([(fields::STATUS, json!(event.status))]),
        Some(stamp),
    )]
}

fn vehicle_location_updated(event: &VehicleLocationUpdated, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    let mut batch = vec![GraphMutation::node(
        NodeLabel::Vehicle,
        event.vehicle_id.as_str(),
        props([
            (fields::POSITION, json!(event.position)),
            (fields::HEADING, json!(event.heading)),
            (fields::SPEED, json!(event.speed)),
        ]),
        Some(stamp),
    )];
    if let Some(driver_id) = &event.driver_id {
        batch.push(GraphMutation::node(
            NodeLabel::Driver,
            driver_id.as_str(),
            props([(fields::POSITION, json!(event.position))]),
            Some(stamp),
        ));
    }
    batch
}

fn driver_location_updated(event: &DriverLocationUpdated, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    vec![GraphMutation::node(
        NodeLabel::Driver,
        event.driver_id.as_str(),
        props([(fields::POSITION, json!(event.position))]),
        Some(stamp),
    )]
}

fn driver_qualified(event: &DriverQualified, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    let driver = NodeRef::driver(&event.driver_id);
    let vehicle = NodeRef::vehicle(&event.vehicle_id);
    vec![
        GraphMutation::placeholder(driver.clone()),
        GraphMutation::placeholder(vehicle.clone()),
        GraphMutation::relate(
            driver,
            RelationshipType::QualifiedFor,
            vehicle,
            props([
                (fields::VALID_FROM, json!(event.valid_from)),
                (fields::VALID_UNTIL, json!(event.valid_until)),
            ]),
            Some(stamp),
        ),
    ]
}

fn carrier_registered(event: &CarrierRegistered, stamp: DateTime<Utc>) -> Vec<GraphMutation> {
    vec![GraphMutation::node(
        NodeLabel::Carrier,
        event.carrier_id.as_str(),
        props([
            (fields::NAME, json!(event.name)),
            (fields::FLEET_SIZE, json!(event.fleet_size)),
        ]),
        Some(stamp),
    )]
}

fn carrier_performance_updated(
    event: &CarrierPerformanceUpdated,
    stamp: DateTime<Utc>,
) -> Vec<GraphMutation> {
    vec![GraphMutation::node(
        NodeLabel::Carrier,
        event.carrier_id.as_str(),
        props([
            (fields::ON_TIME_RATE, json!(event.on_time_rate)),
            (fields::SAFETY_RATING, json!(event.safety_rating)),
            (fields::FLEET_SIZE, json!(event.fleet_size)),
        ]),
        Some(stamp),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use crate::model::{Driver, Vehicle};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str, entity_id: &str, minute: u32, data: Value) -> EventEnvelope {
        EventEnvelope::from_value(json!({
            "event_id": format!("{}-{}-{}", event_type, entity_id, minute),
            "event_type": event_type,
            "timestamp": format!("2025-04-01T08:{:02}:00Z", minute),
            "entity_id": entity_id,
            "data": data,
        }))
        .unwrap()
    }

    fn load_created(minute: u32) -> EventEnvelope {
        event(
            "LOAD_CREATED",
            "L1",
            minute,
            json!({
                "pickup": {"point": {"latitude": 41.88, "longitude": -87.63}},
                "delivery": {"location_id": "DC-7", "point": {"latitude": 42.0, "longitude": -88.0}},
                "weight": 12000.0,
                "pickup_window": {"start": "2025-04-01T10:00:00Z", "end": "2025-04-01T14:00:00Z"}
            }),
        )
    }

    fn synchronizer() -> (Arc<InMemoryGraphStore>, GraphSynchronizer) {
        let store = Arc::new(InMemoryGraphStore::new());
        let sync = GraphSynchronizer::new(store.clone());
        (store, sync)
    }

    #[tokio::test]
    async fn test_load_created_builds_locations_and_edges() {
        let (store, sync) = synchronizer();
        let ack = sync.apply(&load_created(0)).await.unwrap();
        assert!(matches!(ack, Ack::Applied { .. }));

        let snapshot = store.snapshot().await;
        assert!(snapshot.nodes.contains_key(&NodeRef::location("DC-7")));
        assert!(snapshot
            .nodes
            .contains_key(&NodeRef::location("geo_41.88000_-87.63000")));
        assert_eq!(snapshot.edges_of_type(RelationshipType::OriginAt).len(), 1);

        let load = Load::from_node(&snapshot.nodes[&NodeRef::load("L1")]).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Created));
        assert_eq!(load.weight, 12000.0);
    }

    #[tokio::test]
    async fn test_replay_is_unchanged() {
        let (_, sync) = synchronizer();
        let created = load_created(0);
        sync.apply(&created).await.unwrap();
        assert_eq!(sync.apply(&created).await.unwrap(), Ack::Unchanged);
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let (store, sync) = synchronizer();
        let ack = sync.apply(&event("INVOICE_SENT", "I1", 0, json!({}))).await.unwrap();
        assert_eq!(ack, Ack::Ignored);
        assert!(store.snapshot().await.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_assignment_then_late_created_keeps_status() {
        let (store, sync) = synchronizer();
        sync.apply(&event(
            "LOAD_ASSIGNED",
            "L1",
            5,
            json!({"vehicle_id": "V1", "driver_id": "D1"}),
        ))
        .await
        .unwrap();
        sync.apply(&load_created(0)).await.unwrap();

        let snapshot = store.snapshot().await;
        let load = Load::from_node(&snapshot.nodes[&NodeRef::load("L1")]).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Assigned));
        assert_eq!(load.weight, 12000.0);
    }

    #[tokio::test]
    async fn test_backward_transition_is_violation() {
        let (_, sync) = synchronizer();
        sync.apply(&load_created(0)).await.unwrap();
        sync.apply(&event("LOAD_PICKED_UP", "L1", 10, json!({}))).await.unwrap();

        let late = sync.apply(&event("LOAD_ASSIGNED", "L1", 5, json!({"vehicle_id": "V1"}))).await;
        assert_eq!(late.unwrap(), Ack::Stale);

        let backward = sync
            .apply(&event("LOAD_ASSIGNED", "L1", 20, json!({"vehicle_id": "V1"})))
            .await;
        assert!(matches!(backward, Err(SyncError::ConstraintViolation { .. })));
    }

    #[tokio::test]
    async fn test_cancel_releases_driver_and_vehicle() {
        struct Counter(AtomicUsize);

        #[async_trait]
        impl SyncObserver for Counter {
            async fn load_cancelled(&self, _load_id: &LoadId) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let store = Arc::new(InMemoryGraphStore::new());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let sync = GraphSynchronizer::new(store.clone()).with_observer(counter.clone());

        sync.apply(&load_created(0)).await.unwrap();
        sync.apply(&event("DRIVER_CREATED", "D1", 1, json!({}))).await.unwrap();
        sync.apply(&event("VEHICLE_CREATED", "V1", 1, json!({"capacity_weight": 40000.0})))
            .await
            .unwrap();
        sync.apply(&event(
            "LOAD_ASSIGNED",
            "L1",
            2,
            json!({"vehicle_id": "V1", "driver_id": "D1"}),
        ))
        .await
        .unwrap();
        sync.apply(&event("LOAD_CANCELLED", "L1", 3, json!({"reason": "shipper"})))
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        assert!(snapshot.edges_of_type(RelationshipType::AssignedTo).is_empty());
        assert!(snapshot.edges_of_type(RelationshipType::CurrentlyAssigned).is_empty());
        let driver = Driver::from_node(&snapshot.nodes[&NodeRef::driver("D1")]).unwrap();
        assert_eq!(driver.status, Some(DriverStatus::Available));
        let vehicle = Vehicle::from_node(&snapshot.nodes[&NodeRef::vehicle("V1")]).unwrap();
        assert_eq!(vehicle.status, Some(VehicleStatus::Available));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revert_is_the_only_way_back() {
        let (store, sync) = synchronizer();
        sync.apply(&load_created(0)).await.unwrap();
        sync.apply(&event("LOAD_ASSIGNED", "L1", 2, json!({"vehicle_id": "V1", "driver_id": "D1"})))
            .await
            .unwrap();
        let ack = sync
            .apply(&event("LOAD_ASSIGNMENT_REVERTED", "L1", 4, json!({})))
            .await
            .unwrap();
        assert!(matches!(ack, Ack::Applied { .. }));

        let snapshot = store.snapshot().await;
        let load = Load::from_node(&snapshot.nodes[&NodeRef::load("L1")]).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Created));
        assert!(snapshot.edges_of_type(RelationshipType::CurrentlyAssigned).is_empty());
    }

    #[tokio::test]
    async fn test_replayed_revert_keeps_newer_assignment() {
        let (store, sync) = synchronizer();
        let revert = event("LOAD_ASSIGNMENT_REVERTED", "L1", 4, json!({}));
        sync.apply(&load_created(0)).await.unwrap();
        sync.apply(&event("LOAD_ASSIGNED", "L1", 2, json!({"vehicle_id": "V1", "driver_id": "D1"})))
            .await
            .unwrap();
        sync.apply(&revert).await.unwrap();
        sync.apply(&event("LOAD_ASSIGNED", "L1", 6, json!({"vehicle_id": "V2", "driver_id": "D2"})))
            .await
            .unwrap();

        assert_eq!(sync.apply(&revert).await.unwrap(), Ack::Stale);
        let snapshot = store.snapshot().await;
        let assigned = snapshot.edges_of_type(RelationshipType::AssignedTo);
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].to, NodeRef::vehicle("V2"));
    }

    #[tokio::test]
    async fn test_terminated_driver_stays_terminated() {
        let (store, sync) = synchronizer();
        sync.apply(&event("DRIVER_STATUS_CHANGED", "D1", 5, json!({"status": "TERMINATED"})))
            .await
            .unwrap();

        let late = sync
            .apply(&event("DRIVER_STATUS_CHANGED", "D1", 4, json!({"status": "AVAILABLE"})))
            .await
            .unwrap();
        assert_eq!(late, Ack::Stale);

        let newer = sync
            .apply(&event("DRIVER_STATUS_CHANGED", "D1", 6, json!({"status": "AVAILABLE"})))
            .await;
        assert!(matches!(newer, Err(SyncError::ConstraintViolation { .. })));

        sync.apply(&event("DRIVER_CREATED", "D1", 7, json!({"hourly_rate": 30.0})))
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        let driver = Driver::from_node(&snapshot.nodes[&NodeRef::driver("D1")]).unwrap();
        assert_eq!(driver.status, Some(DriverStatus::Terminated));
        assert_eq!(driver.hourly_rate, 30.0);
    }

    #[tokio::test]
    async fn test_vehicle_report_moves_driver_too() {
        let (store, sync) = synchronizer();
        sync.apply(&event(
            "VEHICLE_LOCATION_UPDATED",
            "V1",
            1,
            json!({"driver_id": "D1", "latitude": 40.0, "longitude": -89.0, "speed": 55.0}),
        ))
        .await
        .unwrap();

        let snapshot = store.snapshot().await;
        let driver = Driver::from_node(&snapshot.nodes[&NodeRef::driver("D1")]).unwrap();
        assert_eq!(driver.position, Some(crate::geo::GeoPoint::new(40.0, -89.0)));
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let (store, sync) = synchronizer();
        store.fail_next(1);
        let err = sync.apply(&load_created(0)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
