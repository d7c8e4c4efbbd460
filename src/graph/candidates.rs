// Copyright 2025 Cowboy AI, LLC.

//! Candidate traversal over the graph read primitives

use super::node::{NodeLabel, NodeRef};
use super::relationship::{Relationship, RelationshipType};
use super::store::GraphStore;
use crate::errors::GraphStoreError;
use crate::geo::GeoPoint;
use crate::model::{fields, Carrier, Driver, Vehicle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Filters pushed down into the candidate traversal
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFilters {
    /// Minimum driver rating on a 0 to 100 scale
    pub min_driver_rating: Option<f64>,
    /// Equipment tags a qualified vehicle must hold
    pub required_capabilities: BTreeSet<String>,
    /// Weight a qualified vehicle must carry
    pub min_weight: f64,
    /// Volume a qualified vehicle must hold
    pub min_volume: f64,
    /// Instant used for certification windows
    pub as_of: DateTime<Utc>,
}

/// How a driver reaches a vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleAccess {
    /// The driver's current equipment
    Bound,
    /// A vehicle the driver is certified for
    Qualified {
        /// Certification start
        valid_from: Option<DateTime<Utc>>,
        /// Certification end
        valid_until: Option<DateTime<Utc>>,
    },
}

/// A driver/vehicle pairing found by the traversal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    /// Driver
    pub driver: Driver,
    /// Vehicle
    pub vehicle: Vehicle,
    /// Owning carrier of the vehicle, else the driver's employer
    pub carrier: Option<Carrier>,
    /// Driver to origin distance in miles
    pub distance_miles: f64,
    /// Edge the vehicle was reached through
    pub access: VehicleAccess,
}

/// Walk drivers near `origin` and their reachable vehicles
///
/// Records are ordered by distance, then driver key, then vehicle key.
pub async fn scan<S: GraphStore + ?Sized>(
    store: &S,
    origin: GeoPoint,
    radius_miles: f64,
    filters: &CandidateFilters,
) -> Result<Vec<CandidateRecord>, GraphStoreError> {
    let mut nearby = Vec::new();
    for node in store.nodes_by_label(NodeLabel::Driver).await? {
        let driver = match Driver::from_node(&node) {
            Ok(driver) => driver,
            Err(err) => {
                warn!(driver = %node.key, error = %err, "Skipping unreadable driver node");
                continue;
            }
        };
        if !driver.is_available() {
            continue;
        }
        if filters
            .min_driver_rating
            .is_some_and(|min| driver.rating() < min)
        {
            continue;
        }
        let Some(position) = driver.current_position() else {
            continue;
        };
        let distance = position.distance_miles(&origin);
        if distance <= radius_miles {
            nearby.push((distance, driver));
        }
    }
    nearby.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));

    let mut records = Vec::new();
    for (distance, driver) in nearby {
        let driver_ref = NodeRef::driver(&driver.id);
        let employer = store
            .outgoing(&driver_ref, RelationshipType::WorksFor)
            .await?
            .into_iter()
            .next()
            .map(|edge| edge.to);

        let mut vehicles = Vec::new();
        let mut seen = BTreeSet::new();

        for edge in store
            .outgoing(&driver_ref, RelationshipType::CurrentlyAssigned)
            .await?
        {
            if let Some(vehicle) = read_vehicle(store, &edge.to).await? {
                if vehicle.is_available() && seen.insert(vehicle.id.clone()) {
                    vehicles.push((vehicle, VehicleAccess::Bound));
                }
            }
        }

        for edge in store
            .outgoing(&driver_ref, RelationshipType::QualifiedFor)
            .await?
        {
            let (valid_from, valid_until) = certification_window(&edge);
            if valid_from.is_some_and(|from| filters.as_of < from)
                || valid_until.is_some_and(|until| filters.as_of > until)
            {
                continue;
            }
            let Some(vehicle) = read_vehicle(store, &edge.to).await? else {
                continue;
            };
            if !vehicle.is_available()
                || !vehicle.has_capabilities(&filters.required_capabilities)
                || !vehicle.fits(filters.min_weight, filters.min_volume)
            {
                continue;
            }
            if seen.insert(vehicle.id.clone()) {
                vehicles.push((
                    vehicle,
                    VehicleAccess::Qualified {
                        valid_from,
                        valid_until,
                    },
                ));
            }
        }

        vehicles.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
        for (vehicle, access) in vehicles {
            let owner = store
                .outgoing(&NodeRef::vehicle(&vehicle.id), RelationshipType::OwnedBy)
                .await?
                .into_iter()
                .next()
                .map(|edge| edge.to);
            let carrier = match owner.as_ref().or(employer.as_ref()) {
                Some(carrier_ref) => read_carrier(store, carrier_ref).await?,
                None => None,
            };
            debug!(
                driver = %driver.id,
                vehicle = %vehicle.id,
                distance_miles = distance,
                "Candidate pairing"
            );
            records.push(CandidateRecord {
                driver: driver.clone(),
                vehicle,
                carrier,
                distance_miles: distance,
                access,
            });
        }
    }
    Ok(records)
}

fn certification_window(edge: &Relationship) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let parse = |name: &str| {
        edge.str_property(name)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc))
    };
    (parse(fields::VALID_FROM), parse(fields::VALID_UNTIL))
}

async fn read_vehicle<S: GraphStore + ?Sized>(
    store: &S,
    node: &NodeRef,
) -> Result<Option<Vehicle>, GraphStoreError> {
    let Some(node) = store.node(node).await? else {
        return Ok(None);
    };
    match Vehicle::from_node(&node) {
        Ok(vehicle) => Ok(Some(vehicle)),
        Err(err) => {
            warn!(vehicle = %node.key, error = %err, "Skipping unreadable vehicle node");
            Ok(None)
        }
    }
}

async fn read_carrier<S: GraphStore + ?Sized>(
    store: &S,
    node: &NodeRef,
) -> Result<Option<Carrier>, GraphStoreError> {
    let Some(node) = store.node(node).await? else {
        return Ok(None);
    };
    match Carrier::from_node(&node) {
        Ok(carrier) => Ok(Some(carrier)),
        Err(err) => {
            warn!(carrier = %node.key, error = %err, "Ignoring unreadable carrier node");
            Ok(None)
        }
    }
}
