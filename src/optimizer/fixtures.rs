// Copyright 2025 Cowboy AI, LLC.

//! Graph fixtures for optimizer tests

use crate::geo::{GeoPoint, TimeWindow};
use crate::graph::{props, GraphMutation, GraphStore, InMemoryGraphStore, NodeLabel, NodeRef, Properties, RelationshipType};
use crate::model::{fields, DriverStatus, LoadStatus, LocationKind, VehicleStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

/// Chicago
pub const P1: GeoPoint = GeoPoint::new(41.8781, -87.6298);
/// Milwaukee
pub const DEL1: GeoPoint = GeoPoint::new(43.0389, -87.9065);

const MILES_PER_DEGREE_LAT: f64 = 69.0955;

pub fn north_of(origin: GeoPoint, miles: f64) -> GeoPoint {
    GeoPoint::new(origin.latitude + miles / MILES_PER_DEGREE_LAT, origin.longitude)
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 2, hour, 0, 0).unwrap()
}

pub fn as_of() -> DateTime<Utc> {
    at(8)
}

pub struct Fleet<'a> {
    store: &'a InMemoryGraphStore,
}

impl<'a> Fleet<'a> {
    pub fn new(store: &'a InMemoryGraphStore) -> Self {
        Self { store }
    }

    async fn write(&self, batch: Vec<GraphMutation>) {
        self.store.apply(batch).await.unwrap();
    }

    pub async fn carrier(&self, id: &str, on_time: f64, safety: f64) -> &Self {
        self.write(vec![GraphMutation::node(
            NodeLabel::Carrier,
            id,
            props([
                (fields::ON_TIME_RATE, json!(on_time)),
                (fields::SAFETY_RATING, json!(safety)),
            ]),
            Some(Utc::now()),
        )])
        .await;
        self
    }

    pub async fn location(&self, id: &str, point: GeoPoint, kind: LocationKind) -> &Self {
        self.write(vec![GraphMutation::node(
            NodeLabel::Location,
            id,
            props([(fields::POINT, json!(point)), (fields::KIND, json!(kind))]),
            Some(Utc::now()),
        )])
        .await;
        self
    }

    pub async fn load(
        &self,
        id: &str,
        weight: f64,
        pickup_window: TimeWindow,
        origin: &str,
        destination: &str,
    ) -> &Self {
        let stamp = Some(Utc::now());
        let load = NodeRef::load(id);
        self.write(vec![
            GraphMutation::node(
                NodeLabel::Load,
                id,
                props([
                    (fields::STATUS, json!(LoadStatus::Created)),
                    (fields::WEIGHT, json!(weight)),
                    (fields::VOLUME, json!(2_000.0)),
                    (fields::PICKUP_WINDOW, json!(pickup_window)),
                    (fields::DELIVERY_WINDOW, json!(TimeWindow::new(at(9), at(18)))),
                ]),
                stamp,
            ),
            GraphMutation::relate(
                load.clone(),
                RelationshipType::OriginAt,
                NodeRef::location(origin),
                Properties::new(),
                stamp,
            ),
            GraphMutation::relate(
                load,
                RelationshipType::DestinationAt,
                NodeRef::location(destination),
                Properties::new(),
                stamp,
            ),
        ])
        .await;
        self
    }

    pub async fn driver(&self, id: &str, position: GeoPoint, rating: f64, carrier: &str) -> &Self {
        let stamp = Some(Utc::now());
        self.write(vec![
            GraphMutation::node(
                NodeLabel::Driver,
                id,
                props([
                    (fields::STATUS, json!(DriverStatus::Available)),
                    (fields::POSITION, json!(position)),
                    (fields::PERFORMANCE_SCORE, json!(rating / 100.0)),
                ]),
                stamp,
            ),
            GraphMutation::relate(
                NodeRef::driver(id),
                RelationshipType::WorksFor,
                NodeRef::carrier(carrier),
                Properties::new(),
                stamp,
            ),
        ])
        .await;
        self
    }

    pub async fn vehicle(&self, id: &str, capacity_weight: f64, carrier: &str) -> &Self {
        let stamp = Some(Utc::now());
        self.write(vec![
            GraphMutation::node(
                NodeLabel::Vehicle,
                id,
                props([
                    (fields::STATUS, json!(VehicleStatus::Available)),
                    (fields::CAPACITY_WEIGHT, json!(capacity_weight)),
                    (fields::CAPACITY_VOLUME, json!(2_800.0)),
                ]),
                stamp,
            ),
            GraphMutation::relate(
                NodeRef::vehicle(id),
                RelationshipType::OwnedBy,
                NodeRef::carrier(carrier),
                Properties::new(),
                stamp,
            ),
        ])
        .await;
        self
    }

    pub async fn qualify(&self, driver: &str, vehicle: &str) -> &Self {
        self.write(vec![GraphMutation::relate(
            NodeRef::driver(driver),
            RelationshipType::QualifiedFor,
            NodeRef::vehicle(vehicle),
            Properties::new(),
            Some(Utc::now()),
        )])
        .await;
        self
    }

    pub async fn bind(&self, driver: &str, vehicle: &str) -> &Self {
        self.write(vec![GraphMutation::relate(
            NodeRef::driver(driver),
            RelationshipType::CurrentlyAssigned,
            NodeRef::vehicle(vehicle),
            Properties::new(),
            Some(Utc::now()),
        )])
        .await;
        self
    }
}

/// Load L1 at P1, 35,000 lb, pickup 09:00-11:00, with three drivers
///
/// D1 is 5 mi out on V1, D2 is 40 mi out on V2, D3 is 8 mi out bound to an
/// undersized V3.
pub async fn seed_l1(store: &InMemoryGraphStore) {
    let fleet = Fleet::new(store);
    fleet.carrier("C1", 95.0, 90.0).await;
    fleet.location("P1", P1, LocationKind::Pickup).await;
    fleet.location("DEL1", DEL1, LocationKind::Delivery).await;
    fleet
        .load("L1", 35_000.0, TimeWindow::new(at(9), at(11)), "P1", "DEL1")
        .await;

    fleet.vehicle("V1", 40_000.0, "C1").await;
    fleet.vehicle("V2", 45_000.0, "C1").await;
    fleet.vehicle("V3", 26_000.0, "C1").await;

    fleet.driver("D1", north_of(P1, 5.0), 92.0, "C1").await;
    fleet.driver("D2", north_of(P1, 40.0), 98.0, "C1").await;
    fleet.driver("D3", north_of(P1, 8.0), 99.0, "C1").await;

    fleet.qualify("D1", "V1").await;
    fleet.qualify("D2", "V2").await;
    fleet.bind("D3", "V3").await;
}
