// Copyright 2025 Cowboy AI, LLC.

//! Typed payloads of the consumed fleet events

use crate::errors::EventValidationError;
use crate::geo::{GeoPoint, TimeWindow};
use crate::identifiers::{CarrierId, DriverId, LoadId, LocationId, RouteId, VehicleId};
use crate::model::{DriverStatus, LocationKind, PriorityTier, VehicleStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Behaviour shared by every payload
pub trait EventPayload {
    /// Name of the payload field holding the entity key
    const ID_FIELD: &'static str;

    /// Entity key named by the payload
    fn entity_key(&self) -> &str;

    /// Check value ranges and cross-field rules
    fn validate(&self) -> Result<(), EventValidationError>;
}

fn check_point(field: &'static str, point: &GeoPoint) -> Result<(), EventValidationError> {
    if point.is_valid() {
        Ok(())
    } else {
        Err(EventValidationError::invalid(field, format!("coordinate {} out of range", point)))
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), EventValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EventValidationError::invalid(field, format!("{} must be a non-negative number", value)))
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<(), EventValidationError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(EventValidationError::invalid(field, format!("{} is outside 0..=100", value)))
    }
}

fn check_window(field: &'static str, window: &TimeWindow) -> Result<(), EventValidationError> {
    if window.is_well_formed() {
        Ok(())
    } else {
        Err(EventValidationError::invalid(field, "window ends before it starts"))
    }
}

/// A place referenced by a load or vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocationRef {
    /// Operational key of the location, when it has one
    #[serde(default)]
    pub location_id: Option<LocationId>,
    /// Coordinate
    pub point: GeoPoint,
    /// Display name or address
    #[serde(default)]
    pub name: Option<String>,
}

impl LocationRef {
    /// Key of the location node
    pub fn key(&self) -> LocationId {
        self.location_id
            .clone()
            .unwrap_or_else(|| LocationId::new(self.point.location_key()))
    }
}

/// `LOAD_CREATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoadCreated {
    /// Load key
    pub load_id: LoadId,
    /// Origin
    pub pickup: LocationRef,
    /// Destination
    pub delivery: LocationRef,
    /// Weight in pounds
    pub weight: f64,
    /// Volume in cubic feet
    #[serde(default)]
    pub volume: f64,
    /// Pickup window
    pub pickup_window: TimeWindow,
    /// Delivery window
    #[serde(default)]
    pub delivery_window: Option<TimeWindow>,
    /// Priority tier
    #[serde(default)]
    pub priority: PriorityTier,
    /// Equipment tags the vehicle must carry
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    /// License tags the driver must hold
    #[serde(default)]
    pub required_endorsements: BTreeSet<String>,
}

impl EventPayload for LoadCreated {
    const ID_FIELD: &'static str = "load_id";

    fn entity_key(&self) -> &str {
        self.load_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        check_point("pickup.point", &self.pickup.point)?;
        check_point("delivery.point", &self.delivery.point)?;
        check_non_negative("weight", self.weight)?;
        check_non_negative("volume", self.volume)?;
        check_window("pickup_window", &self.pickup_window)?;
        if let Some(window) = &self.delivery_window {
            check_window("delivery_window", window)?;
            if window.end < self.pickup_window.start {
                return Err(EventValidationError::invalid(
                    "delivery_window",
                    "delivery window closes before pickup opens",
                ));
            }
        }
        Ok(())
    }
}

/// `LOAD_ASSIGNED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoadAssigned {
    /// Load key
    pub load_id: LoadId,
    /// Assigned vehicle
    pub vehicle_id: VehicleId,
    /// Assigned driver, optional for vehicle-only assignments
    #[serde(default)]
    pub driver_id: Option<DriverId>,
    /// Carrier providing the equipment
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    /// Route plan behind the assignment
    #[serde(default)]
    pub route_id: Option<RouteId>,
}

impl EventPayload for LoadAssigned {
    const ID_FIELD: &'static str = "load_id";

    fn entity_key(&self) -> &str {
        self.load_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        if self.vehicle_id.is_blank() {
            return Err(EventValidationError::invalid("vehicle_id", "must not be blank"));
        }
        if self.driver_id.as_ref().is_some_and(DriverId::is_blank) {
            return Err(EventValidationError::invalid("driver_id", "must not be blank"));
        }
        Ok(())
    }
}

/// Payload of load events that only carry the load and an optional note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoadTransition {
    /// Load key
    pub load_id: LoadId,
    /// Free-form reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Where the load was when the status changed
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

impl EventPayload for LoadTransition {
    const ID_FIELD: &'static str = "load_id";

    fn entity_key(&self) -> &str {
        self.load_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        if let Some(point) = &self.position {
            check_point("position", point)?;
        }
        Ok(())
    }
}

/// `VEHICLE_CREATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VehicleCreated {
    /// Vehicle key
    pub vehicle_id: VehicleId,
    /// Owning carrier
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    /// Equipment tags
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    /// Weight capacity in pounds
    pub capacity_weight: f64,
    /// Volume capacity in cubic feet
    #[serde(default)]
    pub capacity_volume: f64,
    /// Miles per gallon
    #[serde(default)]
    pub fuel_efficiency: Option<f64>,
    /// Operating cost per mile
    #[serde(default)]
    pub cost_per_mile: Option<f64>,
    /// Home base
    #[serde(default)]
    pub home_base: Option<LocationRef>,
    /// Initial status
    #[serde(default = "default_vehicle_status")]
    pub status: VehicleStatus,
}

fn default_vehicle_status() -> VehicleStatus {
    VehicleStatus::Available
}

impl EventPayload for VehicleCreated {
    const ID_FIELD: &'static str = "vehicle_id";

    fn entity_key(&self) -> &str {
        self.vehicle_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        check_non_negative("capacity_weight", self.capacity_weight)?;
        check_non_negative("capacity_volume", self.capacity_volume)?;
        if let Some(value) = self.fuel_efficiency {
            check_non_negative("fuel_efficiency", value)?;
        }
        if let Some(value) = self.cost_per_mile {
            check_non_negative("cost_per_mile", value)?;
        }
        if let Some(home) = &self.home_base {
            check_point("home_base.point", &home.point)?;
        }
        Ok(())
    }
}

/// `VEHICLE_STATUS_CHANGED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VehicleStatusChanged {
    /// Vehicle key
    pub vehicle_id: VehicleId,
    /// New status
    pub status: VehicleStatus,
    /// Free-form reason
    #[serde(default)]
    pub reason: Option<String>,
}

impl EventPayload for VehicleStatusChanged {
    const ID_FIELD: &'static str = "vehicle_id";

    fn entity_key(&self) -> &str {
        self.vehicle_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        Ok(())
    }
}

/// `VEHICLE_LOCATION_UPDATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VehicleLocationUpdated {
    /// Vehicle key
    pub vehicle_id: VehicleId,
    /// Driver operating the vehicle, when reported
    #[serde(default)]
    pub driver_id: Option<DriverId>,
    /// Reported coordinate
    #[serde(flatten)]
    pub position: GeoPoint,
    /// Heading in degrees
    #[serde(default)]
    pub heading: Option<f64>,
    /// Speed in miles per hour
    #[serde(default)]
    pub speed: Option<f64>,
}

impl EventPayload for VehicleLocationUpdated {
    const ID_FIELD: &'static str = "vehicle_id";

    fn entity_key(&self) -> &str {
        self.vehicle_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        check_point("position", &self.position)?;
        if let Some(speed) = self.speed {
            check_non_negative("speed", speed)?;
        }
        if let Some(heading) = self.heading {
            if !(0.0..=360.0).contains(&heading) {
                return Err(EventValidationError::invalid("heading", "must be within 0..=360"));
            }
        }
        Ok(())
    }
}

/// `DRIVER_CREATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriverCreated {
    /// Driver key
    pub driver_id: DriverId,
    /// Employing carrier
    #[serde(default)]
    pub carrier_id: Option<CarrierId>,
    /// License capability tags
    #[serde(default)]
    pub license_qualifications: BTreeSet<String>,
    /// Home coordinate
    #[serde(default)]
    pub home_location: Option<GeoPoint>,
    /// Performance score, 0 to 1
    #[serde(default)]
    pub performance_score: Option<f64>,
    /// On-time percentage
    #[serde(default)]
    pub on_time_percentage: Option<f64>,
    /// Pay per hour
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    /// Remaining hours-of-service budget
    #[serde(default)]
    pub duty_hours_remaining: Option<f64>,
    /// Initial status
    #[serde(default = "default_driver_status")]
    pub status: DriverStatus,
}

fn default_driver_status() -> DriverStatus {
    DriverStatus::Available
}

impl EventPayload for DriverCreated {
    const ID_FIELD: &'static str = "driver_id";

    fn entity_key(&self) -> &str {
        self.driver_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        if let Some(point) = &self.home_location {
            check_point("home_location", point)?;
        }
        if let Some(score) = self.performance_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(EventValidationError::invalid(
                    "performance_score",
                    format!("{} is outside 0..=1", score),
                ));
            }
        }
        if let Some(value) = self.on_time_percentage {
            check_percentage("on_time_percentage", value)?;
        }
        if let Some(value) = self.hourly_rate {
            check_non_negative("hourly_rate", value)?;
        }
        if let Some(value) = self.duty_hours_remaining {
            check_non_negative("duty_hours_remaining", value)?;
        }
        Ok(())
    }
}

/// `DRIVER_STATUS_CHANGED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriverStatusChanged {
    /// Driver key
    pub driver_id: DriverId,
    /// New status
    pub status: DriverStatus,
    /// Remaining hours-of-service budget, when reported
    #[serde(default)]
    pub duty_hours_remaining: Option<f64>,
}

impl EventPayload for DriverStatusChanged {
    const ID_FIELD: &'static str = "driver_id";

    fn entity_key(&self) -> &str {
        self.driver_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        if let Some(value) = self.duty_hours_remaining {
            check_non_negative("duty_hours_remaining", value)?;
        }
        Ok(())
    }
}

/// `DRIVER_LOCATION_UPDATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriverLocationUpdated {
    /// Driver key
    pub driver_id: DriverId,
    /// Reported coordinate
    #[serde(flatten)]
    pub position: GeoPoint,
}

impl EventPayload for DriverLocationUpdated {
    const ID_FIELD: &'static str = "driver_id";

    fn entity_key(&self) -> &str {
        self.driver_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        check_point("position", &self.position)
    }
}

/// `DRIVER_QUALIFIED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriverQualified {
    /// Driver key
    pub driver_id: DriverId,
    /// Vehicle the driver is certified for
    pub vehicle_id: VehicleId,
    /// Certification start
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Certification end
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl EventPayload for DriverQualified {
    const ID_FIELD: &'static str = "driver_id";

    fn entity_key(&self) -> &str {
        self.driver_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until < from {
                return Err(EventValidationError::invalid(
                    "valid_until",
                    "certification ends before it starts",
                ));
            }
        }
        Ok(())
    }
}

/// `CARRIER_REGISTERED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CarrierRegistered {
    /// Carrier key
    pub carrier_id: CarrierId,
    /// Company name
    #[serde(default)]
    pub name: Option<String>,
    /// Number of vehicles operated
    #[serde(default)]
    pub fleet_size: Option<u32>,
}

impl EventPayload for CarrierRegistered {
    const ID_FIELD: &'static str = "carrier_id";

    fn entity_key(&self) -> &str {
        self.carrier_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        Ok(())
    }
}

/// `CARRIER_PERFORMANCE_UPDATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CarrierPerformanceUpdated {
    /// Carrier key
    pub carrier_id: CarrierId,
    /// On-time delivery rate, 0 to 100
    pub on_time_rate: f64,
    /// Safety rating, 0 to 100
    pub safety_rating: f64,
    /// Number of vehicles operated
    #[serde(default)]
    pub fleet_size: Option<u32>,
}

impl EventPayload for CarrierPerformanceUpdated {
    const ID_FIELD: &'static str = "carrier_id";

    fn entity_key(&self) -> &str {
        self.carrier_id.as_str()
    }

    fn validate(&self) -> Result<(), EventValidationError> {
        check_percentage("on_time_rate", self.on_time_rate)?;
        check_percentage("safety_rating", self.safety_rating)
    }
}

/// Classification written to location nodes created for a load
pub fn location_kind_for(pickup: bool) -> LocationKind {
    if pickup {
        LocationKind::Pickup
    } else {
        LocationKind::Delivery
    }
}
