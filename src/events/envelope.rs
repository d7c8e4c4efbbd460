// Copyright 2025 Cowboy AI, LLC.

//! Inbound event envelope and its validated sum type
//!
//! Raw events carry a loosely typed `data` object. They are decoded once, at
//! the ingress boundary, into [`FleetEvent`] so the synchronizer can match on
//! every event type exhaustively.

use super::payloads::*;
use crate::errors::EventValidationError;
use crate::identifiers::EventId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Kind of entity an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// A load
    Load,
    /// A vehicle
    Vehicle,
    /// A driver
    Driver,
    /// A carrier
    Carrier,
}

impl EntityType {
    /// Parse `load`, `LOAD`, `Load`, ...
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "load" => Some(EntityType::Load),
            "vehicle" => Some(EntityType::Vehicle),
            "driver" => Some(EntityType::Driver),
            "carrier" => Some(EntityType::Carrier),
            _ => None,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Load => "load",
            EntityType::Vehicle => "vehicle",
            EntityType::Driver => "driver",
            EntityType::Carrier => "carrier",
        }
    }
}

/// Recognised event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A load entered the system
    LoadCreated,
    /// A load was assigned to a vehicle
    LoadAssigned,
    /// A load was picked up
    LoadPickedUp,
    /// A load is on the road
    LoadInTransit,
    /// A load was delivered
    LoadDelivered,
    /// A load was cancelled
    LoadCancelled,
    /// An assignment was undone
    LoadAssignmentReverted,
    /// A vehicle entered the fleet
    VehicleCreated,
    /// Vehicle status change
    VehicleStatusChanged,
    /// Vehicle position report
    VehicleLocationUpdated,
    /// A driver was hired
    DriverCreated,
    /// Driver availability change
    DriverStatusChanged,
    /// Driver position report
    DriverLocationUpdated,
    /// A driver was certified for a vehicle
    DriverQualified,
    /// A carrier was onboarded
    CarrierRegistered,
    /// Carrier performance figures were refreshed
    CarrierPerformanceUpdated,
}

impl EventType {
    /// Parse `LOAD_CREATED` or the dotted `load.created`
    pub fn from_wire(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace('.', "_").to_ascii_uppercase();
        let event_type = match normalized.as_str() {
            "LOAD_CREATED" => EventType::LoadCreated,
            "LOAD_ASSIGNED" => EventType::LoadAssigned,
            "LOAD_PICKED_UP" => EventType::LoadPickedUp,
            "LOAD_IN_TRANSIT" => EventType::LoadInTransit,
            "LOAD_DELIVERED" => EventType::LoadDelivered,
            "LOAD_CANCELLED" => EventType::LoadCancelled,
            "LOAD_ASSIGNMENT_REVERTED" => EventType::LoadAssignmentReverted,
            "VEHICLE_CREATED" => EventType::VehicleCreated,
            "VEHICLE_STATUS_CHANGED" => EventType::VehicleStatusChanged,
            "VEHICLE_LOCATION_UPDATED" => EventType::VehicleLocationUpdated,
            "DRIVER_CREATED" => EventType::DriverCreated,
            "DRIVER_STATUS_CHANGED" => EventType::DriverStatusChanged,
            "DRIVER_LOCATION_UPDATED" => EventType::DriverLocationUpdated,
            "DRIVER_QUALIFIED" => EventType::DriverQualified,
            "CARRIER_REGISTERED" => EventType::CarrierRegistered,
            "CARRIER_PERFORMANCE_UPDATED" => EventType::CarrierPerformanceUpdated,
            _ => return None,
        };
        Some(event_type)
    }

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LoadCreated => "LOAD_CREATED",
            EventType::LoadAssigned => "LOAD_ASSIGNED",
            EventType::LoadPickedUp => "LOAD_PICKED_UP",
            EventType::LoadInTransit => "LOAD_IN_TRANSIT",
            EventType::LoadDelivered => "LOAD_DELIVERED",
            EventType::LoadCancelled => "LOAD_CANCELLED",
            EventType::LoadAssignmentReverted => "LOAD_ASSIGNMENT_REVERTED",
            EventType::VehicleCreated => "VEHICLE_CREATED",
            EventType::VehicleStatusChanged => "VEHICLE_STATUS_CHANGED",
            EventType::VehicleLocationUpdated => "VEHICLE_LOCATION_UPDATED",
            EventType::DriverCreated => "DRIVER_CREATED",
            EventType::DriverStatusChanged => "DRIVER_STATUS_CHANGED",
            EventType::DriverLocationUpdated => "DRIVER_LOCATION_UPDATED",
            EventType::DriverQualified => "DRIVER_QUALIFIED",
            EventType::CarrierRegistered => "CARRIER_REGISTERED",
            EventType::CarrierPerformanceUpdated => "CARRIER_PERFORMANCE_UPDATED",
        }
    }

    /// Entity the event type is keyed by
    pub fn entity_type(&self) -> EntityType {
        match self {
            EventType::LoadCreated
            | EventType::LoadAssigned
            | EventType::LoadPickedUp
            | EventType::LoadInTransit
            | EventType::LoadDelivered
            | EventType::LoadCancelled
            | EventType::LoadAssignmentReverted => EntityType::Load,
            EventType::VehicleCreated
            | EventType::VehicleStatusChanged
            | EventType::VehicleLocationUpdated => EntityType::Vehicle,
            EventType::DriverCreated
            | EventType::DriverStatusChanged
            | EventType::DriverLocationUpdated
            | EventType::DriverQualified => EntityType::Driver,
            EventType::CarrierRegistered | EventType::CarrierPerformanceUpdated => {
                EntityType::Carrier
            }
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated fleet event
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    /// `LOAD_CREATED`
    LoadCreated(LoadCreated),
    /// `LOAD_ASSIGNED`
    LoadAssigned(LoadAssigned),
    /// `LOAD_PICKED_UP`
    LoadPickedUp(LoadTransition),
    /// `LOAD_IN_TRANSIT`
    LoadInTransit(LoadTransition),
    /// `LOAD_DELIVERED`
    LoadDelivered(LoadTransition),
    /// `LOAD_CANCELLED`
    LoadCancelled(LoadTransition),
    /// `LOAD_ASSIGNMENT_REVERTED`
    LoadAssignmentReverted(LoadTransition),
    /// `VEHICLE_CREATED`
    VehicleCreated(VehicleCreated),
    /// `VEHICLE_STATUS_CHANGED`
    VehicleStatusChanged(VehicleStatusChanged),
    /// `VEHICLE_LOCATION_UPDATED`
    VehicleLocationUpdated(VehicleLocationUpdated),
    /// `DRIVER_CREATED`
    DriverCreated(DriverCreated),
    /// `DRIVER_STATUS_CHANGED`
    DriverStatusChanged(DriverStatusChanged),
    /// `DRIVER_LOCATION_UPDATED`
    DriverLocationUpdated(DriverLocationUpdated),
    /// `DRIVER_QUALIFIED`
    DriverQualified(DriverQualified),
    /// `CARRIER_REGISTERED`
    CarrierRegistered(CarrierRegistered),
    /// `CARRIER_PERFORMANCE_UPDATED`
    CarrierPerformanceUpdated(CarrierPerformanceUpdated),
    /// An event type this engine does not consume
    Unrecognized {
        /// Type as received
        event_type: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event_id: EventId,
    event_type: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    entity_type: Option<String>,
    entity_id: String,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    data: Value,
}

/// An inbound event after validation
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Event identifier
    pub event_id: EventId,
    /// Type as received
    pub event_type: String,
    /// When the change happened in the operational store
    pub timestamp: DateTime<Utc>,
    /// Entity key the event is partitioned by
    pub entity_id: String,
    /// Correlation identifier for tracing
    pub correlation_id: Option<String>,
    /// Decoded payload
    pub event: FleetEvent,
    /// The event as received, kept for dead-lettering
    pub raw: Value,
}

impl EventEnvelope {
    /// Parse and validate a JSON-encoded event
    pub fn parse(bytes: &[u8]) -> Result<Self, EventValidationError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EventValidationError::MalformedEnvelope(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already decoded JSON event
    pub fn from_value(value: Value) -> Result<Self, EventValidationError> {
        let raw: RawEnvelope = serde_json::from_value(value.clone())
            .map_err(|e| EventValidationError::MalformedEnvelope(e.to_string()))?;

        if raw.event_id.is_blank() {
            return Err(EventValidationError::invalid("event_id", "must not be blank"));
        }
        if raw.entity_id.trim().is_empty() {
            return Err(EventValidationError::invalid("entity_id", "must not be blank"));
        }

        let event = match EventType::from_wire(&raw.event_type) {
            None => FleetEvent::Unrecognized {
                event_type: raw.event_type.clone(),
            },
            Some(event_type) => {
                if let Some(declared) = raw.entity_type.as_deref() {
                    let expected = event_type.entity_type();
                    if EntityType::from_wire(declared) != Some(expected) {
                        return Err(EventValidationError::EntityMismatch {
                            envelope: format!("{} {}", declared, raw.entity_id),
                            payload: format!("{} event", expected.as_str()),
                        });
                    }
                }
                decode_event(event_type, &raw.entity_id, raw.data)?
            }
        };

        Ok(Self {
            event_id: raw.event_id,
            event_type: raw.event_type,
            timestamp: raw.timestamp,
            entity_id: raw.entity_id,
            correlation_id: raw.correlation_id,
            event,
            raw: value,
        })
    }

    /// Recognised type of the event
    pub fn kind(&self) -> Option<EventType> {
        EventType::from_wire(&self.event_type)
    }

    /// Key the ingress pool partitions on
    pub fn partition_key(&self) -> &str {
        &self.entity_id
    }
}

fn decode_event(
    event_type: EventType,
    entity_id: &str,
    data: Value,
) -> Result<FleetEvent, EventValidationError> {
    let event = match event_type {
        EventType::LoadCreated => FleetEvent::LoadCreated(decode(event_type, entity_id, data)?),
        EventType::LoadAssigned => FleetEvent::LoadAssigned(decode(event_type, entity_id, data)?),
        EventType::LoadPickedUp => FleetEvent::LoadPickedUp(decode(event_type, entity_id, data)?),
        EventType::LoadInTransit => FleetEvent::LoadInTransit(decode(event_type, entity_id, data)?),
        EventType::LoadDelivered => FleetEvent::LoadDelivered(decode(event_type, entity_id, data)?),
        EventType::LoadCancelled => FleetEvent::LoadCancelled(decode(event_type, entity_id, data)?),
        EventType::LoadAssignmentReverted => {
            FleetEvent::LoadAssignmentReverted(decode(event_type, entity_id, data)?)
        }
        EventType::VehicleCreated => FleetEvent::VehicleCreated(decode(event_type, entity_id, data)?),
        EventType::VehicleStatusChanged => {
            FleetEvent::VehicleStatusChanged(decode(event_type, entity_id, data)?)
        }
        EventType::VehicleLocationUpdated => {
            FleetEvent::VehicleLocationUpdated(decode(event_type, entity_id, data)?)
        }
        EventType::DriverCreated => FleetEvent::DriverCreated(decode(event_type, entity_id, data)?),
        EventType::DriverStatusChanged => {
            FleetEvent::DriverStatusChanged(decode(event_type, entity_id, data)?)
        }
        EventType::DriverLocationUpdated => {
            FleetEvent::DriverLocationUpdated(decode(event_type, entity_id, data)?)
        }
        EventType::DriverQualified => FleetEvent::DriverQualified(decode(event_type, entity_id, data)?),
        EventType::CarrierRegistered => {
            FleetEvent::CarrierRegistered(decode(event_type, entity_id, data)?)
        }
        EventType::CarrierPerformanceUpdated => {
            FleetEvent::CarrierPerformanceUpdated(decode(event_type, entity_id, data)?)
        }
    };
    Ok(event)
}

/// Decode `data` into a payload, defaulting its key to the envelope's entity
fn decode<P>(event_type: EventType, entity_id: &str, data: Value) -> Result<P, EventValidationError>
where
    P: EventPayload + DeserializeOwned,
{
    let mut object = match data {
        Value::Object(object) => object,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(EventValidationError::MalformedPayload {
                event_type: event_type.to_string(),
                reason: format!("data must be an object, got {}", other),
            })
        }
    };
    object
        .entry(P::ID_FIELD)
        .or_insert_with(|| Value::String(entity_id.to_string()));

    let payload: P = serde_json::from_value(Value::Object(object)).map_err(|e| {
        EventValidationError::MalformedPayload {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        }
    })?;

    if payload.entity_key() != entity_id {
        return Err(EventValidationError::EntityMismatch {
            envelope: entity_id.to_string(),
            payload: payload.entity_key().to_string(),
        });
    }
    payload.validate()?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn envelope(event_type: &str, entity_id: &str, data: Value) -> Value {
        json!({
            "event_id": "evt-1",
            "event_type": event_type,
            "timestamp": "2025-03-01T12:00:00Z",
            "entity_id": entity_id,
            "data": data,
        })
    }

    #[test_case("LOAD_CREATED", Some(EventType::LoadCreated) ; "upper case")]
    #[test_case("load.created", Some(EventType::LoadCreated) ; "dotted")]
    #[test_case("driver.location_updated", Some(EventType::DriverLocationUpdated) ; "mixed")]
    #[test_case("ROUTE_OPTIMIZED", None ; "produced not consumed")]
    fn test_event_type_spellings(raw: &str, expected: Option<EventType>) {
        assert_eq!(EventType::from_wire(raw), expected);
    }

    #[test]
    fn test_payload_key_defaults_to_entity_id() {
        let value = envelope(
            "DRIVER_LOCATION_UPDATED",
            "D1",
            json!({"latitude": 41.0, "longitude": -87.0}),
        );
        let event = EventEnvelope::from_value(value).unwrap();
        match &event.event {
            FleetEvent::DriverLocationUpdated(update) => assert_eq!(update.driver_id.as_str(), "D1"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.partition_key(), "D1");
    }

    #[test]
    fn test_entity_mismatch_is_rejected() {
        let value = envelope("VEHICLE_STATUS_CHANGED", "V1", json!({"vehicle_id": "V2", "status": "AVAILABLE"}));
        assert!(matches!(
            EventEnvelope::from_value(value),
            Err(EventValidationError::EntityMismatch { .. })
        ));
    }

    #[test]
    fn test_entity_type_must_match_event() {
        let mut value = envelope("VEHICLE_STATUS_CHANGED", "V1", json!({"status": "AVAILABLE"}));
        value["entity_type"] = json!("driver");
        assert!(EventEnvelope::from_value(value).is_err());
    }

    #[test]
    fn test_unknown_type_is_kept_as_unrecognized() {
        let value = envelope("ROUTE_OPTIMIZED", "R1", json!({}));
        let event = EventEnvelope::from_value(value).unwrap();
        assert_eq!(
            event.event,
            FleetEvent::Unrecognized {
                event_type: "ROUTE_OPTIMIZED".to_string()
            }
        );
        assert_eq!(event.kind(), None);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EventEnvelope::parse(b"{not json"),
            Err(EventValidationError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_bad_status_is_malformed_payload() {
        let value = envelope("DRIVER_STATUS_CHANGED", "D1", json!({"status": "ON_VACATION"}));
        assert!(matches!(
            EventEnvelope::from_value(value),
            Err(EventValidationError::MalformedPayload { .. })
        ));
    }
}
