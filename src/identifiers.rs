// Copyright 2025 Cowboy AI, LLC.

//! Identifier types for fleet entities, events and optimization runs
//!
//! Entity identifiers come from the authoritative operational store and are
//! opaque strings. They are wrapped so a driver key can never be passed where
//! a vehicle key is expected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing key
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Create a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the raw key
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the key is empty or whitespace only
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_identifier!(
    /// Driver key
    DriverId
);
string_identifier!(
    /// Vehicle key
    VehicleId
);
string_identifier!(
    /// Carrier key
    CarrierId
);
string_identifier!(
    /// Load (shipment) key
    LoadId
);
string_identifier!(
    /// Location key
    LocationId
);
string_identifier!(
    /// Identifier of an inbound or outbound event
    EventId
);
string_identifier!(
    /// Identifier of an optimization request
    RequestId
);
string_identifier!(
    /// Identifier of a persisted route plan
    RouteId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_is_transparent_on_the_wire() {
        let id = DriverId::new("D-17");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"D-17\"");

        let back: DriverId = serde_json::from_str("\"D-17\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generated_identifiers_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_blank_detection() {
        assert!(LoadId::new("  ").is_blank());
        assert!(!LoadId::from("L1").is_blank());
    }
}
