// Copyright 2025 Cowboy AI, LLC.

//! Typed views over graph nodes
//!
//! The graph stores loosely typed property bags; these views decode them into
//! the shapes discovery and scoring work with. A property that fails to
//! decode is reported as a corrupt record instead of being silently defaulted.

pub mod carrier;
pub mod driver;
pub mod load;
pub mod location;
pub mod vehicle;

pub use carrier::Carrier;
pub use driver::{Driver, DriverStatus};
pub use load::{LifecycleDecision, Load, LoadStatus, PriorityTier};
pub use location::{Location, LocationKind};
pub use vehicle::{Vehicle, VehicleStatus};

/// Property names shared by the synchronizer and the views
pub mod fields {
    /// Lifecycle or availability status
    pub const STATUS: &str = "status";
    /// Last known coordinate
    pub const POSITION: &str = "position";
    /// Driver home coordinate
    pub const HOME_LOCATION: &str = "home_location";
    /// Driver license capability tags
    pub const LICENSE_QUALIFICATIONS: &str = "license_qualifications";
    /// Driver performance, 0 to 1
    pub const PERFORMANCE_SCORE: &str = "performance_score";
    /// Driver on-time percentage
    pub const ON_TIME_PERCENTAGE: &str = "on_time_percentage";
    /// Driver pay per hour
    pub const HOURLY_RATE: &str = "hourly_rate";
    /// Remaining hours-of-service budget
    pub const DUTY_HOURS_REMAINING: &str = "duty_hours_remaining";
    /// Vehicle equipment tags
    pub const CAPABILITY_TAGS: &str = "capability_tags";
    /// Vehicle weight capacity in pounds
    pub const CAPACITY_WEIGHT: &str = "capacity_weight";
    /// Vehicle volume capacity in cubic feet
    pub const CAPACITY_VOLUME: &str = "capacity_volume";
    /// Vehicle miles per gallon
    pub const FUEL_EFFICIENCY: &str = "fuel_efficiency";
    /// Vehicle operating cost per mile
    pub const COST_PER_MILE: &str = "cost_per_mile";
    /// Vehicle home-base location key
    pub const HOME_BASE: &str = "home_base";
    /// Display name
    pub const NAME: &str = "name";
    /// Carrier on-time rate, 0 to 100
    pub const ON_TIME_RATE: &str = "on_time_rate";
    /// Carrier safety rating, 0 to 100
    pub const SAFETY_RATING: &str = "safety_rating";
    /// Carrier fleet size
    pub const FLEET_SIZE: &str = "fleet_size";
    /// Load weight in pounds
    pub const WEIGHT: &str = "weight";
    /// Load volume in cubic feet
    pub const VOLUME: &str = "volume";
    /// Load pickup window
    pub const PICKUP_WINDOW: &str = "pickup_window";
    /// Load delivery window
    pub const DELIVERY_WINDOW: &str = "delivery_window";
    /// Load priority tier
    pub const PRIORITY: &str = "priority";
    /// Equipment tags the load requires
    pub const REQUIRED_CAPABILITIES: &str = "required_capabilities";
    /// License tags the load requires of the driver
    pub const REQUIRED_ENDORSEMENTS: &str = "required_endorsements";
    /// Location coordinate
    pub const POINT: &str = "point";
    /// Location classification
    pub const KIND: &str = "kind";
    /// Qualification start
    pub const VALID_FROM: &str = "valid_from";
    /// Qualification end
    pub const VALID_UNTIL: &str = "valid_until";
    /// Load bound to an assignment edge
    pub const LOAD_ID: &str = "load_id";
    /// Driver named on an assignment edge
    pub const DRIVER_ID: &str = "driver_id";
    /// Route plan named on an assignment edge
    pub const ROUTE_ID: &str = "route_id";
    /// Assignment time
    pub const ASSIGNED_AT: &str = "assigned_at";
    /// Heading in degrees
    pub const HEADING: &str = "heading";
    /// Speed in miles per hour
    pub const SPEED: &str = "speed";
}

/// Defaults applied when a node lacks an operational figure
pub mod defaults {
    /// Driver pay per hour
    pub const HOURLY_RATE: f64 = 25.0;
    /// Full daily hours-of-service budget
    pub const DUTY_HOURS: f64 = 11.0;
    /// Vehicle operating cost per mile
    pub const COST_PER_MILE: f64 = 1.75;
    /// Performance assumed for a carrier with no recorded figures
    pub const CARRIER_PERFORMANCE: f64 = 85.0;
}
