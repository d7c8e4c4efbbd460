// Copyright 2025 Cowboy AI, LLC.

//! Geographic primitives: points, great-circle distance and time windows

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean earth radius in statute miles
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Statute miles per meter
pub const MILES_PER_METER: f64 = 0.000_621_371;

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    /// Latitude in degrees, -90..=90
    pub latitude: f64,
    /// Longitude in degrees, -180..=180
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point without validation
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both coordinates are finite and in range
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in miles (haversine)
    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_MILES * c
    }

    /// Stable key for a location node created from a bare coordinate
    pub fn location_key(&self) -> String {
        format!("geo_{:.5}_{:.5}", self.latitude, self.longitude)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// A closed time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    /// Earliest instant
    pub start: DateTime<Utc>,
    /// Latest instant
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `end` is not before `start`
    pub fn is_well_formed(&self) -> bool {
        self.end >= self.start
    }

    /// Whether `instant` lies inside the window, bounds included
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    /// Window length
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// Convert fractional hours to a chrono duration, rounded to the second
pub fn hours(value: f64) -> Duration {
    Duration::seconds((value * 3600.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_distance_is_zero_for_same_point() {
        let p = GeoPoint::new(41.8781, -87.6298);
        assert!(p.distance_miles(&p).abs() < 1e-9);
    }

    #[test]
    fn test_chicago_to_milwaukee() {
        let chicago = GeoPoint::new(41.8781, -87.6298);
        let milwaukee = GeoPoint::new(43.0389, -87.9065);
        let d = chicago.distance_miles(&milwaukee);
        assert!((d - 81.4).abs() < 1.5, "got {d}");
        assert!((d - milwaukee.distance_miles(&chicago)).abs() < 1e-9);
    }

    #[test]
    fn test_validity() {
        assert!(GeoPoint::new(0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_window() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap();
        let w = TimeWindow::new(start, end);
        assert!(w.is_well_formed());
        assert!(w.contains(start + hours(1.5)));
        assert!(!w.contains(end + hours(0.01)));
        assert_eq!(w.length(), Duration::hours(2));
    }
}
