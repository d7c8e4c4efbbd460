// Copyright 2025 Cowboy AI, LLC.

//! Route geometry resolution
//!
//! The resolver asks an external routing provider first. Any provider
//! failure, including a timeout, degrades to a straight-line estimate that
//! is always marked as such.

use crate::errors::RoutingError;
use crate::geo::{GeoPoint, MILES_PER_METER};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Directions endpoint
    pub base_url: String,
    /// Provider API key; without one only the fallback is used
    pub api_key: Option<String>,
    /// Budget for one provider call
    pub timeout_ms: u64,
    /// Average speed assumed by the straight-line estimate
    pub fallback_speed_mph: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            api_key: None,
            timeout_ms: 5_000,
            fallback_speed_mph: 30.0,
        }
    }
}

impl RoutingConfig {
    /// Provider call budget
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Options passed to the provider
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoutePreferences {
    /// Ask for traffic-aware duration
    pub consider_traffic: bool,
    /// Planned departure, used for traffic prediction
    pub departure_time: Option<DateTime<Utc>>,
}

/// A route as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    /// Driving distance
    pub distance_miles: f64,
    /// Free-flow duration
    pub duration_minutes: f64,
    /// Duration under predicted traffic, when requested and known
    pub duration_in_traffic_minutes: Option<f64>,
    /// Decoded polyline
    pub geometry: Vec<GeoPoint>,
}

/// External routing service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Route between two points
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        preferences: RoutePreferences,
    ) -> Result<ProviderRoute, RoutingError>;
}

/// Which path produced a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmUsed {
    /// Provider-backed geometry
    RoutingProvider,
    /// Great-circle estimate
    StraightLineFallback,
}

impl AlgorithmUsed {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmUsed::RoutingProvider => "routing_provider",
            AlgorithmUsed::StraightLineFallback => "straight_line_fallback",
        }
    }
}

impl fmt::Display for AlgorithmUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-backed geometry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteGeometry {
    /// Driving distance
    pub distance_miles: f64,
    /// Duration used for planning, traffic-aware when available
    pub duration_minutes: f64,
    /// Whether `duration_minutes` includes predicted traffic
    pub traffic_considered: bool,
    /// Polyline
    pub points: Vec<GeoPoint>,
}

/// Straight-line estimate used when the provider fails
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackGeometry {
    /// Great-circle distance
    pub distance_miles: f64,
    /// Distance over the conservative average speed
    pub duration_minutes: f64,
    /// Origin and destination
    pub points: Vec<GeoPoint>,
    /// Why the provider was not used
    pub cause: String,
}

/// Outcome of route resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "algorithm_used", rename_all = "snake_case")]
pub enum ResolvedRoute {
    /// From the routing provider
    RoutingProvider(RouteGeometry),
    /// Local estimate
    StraightLineFallback(FallbackGeometry),
}

impl ResolvedRoute {
    /// Path that produced the route
    pub fn algorithm_used(&self) -> AlgorithmUsed {
        match self {
            ResolvedRoute::RoutingProvider(_) => AlgorithmUsed::RoutingProvider,
            ResolvedRoute::StraightLineFallback(_) => AlgorithmUsed::StraightLineFallback,
        }
    }

    /// Route distance
    pub fn distance_miles(&self) -> f64 {
        match self {
            ResolvedRoute::RoutingProvider(route) => route.distance_miles,
            ResolvedRoute::StraightLineFallback(route) => route.distance_miles,
        }
    }

    /// Route duration
    pub fn duration_minutes(&self) -> f64 {
        match self {
            ResolvedRoute::RoutingProvider(route) => route.duration_minutes,
            ResolvedRoute::StraightLineFallback(route) => route.duration_minutes,
        }
    }

    /// Polyline
    pub fn points(&self) -> &[GeoPoint] {
        match self {
            ResolvedRoute::RoutingProvider(route) => &route.points,
            ResolvedRoute::StraightLineFallback(route) => &route.points,
        }
    }

    /// Whether live traffic shaped the duration; never true for the fallback
    pub fn traffic_considered(&self) -> bool {
        match self {
            ResolvedRoute::RoutingProvider(route) => route.traffic_considered,
            ResolvedRoute::StraightLineFallback(_) => false,
        }
    }

    /// Whether this is the degraded estimate
    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedRoute::StraightLineFallback(_))
    }
}

/// Provider first, straight line second
#[derive(Clone)]
pub struct RouteGeometryResolver {
    provider: Option<Arc<dyn RoutingProvider>>,
    config: RoutingConfig,
}

impl fmt::Debug for RouteGeometryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGeometryResolver")
            .field("has_provider", &self.provider.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl RouteGeometryResolver {
    /// Resolver over `provider`
    pub fn new(provider: Arc<dyn RoutingProvider>, config: RoutingConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    /// Resolver that only produces straight-line estimates
    pub fn straight_line(config: RoutingConfig) -> Self {
        Self {
            provider: None,
            config,
        }
    }

    /// Resolve a route
    ///
    /// Only fails when the fallback itself cannot be computed, which
    /// happens for invalid coordinates or a non-positive fallback speed.
    pub async fn resolve(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        preferences: RoutePreferences,
    ) -> Result<ResolvedRoute, RoutingError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(RoutingError::FallbackFailed(format!(
                "invalid coordinates {} -> {}",
                origin, destination
            )));
        }

        let Some(provider) = &self.provider else {
            return self.fallback(origin, destination, "no routing provider configured");
        };

        let timeout = self.config.timeout();
        let outcome = tokio::time::timeout(timeout, provider.route(origin, destination, preferences))
            .await
            .unwrap_or(Err(RoutingError::Timeout(timeout)));

        match outcome {
            Ok(route) => {
                let duration_minutes = route
                    .duration_in_traffic_minutes
                    .filter(|_| preferences.consider_traffic)
                    .unwrap_or(route.duration_minutes);
                let traffic_considered =
                    preferences.consider_traffic && route.duration_in_traffic_minutes.is_some();
                let points = if route.geometry.len() >= 2 {
                    route.geometry
                } else {
                    vec![origin, destination]
                };
                debug!(
                    distance_miles = route.distance_miles,
                    duration_minutes, traffic_considered, "Provider route resolved"
                );
                Ok(ResolvedRoute::RoutingProvider(RouteGeometry {
                    distance_miles: route.distance_miles,
                    duration_minutes,
                    traffic_considered,
                    points,
                }))
            }
            Err(err) => {
                warn!(error = %err, "Routing provider failed, using straight-line estimate");
                self.fallback(origin, destination, &err.to_string())
            }
        }
    }

    fn fallback(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        cause: &str,
    ) -> Result<ResolvedRoute, RoutingError> {
        let speed = self.config.fallback_speed_mph;
        if !(speed.is_finite() && speed > 0.0) {
            return Err(RoutingError::FallbackFailed(format!(
                "fallback speed {} is not positive",
                speed
            )));
        }
        let distance_miles = origin.distance_miles(&destination);
        Ok(ResolvedRoute::StraightLineFallback(FallbackGeometry {
            distance_miles,
            duration_minutes: distance_miles / speed * 60.0,
            points: vec![origin, destination],
            cause: cause.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
    overview_polyline: Option<EncodedPolyline>,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    distance: Measure,
    duration: Measure,
    #[serde(default)]
    duration_in_traffic: Option<Measure>,
}

#[derive(Debug, Deserialize)]
struct Measure {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct EncodedPolyline {
    points: String,
}

/// Directions-API client
#[derive(Debug, Clone)]
pub struct HttpRoutingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRoutingProvider {
    /// Build a client; requires an API key
    pub fn new(config: &RoutingConfig) -> Result<Self, RoutingError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RoutingError::Provider("routing API key is not configured".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
        })
    }

    fn parse(body: DirectionsResponse) -> Result<ProviderRoute, RoutingError> {
        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" | "NOT_FOUND" => return Err(RoutingError::NoRoute),
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => return Err(RoutingError::QuotaExhausted),
            other => {
                return Err(RoutingError::Provider(format!(
                    "{}: {}",
                    other,
                    body.error_message.unwrap_or_default()
                )))
            }
        }

        let route = body.routes.into_iter().next().ok_or(RoutingError::NoRoute)?;
        let leg = route
            .legs
            .first()
            .ok_or_else(|| RoutingError::InvalidResponse("route has no legs".to_string()))?;
        let geometry = match route.overview_polyline {
            Some(polyline) => decode_polyline(&polyline.points)?,
            None => Vec::new(),
        };

        Ok(ProviderRoute {
            distance_miles: leg.distance.value * MILES_PER_METER,
            duration_minutes: leg.duration.value / 60.0,
            duration_in_traffic_minutes: leg.duration_in_traffic.as_ref().map(|d| d.value / 60.0),
            geometry,
        })
    }
}

#[async_trait]
impl RoutingProvider for HttpRoutingProvider {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        preferences: RoutePreferences,
    ) -> Result<ProviderRoute, RoutingError> {
        let mut query = vec![
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("mode", "driving".to_string()),
            ("key", self.api_key.clone()),
        ];
        if preferences.consider_traffic {
            let departure = preferences
                .departure_time
                .filter(|at| *at > Utc::now())
                .map(|at| at.timestamp().to_string())
                .unwrap_or_else(|| "now".to_string());
            query.push(("departure_time", departure));
        }

        let response = self.client.get(&self.base_url).query(&query).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RoutingError::QuotaExhausted);
        }
        if !status.is_success() {
            return Err(RoutingError::Provider(format!("HTTP {}", status)));
        }
        let body: DirectionsResponse = response.json().await?;
        Self::parse(body)
    }
}

/// Decode an encoded polyline (precision 5)
pub fn decode_polyline(encoded: &str) -> Result<Vec<GeoPoint>, RoutingError> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut points = Vec::new();

    let next_value = |index: &mut usize| -> Result<i64, RoutingError> {
        let mut result: i64 = 0;
        let mut shift = 0;
        loop {
            let byte = *bytes
                .get(*index)
                .ok_or_else(|| RoutingError::InvalidResponse("truncated polyline".to_string()))?;
            *index += 1;
            let chunk = i64::from(byte)
                .checked_sub(63)
                .filter(|c| (0..64).contains(c))
                .ok_or_else(|| RoutingError::InvalidResponse("invalid polyline character".to_string()))?;
            result |= (chunk & 0x1f) << shift;
            shift += 5;
            if chunk < 0x20 {
                break;
            }
            if shift > 60 {
                return Err(RoutingError::InvalidResponse("polyline value overflow".to_string()));
            }
        }
        Ok(if result & 1 == 1 { !(result >> 1) } else { result >> 1 })
    };

    while index < bytes.len() {
        lat += next_value(&mut index)?;
        lng += next_value(&mut index)?;
        points.push(GeoPoint::new(lat as f64 / 1e5, lng as f64 / 1e5));
    }
    Ok(points)
}
