// Copyright 2025 Cowboy AI, LLC.

//! Multi-constraint scoring
//!
//! Every candidate is first checked against the hard constraints. Survivors
//! get five sub-scores in `[0, 100]` and a weighted composite; the cost
//! sub-score is relative to the surviving pool, so scoring works on the
//! whole pool at once.

use super::discovery::{Candidate, LoadContext};
use super::request::OptimizationRequest;
use crate::geo::hours;
use crate::identifiers::{DriverId, VehicleId};
use crate::model::{defaults, Load};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite weights
///
/// The composite is divided by the weight sum, so weights need not add up to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Driver proximity
    pub proximity: f64,
    /// Vehicle fit
    pub vehicle_suitability: f64,
    /// Carrier record
    pub carrier_performance: f64,
    /// Relative cost
    pub cost_efficiency: f64,
    /// Schedule slack
    pub timeline_feasibility: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            proximity: 0.25,
            vehicle_suitability: 0.20,
            carrier_performance: 0.20,
            cost_efficiency: 0.20,
            timeline_feasibility: 0.15,
        }
    }
}

impl ScoreWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.proximity,
            self.vehicle_suitability,
            self.carrier_performance,
            self.cost_efficiency,
            self.timeline_feasibility,
        ]
    }

    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Whether the weights can produce a composite
    pub fn is_valid(&self) -> bool {
        let weights = self.as_array();
        weights.iter().all(|w| w.is_finite() && *w >= 0.0) && self.total() > 0.0
    }
}

/// How proximity decays with distance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProximityDecay {
    /// Straight line from 100 at the pickup to 0 at the radius
    Linear,
    /// `100 * exp(-rate * d / radius)`, cut to 0 beyond the radius
    Exponential {
        /// Decay rate over one radius
        rate: f64,
    },
}

/// Scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Composite weights
    pub weights: ScoreWeights,
    /// Proximity curve
    pub proximity_decay: ProximityDecay,
    /// Lower edge of the ideal utilization band
    pub utilization_low: f64,
    /// Upper edge of the ideal utilization band
    pub utilization_high: f64,
    /// Duty-hour utilization above which the timeline score degrades
    pub duty_utilization_threshold: f64,
    /// Average speed for deadhead and loaded legs
    pub average_speed_mph: f64,
    /// Load plus unload time
    pub service_hours: f64,
    /// Figure used for missing carrier metrics
    pub unknown_carrier_performance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            proximity_decay: ProximityDecay::Linear,
            utilization_low: 0.6,
            utilization_high: 0.9,
            duty_utilization_threshold: 0.8,
            average_speed_mph: 50.0,
            service_hours: 2.0,
            unknown_carrier_performance: defaults::CARRIER_PERFORMANCE,
        }
    }
}

/// Sub-scores of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreBreakdown {
    /// Closeness to pickup
    pub proximity_score: f64,
    /// Capacity and equipment fit
    pub vehicle_suitability_score: f64,
    /// Carrier on-time and safety record
    pub carrier_performance_score: f64,
    /// Cost relative to the pool
    pub cost_efficiency_score: f64,
    /// Schedule and duty-hour slack
    pub timeline_feasibility_score: f64,
    /// Weighted composite
    pub composite_score: f64,
}

/// Hard constraint a candidate failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exclusion {
    /// The load does not fit the vehicle
    InsufficientCapacity,
    /// The vehicle lacks a required equipment tag
    MissingCapability,
    /// The driver lacks a required license endorsement
    MissingEndorsement,
    /// The driver cannot reach pickup before the window closes
    PickupWindowMissed,
    /// Projected delivery falls after the delivery window
    DeliveryWindowMissed,
    /// The trip exceeds the driver's remaining duty hours
    DutyHoursExceeded,
    /// The trip exceeds the request's duration bound
    MaxDurationExceeded,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Exclusion::InsufficientCapacity => "insufficient capacity",
            Exclusion::MissingCapability => "missing capability",
            Exclusion::MissingEndorsement => "missing endorsement",
            Exclusion::PickupWindowMissed => "pickup window missed",
            Exclusion::DeliveryWindowMissed => "delivery window missed",
            Exclusion::DutyHoursExceeded => "duty hours exceeded",
            Exclusion::MaxDurationExceeded => "max duration exceeded",
        };
        f.write_str(text)
    }
}

/// Load facts the scorer needs
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringContext {
    /// The load
    pub load: Load,
    /// Pickup to delivery miles
    pub load_miles: f64,
    /// Proximity radius
    pub max_driver_distance: f64,
    /// Trip duration bound
    pub max_duration_hours: f64,
    /// Planning instant
    pub as_of: DateTime<Utc>,
}

impl ScoringContext {
    /// Context for one request
    pub fn new(context: &LoadContext, request: &OptimizationRequest, as_of: DateTime<Utc>) -> Self {
        let mut load = context.load.clone();
        if let Some(extra) = &request.required_capabilities {
            load.required_capabilities.extend(extra.iter().cloned());
        }
        Self {
            load,
            load_miles: context.load_miles(),
            max_driver_distance: request.max_driver_distance,
            max_duration_hours: request.max_duration_hours,
            as_of,
        }
    }
}

/// Projected schedule of a feasible candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timeline {
    /// Arrival at pickup, no earlier than the window start
    pub pickup_at: DateTime<Utc>,
    /// Arrival at delivery
    pub delivery_at: DateTime<Utc>,
    /// Deadhead plus loaded driving plus service
    pub total_hours: f64,
    /// Timeline sub-score
    pub score: f64,
}

/// A candidate that survived the hard constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    /// Candidate
    pub candidate: Candidate,
    /// Sub-scores
    pub breakdown: ScoreBreakdown,
    /// Estimated total cost
    pub estimated_cost: f64,
    /// Projected schedule
    pub timeline: Timeline,
}

/// A candidate removed by a hard constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedCandidate {
    /// Driver
    pub driver_id: DriverId,
    /// Vehicle
    pub vehicle_id: VehicleId,
    /// First constraint failed
    pub reason: Exclusion,
}

/// Ranked survivors and the excluded rest
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScoringOutcome {
    /// Best first
    pub ranked: Vec<ScoredCandidate>,
    /// In discovery order
    pub excluded: Vec<ExcludedCandidate>,
}

impl ScoringOutcome {
    /// Highest-ranked candidate
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.ranked.first()
    }
}

/// Pure scorer; holds only configuration
#[derive(Debug, Clone, Default)]
pub struct MultiConstraintScorer {
    config: ScoringConfig,
}

impl MultiConstraintScorer {
    /// Score with `config`
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Settings in effect
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Hard-constraint check plus the pool-independent sub-scores
    ///
    /// The returned breakdown has `cost_efficiency_score` and
    /// `composite_score` at zero; [`Self::rank`] fills them in.
    pub fn assess(
        &self,
        candidate: &Candidate,
        context: &ScoringContext,
    ) -> Result<(ScoreBreakdown, Timeline), Exclusion> {
        let load = &context.load;
        if !candidate.vehicle.fits(load.weight, load.volume) {
            return Err(Exclusion::InsufficientCapacity);
        }
        if !candidate.vehicle.has_capabilities(&load.required_capabilities) {
            return Err(Exclusion::MissingCapability);
        }
        if !candidate.driver.holds_endorsements(&load.required_endorsements) {
            return Err(Exclusion::MissingEndorsement);
        }
        let timeline = self.timeline(candidate, context)?;

        Ok((
            ScoreBreakdown {
                proximity_score: self.proximity_score(candidate.distance_miles, context.max_driver_distance),
                vehicle_suitability_score: self
                    .suitability_score(candidate.vehicle.utilization(load.weight, load.volume)),
                carrier_performance_score: self.carrier_score(candidate),
                cost_efficiency_score: 0.0,
                timeline_feasibility_score: timeline.score,
                composite_score: 0.0,
            },
            timeline,
        ))
    }

    /// Score a single candidate as if it were the whole pool
    pub fn score(
        &self,
        candidate: &Candidate,
        context: &ScoringContext,
    ) -> Result<ScoreBreakdown, Exclusion> {
        let (mut breakdown, _) = self.assess(candidate, context)?;
        breakdown.cost_efficiency_score = 100.0;
        breakdown.composite_score = self.composite(&breakdown);
        Ok(breakdown)
    }

    /// Exclude, score and order a candidate pool
    ///
    /// Order is composite descending, then estimated cost ascending, then
    /// discovery order, so identical inputs always rank identically.
    pub fn rank(&self, candidates: Vec<Candidate>, context: &ScoringContext) -> ScoringOutcome {
        let mut outcome = ScoringOutcome::default();
        for candidate in candidates {
            match self.assess(&candidate, context) {
                Ok((breakdown, timeline)) => {
                    let estimated_cost = self.estimated_cost(&candidate, context, &timeline);
                    outcome.ranked.push(ScoredCandidate {
                        candidate,
                        breakdown,
                        estimated_cost,
                        timeline,
                    });
                }
                Err(reason) => outcome.excluded.push(ExcludedCandidate {
                    driver_id: candidate.driver.id.clone(),
                    vehicle_id: candidate.vehicle.id.clone(),
                    reason,
                }),
            }
        }

        let (min_cost, max_cost) = outcome
            .ranked
            .iter()
            .map(|scored| scored.estimated_cost)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), cost| {
                (lo.min(cost), hi.max(cost))
            });
        let spread = max_cost - min_cost;

        for scored in &mut outcome.ranked {
            scored.breakdown.cost_efficiency_score = if spread > f64::EPSILON {
                100.0 * (max_cost - scored.estimated_cost) / spread
            } else {
                100.0
            };
            scored.breakdown.composite_score = self.composite(&scored.breakdown);
        }

        outcome.ranked.sort_by(|a, b| {
            b.breakdown
                .composite_score
                .total_cmp(&a.breakdown.composite_score)
                .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
                .then_with(|| a.candidate.discovery_rank.cmp(&b.candidate.discovery_rank))
        });
        outcome
    }

    /// Monotonically non-increasing in distance, 0 at and beyond the radius
    pub fn proximity_score(&self, distance_miles: f64, max_distance: f64) -> f64 {
        if max_distance <= 0.0 || distance_miles >= max_distance {
            return 0.0;
        }
        let ratio = (distance_miles / max_distance).max(0.0);
        let score = match self.config.proximity_decay {
            ProximityDecay::Linear => 100.0 * (1.0 - ratio),
            ProximityDecay::Exponential { rate } => 100.0 * (-rate.max(0.0) * ratio).exp(),
        };
        clamp_score(score)
    }

    /// 100 inside the utilization band, lower for small and overfull fills
    pub fn suitability_score(&self, utilization: f64) -> f64 {
        let low = self.config.utilization_low;
        let high = self.config.utilization_high;
        let score = if utilization < low {
            60.0 + (utilization / low) * 40.0
        } else if utilization <= high {
            100.0
        } else {
            100.0 - (utilization - high) * 200.0
        };
        clamp_score(score)
    }

    fn carrier_score(&self, candidate: &Candidate) -> f64 {
        let unknown = self.config.unknown_carrier_performance;
        let (on_time, safety) = candidate
            .carrier
            .as_ref()
            .map(|carrier| {
                (
                    carrier.on_time_rate.unwrap_or(unknown),
                    carrier.safety_rating.unwrap_or(unknown),
                )
            })
            .unwrap_or((unknown, unknown));
        clamp_score(0.7 * on_time + 0.3 * safety)
    }

    fn timeline(&self, candidate: &Candidate, context: &ScoringContext) -> Result<Timeline, Exclusion> {
        let speed = self.config.average_speed_mph.max(1.0);
        let deadhead_hours = candidate.distance_miles / speed;
        let loaded_hours = context.load_miles / speed;
        let total_hours = deadhead_hours + loaded_hours + self.config.service_hours;

        let arrival = context.as_of + hours(deadhead_hours);
        let pickup_at = match context.load.pickup_window {
            Some(window) if arrival > window.end => return Err(Exclusion::PickupWindowMissed),
            Some(window) if arrival < window.start => window.start,
            _ => arrival,
        };
        let delivery_at = pickup_at + hours(loaded_hours + self.config.service_hours);
        if context
            .load
            .delivery_window
            .is_some_and(|window| delivery_at > window.end)
        {
            return Err(Exclusion::DeliveryWindowMissed);
        }

        let duty = candidate.driver.duty_hours_remaining;
        if total_hours > duty {
            return Err(Exclusion::DutyHoursExceeded);
        }
        if total_hours > context.max_duration_hours {
            return Err(Exclusion::MaxDurationExceeded);
        }

        let utilization = if duty > 0.0 { total_hours / duty } else { 1.0 };
        let score = if utilization <= self.config.duty_utilization_threshold {
            100.0
        } else {
            clamp_score(100.0 * (1.0 - utilization))
        };

        Ok(Timeline {
            pickup_at,
            delivery_at,
            total_hours,
            score,
        })
    }

    fn estimated_cost(&self, candidate: &Candidate, context: &ScoringContext, timeline: &Timeline) -> f64 {
        let miles = candidate.distance_miles + context.load_miles;
        miles * candidate.vehicle.cost_per_mile + candidate.driver.hourly_rate * timeline.total_hours
    }

    fn composite(&self, breakdown: &ScoreBreakdown) -> f64 {
        let weights = &self.config.weights;
        let total = weights.total();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = breakdown.proximity_score * weights.proximity
            + breakdown.vehicle_suitability_score * weights.vehicle_suitability
            + breakdown.carrier_performance_score * weights.carrier_performance
            + breakdown.cost_efficiency_score * weights.cost_efficiency
            + breakdown.timeline_feasibility_score * weights.timeline_feasibility;
        clamp_score(weighted / total)
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::TimeWindow;
    use crate::graph::VehicleAccess;
    use crate::identifiers::{CarrierId, LoadId};
    use crate::model::{Carrier, Driver, DriverStatus, LoadStatus, PriorityTier, Vehicle, VehicleStatus};
    use crate::optimizer::fixtures::at;
    use std::collections::BTreeSet;
    use test_case::test_case;

    fn load() -> Load {
        Load {
            id: LoadId::new("L1"),
            status: Some(LoadStatus::Created),
            weight: 35_000.0,
            volume: 0.0,
            pickup_window: Some(TimeWindow::new(at(9), at(11))),
            delivery_window: None,
            priority: PriorityTier::Standard,
            required_capabilities: BTreeSet::new(),
            required_endorsements: BTreeSet::new(),
        }
    }

    fn context() -> ScoringContext {
        ScoringContext {
            load: load(),
            load_miles: 80.0,
            max_driver_distance: 50.0,
            max_duration_hours: 11.0,
            as_of: at(8),
        }
    }

    fn candidate(driver: &str, distance: f64, capacity: f64, rank: usize) -> Candidate {
        Candidate {
            driver: Driver {
                id: DriverId::new(driver),
                status: Some(DriverStatus::Available),
                position: None,
                home_location: None,
                license_qualifications: BTreeSet::new(),
                performance_score: Some(0.9),
                on_time_percentage: None,
                hourly_rate: defaults::HOURLY_RATE,
                duty_hours_remaining: defaults::DUTY_HOURS,
            },
            vehicle: Vehicle {
                id: VehicleId::new(format!("V-{}", driver)),
                status: Some(VehicleStatus::Available),
                capability_tags: BTreeSet::new(),
                capacity_weight: capacity,
                capacity_volume: 0.0,
                fuel_efficiency: None,
                cost_per_mile: defaults::COST_PER_MILE,
                home_base: None,
                position: None,
            },
            carrier: Some(Carrier {
                id: CarrierId::new("C1"),
                name: None,
                on_time_rate: Some(95.0),
                safety_rating: Some(90.0),
                fleet_size: None,
            }),
            distance_miles: distance,
            access: VehicleAccess::Bound,
            discovery_rank: rank,
        }
    }

    #[test_case(0.3, 80.0 ; "under band")]
    #[test_case(0.75, 100.0 ; "in band")]
    #[test_case(0.95, 90.0 ; "over band")]
    #[test_case(1.5, 0.0 ; "far over band")]
    fn test_suitability_band(utilization: f64, expected: f64) {
        let scorer = MultiConstraintScorer::default();
        assert!((scorer.suitability_score(utilization) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_linear_proximity() {
        let scorer = MultiConstraintScorer::default();
        assert_eq!(scorer.proximity_score(0.0, 50.0), 100.0);
        assert!((scorer.proximity_score(25.0, 50.0) - 50.0).abs() < 1e-9);
        assert_eq!(scorer.proximity_score(60.0, 50.0), 0.0);
    }

    #[test]
    fn test_exponential_proximity_is_monotone() {
        let scorer = MultiConstraintScorer::new(ScoringConfig {
            proximity_decay: ProximityDecay::Exponential { rate: 3.0 },
            ..Default::default()
        });
        let scores: Vec<f64> = (0..=60)
            .map(|d| scorer.proximity_score(d as f64, 50.0))
            .collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
        assert_eq!(scores[50], 0.0);
    }

    #[test]
    fn test_carrier_blend() {
        let scorer = MultiConstraintScorer::default();
        let breakdown = scorer.score(&candidate("D1", 5.0, 40_000.0, 0), &context()).unwrap();
        assert!((breakdown.carrier_performance_score - 93.5).abs() < 1e-9);
    }

    #[test]
    fn test_undersized_vehicle_excluded() {
        let scorer = MultiConstraintScorer::default();
        let result = scorer.score(&candidate("D3", 8.0, 26_000.0, 0), &context());
        assert_eq!(result, Err(Exclusion::InsufficientCapacity));
    }

    #[test]
    fn test_duty_hours_exclusion() {
        let scorer = MultiConstraintScorer::default();
        let mut tired = candidate("D1", 5.0, 40_000.0, 0);
        tired.driver.duty_hours_remaining = 3.0;
        assert_eq!(scorer.score(&tired, &context()), Err(Exclusion::DutyHoursExceeded));
    }

    #[test]
    fn test_pickup_window_exclusion() {
        let scorer = MultiConstraintScorer::default();
        let mut late = context();
        late.as_of = at(10) + chrono::Duration::minutes(50);
        let result = scorer.score(&candidate("D1", 25.0, 40_000.0, 0), &late);
        assert_eq!(result, Err(Exclusion::PickupWindowMissed));
    }

    #[test]
    fn test_timeline_waits_for_window() {
        let scorer = MultiConstraintScorer::default();
        let (_, timeline) = scorer.assess(&candidate("D1", 5.0, 40_000.0, 0), &context()).unwrap();
        assert_eq!(timeline.pickup_at, at(9));
        assert!((timeline.total_hours - 3.7).abs() < 1e-9);
    }

    #[test]
    fn test_tight_duty_budget_degrades_timeline() {
        let scorer = MultiConstraintScorer::default();
        let mut tight = candidate("D1", 5.0, 40_000.0, 0);
        tight.driver.duty_hours_remaining = 4.0;
        let breakdown = scorer.score(&tight, &context()).unwrap();
        assert!((breakdown.timeline_feasibility_score - 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_excludes_and_orders() {
        let scorer = MultiConstraintScorer::default();
        let pool = vec![
            candidate("D1", 5.0, 40_000.0, 0),
            candidate("D3", 8.0, 26_000.0, 1),
            candidate("D4", 20.0, 40_000.0, 2),
        ];
        let outcome = scorer.rank(pool, &context());

        assert_eq!(outcome.excluded.len(), 1);
        assert_eq!(outcome.excluded[0].reason, Exclusion::InsufficientCapacity);
        let order: Vec<&str> = outcome
            .ranked
            .iter()
            .map(|s| s.candidate.driver.id.as_str())
            .collect();
        assert_eq!(order, vec!["D1", "D4"]);
        assert_eq!(outcome.ranked[0].breakdown.cost_efficiency_score, 100.0);
        assert_eq!(outcome.ranked[1].breakdown.cost_efficiency_score, 0.0);
    }

    #[test]
    fn test_ties_fall_back_to_discovery_order() {
        let scorer = MultiConstraintScorer::default();
        let pool = vec![
            candidate("D2", 10.0, 40_000.0, 1),
            candidate("D1", 10.0, 40_000.0, 0),
        ];
        let outcome = scorer.rank(pool, &context());
        assert_eq!(outcome.best().unwrap().candidate.driver.id.as_str(), "D1");
    }
}
