// Copyright 2025 Cowboy AI, LLC.

use chrono::{TimeZone, Utc};
use cim_domain_logistics::graph::VehicleAccess;
use cim_domain_logistics::identifiers::{CarrierId, DriverId, LoadId, VehicleId};
use cim_domain_logistics::model::{
    defaults, Carrier, Driver, DriverStatus, Load, LoadStatus, PriorityTier, Vehicle, VehicleStatus,
};
use cim_domain_logistics::optimizer::{
    Candidate, MultiConstraintScorer, ProximityDecay, ScoringConfig, ScoringContext,
};
use cim_domain_logistics::TimeWindow;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;

fn context() -> ScoringContext {
    let day = |hour| Utc.with_ymd_and_hms(2025, 5, 2, hour, 0, 0).unwrap();
    ScoringContext {
        load: Load {
            id: LoadId::new("L-bench"),
            status: Some(LoadStatus::Created),
            weight: 30_000.0,
            volume: 1_500.0,
            pickup_window: Some(TimeWindow::new(day(9), day(13))),
            delivery_window: Some(TimeWindow::new(day(9), day(20))),
            priority: PriorityTier::Standard,
            required_capabilities: BTreeSet::new(),
            required_endorsements: BTreeSet::new(),
        },
        load_miles: 120.0,
        max_driver_distance: 50.0,
        max_duration_hours: 11.0,
        as_of: day(7),
    }
}

fn candidates(count: usize) -> Vec<Candidate> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|i| Candidate {
            driver: Driver {
                id: DriverId::new(format!("D{}", i)),
                status: Some(DriverStatus::Available),
                position: None,
                home_location: None,
                license_qualifications: BTreeSet::new(),
                performance_score: Some(rng.gen_range(0.5..1.0)),
                on_time_percentage: Some(rng.gen_range(70.0..100.0)),
                hourly_rate: rng.gen_range(20.0..40.0),
                duty_hours_remaining: defaults::DUTY_HOURS,
            },
            vehicle: Vehicle {
                id: VehicleId::new(format!("V{}", i)),
                status: Some(VehicleStatus::Available),
                capability_tags: BTreeSet::new(),
                capacity_weight: rng.gen_range(25_000.0..50_000.0),
                capacity_volume: 0.0,
                fuel_efficiency: Some(rng.gen_range(5.0..8.0)),
                cost_per_mile: defaults::COST_PER_MILE,
                home_base: None,
                position: None,
            },
            carrier: Some(Carrier {
                id: CarrierId::new(format!("C{}", i % 8)),
                name: None,
                on_time_rate: Some(rng.gen_range(80.0..100.0)),
                safety_rating: Some(rng.gen_range(80.0..100.0)),
                fleet_size: None,
            }),
            distance_miles: rng.gen_range(0.0..50.0),
            access: VehicleAccess::Bound,
            discovery_rank: i,
        })
        .collect()
}

fn benchmark_rank(c: &mut Criterion) {
    let context = context();
    let linear = MultiConstraintScorer::default();
    let exponential = MultiConstraintScorer::new(ScoringConfig {
        proximity_decay: ProximityDecay::Exponential { rate: 3.0 },
        ..ScoringConfig::default()
    });

    let mut group = c.benchmark_group("rank");
    for size in [10usize, 50, 500] {
        let pool = candidates(size);
        group.bench_with_input(BenchmarkId::new("linear", size), &pool, |b, pool| {
            b.iter(|| linear.rank(black_box(pool.clone()), &context))
        });
        group.bench_with_input(BenchmarkId::new("exponential", size), &pool, |b, pool| {
            b.iter(|| exponential.rank(black_box(pool.clone()), &context))
        });
    }
    group.finish();
}

fn benchmark_assess(c: &mut Criterion) {
    let context = context();
    let scorer = MultiConstraintScorer::default();
    let pool = candidates(1);

    c.bench_function("assess_single_candidate", |b| {
        b.iter(|| scorer.assess(black_box(&pool[0]), &context))
    });
}

criterion_group!(benches, benchmark_rank, benchmark_assess);
criterion_main!(benches);
