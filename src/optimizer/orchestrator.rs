// Copyright 2025 Cowboy AI, LLC.

//! Optimization request lifecycle
//!
//! ```text
//! RECEIVED -> CANDIDATES_FOUND -> SCORED -> ROUTE_RESOLVED -> COMMITTED
//!     \              \              \            |   \
//!      +--------------+--------------+-----------+----+--> FAILED
//!                                                |
//!                        (commit conflict retry) +--> RECEIVED
//! ```
//!
//! Cancellation is cooperative and checked on every transition except the
//! one into COMMITTED, which follows the single graph write.

use super::discovery::{CandidateDiscovery, DiscoveryConfig, LoadContext};
use super::request::{OptimizationRequest, OptimizationResponse};
use super::route_store::{RoutePlan, RoutePlanStatus, RoutePlanStore};
use super::routing::{ResolvedRoute, RouteGeometryResolver, RoutePreferences};
use super::scoring::{MultiConstraintScorer, ScoredCandidate, ScoringConfig, ScoringContext, ScoringOutcome};
use crate::egress::EventPublisher;
use crate::errors::{CommitConflict, FailureReason, GraphStoreError, OptimizationError};
use crate::events::{AdvancedRouteOptimized, CandidateScore, ResultEvent, RouteOptimized};
use crate::graph::{GraphMutation, GraphStore, NodeRef, RelationshipType};
use crate::identifiers::{DriverId, LoadId, RequestId, RouteId};
use crate::metrics::{names, EngineMetrics};
use crate::model::{fields, Driver, DriverStatus, Load, LoadStatus, Vehicle, VehicleStatus};
use crate::state_machine::{MooreMachine, MooreStateTransitions, State, StateTransition};
use crate::sync::{assign, Assignment, SyncObserver};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Advisory lock lifetime
    pub lock_ttl_ms: u64,
    /// How long to wait for a held lock
    pub lock_wait_ms: u64,
    /// Pause between lock attempts
    pub lock_poll_ms: u64,
    /// Fresh-discovery retries after a retryable commit conflict
    pub commit_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 30_000,
            lock_wait_ms: 2_000,
            lock_poll_ms: 25,
            commit_retries: 1,
        }
    }
}

/// Optimization request states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationState {
    /// Accepted, nothing read yet
    Received,
    /// Discovery finished
    CandidatesFound,
    /// Candidates ranked
    Scored,
    /// Geometry for the best candidate known
    RouteResolved,
    /// Assignment written
    Committed,
    /// Ended without an assignment
    Failed {
        /// Caller-facing reason
        reason: FailureReason,
    },
}

impl State for OptimizationState {
    fn name(&self) -> &'static str {
        match self {
            OptimizationState::Received => "RECEIVED",
            OptimizationState::CandidatesFound => "CANDIDATES_FOUND",
            OptimizationState::Scored => "SCORED",
            OptimizationState::RouteResolved => "ROUTE_RESOLVED",
            OptimizationState::Committed => "COMMITTED",
            OptimizationState::Failed { .. } => "FAILED",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizationState::Committed | OptimizationState::Failed { .. }
        )
    }
}

impl MooreStateTransitions for OptimizationState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use OptimizationState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, target) {
            (_, Failed { .. }) => true,
            (Received, CandidatesFound) => true,
            (CandidatesFound, Scored) => true,
            (Scored, RouteResolved) => true,
            (RouteResolved, Committed) => true,
            (RouteResolved, Received) => true,
            _ => false,
        }
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use OptimizationState::*;
        let failed = Failed {
            reason: FailureReason::CommitConflict,
        };
        match self {
            Received => vec![CandidatesFound, failed],
            CandidatesFound => vec![Scored, failed],
            Scored => vec![RouteResolved, failed],
            RouteResolved => vec![Committed, Received, failed],
            Committed | Failed { .. } => Vec::new(),
        }
    }
}

type CancelFlag = Arc<AtomicBool>;

/// Optimization requests currently running, keyed by load
///
/// Registered as a [`SyncObserver`] so a `LOAD_CANCELLED` event flags every
/// request for that load.
#[derive(Debug, Clone, Default)]
pub struct InFlightRequests {
    requests: Arc<Mutex<HashMap<LoadId, Vec<(RequestId, CancelFlag)>>>>,
}

impl InFlightRequests {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, load_id: &LoadId, request_id: &RequestId) -> CancelFlag {
        let flag = CancelFlag::default();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests
            .entry(load_id.clone())
            .or_default()
            .push((request_id.clone(), flag.clone()));
        flag
    }

    fn release(&self, load_id: &LoadId, request_id: &RequestId) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = requests.get_mut(load_id) {
            running.retain(|(id, _)| id != request_id);
            if running.is_empty() {
                requests.remove(load_id);
            }
        }
    }

    /// Flag every running request for `load_id`; returns how many were flagged
    pub fn cancel(&self, load_id: &LoadId) -> usize {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let Some(running) = requests.get(load_id) else {
            return 0;
        };
        for (_, flag) in running {
            flag.store(true, Ordering::SeqCst);
        }
        running.len()
    }

    /// Number of running requests for `load_id`
    pub fn running(&self, load_id: &LoadId) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(load_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl SyncObserver for InFlightRequests {
    async fn load_cancelled(&self, load_id: &LoadId) {
        let flagged = self.cancel(load_id);
        if flagged > 0 {
            info!(load_id = %load_id, flagged, "Cancelling in-flight optimizations");
        }
    }
}

struct RequestRun {
    machine: MooreMachine<OptimizationState>,
    request_id: RequestId,
    load_id: LoadId,
    cancelled: CancelFlag,
    alternatives_considered: usize,
    candidates_excluded: usize,
}

impl RequestRun {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn advance(&mut self, state: OptimizationState, note: Option<String>) -> Result<(), OptimizationError> {
        if self.is_cancelled() {
            return Err(OptimizationError::Cancelled);
        }
        self.enter(state, note)
    }

    fn enter(&mut self, state: OptimizationState, note: Option<String>) -> Result<(), OptimizationError> {
        let transition = self.machine.transition_to(state, note)?;
        info!(
            request_id = %self.request_id,
            load_id = %self.load_id,
            from = transition.from.name(),
            state = transition.to.name(),
            "Optimization state changed"
        );
        Ok(())
    }

    fn fail(&mut self, reason: FailureReason, note: String) {
        if let Err(err) = self.enter(OptimizationState::Failed { reason }, Some(note)) {
            debug!(request_id = %self.request_id, error = %err, "Request already finished");
        }
    }
}

struct Selection<'a> {
    context: &'a LoadContext,
    best: &'a ScoredCandidate,
    route: &'a ResolvedRoute,
}

/// Drives optimization requests from discovery to commit
pub struct OptimizationOrchestrator {
    store: Arc<dyn GraphStore>,
    discovery: CandidateDiscovery,
    scorer: MultiConstraintScorer,
    resolver: RouteGeometryResolver,
    routes: Arc<dyn RoutePlanStore>,
    publisher: Arc<dyn EventPublisher>,
    in_flight: InFlightRequests,
    metrics: EngineMetrics,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for OptimizationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationOrchestrator")
            .field("store", &self.store)
            .field("resolver", &self.resolver)
            .field("config", &self.config)
            .finish()
    }
}

impl OptimizationOrchestrator {
    /// Orchestrator with default discovery, scoring and commit settings
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolver: RouteGeometryResolver,
        routes: Arc<dyn RoutePlanStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            discovery: CandidateDiscovery::new(store.clone(), DiscoveryConfig::default()),
            store,
            scorer: MultiConstraintScorer::default(),
            resolver,
            routes,
            publisher,
            in_flight: InFlightRequests::new(),
            metrics: EngineMetrics::new(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Replace the discovery settings
    pub fn with_discovery_config(mut self, config: DiscoveryConfig) -> Self {
        self.discovery = CandidateDiscovery::new(self.store.clone(), config);
        self
    }

    /// Replace the scoring settings
    pub fn with_scoring_config(mut self, config: ScoringConfig) -> Self {
        self.scorer = MultiConstraintScorer::new(config);
        self
    }

    /// Replace the commit settings
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Record into a shared collector
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share an in-flight registry, typically one also observing the synchronizer
    pub fn with_in_flight(mut self, in_flight: InFlightRequests) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// In-flight registry; register it with the synchronizer for cancellation
    pub fn in_flight(&self) -> &InFlightRequests {
        &self.in_flight
    }

    /// Cancel running requests for a load
    pub fn cancel(&self, load_id: &LoadId) -> usize {
        self.in_flight.cancel(load_id)
    }

    /// Run one request to completion
    pub async fn optimize(&self, request: OptimizationRequest) -> OptimizationResponse {
        self.optimize_traced(request).await.0
    }

    /// Run one request and return its state history as well
    pub async fn optimize_traced(
        &self,
        request: OptimizationRequest,
    ) -> (OptimizationResponse, Vec<StateTransition<OptimizationState>>) {
        let started = Instant::now();
        let request_id = request.request_id.clone().unwrap_or_else(RequestId::generate);
        let load_id = request.load_id.clone();

        let cancelled = self.in_flight.register(&load_id, &request_id);
        let mut run = RequestRun {
            machine: MooreMachine::new(OptimizationState::Received, request_id.to_string()),
            request_id: request_id.clone(),
            load_id: load_id.clone(),
            cancelled,
            alternatives_considered: 0,
            candidates_excluded: 0,
        };
        info!(request_id = %request_id, load_id = %load_id, "Optimization received");

        let result = self.run(&mut run, &request).await;
        self.in_flight.release(&load_id, &request_id);

        let response = match result {
            Ok(response) => {
                self.metrics.increment(names::OPTIMIZATIONS_SUCCEEDED).await;
                response
            }
            Err(err) => {
                let reason = err.reason();
                run.fail(reason, err.to_string());
                warn!(
                    request_id = %request_id,
                    load_id = %load_id,
                    reason = %reason,
                    error = %err,
                    "Optimization failed"
                );
                self.metrics
                    .increment_labeled(names::OPTIMIZATIONS_FAILED, reason.as_str())
                    .await;
                OptimizationResponse::failure(
                    request_id,
                    load_id,
                    reason,
                    run.alternatives_considered,
                    run.candidates_excluded,
                )
            }
        };
        self.metrics
            .record_duration(names::OPTIMIZATION, started.elapsed())
            .await;
        (response, run.machine.history().to_vec())
    }

    async fn run(
        &self,
        run: &mut RequestRun,
        request: &OptimizationRequest,
    ) -> Result<OptimizationResponse, OptimizationError> {
        request.validate()?;
        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let mut retries = 0;

        loop {
            let context = self.discovery.load(&request.load_id).await?;
            ensure_assignable(&context.load)?;
            let candidates = self
                .discovery
                .find_candidates(&context, request, as_of)
                .await?;
            run.advance(
                OptimizationState::CandidatesFound,
                Some(format!("{} candidates", candidates.len())),
            )?;

            let scoring = ScoringContext::new(&context, request, as_of);
            let outcome = self.scorer.rank(candidates, &scoring);
            run.alternatives_considered = outcome.ranked.len();
            run.candidates_excluded = outcome.excluded.len();
            for excluded in &outcome.excluded {
                debug!(
                    request_id = %run.request_id,
                    driver_id = %excluded.driver_id,
                    vehicle_id = %excluded.vehicle_id,
                    reason = %excluded.reason,
                    "Candidate excluded"
                );
            }
            run.advance(
                OptimizationState::Scored,
                Some(format!(
                    "{} ranked, {} excluded",
                    outcome.ranked.len(),
                    outcome.excluded.len()
                )),
            )?;
            let best = outcome.best().ok_or(OptimizationError::NoFeasibleCandidate)?;

            let (Some(origin), Some(destination)) =
                (context.origin_point(), context.destination_point())
            else {
                return Err(OptimizationError::NoFeasibleCandidate);
            };
            let preferences = RoutePreferences {
                consider_traffic: request.consider_traffic,
                departure_time: Some(best.timeline.pickup_at),
            };
            let route = self.resolver.resolve(origin, destination, preferences).await?;
            if route.is_fallback() {
                self.metrics.increment(names::ROUTING_FALLBACKS).await;
            }
            run.advance(
                OptimizationState::RouteResolved,
                Some(route.algorithm_used().to_string()),
            )?;

            let selection = Selection {
                context: &context,
                best,
                route: &route,
            };
            match self.commit(run, &selection).await {
                Ok(route_id) => {
                    run.enter(OptimizationState::Committed, Some(route_id.to_string()))?;
                    let response = self.committed_response(run, &selection, &outcome, route_id);
                    self.publish(&response, &outcome).await;
                    return Ok(response);
                }
                Err(OptimizationError::Commit(conflict))
                    if conflict.is_retryable() && retries < self.config.commit_retries =>
                {
                    retries += 1;
                    warn!(
                        request_id = %run.request_id,
                        load_id = %run.load_id,
                        conflict = %conflict,
                        retry = retries,
                        "Commit conflict, re-running discovery"
                    );
                    run.advance(OptimizationState::Received, Some(conflict.to_string()))?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn acquire(&self, name: &str, owner: &str) -> Result<(), OptimizationError> {
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.lock_wait_ms);
        loop {
            if self.store.try_lock(name, owner, ttl).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CommitConflict::LockTimeout(name.to_string()).into());
            }
            tokio::time::sleep(Duration::from_millis(self.config.lock_poll_ms)).await;
        }
    }

    async fn release(&self, names: &[String], owner: &str) {
        for name in names.iter().rev() {
            if let Err(err) = self.store.unlock(name, owner).await {
                warn!(lock = %name, error = %err, "Failed to release lock");
            }
        }
    }

    /// Lock load, vehicle and driver, re-validate, then write the assignment
    async fn commit(&self, run: &RequestRun, selection: &Selection<'_>) -> Result<RouteId, OptimizationError> {
        let candidate = &selection.best.candidate;
        let owner = run.request_id.to_string();
        let mut lock_names = vec![
            format!("load:{}", run.load_id),
            format!("vehicle:{}", candidate.vehicle.id),
            format!("driver:{}", candidate.driver.id),
        ];
        lock_names.sort();

        let mut held = Vec::with_capacity(lock_names.len());
        for name in &lock_names {
            if let Err(err) = self.acquire(name, &owner).await {
                self.release(&held, &owner).await;
                return Err(err);
            }
            held.push(name.clone());
        }

        let result = self.commit_locked(run, selection).await;
        self.release(&held, &owner).await;
        result
    }

    async fn commit_locked(
        &self,
        run: &RequestRun,
        selection: &Selection<'_>,
    ) -> Result<RouteId, OptimizationError> {
        if run.is_cancelled() {
            return Err(OptimizationError::Cancelled);
        }
        let candidate = &selection.best.candidate;
        let previous_driver = self.verify_locked(run, selection).await?;

        let now = Utc::now();
        let plan = route_plan(run, selection, now);
        let route_id = plan.route_id.clone();
        self.routes.save(&plan).await?;

        // Ingress does not take the advisory locks, so the statuses read above
        // are re-asserted inside the write itself.
        let mut batch = vec![
            GraphMutation::require(
                NodeRef::load(&run.load_id),
                fields::STATUS,
                [json!(LoadStatus::Created)],
            ),
            GraphMutation::require(
                NodeRef::driver(&candidate.driver.id),
                fields::STATUS,
                [json!(DriverStatus::Available)],
            ),
            GraphMutation::require(
                NodeRef::vehicle(&candidate.vehicle.id),
                fields::STATUS,
                [json!(VehicleStatus::Available)],
            ),
        ];
        batch.extend(assign(
            &Assignment {
                load_id: run.load_id.clone(),
                vehicle_id: candidate.vehicle.id.clone(),
                driver_id: Some(candidate.driver.id.clone()),
                route_id: Some(route_id.clone()),
                assigned_at: now,
            },
            previous_driver.as_ref(),
        ));

        let written = match self.store.apply(batch).await {
            Ok(outcome) => Ok(outcome),
            Err(GraphStoreError::PreconditionFailed { record, reason }) => {
                debug!(
                    request_id = %run.request_id,
                    record = %record,
                    reason = %reason,
                    "Assignment precondition failed"
                );
                match self.verify_locked(run, selection).await {
                    Err(err) => Err(err),
                    Ok(_) => Err(CommitConflict::WriteRaced(record).into()),
                }
            }
            Err(GraphStoreError::Conflict(record)) => Err(CommitConflict::WriteRaced(record).into()),
            Err(err) => Err(OptimizationError::from(err)),
        };

        match written {
            Ok(outcome) => {
                info!(
                    request_id = %run.request_id,
                    load_id = %run.load_id,
                    driver_id = %candidate.driver.id,
                    vehicle_id = %candidate.vehicle.id,
                    route_id = %route_id,
                    changed = outcome.changed,
                    "Assignment committed"
                );
                Ok(route_id)
            }
            Err(err) => {
                if let Err(discard) = self
                    .routes
                    .set_status(&route_id, RoutePlanStatus::Discarded)
                    .await
                {
                    warn!(route_id = %route_id, error = %discard, "Failed to discard route plan");
                }
                Err(err)
            }
        }
    }

    /// Check load, driver and vehicle still accept the assignment
    ///
    /// Returns the driver named on the load's current assignment edge, if any.
    async fn verify_locked(
        &self,
        run: &RequestRun,
        selection: &Selection<'_>,
    ) -> Result<Option<DriverId>, OptimizationError> {
        let candidate = &selection.best.candidate;
        let load_ref = NodeRef::load(&run.load_id);

        let load_node = self.store.node(&load_ref).await?;
        let status = match &load_node {
            Some(node) => Load::recorded_status(node)?.map(|(status, _)| status),
            None => None,
        };
        match status {
            Some(LoadStatus::Created) => {}
            Some(LoadStatus::Assigned) => {
                return Err(CommitConflict::LoadAlreadyAssigned(run.load_id.clone()).into())
            }
            other => {
                return Err(CommitConflict::LoadNotAssignable {
                    load_id: run.load_id.clone(),
                    status: other.map_or("UNKNOWN".to_string(), |s| format!("{:?}", s)),
                }
                .into())
            }
        }

        let driver = self
            .store
            .node(&NodeRef::driver(&candidate.driver.id))
            .await?
            .map(|node| Driver::from_node(&node))
            .transpose()?;
        if !driver.as_ref().is_some_and(Driver::is_available) {
            return Err(CommitConflict::DriverUnavailable(candidate.driver.id.clone()).into());
        }
        let vehicle = self
            .store
            .node(&NodeRef::vehicle(&candidate.vehicle.id))
            .await?
            .map(|node| Vehicle::from_node(&node))
            .transpose()?;
        if !vehicle.as_ref().is_some_and(Vehicle::is_available) {
            return Err(CommitConflict::VehicleUnavailable(candidate.vehicle.id.clone()).into());
        }

        Ok(self
            .store
            .outgoing(&load_ref, RelationshipType::AssignedTo)
            .await?
            .into_iter()
            .next()
            .and_then(|edge| edge.str_property(fields::DRIVER_ID).map(DriverId::new)))
    }

    fn committed_response(
        &self,
        run: &RequestRun,
        selection: &Selection<'_>,
        outcome: &ScoringOutcome,
        route_id: RouteId,
    ) -> OptimizationResponse {
        let best = selection.best;
        let route = selection.route;
        OptimizationResponse {
            success: true,
            reason: None,
            request_id: run.request_id.clone(),
            load_id: run.load_id.clone(),
            selected_driver_id: Some(best.candidate.driver.id.clone()),
            selected_vehicle_id: Some(best.candidate.vehicle.id.clone()),
            optimization_score: best.breakdown.composite_score,
            alternatives_considered: outcome.ranked.len(),
            candidates_excluded: outcome.excluded.len(),
            distance: route.distance_miles(),
            duration_minutes: route.duration_minutes(),
            route_geometry: route.points().to_vec(),
            algorithm_used: Some(route.algorithm_used()),
            traffic_considered: route.traffic_considered(),
            score_breakdown: Some(best.breakdown),
            route_id: Some(route_id),
        }
    }

    async fn publish(&self, response: &OptimizationResponse, outcome: &ScoringOutcome) {
        let (Some(route_id), Some(vehicle_id), Some(algorithm_used), Some(score_breakdown)) = (
            response.route_id.clone(),
            response.selected_vehicle_id.clone(),
            response.algorithm_used,
            response.score_breakdown,
        ) else {
            return;
        };
        let summary = RouteOptimized {
            route_id,
            load_id: response.load_id.clone(),
            vehicle_id,
            driver_id: response.selected_driver_id.clone(),
            distance: response.distance,
            duration_minutes: response.duration_minutes,
            optimization_score: response.optimization_score,
            algorithm_used,
            traffic_considered: response.traffic_considered,
        };
        let detailed = AdvancedRouteOptimized {
            route: summary.clone(),
            request_id: response.request_id.clone(),
            score_breakdown,
            alternatives_considered: response.alternatives_considered,
            candidates_excluded: response.candidates_excluded,
            candidates: outcome
                .ranked
                .iter()
                .map(|scored| CandidateScore {
                    driver_id: scored.candidate.driver.id.clone(),
                    vehicle_id: scored.candidate.vehicle.id.clone(),
                    breakdown: scored.breakdown,
                    estimated_cost: scored.estimated_cost,
                })
                .collect(),
        };

        let correlation_id = Some(response.request_id.to_string());
        for event in [
            ResultEvent::RouteOptimized(summary),
            ResultEvent::AdvancedRouteOptimized(Box::new(detailed)),
        ] {
            let event_type = event.event_type();
            if let Err(err) = self.publisher.publish_event(event, correlation_id.clone()).await {
                // The assignment stands; downstream catches up from the graph
                warn!(
                    request_id = %response.request_id,
                    event_type,
                    error = %err,
                    "Failed to publish result event"
                );
            }
        }
    }
}

fn ensure_assignable(load: &Load) -> Result<(), OptimizationError> {
    match load.status {
        Some(LoadStatus::Created) => Ok(()),
        Some(LoadStatus::Assigned) => Err(CommitConflict::LoadAlreadyAssigned(load.id.clone()).into()),
        status => Err(CommitConflict::LoadNotAssignable {
            load_id: load.id.clone(),
            status: status.map_or("UNKNOWN".to_string(), |s| format!("{:?}", s)),
        }
        .into()),
    }
}

fn route_plan(run: &RequestRun, selection: &Selection<'_>, created_at: DateTime<Utc>) -> RoutePlan {
    let candidate = &selection.best.candidate;
    RoutePlan {
        route_id: RouteId::generate(),
        request_id: run.request_id.clone(),
        load_id: run.load_id.clone(),
        vehicle_id: candidate.vehicle.id.clone(),
        driver_id: Some(candidate.driver.id.clone()),
        geometry: selection.route.points().to_vec(),
        distance_miles: selection.route.distance_miles(),
        duration_minutes: selection.route.duration_minutes(),
        algorithm_used: selection.route.algorithm_used(),
        traffic_considered: selection.route.traffic_considered(),
        score_breakdown: selection.best.breakdown,
        status: RoutePlanStatus::Planned,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::InMemoryEventPublisher;
    use crate::graph::InMemoryGraphStore;
    use crate::optimizer::fixtures;
    use crate::optimizer::route_store::InMemoryRoutePlanStore;
    use crate::errors::RoutingError;
    use crate::geo::GeoPoint;
    use crate::optimizer::routing::{AlgorithmUsed, ProviderRoute, RoutingConfig, RoutingProvider};
    use crate::events::EventEnvelope;
    use crate::graph::{BatchOutcome, Node, NodeLabel, Relationship};
    use crate::sync::{Ack, GraphSynchronizer};

    struct Harness {
        store: Arc<InMemoryGraphStore>,
        routes: Arc<InMemoryRoutePlanStore>,
        publisher: Arc<InMemoryEventPublisher>,
        orchestrator: OptimizationOrchestrator,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&store).await;
        let routes = Arc::new(InMemoryRoutePlanStore::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let orchestrator = OptimizationOrchestrator::new(
            store.clone(),
            RouteGeometryResolver::straight_line(RoutingConfig::default()),
            routes.clone(),
            publisher.clone(),
        );
        Harness {
            store,
            routes,
            publisher,
            orchestrator,
        }
    }

    fn l1_request() -> OptimizationRequest {
        let mut request = OptimizationRequest::new("L1");
        request.max_driver_distance = 30.0;
        request.as_of = Some(fixtures::as_of());
        request
    }

    #[test]
    fn test_state_transitions() {
        use OptimizationState::*;
        assert!(Received.can_transition_to(&CandidatesFound));
        assert!(RouteResolved.can_transition_to(&Received));
        assert!(Scored.can_transition_to(&Failed {
            reason: FailureReason::NoFeasibleCandidate
        }));
        assert!(!Received.can_transition_to(&Committed));
        assert!(!Committed.can_transition_to(&Failed {
            reason: FailureReason::Cancelled
        }));
    }

    #[tokio::test]
    async fn test_l1_selects_nearest_fitting_driver() {
        let h = harness().await;
        let (response, history) = h.orchestrator.optimize_traced(l1_request()).await;

        assert!(response.success, "{:?}", response.reason);
        assert_eq!(response.selected_driver_id, Some(DriverId::new("D1")));
        assert_eq!(response.alternatives_considered, 1);
        assert_eq!(response.candidates_excluded, 1);
        assert_eq!(response.algorithm_used, Some(AlgorithmUsed::StraightLineFallback));

        let states: Vec<&str> = history.iter().map(|t| t.to.name()).collect();
        assert_eq!(
            states,
            vec!["CANDIDATES_FOUND", "SCORED", "ROUTE_RESOLVED", "COMMITTED"]
        );

        let snapshot = h.store.snapshot().await;
        assert_eq!(snapshot.edges_of_type(RelationshipType::AssignedTo).len(), 1);
        let load = Load::from_node(&snapshot.nodes[&NodeRef::load("L1")]).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Assigned));

        let plans = h.routes.for_load(&LoadId::new("L1")).await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].status, RoutePlanStatus::Planned);
        assert_eq!(h.publisher.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_assigned_load_is_rejected() {
        let h = harness().await;
        assert!(h.orchestrator.optimize(l1_request()).await.success);

        let second = h.orchestrator.optimize(l1_request()).await;
        assert!(!second.success);
        assert_eq!(second.reason, Some(FailureReason::LoadAlreadyAssigned));
    }

    #[tokio::test]
    async fn test_no_feasible_candidate() {
        let h = harness().await;
        let mut request = l1_request();
        request.max_duration_hours = 1.0;
        let response = h.orchestrator.optimize(request).await;
        assert_eq!(response.reason, Some(FailureReason::NoFeasibleCandidate));
        assert_eq!(response.candidates_excluded, 2);
        assert!(h
            .store
            .snapshot()
            .await
            .edges_of_type(RelationshipType::AssignedTo)
            .is_empty());
    }

    struct CancellingProvider {
        in_flight: InFlightRequests,
    }

    #[async_trait]
    impl RoutingProvider for CancellingProvider {
        async fn route(
            &self,
            _origin: GeoPoint,
            _destination: GeoPoint,
            _preferences: RoutePreferences,
        ) -> Result<ProviderRoute, RoutingError> {
            self.in_flight.cancel(&LoadId::new("L1"));
            Err(RoutingError::Provider("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_cancellation_during_routing_leaves_graph_untouched() {
        let store = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&store).await;
        let before = store.snapshot().await;

        let in_flight = InFlightRequests::new();
        let provider = CancellingProvider {
            in_flight: in_flight.clone(),
        };
        let orchestrator = OptimizationOrchestrator::new(
            store.clone(),
            RouteGeometryResolver::new(Arc::new(provider), RoutingConfig::default()),
            Arc::new(InMemoryRoutePlanStore::new()),
            Arc::new(InMemoryEventPublisher::new()),
        )
        .with_in_flight(in_flight.clone());

        let (response, history) = orchestrator.optimize_traced(l1_request()).await;
        assert_eq!(response.reason, Some(FailureReason::Cancelled));
        assert_eq!(history.last().map(|t| t.to.name()), Some("FAILED"));
        assert_eq!(store.snapshot().await, before);
        assert_eq!(in_flight.running(&LoadId::new("L1")), 0);
    }

    #[tokio::test]
    async fn test_held_lock_times_out_then_fails() {
        let h = harness().await;
        let orchestrator = h.orchestrator.with_config(OrchestratorConfig {
            lock_wait_ms: 50,
            lock_poll_ms: 5,
            ..Default::default()
        });
        h.store
            .try_lock("driver:D1", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();

        let response = orchestrator.optimize(l1_request()).await;
        assert_eq!(response.reason, Some(FailureReason::CommitConflict));
        assert!(h.routes.for_load(&LoadId::new("L1")).await.is_empty());
    }

    /// Delivers `LOAD_CANCELLED` for L1 once the commit holds its locks and
    /// reads the load's assignment edge
    #[derive(Debug)]
    struct CancelDuringCommit {
        inner: Arc<InMemoryGraphStore>,
        sync: GraphSynchronizer,
        armed: AtomicBool,
        fired: AtomicBool,
    }

    impl CancelDuringCommit {
        fn new(inner: Arc<InMemoryGraphStore>) -> Self {
            Self {
                sync: GraphSynchronizer::new(inner.clone()),
                inner,
                armed: AtomicBool::new(false),
                fired: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl GraphStore for CancelDuringCommit {
        async fn apply(&self, batch: Vec<GraphMutation>) -> Result<BatchOutcome, GraphStoreError> {
            self.inner.apply(batch).await
        }

        async fn node(&self, node: &NodeRef) -> Result<Option<Node>, GraphStoreError> {
            self.inner.node(node).await
        }

        async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>, GraphStoreError> {
            self.inner.nodes_by_label(label).await
        }

        async fn outgoing(
            &self,
            from: &NodeRef,
            rel_type: RelationshipType,
        ) -> Result<Vec<Relationship>, GraphStoreError> {
            if self.armed.load(Ordering::SeqCst)
                && rel_type == RelationshipType::AssignedTo
                && *from == NodeRef::load("L1")
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                let cancel = EventEnvelope::from_value(json!({
                    "event_id": "evt-cancel",
                    "event_type": "LOAD_CANCELLED",
                    "timestamp": Utc::now().to_rfc3339(),
                    "entity_id": "L1",
                    "data": {"reason": "shipper"},
                }))
                .unwrap();
                let ack = self.sync.apply(&cancel).await.unwrap();
                assert!(matches!(ack, Ack::Applied { .. }), "{:?}", ack);
            }
            self.inner.outgoing(from, rel_type).await
        }

        async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, GraphStoreError> {
            if name == "load:L1" {
                self.armed.store(true, Ordering::SeqCst);
            }
            self.inner.try_lock(name, owner, ttl).await
        }

        async fn unlock(&self, name: &str, owner: &str) -> Result<(), GraphStoreError> {
            self.inner.unlock(name, owner).await
        }
    }

    #[tokio::test]
    async fn test_cancel_landing_mid_commit_keeps_load_cancelled() {
        let inner = Arc::new(InMemoryGraphStore::new());
        fixtures::seed_l1(&inner).await;
        let store = Arc::new(CancelDuringCommit::new(inner.clone()));
        let routes = Arc::new(InMemoryRoutePlanStore::new());
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let orchestrator = OptimizationOrchestrator::new(
            store.clone(),
            RouteGeometryResolver::straight_line(RoutingConfig::default()),
            routes.clone(),
            publisher.clone(),
        );

        let response = orchestrator.optimize(l1_request()).await;

        assert!(store.fired.load(Ordering::SeqCst));
        assert!(!response.success);
        assert_eq!(response.reason, Some(FailureReason::LoadNotAssignable));

        let snapshot = inner.snapshot().await;
        let load = Load::from_node(&snapshot.nodes[&NodeRef::load("L1")]).unwrap();
        assert_eq!(load.status, Some(LoadStatus::Cancelled));
        assert!(snapshot.edges_of_type(RelationshipType::AssignedTo).is_empty());
        assert!(snapshot.edges_of_type(RelationshipType::CurrentlyAssigned).is_empty());

        let plans = routes.for_load(&LoadId::new("L1")).await;
        assert!(plans.iter().all(|p| p.status == RoutePlanStatus::Discarded));
        assert!(publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_lost_write_race_retries_with_fresh_discovery() {
        let h = harness().await;
        h.store.conflict_next(1);

        let (response, history) = h.orchestrator.optimize_traced(l1_request()).await;

        assert!(response.success, "{:?}", response.reason);
        assert_eq!(response.selected_driver_id, Some(DriverId::new("D1")));
        let states: Vec<&str> = history.iter().map(|t| t.to.name()).collect();
        assert_eq!(
            states,
            vec![
                "CANDIDATES_FOUND",
                "SCORED",
                "ROUTE_RESOLVED",
                "RECEIVED",
                "CANDIDATES_FOUND",
                "SCORED",
                "ROUTE_RESOLVED",
                "COMMITTED"
            ]
        );

        let mut statuses: Vec<RoutePlanStatus> = h
            .routes
            .for_load(&LoadId::new("L1"))
            .await
            .into_iter()
            .map(|p| p.status)
            .collect();
        statuses.sort_by_key(|status| format!("{:?}", status));
        assert_eq!(statuses, vec![RoutePlanStatus::Discarded, RoutePlanStatus::Planned]);
        assert_eq!(
            h.store.snapshot().await.edges_of_type(RelationshipType::AssignedTo).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_second_lost_write_race_fails_the_request() {
        let h = harness().await;
        h.store.conflict_next(2);

        let response = h.orchestrator.optimize(l1_request()).await;

        assert_eq!(response.reason, Some(FailureReason::CommitConflict));
        assert!(h
            .store
            .snapshot()
            .await
            .edges_of_type(RelationshipType::AssignedTo)
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let h = harness().await;
        let mut request = l1_request();
        request.max_driver_distance = -1.0;
        let response = h.orchestrator.optimize(request).await;
        assert_eq!(response.reason, Some(FailureReason::InvalidRequest));
    }
}
