// Copyright 2025 Cowboy AI, LLC.

//! Error types for graph synchronization and load optimization
//!
//! Each stage of the engine owns its own error enum. Internal errors never
//! cross the request boundary: the orchestrator folds them into a
//! [`FailureReason`] code and logs the detail.

use crate::identifiers::{DriverId, LoadId, VehicleId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a graph store implementation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphStoreError {
    /// The backing store could not be reached
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    /// A conditional write lost against a concurrent writer
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// A batch precondition did not hold, nothing was written
    #[error("Precondition failed on {record}: {reason}")]
    PreconditionFailed {
        /// Record reference
        record: String,
        /// Value found
        reason: String,
    },

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A node or relationship holds data that does not match its label
    #[error("Corrupt record {record}: {reason}")]
    Corrupt {
        /// Record reference, e.g. `Driver:d-17`
        record: String,
        /// What was wrong with it
        reason: String,
    },
}

impl GraphStoreError {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphStoreError::Unavailable(_) | GraphStoreError::Conflict(_)
        )
    }

    /// Build a corrupt-record error
    pub fn corrupt(record: impl fmt::Display, reason: impl Into<String>) -> Self {
        GraphStoreError::Corrupt {
            record: record.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GraphStoreError {
    fn from(err: serde_json::Error) -> Self {
        GraphStoreError::Serialization(err.to_string())
    }
}

/// Errors found while validating an inbound event at the ingress boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EventValidationError {
    /// The payload is not a JSON event envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The `data` object does not match the schema of its event type
    #[error("Malformed {event_type} payload: {reason}")]
    MalformedPayload {
        /// Event type being decoded
        event_type: String,
        /// Decoder message
        reason: String,
    },

    /// A field is present but holds an unacceptable value
    #[error("Invalid field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Envelope and payload disagree on the entity
    #[error("Entity mismatch: envelope names {envelope}, payload names {payload}")]
    EntityMismatch {
        /// Entity named by the envelope
        envelope: String,
        /// Entity named by the payload
        payload: String,
    },
}

impl EventValidationError {
    /// Build an invalid-field error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EventValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors produced while applying an event to the graph
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    /// The event could not be decoded or failed validation
    #[error("Malformed event: {0}")]
    Malformed(#[from] EventValidationError),

    /// The graph store is temporarily unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Applying the event would break a graph invariant
    #[error("Constraint violation on {entity}: {reason}")]
    ConstraintViolation {
        /// Entity whose invariant was at stake
        entity: String,
        /// Description of the violated rule
        reason: String,
    },

    /// The store rejected the write for a non-transient reason
    #[error("Store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Whether the event should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_))
    }

    /// Whether the event itself is at fault
    pub fn is_malformed(&self) -> bool {
        matches!(self, SyncError::Malformed(_))
    }

    /// Short machine-readable cause, used for dead-letter records and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Malformed(_) => "malformed",
            SyncError::StoreUnavailable(_) => "store_unavailable",
            SyncError::ConstraintViolation { .. } => "constraint_violation",
            SyncError::Store(_) => "store_error",
        }
    }
}

impl From<GraphStoreError> for SyncError {
    fn from(err: GraphStoreError) -> Self {
        if err.is_retryable() {
            SyncError::StoreUnavailable(err.to_string())
        } else {
            SyncError::Store(err.to_string())
        }
    }
}

/// Errors raised while discovering candidates
///
/// An empty candidate set is not an error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryError {
    /// Reading the graph failed
    #[error("Candidate query failed: {0}")]
    Store(#[from] GraphStoreError),

    /// The load is not present in the graph
    #[error("Load not found: {0}")]
    LoadNotFound(LoadId),

    /// The load node exists but lacks data needed for optimization
    #[error("Load {load_id} cannot be optimized: {reason}")]
    IncompleteLoad {
        /// Offending load
        load_id: LoadId,
        /// Missing or invalid data
        reason: String,
    },
}

/// Routing provider failures
///
/// These are recovered by the straight-line fallback; only
/// [`RoutingError::FallbackFailed`] ever reaches the orchestrator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    /// Transport or server error talking to the provider
    #[error("Routing provider error: {0}")]
    Provider(String),

    /// The provider did not answer within the configured budget
    #[error("Routing provider timed out after {0:?}")]
    Timeout(Duration),

    /// Provider quota or rate limit exhausted
    #[error("Routing provider quota exhausted")]
    QuotaExhausted,

    /// The provider found no drivable route
    #[error("No route between origin and destination")]
    NoRoute,

    /// The provider answered with something we cannot decode
    #[error("Invalid routing response: {0}")]
    InvalidResponse(String),

    /// The local straight-line estimate could not be produced either
    #[error("Fallback geometry failed: {0}")]
    FallbackFailed(String),
}

impl From<reqwest::Error> for RoutingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RoutingError::InvalidResponse(err.to_string())
        } else {
            RoutingError::Provider(err.to_string())
        }
    }
}

/// Reasons a commit cannot proceed once the per-load lock is held
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommitConflict {
    /// Another request already assigned the load
    #[error("Load {0} is already assigned")]
    LoadAlreadyAssigned(LoadId),

    /// The load reached a state that no longer accepts assignment
    #[error("Load {load_id} is {status} and cannot be assigned")]
    LoadNotAssignable {
        /// Offending load
        load_id: LoadId,
        /// Status found under the lock
        status: String,
    },

    /// The selected driver was taken or went off duty
    #[error("Driver {0} is no longer available")]
    DriverUnavailable(DriverId),

    /// The selected vehicle was taken or went out of service
    #[error("Vehicle {0} is no longer available")]
    VehicleUnavailable(VehicleId),

    /// The advisory lock could not be obtained in time
    #[error("Timed out waiting for lock {0}")]
    LockTimeout(String),

    /// A concurrent write changed a record the assignment depends on
    #[error("Assignment write raced an update to {0}")]
    WriteRaced(String),
}

impl CommitConflict {
    /// Whether re-running discovery may produce a committable candidate
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommitConflict::DriverUnavailable(_)
                | CommitConflict::VehicleUnavailable(_)
                | CommitConflict::LockTimeout(_)
                | CommitConflict::WriteRaced(_)
        )
    }
}

/// Errors publishing result events or dead letters
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    /// Encoding the outbound message failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The broker rejected or never acknowledged the message
    #[error("Broker error: {0}")]
    Broker(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err.to_string())
    }
}

/// Invalid state machine transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid state transition from {from} to {to}")]
pub struct TransitionError {
    /// Current state
    pub from: String,
    /// Attempted target state
    pub to: String,
}

/// Structured reason returned to API callers when an optimization fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// No candidate survived discovery and hard constraints
    NoFeasibleCandidate,
    /// The load was assigned by someone else first
    LoadAlreadyAssigned,
    /// Neither the provider nor the fallback produced a route
    ProviderAndFallbackFailed,
    /// The load is unknown to the graph
    LoadNotFound,
    /// The load is delivered, cancelled or otherwise not assignable
    LoadNotAssignable,
    /// Commit kept conflicting after the retry
    CommitConflict,
    /// The request was cancelled before commit
    Cancelled,
    /// The graph store could not be read or written
    StoreUnavailable,
    /// The request itself was invalid
    InvalidRequest,
}

impl FailureReason {
    /// Wire code of the reason
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoFeasibleCandidate => "NO_FEASIBLE_CANDIDATE",
            FailureReason::LoadAlreadyAssigned => "LOAD_ALREADY_ASSIGNED",
            FailureReason::ProviderAndFallbackFailed => "PROVIDER_AND_FALLBACK_FAILED",
            FailureReason::LoadNotFound => "LOAD_NOT_FOUND",
            FailureReason::LoadNotAssignable => "LOAD_NOT_ASSIGNABLE",
            FailureReason::CommitConflict => "COMMIT_CONFLICT",
            FailureReason::Cancelled => "CANCELLED",
            FailureReason::StoreUnavailable => "STORE_UNAVAILABLE",
            FailureReason::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CommitConflict> for FailureReason {
    fn from(conflict: &CommitConflict) -> Self {
        match conflict {
            CommitConflict::LoadAlreadyAssigned(_) => FailureReason::LoadAlreadyAssigned,
            CommitConflict::LoadNotAssignable { .. } => FailureReason::LoadNotAssignable,
            _ => FailureReason::CommitConflict,
        }
    }
}

impl From<&DiscoveryError> for FailureReason {
    fn from(err: &DiscoveryError) -> Self {
        match err {
            DiscoveryError::Store(_) => FailureReason::StoreUnavailable,
            DiscoveryError::LoadNotFound(_) => FailureReason::LoadNotFound,
            DiscoveryError::IncompleteLoad { .. } => FailureReason::LoadNotAssignable,
        }
    }
}

/// Errors that end an optimization request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OptimizationError {
    /// The request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Candidate discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Every candidate was excluded or none was found
    #[error("No feasible candidate")]
    NoFeasibleCandidate,

    /// Neither the provider nor the fallback produced a route
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Commit could not proceed
    #[error(transparent)]
    Commit(#[from] CommitConflict),

    /// Graph read or write failed outside discovery
    #[error("Graph store error: {0}")]
    Store(#[from] GraphStoreError),

    /// The request was cancelled before commit
    #[error("Optimization cancelled")]
    Cancelled,

    /// The request lifecycle was driven out of order
    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
}

impl OptimizationError {
    /// Reason code returned to the caller
    pub fn reason(&self) -> FailureReason {
        match self {
            OptimizationError::InvalidRequest(_) => FailureReason::InvalidRequest,
            OptimizationError::Discovery(err) => err.into(),
            OptimizationError::NoFeasibleCandidate => FailureReason::NoFeasibleCandidate,
            OptimizationError::Routing(_) => FailureReason::ProviderAndFallbackFailed,
            OptimizationError::Commit(conflict) => conflict.into(),
            OptimizationError::Store(_) => FailureReason::StoreUnavailable,
            OptimizationError::Cancelled => FailureReason::Cancelled,
            OptimizationError::Lifecycle(_) => FailureReason::CommitConflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(GraphStoreError::Unavailable("down".into()).is_retryable());
        assert!(GraphStoreError::Conflict("rev".into()).is_retryable());
        assert!(!GraphStoreError::Serialization("bad".into()).is_retryable());
    }

    #[test]
    fn test_sync_error_from_store_error() {
        let retryable: SyncError = GraphStoreError::Unavailable("timeout".into()).into();
        assert!(retryable.is_retryable());
        assert_eq!(retryable.kind(), "store_unavailable");

        let fatal: SyncError = GraphStoreError::corrupt("Driver:d1", "status is a number").into();
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.kind(), "store_error");
    }

    #[test]
    fn test_malformed_is_not_retried() {
        let err: SyncError = EventValidationError::invalid("weight", "negative").into();
        assert!(err.is_malformed());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_failure_reason_wire_codes() {
        let json = serde_json::to_string(&FailureReason::NoFeasibleCandidate).unwrap();
        assert_eq!(json, "\"NO_FEASIBLE_CANDIDATE\"");
        assert_eq!(
            FailureReason::ProviderAndFallbackFailed.to_string(),
            "PROVIDER_AND_FALLBACK_FAILED"
        );
    }

    #[test]
    fn test_commit_conflict_mapping() {
        let taken = CommitConflict::LoadAlreadyAssigned(LoadId::new("L1"));
        assert_eq!(FailureReason::from(&taken), FailureReason::LoadAlreadyAssigned);
        assert!(!taken.is_retryable());

        let busy = CommitConflict::DriverUnavailable(DriverId::new("D1"));
        assert_eq!(FailureReason::from(&busy), FailureReason::CommitConflict);
        assert!(busy.is_retryable());

        let raced = CommitConflict::WriteRaced("node.Load.L1".into());
        assert_eq!(FailureReason::from(&raced), FailureReason::CommitConflict);
        assert!(raced.is_retryable());
    }

    #[test]
    fn test_optimization_error_reasons() {
        let missing: OptimizationError = DiscoveryError::LoadNotFound(LoadId::new("L9")).into();
        assert_eq!(missing.reason(), FailureReason::LoadNotFound);

        let routing: OptimizationError = RoutingError::FallbackFailed("bad point".into()).into();
        assert_eq!(routing.reason(), FailureReason::ProviderAndFallbackFailed);

        let taken: OptimizationError = CommitConflict::LoadAlreadyAssigned(LoadId::new("L1")).into();
        assert_eq!(taken.reason(), FailureReason::LoadAlreadyAssigned);
    }
}
