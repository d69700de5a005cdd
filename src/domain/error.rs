//! Error taxonomy for the parking engine
//!
//! Business-rule outcomes (duplicate plate, full facility, unknown session,
//! bad interval) are expected and returned to the caller as typed values.
//! `InvariantViolation` marks internal inconsistency and is never retryable.

use crate::domain::types::FloorId;
use chrono::{DateTime, Utc};

/// Result type alias
pub type Result<T> = std::result::Result<T, ParkingError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParkingError {
    /// Plate already has an active session
    #[error("plate {plate} already has an active session")]
    DuplicateActiveSession { plate: String },

    /// No floor has a free slot
    #[error("no capacity available on any floor")]
    NoCapacity,

    /// The requested floor is full
    #[error("floor {floor_id} is at capacity")]
    CapacityExceeded { floor_id: FloorId },

    #[error("floor {floor_id} does not exist")]
    UnknownFloor { floor_id: FloorId },

    /// Floor cannot be removed or re-added while occupied
    #[error("floor {floor_id} has {occupied} active sessions")]
    FloorOccupied { floor_id: FloorId, occupied: u32 },

    #[error("floor {floor_id} already exists")]
    FloorExists { floor_id: FloorId },

    /// Floor ids start at 1
    #[error("invalid floor id {floor_id}")]
    InvalidFloor { floor_id: FloorId },

    /// No active session for the given plate or session id
    #[error("no active session for {key}")]
    NoActiveSession { key: String },

    /// Exit timestamp precedes entry timestamp
    #[error("exit {exit} precedes entry {entry}")]
    InvalidInterval { entry: DateTime<Utc>, exit: DateTime<Utc> },

    /// Empty plate for a vehicle type that requires one
    #[error("license plate is required")]
    InvalidPlate,

    /// Internal consistency failure
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Plate recognition collaborator failed
    #[error("plate recognition failed: {0}")]
    RecognitionFailed(String),
}

impl ParkingError {
    /// Whether the caller can act on this error (retry, pick another floor,
    /// fall back to manual entry). Invariant violations are defects.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ParkingError::InvariantViolation(_))
    }

    /// Short machine-readable kind, used in lane responses and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ParkingError::DuplicateActiveSession { .. } => "duplicate_active_session",
            ParkingError::NoCapacity => "no_capacity",
            ParkingError::CapacityExceeded { .. } => "capacity_exceeded",
            ParkingError::UnknownFloor { .. } => "unknown_floor",
            ParkingError::FloorOccupied { .. } => "floor_occupied",
            ParkingError::FloorExists { .. } => "floor_exists",
            ParkingError::InvalidFloor { .. } => "invalid_floor",
            ParkingError::NoActiveSession { .. } => "no_active_session",
            ParkingError::InvalidInterval { .. } => "invalid_interval",
            ParkingError::InvalidPlate => "invalid_plate",
            ParkingError::InvariantViolation(_) => "invariant_violation",
            ParkingError::RecognitionFailed(_) => "recognition_failed",
        }
    }
}
