//! Domain models - core parking types
//!
//! This module contains the canonical data types used throughout the system:
//! - `ParkingSession` - one vehicle's occupancy episode
//! - `Floor` - per-floor capacity snapshot
//! - `VehicleType`, `FloorId`, `SessionId` - identifiers and classification
//! - `ParkingError` - typed error taxonomy

pub mod error;
pub mod floor;
pub mod session;
pub mod types;

pub use error::{ParkingError, Result};
pub use floor::Floor;
pub use session::{ParkingSession, SessionRecord};
pub use types::{FloorId, SessionId, SessionState, VehicleType};
