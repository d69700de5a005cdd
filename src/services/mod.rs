//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Admit/release orchestration over floors and sessions
//! - `floor_registry` - Per-floor occupancy and slot reservation
//! - `allocation` - Floor selection policy
//! - `billing` - Rate table and fee computation
//! - `session_store` - Active and retained closed sessions
//! - `statistics` - Aggregate occupancy and revenue view

pub mod allocation;
pub mod billing;
pub mod engine;
pub mod floor_registry;
pub mod session_store;
pub mod statistics;

// Re-export commonly used types
pub use billing::{BillingPolicy, RateTable};
pub use engine::{AdmitRequest, ParkingEngine};
pub use floor_registry::{FloorRegistry, SlotMode};
pub use session_store::{RetentionPolicy, SessionStore};
pub use statistics::{Statistics, VehicleCounts};
