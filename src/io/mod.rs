//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `lane_listener` - TCP JSON-lines protocol for entry/exit lanes
//! - `notifier` - HTTP delivery of entry/exit events to the backend
//! - `recognition` - License-plate recognition client
//! - `archive` - Evicted closed sessions to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod archive;
pub mod lane_listener;
pub mod notifier;
pub mod prometheus;
pub mod recognition;

// Re-export commonly used types
pub use archive::SessionArchive;
pub use lane_listener::{start_lane_listener, LaneHandler, LaneListenerConfig, LaneRequest, LaneResponse};
pub use notifier::{create_notifier, Notification, NotifierConfig, NotifySender, NotifyWorker};
pub use recognition::{HttpRecognizer, PlateReading, PlateRecognizer};
