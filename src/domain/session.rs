//! Parking session data model - one vehicle's occupancy episode

use crate::domain::types::{FloorId, SessionId, SessionState, VehicleType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A vehicle's stay from admit to release.
///
/// Floor and slot are fixed at admit time. Once `state` is `Closed` the
/// session is never mutated again; the store keeps it for reporting until
/// the retention policy evicts it.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use parking_engine::domain::session::ParkingSession;
/// use parking_engine::domain::types::{FloorId, SessionState, VehicleType};
///
/// let entry = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
/// let session = ParkingSession::new("51F-12345", VehicleType::Car, FloorId(1), 1, entry);
/// assert_eq!(session.state, SessionState::Active);
/// assert!(session.fee.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingSession {
    pub id: SessionId,
    pub license_plate: String,
    /// Plate read at entry, kept only when the exit plate replaced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_plate: Option<String>,
    pub vehicle_type: VehicleType,
    pub floor_id: FloorId,
    pub slot_number: u32,
    pub entry_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    pub state: SessionState,
    /// Recognition confidence reported at entry (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Recognition method reported at entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_method: Option<String>,
}

/// Snapshot of a session as returned to callers and reporting
pub type SessionRecord = ParkingSession;

/// Billing outcome attached to a session when it closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub duration_minutes: i64,
    pub billable_hours: u64,
    pub fee: u64,
}

impl ParkingSession {
    pub fn new(
        license_plate: &str,
        vehicle_type: VehicleType,
        floor_id: FloorId,
        slot_number: u32,
        entry_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            license_plate: license_plate.to_string(),
            entry_plate: None,
            vehicle_type,
            floor_id,
            slot_number,
            entry_timestamp,
            exit_timestamp: None,
            duration_minutes: None,
            billable_hours: None,
            fee: None,
            state: SessionState::Active,
            confidence: None,
            recognition_method: None,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Transition to Closed. The resolved plate replaces the stored one only
    /// when supplied; the entry plate is preserved alongside it.
    pub(crate) fn close(
        &mut self,
        exit_timestamp: DateTime<Utc>,
        charge: Charge,
        resolved_plate: Option<&str>,
    ) {
        if let Some(plate) = resolved_plate {
            if plate != self.license_plate {
                self.entry_plate = Some(std::mem::replace(&mut self.license_plate, plate.to_string()));
            }
        }
        self.exit_timestamp = Some(exit_timestamp);
        self.duration_minutes = Some(charge.duration_minutes);
        self.billable_hours = Some(charge.billable_hours);
        self.fee = Some(charge.fee);
        self.state = SessionState::Closed;
    }

    /// Serialize to a JSON line with the site id included
    pub fn to_json_with_site(&self, site_id: &str) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(ref mut obj) = value {
            obj.insert("site".to_string(), serde_json::Value::String(site_id.to_string()));
        }
        value.to_string()
    }
}
