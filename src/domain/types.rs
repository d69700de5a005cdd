//! Shared types for the parking engine

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for floor IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct FloorId(pub u32);

impl std::fmt::Display for FloorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for session IDs (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Vehicle classification; each type maps to an hourly rate in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Bicycle,
}

impl VehicleType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Bicycle => "bicycle",
        }
    }

    /// Bicycles carry no plate; the engine issues a pseudo-plate instead
    #[inline]
    pub fn uses_pseudo_plate(&self) -> bool {
        matches!(self, VehicleType::Bicycle)
    }
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown vehicle type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vehicle type: {0}")]
pub struct UnknownVehicleType(pub String);

impl std::str::FromStr for VehicleType {
    type Err = UnknownVehicleType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(VehicleType::Car),
            "motorcycle" => Ok(VehicleType::Motorcycle),
            "bicycle" => Ok(VehicleType::Bicycle),
            other => Err(UnknownVehicleType(other.to_string())),
        }
    }
}

/// Lifecycle flag of a parking session. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closed,
}

impl SessionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

/// Prefix of generated bicycle pseudo-plates
pub const PSEUDO_PLATE_PREFIX: &str = "XD-";

/// Generate a bicycle pseudo-plate (`XD-` followed by five digits)
pub fn generate_pseudo_plate() -> String {
    let n: u32 = rand::thread_rng().gen_range(10_000..=99_999);
    format!("{PSEUDO_PLATE_PREFIX}{n}")
}

/// Canonical form of a license plate: trimmed and upper-cased
pub fn normalize_plate(plate: &str) -> String {
    plate.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_type_from_str() {
        assert_eq!("car".parse::<VehicleType>().unwrap(), VehicleType::Car);
        assert_eq!(" Motorcycle ".parse::<VehicleType>().unwrap(), VehicleType::Motorcycle);
        assert_eq!("BICYCLE".parse::<VehicleType>().unwrap(), VehicleType::Bicycle);
        assert!("truck".parse::<VehicleType>().is_err());
    }

    #[test]
    fn test_vehicle_type_serde_lowercase() {
        let json = serde_json::to_string(&VehicleType::Motorcycle).unwrap();
        assert_eq!(json, "\"motorcycle\"");
        let parsed: VehicleType = serde_json::from_str("\"bicycle\"").unwrap();
        assert_eq!(parsed, VehicleType::Bicycle);
    }

    #[test]
    fn test_pseudo_plate_format() {
        for _ in 0..100 {
            let plate = generate_pseudo_plate();
            let digits = plate.strip_prefix(PSEUDO_PLATE_PREFIX).unwrap();
            assert_eq!(digits.len(), 5);
            let n: u32 = digits.parse().unwrap();
            assert!((10_000..=99_999).contains(&n));
        }
    }

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate("  51f-123.45 "), "51F-123.45");
        assert_eq!(normalize_plate(""), "");
    }

    #[test]
    fn test_session_id_roundtrip_str() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_serializes_as_uuid_string() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<SessionId>(&json).unwrap(), id);
    }
}
