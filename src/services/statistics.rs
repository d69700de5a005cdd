//! Facility-wide occupancy and revenue summary

use crate::domain::floor::Floor;
use crate::domain::session::ParkingSession;
use crate::domain::types::VehicleType;
use serde::Serialize;

/// Active session counts per vehicle type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VehicleCounts {
    pub car: u32,
    pub motorcycle: u32,
    pub bicycle: u32,
}

impl VehicleCounts {
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a ParkingSession>) -> Self {
        let mut counts = Self::default();
        for session in sessions {
            match session.vehicle_type {
                VehicleType::Car => counts.car += 1,
                VehicleType::Motorcycle => counts.motorcycle += 1,
                VehicleType::Bicycle => counts.bicycle += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.car + self.motorcycle + self.bicycle
    }
}

/// Point-in-time statistics, taken under all floor locks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    /// Active plus retained closed sessions
    pub total_vehicles: u64,
    pub currently_parked: u32,
    pub total_capacity: u64,
    pub available: u64,
    /// Occupied share of total capacity, in percent
    pub occupancy_rate: f64,
    pub by_vehicle_type: VehicleCounts,
    /// Fees of retained closed sessions
    pub revenue: u64,
    pub floors: Vec<Floor>,
}

impl Statistics {
    pub fn new(
        floors: Vec<Floor>,
        by_vehicle_type: VehicleCounts,
        total_vehicles: u64,
        revenue: u64,
    ) -> Self {
        let total_capacity: u64 = floors.iter().map(|f| u64::from(f.total_capacity)).sum();
        let occupied: u64 = floors.iter().map(|f| u64::from(f.occupied)).sum();
        let occupancy_rate =
            if total_capacity > 0 { occupied as f64 * 100.0 / total_capacity as f64 } else { 0.0 };

        Self {
            total_vehicles,
            currently_parked: by_vehicle_type.total(),
            total_capacity,
            available: total_capacity.saturating_sub(occupied),
            occupancy_rate,
            by_vehicle_type,
            revenue,
            floors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FloorId;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_statistics_from_floors() {
        let floors = vec![Floor::new(FloorId(1), 10, 5), Floor::new(FloorId(2), 10, 0)];
        let counts = VehicleCounts { car: 3, motorcycle: 1, bicycle: 1 };

        let stats = Statistics::new(floors, counts, 9, 40_000);

        assert_eq!(stats.total_capacity, 20);
        assert_eq!(stats.available, 15);
        assert_eq!(stats.currently_parked, 5);
        assert!((stats.occupancy_rate - 25.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_vehicles, 9);
    }

    #[test]
    fn test_empty_facility() {
        let stats = Statistics::new(vec![], VehicleCounts::default(), 0, 0);
        assert_eq!(stats.occupancy_rate, 0.0);
        assert_eq!(stats.available, 0);
    }

    #[test]
    fn test_vehicle_counts_from_sessions() {
        let t = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        let sessions = vec![
            ParkingSession::new("A", VehicleType::Car, FloorId(1), 1, t),
            ParkingSession::new("B", VehicleType::Car, FloorId(1), 2, t),
            ParkingSession::new("XD-12345", VehicleType::Bicycle, FloorId(2), 1, t),
        ];
        let counts = VehicleCounts::from_sessions(&sessions);
        assert_eq!(counts, VehicleCounts { car: 2, motorcycle: 0, bicycle: 1 });
    }
}
