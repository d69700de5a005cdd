//! Time-based parking fees
//!
//! Billable hours are the dwell rounded up to the next whole hour, with a
//! minimum of one hour. Fee = billable hours x hourly rate of the vehicle type.

use crate::domain::error::{ParkingError, Result};
use crate::domain::session::Charge;
use crate::domain::types::VehicleType;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const SECS_PER_HOUR: i64 = 3600;

/// Hourly rate per vehicle type, in whole currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateTable {
    pub car: u64,
    pub motorcycle: u64,
    pub bicycle: u64,
}

impl Default for RateTable {
    fn default() -> Self {
        Self { car: 10_000, motorcycle: 5_000, bicycle: 2_000 }
    }
}

impl RateTable {
    #[inline]
    pub fn rate(&self, vehicle_type: VehicleType) -> u64 {
        match vehicle_type {
            VehicleType::Car => self.car,
            VehicleType::Motorcycle => self.motorcycle,
            VehicleType::Bicycle => self.bicycle,
        }
    }
}

/// Fee calculator bound to a rate table
#[derive(Debug, Clone, Default)]
pub struct BillingPolicy {
    rates: RateTable,
}

impl BillingPolicy {
    pub fn new(rates: RateTable) -> Self {
        Self { rates }
    }

    #[inline]
    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    /// Compute the charge for a stay. `exit` before `entry` is rejected.
    pub fn compute_fee(
        &self,
        vehicle_type: VehicleType,
        entry: DateTime<Utc>,
        exit: DateTime<Utc>,
    ) -> Result<Charge> {
        if exit < entry {
            return Err(ParkingError::InvalidInterval { entry, exit });
        }

        let elapsed = exit - entry;
        let secs = elapsed.num_seconds();
        // Any fraction of an hour, down to sub-second, bills as a full hour
        let has_fraction = secs % SECS_PER_HOUR != 0 || elapsed.subsec_nanos() != 0;
        let hours = (secs / SECS_PER_HOUR) as u64 + u64::from(has_fraction);
        let billable_hours = hours.max(1);

        Ok(Charge {
            duration_minutes: secs / 60,
            billable_hours,
            fee: billable_hours.saturating_mul(self.rates.rate(vehicle_type)),
        })
    }
}
