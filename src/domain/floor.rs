//! Floor snapshot as exposed to reporting

use crate::domain::types::FloorId;
use serde::Serialize;

/// Point-in-time view of one floor. `available` is derived from the two
/// stored counters and never tracked on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Floor {
    pub floor_id: FloorId,
    pub total_capacity: u32,
    pub occupied: u32,
    pub available: u32,
}

impl Floor {
    pub fn new(floor_id: FloorId, total_capacity: u32, occupied: u32) -> Self {
        Self {
            floor_id,
            total_capacity,
            occupied,
            available: total_capacity.saturating_sub(occupied),
        }
    }

    #[inline]
    pub fn has_room(&self) -> bool {
        self.available > 0
    }
}
