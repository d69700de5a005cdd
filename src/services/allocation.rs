//! Floor selection for incoming vehicles
//!
//! Pure function over a registry snapshot: preferred floor if it has room,
//! else the lowest-id floor with room. The slot number itself is assigned
//! by the floor registry at reservation time.

use crate::domain::error::{ParkingError, Result};
use crate::domain::floor::Floor;
use crate::domain::types::FloorId;

/// Pick a floor for an incoming vehicle.
///
/// `floors` must be ordered by ascending id (as `FloorRegistry::snapshot`
/// returns it). A preferred floor that does not exist is treated like a
/// full one.
pub fn choose(preferred: Option<FloorId>, floors: &[Floor]) -> Result<FloorId> {
    if let Some(preferred) = preferred {
        if floors.iter().any(|f| f.floor_id == preferred && f.has_room()) {
            return Ok(preferred);
        }
    }

    floors.iter().find(|f| f.has_room()).map(|f| f.floor_id).ok_or(ParkingError::NoCapacity)
}

/// Like `choose`, skipping floors the caller already failed to reserve on
pub fn choose_excluding(
    preferred: Option<FloorId>,
    floors: &[Floor],
    exclude: &[FloorId],
) -> Result<FloorId> {
    let preferred = preferred.filter(|id| !exclude.contains(id));
    let candidates: Vec<Floor> =
        floors.iter().filter(|f| !exclude.contains(&f.floor_id)).copied().collect();
    choose(preferred, &candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floors(layout: &[(u32, u32, u32)]) -> Vec<Floor> {
        layout.iter().map(|&(id, cap, occ)| Floor::new(FloorId(id), cap, occ)).collect()
    }

    #[test]
    fn test_preferred_floor_with_room() {
        let fs = floors(&[(1, 10, 0), (2, 10, 0), (3, 10, 0)]);
        assert_eq!(choose(Some(FloorId(3)), &fs).unwrap(), FloorId(3));
    }

    #[test]
    fn test_preferred_full_falls_back_to_lowest_id() {
        let fs = floors(&[(1, 1, 1), (2, 5, 0), (3, 5, 0)]);
        assert_eq!(choose(Some(FloorId(1)), &fs).unwrap(), FloorId(2));
    }

    #[test]
    fn test_fallback_scans_from_lowest_not_from_preferred() {
        let fs = floors(&[(1, 5, 0), (2, 5, 0), (3, 1, 1)]);
        assert_eq!(choose(Some(FloorId(3)), &fs).unwrap(), FloorId(1));
    }

    #[test]
    fn test_unknown_preferred_floor_falls_back() {
        let fs = floors(&[(1, 5, 5), (2, 5, 4)]);
        assert_eq!(choose(Some(FloorId(42)), &fs).unwrap(), FloorId(2));
    }

    #[test]
    fn test_no_preference() {
        let fs = floors(&[(1, 5, 5), (2, 5, 0)]);
        assert_eq!(choose(None, &fs).unwrap(), FloorId(2));
    }

    #[test]
    fn test_all_full_is_no_capacity() {
        let fs = floors(&[(1, 1, 1), (2, 0, 0)]);
        assert_eq!(choose(Some(FloorId(1)), &fs), Err(ParkingError::NoCapacity));
        assert_eq!(choose(None, &[]), Err(ParkingError::NoCapacity));
    }

    #[test]
    fn test_choose_excluding_skips_lost_races() {
        let fs = floors(&[(1, 5, 0), (2, 5, 0)]);
        assert_eq!(choose_excluding(Some(FloorId(1)), &fs, &[FloorId(1)]).unwrap(), FloorId(2));
        assert_eq!(
            choose_excluding(None, &fs, &[FloorId(1), FloorId(2)]),
            Err(ParkingError::NoCapacity)
        );
    }
}
