//! Per-floor capacity and occupancy counters
//!
//! Each floor sits behind its own mutex. Callers that must combine a
//! reservation with other state changes (the engine opening a session)
//! hold a `FloorGuard` for the whole step so that readers never see an
//! occupied count that disagrees with the active sessions.
//!
//! Lock order: the floor map lock is never held while waiting on a floor
//! mutex except in `remove_floor`; multiple floor mutexes are always taken
//! in ascending floor id order.

use crate::domain::error::{ParkingError, Result};
use crate::domain::floor::Floor;
use crate::domain::types::FloorId;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// How slot numbers are handed out on a floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotMode {
    /// Slot = `occupied + 1` at reservation time. Numbers are reused as
    /// occupancy churns, so two active sessions may share a number.
    #[default]
    Sequential,
    /// Lowest free slot id is assigned and returned to the pool on release.
    FreeList,
}

impl SlotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotMode::Sequential => "sequential",
            SlotMode::FreeList => "free_list",
        }
    }
}

/// Mutable counters for a single floor
#[derive(Debug)]
pub struct FloorState {
    total_capacity: u32,
    occupied: u32,
    /// Only populated in `FreeList` mode
    free_slots: BTreeSet<u32>,
    mode: SlotMode,
    /// Set when the floor is removed; late holders of the Arc must not use it
    retired: bool,
}

impl FloorState {
    fn new(total_capacity: u32, mode: SlotMode) -> Self {
        let free_slots = match mode {
            SlotMode::Sequential => BTreeSet::new(),
            SlotMode::FreeList => (1..=total_capacity).collect(),
        };
        Self { total_capacity, occupied: 0, free_slots, mode, retired: false }
    }
}

/// Exclusive access to one floor's counters
pub struct FloorGuard {
    floor_id: FloorId,
    state: ArcMutexGuard<RawMutex, FloorState>,
}

impl FloorGuard {
    #[inline]
    pub fn floor_id(&self) -> FloorId {
        self.floor_id
    }

    pub fn snapshot(&self) -> Floor {
        Floor::new(self.floor_id, self.state.total_capacity, self.state.occupied)
    }

    /// Reserve a slot, returning its number. Fails fast when full.
    pub fn try_reserve(&mut self) -> Result<u32> {
        let state = &mut *self.state;
        if state.occupied >= state.total_capacity {
            return Err(ParkingError::CapacityExceeded { floor_id: self.floor_id });
        }

        let slot = match state.mode {
            SlotMode::Sequential => state.occupied + 1,
            SlotMode::FreeList => match state.free_slots.pop_first() {
                Some(slot) => slot,
                None => {
                    error!(floor_id = %self.floor_id, occupied = %state.occupied, "free_slots_exhausted");
                    return Err(ParkingError::InvariantViolation(format!(
                        "floor {} has room but no free slot ids",
                        self.floor_id
                    )));
                }
            },
        };
        state.occupied += 1;

        debug!(floor_id = %self.floor_id, slot = %slot, occupied = %state.occupied, "slot_reserved");
        Ok(slot)
    }

    /// Give a reserved slot back. Releasing an empty floor is a caller bug.
    pub fn release(&mut self, slot: u32) -> Result<()> {
        let state = &mut *self.state;
        if state.occupied == 0 {
            error!(floor_id = %self.floor_id, slot = %slot, "floor_underflow");
            return Err(ParkingError::InvariantViolation(format!(
                "release on floor {} with zero occupancy",
                self.floor_id
            )));
        }

        if state.mode == SlotMode::FreeList
            && (slot == 0 || slot > state.total_capacity || !state.free_slots.insert(slot))
        {
            error!(floor_id = %self.floor_id, slot = %slot, "slot_release_invalid");
            return Err(ParkingError::InvariantViolation(format!(
                "slot {} on floor {} was not reserved",
                slot, self.floor_id
            )));
        }
        state.occupied -= 1;

        debug!(floor_id = %self.floor_id, slot = %slot, occupied = %state.occupied, "slot_released");
        Ok(())
    }
}

/// Registry of all floors in the facility
pub struct FloorRegistry {
    floors: RwLock<BTreeMap<FloorId, Arc<Mutex<FloorState>>>>,
    slot_mode: SlotMode,
}

impl FloorRegistry {
    pub fn new(slot_mode: SlotMode) -> Self {
        Self { floors: RwLock::new(BTreeMap::new()), slot_mode }
    }

    /// Build a registry from `(id, capacity)` pairs
    pub fn with_floors(floors: &[(FloorId, u32)], slot_mode: SlotMode) -> Result<Self> {
        let registry = Self::new(slot_mode);
        for &(floor_id, capacity) in floors {
            registry.add_floor(floor_id, capacity)?;
        }
        Ok(registry)
    }

    #[inline]
    pub fn slot_mode(&self) -> SlotMode {
        self.slot_mode
    }

    pub fn add_floor(&self, floor_id: FloorId, total_capacity: u32) -> Result<()> {
        if floor_id.0 == 0 {
            return Err(ParkingError::InvalidFloor { floor_id });
        }
        let mut floors = self.floors.write();
        if floors.contains_key(&floor_id) {
            return Err(ParkingError::FloorExists { floor_id });
        }
        floors.insert(floor_id, Arc::new(Mutex::new(FloorState::new(total_capacity, self.slot_mode))));
        info!(floor_id = %floor_id, total_capacity = %total_capacity, "floor_added");
        Ok(())
    }

    /// Remove an empty floor. Fails while any session is active on it.
    pub fn remove_floor(&self, floor_id: FloorId) -> Result<()> {
        let mut floors = self.floors.write();
        let cell = floors.get(&floor_id).ok_or(ParkingError::UnknownFloor { floor_id })?;
        {
            let mut state = cell.lock();
            if state.occupied > 0 {
                return Err(ParkingError::FloorOccupied { floor_id, occupied: state.occupied });
            }
            state.retired = true;
        }
        floors.remove(&floor_id);
        info!(floor_id = %floor_id, "floor_removed");
        Ok(())
    }

    /// Take exclusive access to one floor
    pub fn lock(&self, floor_id: FloorId) -> Result<FloorGuard> {
        let cell = self
            .floors
            .read()
            .get(&floor_id)
            .cloned()
            .ok_or(ParkingError::UnknownFloor { floor_id })?;

        let state = cell.lock_arc();
        if state.retired {
            return Err(ParkingError::UnknownFloor { floor_id });
        }
        Ok(FloorGuard { floor_id, state })
    }

    /// Take exclusive access to every floor, in ascending id order
    pub fn lock_all(&self) -> Vec<FloorGuard> {
        let cells: Vec<(FloorId, Arc<Mutex<FloorState>>)> =
            self.floors.read().iter().map(|(id, cell)| (*id, cell.clone())).collect();

        cells
            .into_iter()
            .filter_map(|(floor_id, cell)| {
                let state = cell.lock_arc();
                (!state.retired).then_some(FloorGuard { floor_id, state })
            })
            .collect()
    }

    /// Reserve a slot on `floor_id`; see `FloorGuard::try_reserve`
    pub fn try_reserve(&self, floor_id: FloorId) -> Result<u32> {
        self.lock(floor_id)?.try_reserve()
    }

    /// Release a slot on `floor_id`; see `FloorGuard::release`
    pub fn release(&self, floor_id: FloorId, slot: u32) -> Result<()> {
        self.lock(floor_id)?.release(slot)
    }

    /// Current state of one floor
    pub fn floor(&self, floor_id: FloorId) -> Option<Floor> {
        self.lock(floor_id).ok().map(|guard| guard.snapshot())
    }

    /// All floors ordered by ascending id
    pub fn snapshot(&self) -> Vec<Floor> {
        let floors = self.floors.read();
        floors
            .iter()
            .map(|(&floor_id, cell)| {
                let state = cell.lock();
                Floor::new(floor_id, state.total_capacity, state.occupied)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(mode: SlotMode) -> FloorRegistry {
        FloorRegistry::with_floors(&[(FloorId(1), 2), (FloorId(2), 1)], mode).unwrap()
    }

    #[test]
    fn test_reserve_until_full() {
        let reg = registry(SlotMode::Sequential);

        assert_eq!(reg.try_reserve(FloorId(1)).unwrap(), 1);
        assert_eq!(reg.try_reserve(FloorId(1)).unwrap(), 2);
        assert_eq!(
            reg.try_reserve(FloorId(1)),
            Err(ParkingError::CapacityExceeded { floor_id: FloorId(1) })
        );

        let floor = reg.floor(FloorId(1)).unwrap();
        assert_eq!(floor.occupied, 2);
        assert_eq!(floor.available, 0);
    }

    #[test]
    fn test_sequential_slots_are_reused() {
        let reg = registry(SlotMode::Sequential);

        let a = reg.try_reserve(FloorId(1)).unwrap();
        let b = reg.try_reserve(FloorId(1)).unwrap();
        assert_eq!((a, b), (1, 2));

        // Releasing the first vehicle makes the counter hand out 2 again
        reg.release(FloorId(1), a).unwrap();
        assert_eq!(reg.try_reserve(FloorId(1)).unwrap(), 2);
    }

    #[test]
    fn test_free_list_slots_are_distinct() {
        let reg = registry(SlotMode::FreeList);

        let a = reg.try_reserve(FloorId(1)).unwrap();
        let b = reg.try_reserve(FloorId(1)).unwrap();
        assert_eq!((a, b), (1, 2));

        reg.release(FloorId(1), a).unwrap();
        // Slot 1 is free again and is the lowest id
        assert_eq!(reg.try_reserve(FloorId(1)).unwrap(), 1);
    }

    #[test]
    fn test_free_list_rejects_double_release() {
        let reg = registry(SlotMode::FreeList);
        let a = reg.try_reserve(FloorId(1)).unwrap();
        let _b = reg.try_reserve(FloorId(1)).unwrap();

        reg.release(FloorId(1), a).unwrap();
        assert!(matches!(
            reg.release(FloorId(1), a),
            Err(ParkingError::InvariantViolation(_))
        ));
        assert_eq!(reg.floor(FloorId(1)).unwrap().occupied, 1);
    }

    #[test]
    fn test_release_underflow_is_invariant_violation() {
        let reg = registry(SlotMode::Sequential);

        let err = reg.release(FloorId(2), 1).unwrap_err();
        assert!(matches!(err, ParkingError::InvariantViolation(_)));
        assert_eq!(reg.floor(FloorId(2)).unwrap().occupied, 0);
    }

    #[test]
    fn test_unknown_floor() {
        let reg = registry(SlotMode::Sequential);
        assert_eq!(
            reg.try_reserve(FloorId(9)),
            Err(ParkingError::UnknownFloor { floor_id: FloorId(9) })
        );
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let reg = FloorRegistry::new(SlotMode::Sequential);
        reg.add_floor(FloorId(3), 10).unwrap();
        reg.add_floor(FloorId(1), 5).unwrap();
        reg.add_floor(FloorId(2), 7).unwrap();

        let ids: Vec<u32> = reg.snapshot().iter().map(|f| f.floor_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_add_existing_floor_fails() {
        let reg = registry(SlotMode::Sequential);
        assert_eq!(
            reg.add_floor(FloorId(1), 10),
            Err(ParkingError::FloorExists { floor_id: FloorId(1) })
        );
    }

    #[test]
    fn test_floor_id_zero_is_rejected() {
        let reg = FloorRegistry::new(SlotMode::Sequential);
        assert_eq!(reg.add_floor(FloorId(0), 10), Err(ParkingError::InvalidFloor { floor_id: FloorId(0) }));
        assert!(reg.snapshot().is_empty());
        assert!(FloorRegistry::with_floors(&[(FloorId(1), 5), (FloorId(0), 5)], SlotMode::Sequential).is_err());
    }

    #[test]
    fn test_remove_floor_requires_empty() {
        let reg = registry(SlotMode::Sequential);
        let slot = reg.try_reserve(FloorId(2)).unwrap();

        assert_eq!(
            reg.remove_floor(FloorId(2)),
            Err(ParkingError::FloorOccupied { floor_id: FloorId(2), occupied: 1 })
        );

        reg.release(FloorId(2), slot).unwrap();
        reg.remove_floor(FloorId(2)).unwrap();
        assert_eq!(reg.snapshot().len(), 1);
        assert!(reg.floor(FloorId(2)).is_none());
    }

    #[test]
    fn test_zero_capacity_floor_is_always_full() {
        let reg = FloorRegistry::with_floors(&[(FloorId(1), 0)], SlotMode::FreeList).unwrap();
        assert_eq!(
            reg.try_reserve(FloorId(1)),
            Err(ParkingError::CapacityExceeded { floor_id: FloorId(1) })
        );
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_capacity() {
        use std::thread;

        let reg = Arc::new(
            FloorRegistry::with_floors(&[(FloorId(1), 50)], SlotMode::FreeList).unwrap(),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || {
                    (0..20).filter(|_| reg.try_reserve(FloorId(1)).is_ok()).count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(reg.floor(FloorId(1)).unwrap().occupied, 50);
    }
}
