//! Active and recently closed parking sessions
//!
//! A plate has at most one active session. Closed sessions stay in the
//! store for reporting until `prune_closed` evicts them; `close` itself
//! never evicts anything.

use crate::domain::error::{ParkingError, Result};
use crate::domain::session::{Charge, ParkingSession};
use crate::domain::types::{normalize_plate, FloorId, SessionId, VehicleType};
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How long closed sessions are kept for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Upper bound on retained closed sessions (oldest evicted first)
    pub max_closed: usize,
    /// Closed sessions older than this (by exit time) are evicted
    pub ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_closed: 10_000, ttl: Duration::hours(24) }
    }
}

/// Session storage. Not synchronized; the engine owns it behind a mutex.
pub struct SessionStore {
    /// Active sessions by normalized plate
    active: FxHashMap<String, ParkingSession>,
    /// Session id -> plate of the active session
    active_ids: FxHashMap<SessionId, String>,
    /// Closed sessions by id
    closed: FxHashMap<SessionId, ParkingSession>,
    /// Retention order: exit time, then close sequence for equal exits
    closed_order: BTreeMap<(DateTime<Utc>, u64), SessionId>,
    close_seq: u64,
    retention: RetentionPolicy,
}

impl SessionStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            active: FxHashMap::default(),
            active_ids: FxHashMap::default(),
            closed: FxHashMap::default(),
            closed_order: BTreeMap::new(),
            close_seq: 0,
            retention,
        }
    }

    /// Open a new active session for `plate`
    pub fn open(
        &mut self,
        plate: &str,
        vehicle_type: VehicleType,
        floor_id: FloorId,
        slot_number: u32,
        entry_timestamp: DateTime<Utc>,
    ) -> Result<ParkingSession> {
        let session =
            ParkingSession::new(&normalize_plate(plate), vehicle_type, floor_id, slot_number, entry_timestamp);
        self.insert(session)
    }

    /// Insert a fully built active session
    pub fn insert(&mut self, session: ParkingSession) -> Result<ParkingSession> {
        if !session.is_active() {
            return Err(ParkingError::InvariantViolation(format!(
                "session {} inserted in closed state",
                session.id
            )));
        }
        if self.active.contains_key(&session.license_plate) {
            return Err(ParkingError::DuplicateActiveSession { plate: session.license_plate.clone() });
        }

        debug!(
            session_id = %session.id,
            plate = %session.license_plate,
            floor_id = %session.floor_id,
            slot = %session.slot_number,
            "session_opened"
        );

        self.active_ids.insert(session.id, session.license_plate.clone());
        self.active.insert(session.license_plate.clone(), session.clone());
        Ok(session)
    }

    /// Find the active session for a plate or a session id
    pub fn resolve_active(&self, key: &str) -> Option<&ParkingSession> {
        if let Some(session) = self.active.get(&normalize_plate(key)) {
            return Some(session);
        }
        let id: SessionId = key.trim().parse().ok()?;
        self.active_ids.get(&id).and_then(|plate| self.active.get(plate))
    }

    /// Close the active session identified by `key` (plate or session id).
    ///
    /// `resolved_plate` is whichever plate the caller settled on at exit; it
    /// replaces the stored plate only when given.
    pub fn close(
        &mut self,
        key: &str,
        exit_timestamp: DateTime<Utc>,
        charge: Charge,
        resolved_plate: Option<&str>,
    ) -> Result<ParkingSession> {
        let plate = self
            .resolve_active(key)
            .map(|s| s.license_plate.clone())
            .ok_or_else(|| ParkingError::NoActiveSession { key: key.to_string() })?;

        let mut session = match self.active.remove(&plate) {
            Some(session) => session,
            None => return Err(ParkingError::NoActiveSession { key: key.to_string() }),
        };
        self.active_ids.remove(&session.id);

        let resolved = resolved_plate.map(normalize_plate).filter(|p| !p.is_empty());
        session.close(exit_timestamp, charge, resolved.as_deref());

        debug!(
            session_id = %session.id,
            plate = %session.license_plate,
            fee = ?session.fee,
            "session_closed"
        );

        self.close_seq += 1;
        self.closed_order.insert((exit_timestamp, self.close_seq), session.id);
        self.closed.insert(session.id, session.clone());
        Ok(session)
    }

    pub fn lookup_active(&self, plate: &str) -> Option<&ParkingSession> {
        self.active.get(&normalize_plate(plate))
    }

    /// Active or retained closed session by id
    pub fn get(&self, id: SessionId) -> Option<&ParkingSession> {
        self.active_ids
            .get(&id)
            .and_then(|plate| self.active.get(plate))
            .or_else(|| self.closed.get(&id))
    }

    /// Active sessions ordered by entry time
    pub fn active_sessions(&self) -> Vec<ParkingSession> {
        let mut sessions: Vec<ParkingSession> = self.active.values().cloned().collect();
        sessions.sort_by(|a, b| a.entry_timestamp.cmp(&b.entry_timestamp).then(a.id.cmp(&b.id)));
        sessions
    }

    /// Retained closed sessions, earliest exit first
    pub fn closed_sessions(&self) -> Vec<ParkingSession> {
        self.closed_order.values().filter_map(|id| self.closed.get(id)).cloned().collect()
    }

    /// Count of active sessions per floor
    pub fn active_count_by_floor(&self) -> BTreeMap<FloorId, u32> {
        let mut counts = BTreeMap::new();
        for session in self.active.values() {
            *counts.entry(session.floor_id).or_insert(0) += 1;
        }
        counts
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    /// Sum of fees over retained closed sessions
    pub fn closed_revenue(&self) -> u64 {
        self.closed.values().filter_map(|s| s.fee).fold(0u64, u64::saturating_add)
    }

    /// Evict closed sessions past the retention window or over the size cap.
    /// Eviction follows exit time, so the first retained session is always
    /// the one that expires next. Returns the evicted sessions, earliest
    /// exit first.
    pub fn prune_closed(&mut self, now: DateTime<Utc>) -> Vec<ParkingSession> {
        let mut evicted = Vec::new();

        while let Some((&(exit, _), _)) = self.closed_order.first_key_value() {
            let over_cap = self.closed_order.len() > self.retention.max_closed;
            let expired = now - exit > self.retention.ttl;

            if !over_cap && !expired {
                break;
            }

            let Some((_, id)) = self.closed_order.pop_first() else {
                break;
            };
            if let Some(session) = self.closed.remove(&id) {
                evicted.push(session);
            }
        }

        if !evicted.is_empty() {
            info!(evicted = %evicted.len(), retained = %self.closed.len(), "closed_sessions_pruned");
        }
        evicted
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SessionState;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()
    }

    fn charge() -> Charge {
        Charge { duration_minutes: 0, billable_hours: 1, fee: 10_000 }
    }

    #[test]
    fn test_open_and_lookup() {
        let mut store = SessionStore::default();
        let session = store.open("51f-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        assert_eq!(session.license_plate, "51F-12345");
        assert_eq!(store.lookup_active("51F-12345").unwrap().id, session.id);
        assert_eq!(store.lookup_active(" 51f-12345 ").unwrap().id, session.id);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_duplicate_active_plate_rejected() {
        let mut store = SessionStore::default();
        store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        let err = store.open("51F-12345", VehicleType::Car, FloorId(2), 1, t0()).unwrap_err();
        assert_eq!(err, ParkingError::DuplicateActiveSession { plate: "51F-12345".into() });
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_close_by_plate() {
        let mut store = SessionStore::default();
        store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        let closed = store.close("51F-12345", t0(), charge(), None).unwrap();

        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(closed.fee, Some(10_000));
        assert!(store.lookup_active("51F-12345").is_none());
        assert_eq!(store.closed_count(), 1);
    }

    #[test]
    fn test_close_by_session_id() {
        let mut store = SessionStore::default();
        let session = store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        let closed = store.close(&session.id.to_string(), t0(), charge(), None).unwrap();
        assert_eq!(closed.id, session.id);
        assert_eq!(store.get(session.id).unwrap().state, SessionState::Closed);
    }

    #[test]
    fn test_close_unknown_is_no_active_session() {
        let mut store = SessionStore::default();
        assert_eq!(
            store.close("NOPE", t0(), charge(), None),
            Err(ParkingError::NoActiveSession { key: "NOPE".into() })
        );
    }

    #[test]
    fn test_close_twice_fails() {
        let mut store = SessionStore::default();
        store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        store.close("51F-12345", t0(), charge(), None).unwrap();

        assert!(matches!(
            store.close("51F-12345", t0(), charge(), None),
            Err(ParkingError::NoActiveSession { .. })
        ));
    }

    #[test]
    fn test_close_with_resolved_plate() {
        let mut store = SessionStore::default();
        store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        let closed = store.close("51F-12345", t0(), charge(), Some("51f-12346")).unwrap();
        assert_eq!(closed.license_plate, "51F-12346");
        assert_eq!(closed.entry_plate.as_deref(), Some("51F-12345"));
    }

    #[test]
    fn test_plate_can_reopen_after_close() {
        let mut store = SessionStore::default();
        let first = store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        store.close("51F-12345", t0(), charge(), None).unwrap();

        let second = store.open("51F-12345", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        assert_ne!(first.id, second.id);
        // The first session stays closed
        assert_eq!(store.get(first.id).unwrap().state, SessionState::Closed);
    }

    #[test]
    fn test_active_count_by_floor() {
        let mut store = SessionStore::default();
        store.open("A", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        store.open("B", VehicleType::Car, FloorId(1), 2, t0()).unwrap();
        store.open("C", VehicleType::Motorcycle, FloorId(3), 1, t0()).unwrap();

        let counts = store.active_count_by_floor();
        assert_eq!(counts.get(&FloorId(1)), Some(&2));
        assert_eq!(counts.get(&FloorId(3)), Some(&1));
        assert_eq!(counts.get(&FloorId(2)), None);
    }

    #[test]
    fn test_prune_by_ttl() {
        let mut store = SessionStore::new(RetentionPolicy { max_closed: 100, ttl: Duration::hours(1) });
        store.open("A", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        store.open("B", VehicleType::Car, FloorId(1), 2, t0()).unwrap();
        store.close("A", t0(), charge(), None).unwrap();
        store.close("B", t0() + Duration::minutes(50), charge(), None).unwrap();

        // A closed 61 minutes ago, B 11 minutes ago
        let evicted = store.prune_closed(t0() + Duration::minutes(61));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].license_plate, "A");
        assert_eq!(store.closed_count(), 1);
        assert_eq!(store.closed_revenue(), 10_000);
    }

    #[test]
    fn test_prune_follows_exit_time_not_close_order() {
        let mut store = SessionStore::new(RetentionPolicy { max_closed: 100, ttl: Duration::hours(1) });
        store.open("LATE", VehicleType::Car, FloorId(1), 1, t0()).unwrap();
        store.open("EARLY", VehicleType::Car, FloorId(1), 2, t0()).unwrap();
        // Closed second, but with the earlier exit time
        store.close("LATE", t0() + Duration::minutes(50), charge(), None).unwrap();
        store.close("EARLY", t0(), charge(), None).unwrap();

        let evicted = store.prune_closed(t0() + Duration::minutes(61));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].license_plate, "EARLY");
        assert_eq!(store.closed_sessions()[0].license_plate, "LATE");
    }

    #[test]
    fn test_prune_by_cap() {
        let mut store = SessionStore::new(RetentionPolicy { max_closed: 2, ttl: Duration::hours(24) });
        for plate in ["A", "B", "C"] {
            store.open(plate, VehicleType::Car, FloorId(1), 1, t0()).unwrap();
            store.close(plate, t0(), charge(), None).unwrap();
        }

        let evicted = store.prune_closed(t0());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].license_plate, "A");
        let retained: Vec<String> =
            store.closed_sessions().into_iter().map(|s| s.license_plate).collect();
        assert_eq!(retained, vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_prune_never_touches_active() {
        let mut store = SessionStore::new(RetentionPolicy { max_closed: 0, ttl: Duration::zero() });
        store.open("A", VehicleType::Car, FloorId(1), 1, t0()).unwrap();

        assert!(store.prune_closed(t0() + Duration::days(30)).is_empty());
        assert_eq!(store.active_count(), 1);
    }
}
