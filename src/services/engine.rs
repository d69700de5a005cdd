//! Parking engine - admit/release orchestration
//!
//! Owns the floor registry and the session store and keeps them in step:
//! for every floor, `occupied` equals the number of active sessions on it.
//!
//! Lock order is always floor lock, then store lock. Admit holds the floor
//! guard from reservation through session insert; release holds it from
//! verifying the session through closing it. A failed insert after a
//! successful reservation is compensated by releasing the slot before the
//! error is returned.
//!
//! The engine never reads the clock for business logic: callers pass `now`.

use crate::domain::error::{ParkingError, Result};
use crate::domain::floor::Floor;
use crate::domain::session::ParkingSession;
use crate::domain::types::{generate_pseudo_plate, normalize_plate, FloorId, SessionId, VehicleType};
use crate::infra::config::Config;
use crate::infra::metrics::{AdmitRejection, Metrics};
use crate::io::notifier::{Notification, NotifySender};
use crate::services::allocation;
use crate::services::billing::BillingPolicy;
use crate::services::floor_registry::{FloorGuard, FloorRegistry};
use crate::services::session_store::{RetentionPolicy, SessionStore};
use crate::services::statistics::{Statistics, VehicleCounts};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Attempts at drawing a pseudo-plate that is not already active
const PSEUDO_PLATE_ATTEMPTS: usize = 16;

/// Everything known about a vehicle at the entry lane
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitRequest {
    /// Recognized or typed plate; may be empty for bicycles
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub preferred_floor: Option<FloorId>,
    pub now: DateTime<Utc>,
    pub confidence: Option<f64>,
    pub recognition_method: Option<String>,
}

impl AdmitRequest {
    pub fn new(plate: &str, vehicle_type: VehicleType, now: DateTime<Utc>) -> Self {
        Self {
            plate: plate.to_string(),
            vehicle_type,
            preferred_floor: None,
            now,
            confidence: None,
            recognition_method: None,
        }
    }

    pub fn with_preferred_floor(mut self, floor_id: Option<FloorId>) -> Self {
        self.preferred_floor = floor_id;
        self
    }

    pub fn with_recognition(mut self, confidence: f64, method: &str) -> Self {
        self.confidence = Some(confidence);
        self.recognition_method = Some(method.to_string());
        self
    }
}

pub struct ParkingEngine {
    site_id: String,
    registry: FloorRegistry,
    store: Mutex<SessionStore>,
    billing: BillingPolicy,
    metrics: Arc<Metrics>,
    notifier: Option<NotifySender>,
}

impl ParkingEngine {
    pub fn new(
        site_id: &str,
        registry: FloorRegistry,
        retention: RetentionPolicy,
        billing: BillingPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            site_id: site_id.to_string(),
            registry,
            store: Mutex::new(SessionStore::new(retention)),
            billing,
            metrics,
            notifier: None,
        }
    }

    /// Build the engine from the floors, rates and retention in `config`
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let registry = FloorRegistry::with_floors(config.floors(), config.slot_mode())?;
        Ok(Self::new(
            config.site_id(),
            registry,
            config.retention(),
            BillingPolicy::new(config.rates()),
            metrics,
        ))
    }

    /// Attach the backend notifier; entries and exits are enqueued after commit
    pub fn with_notifier(mut self, notifier: NotifySender) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[inline]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Admit a vehicle and assign it a floor and slot
    pub fn admit(
        &self,
        plate: &str,
        vehicle_type: VehicleType,
        preferred_floor: Option<FloorId>,
        now: DateTime<Utc>,
    ) -> Result<ParkingSession> {
        self.admit_request(AdmitRequest::new(plate, vehicle_type, now).with_preferred_floor(preferred_floor))
    }

    pub fn admit_request(&self, request: AdmitRequest) -> Result<ParkingSession> {
        let start = Instant::now();

        match self.admit_inner(&request) {
            Ok(session) => {
                self.metrics.record_admit(start.elapsed().as_micros() as u64);
                info!(
                    session_id = %session.id,
                    plate = %session.license_plate,
                    vehicle_type = %session.vehicle_type,
                    floor_id = %session.floor_id,
                    slot = %session.slot_number,
                    "session_admitted"
                );
                if let Some(ref notifier) = self.notifier {
                    notifier.send(Notification::entry(&session));
                }
                Ok(session)
            }
            Err(e) => {
                self.record_admit_failure(&request, &e);
                Err(e)
            }
        }
    }

    fn record_admit_failure(&self, request: &AdmitRequest, e: &ParkingError) {
        let reason = match e {
            ParkingError::DuplicateActiveSession { .. } => Some(AdmitRejection::Duplicate),
            ParkingError::NoCapacity => Some(AdmitRejection::NoCapacity),
            ParkingError::InvalidPlate => Some(AdmitRejection::InvalidPlate),
            ParkingError::UnknownFloor { .. } => Some(AdmitRejection::UnknownFloor),
            _ => None,
        };
        match reason {
            Some(reason) => self.metrics.record_admit_rejected(reason),
            None if !e.is_recoverable() => self.metrics.record_invariant_violation(),
            None => {}
        }

        debug!(
            plate = %request.plate,
            vehicle_type = %request.vehicle_type,
            error = %e,
            kind = %e.kind(),
            "admit_rejected"
        );
    }

    fn admit_inner(&self, request: &AdmitRequest) -> Result<ParkingSession> {
        let plate = normalize_plate(&request.plate);
        if !plate.is_empty() {
            return self.admit_plate(&plate, request);
        }
        if !request.vehicle_type.uses_pseudo_plate() {
            return Err(ParkingError::InvalidPlate);
        }

        self.admit_pseudo_plate(request, generate_pseudo_plate)
    }

    /// Bicycles without a plate get a generated one; redraw on collision
    fn admit_pseudo_plate(&self, request: &AdmitRequest, mut draw: impl FnMut() -> String) -> Result<ParkingSession> {
        for _ in 0..PSEUDO_PLATE_ATTEMPTS {
            match self.admit_plate(&draw(), request) {
                Err(ParkingError::DuplicateActiveSession { plate }) => {
                    debug!(plate = %plate, "pseudo_plate_collision");
                }
                other => return other,
            }
        }
        error!(attempts = %PSEUDO_PLATE_ATTEMPTS, "pseudo_plate_space_exhausted");
        Err(ParkingError::InvariantViolation("no free bicycle pseudo-plate".to_string()))
    }

    fn admit_plate(&self, plate: &str, request: &AdmitRequest) -> Result<ParkingSession> {
        // Cheap early rejection; the insert below re-checks under the lock
        if self.store.lock().lookup_active(plate).is_some() {
            return Err(ParkingError::DuplicateActiveSession { plate: plate.to_string() });
        }

        // Floors that filled up (or vanished) between snapshot and reservation
        let mut exhausted: Vec<FloorId> = Vec::new();
        loop {
            let floors = self.registry.snapshot();
            let floor_id = allocation::choose_excluding(request.preferred_floor, &floors, &exhausted)?;

            let mut guard = match self.registry.lock(floor_id) {
                Ok(guard) => guard,
                Err(ParkingError::UnknownFloor { .. }) => {
                    exhausted.push(floor_id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.reserve_and_insert(&mut guard, plate, request) {
                Err(ParkingError::CapacityExceeded { .. }) => {
                    self.metrics.record_reservation_retry();
                    debug!(floor_id = %floor_id, plate = %plate, "reservation_lost_race");
                    exhausted.push(floor_id);
                }
                other => return other,
            }
        }
    }

    /// Reserve a slot on the locked floor and insert the session. A failed
    /// insert releases the slot again before the error is returned.
    fn reserve_and_insert(
        &self,
        guard: &mut FloorGuard,
        plate: &str,
        request: &AdmitRequest,
    ) -> Result<ParkingSession> {
        let floor_id = guard.floor_id();
        let slot = guard.try_reserve()?;

        let mut session = ParkingSession::new(plate, request.vehicle_type, floor_id, slot, request.now);
        session.confidence = request.confidence;
        session.recognition_method = request.recognition_method.clone();

        let inserted = self.store.lock().insert(session);
        match inserted {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(rollback) = guard.release(slot) {
                    self.metrics.record_invariant_violation();
                    error!(floor_id = %floor_id, slot = %slot, error = %rollback, "reservation_rollback_failed");
                    return Err(rollback);
                }
                warn!(floor_id = %floor_id, slot = %slot, plate = %plate, error = %e, "reservation_rolled_back");
                Err(e)
            }
        }
    }

    /// Close the active session for a plate or session id and free its slot.
    ///
    /// `resolved_plate` is the plate the caller settled on at exit (after any
    /// recognition mismatch was confirmed); `None` keeps the stored plate.
    pub fn release(
        &self,
        key: &str,
        now: DateTime<Utc>,
        resolved_plate: Option<&str>,
    ) -> Result<ParkingSession> {
        let start = Instant::now();

        match self.release_inner(key, now, resolved_plate) {
            Ok(session) => {
                let fee = session.fee.unwrap_or(0);
                self.metrics.record_release(fee, start.elapsed().as_micros() as u64);
                info!(
                    session_id = %session.id,
                    plate = %session.license_plate,
                    floor_id = %session.floor_id,
                    slot = %session.slot_number,
                    duration_minutes = ?session.duration_minutes,
                    billable_hours = ?session.billable_hours,
                    fee = %fee,
                    "session_released"
                );
                if let Some(ref notifier) = self.notifier {
                    notifier.send(Notification::exit(&session));
                }
                Ok(session)
            }
            Err(e) => {
                match &e {
                    ParkingError::NoActiveSession { .. } => self.metrics.record_release_not_found(),
                    ParkingError::InvalidInterval { .. } => self.metrics.record_release_invalid_interval(),
                    _ if !e.is_recoverable() => self.metrics.record_invariant_violation(),
                    _ => {}
                }
                debug!(key = %key, error = %e, kind = %e.kind(), "release_rejected");
                Err(e)
            }
        }
    }

    fn release_inner(
        &self,
        key: &str,
        now: DateTime<Utc>,
        resolved_plate: Option<&str>,
    ) -> Result<ParkingSession> {
        loop {
            let (session_id, floor_id) = {
                let store = self.store.lock();
                let session = store
                    .resolve_active(key)
                    .ok_or_else(|| ParkingError::NoActiveSession { key: key.to_string() })?;
                (session.id, session.floor_id)
            };

            // A floor with active sessions cannot be removed
            let mut guard = self.registry.lock(floor_id).map_err(|_| {
                error!(session_id = %session_id, floor_id = %floor_id, "active_session_on_missing_floor");
                ParkingError::InvariantViolation(format!(
                    "session {} references missing floor {}",
                    session_id, floor_id
                ))
            })?;

            let mut store = self.store.lock();
            let session = match store.resolve_active(key) {
                Some(session) if session.id == session_id => session,
                // Closed (or replaced) by a concurrent release; start over
                _ => continue,
            };

            let charge = self.billing.compute_fee(session.vehicle_type, session.entry_timestamp, now)?;
            let slot = session.slot_number;

            guard.release(slot)?;
            return store.close(&session_id.to_string(), now, charge, resolved_plate);
        }
    }

    /// All floors ordered by ascending id
    pub fn floor_snapshot(&self) -> Vec<Floor> {
        self.registry.snapshot()
    }

    pub fn floor(&self, floor_id: FloorId) -> Option<Floor> {
        self.registry.floor(floor_id)
    }

    /// Active sessions ordered by entry time
    pub fn active_sessions(&self) -> Vec<ParkingSession> {
        self.store.lock().active_sessions()
    }

    /// Retained closed sessions, oldest close first
    pub fn closed_sessions(&self) -> Vec<ParkingSession> {
        self.store.lock().closed_sessions()
    }

    pub fn lookup_active(&self, plate: &str) -> Option<ParkingSession> {
        self.store.lock().lookup_active(plate).cloned()
    }

    /// Active session for a plate or session id
    pub fn find_active(&self, key: &str) -> Option<ParkingSession> {
        self.store.lock().resolve_active(key).cloned()
    }

    /// Active or retained closed session by id
    pub fn session(&self, id: SessionId) -> Option<ParkingSession> {
        self.store.lock().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.store.lock().active_count()
    }

    /// Consistent occupancy and revenue summary
    pub fn statistics(&self) -> Statistics {
        let guards = self.registry.lock_all();
        let floors: Vec<Floor> = guards.iter().map(|g| g.snapshot()).collect();
        let store = self.store.lock();
        let active = store.active_sessions();

        Statistics::new(
            floors,
            VehicleCounts::from_sessions(&active),
            (store.active_count() + store.closed_count()) as u64,
            store.closed_revenue(),
        )
    }

    pub fn add_floor(&self, floor_id: FloorId, total_capacity: u32) -> Result<()> {
        self.registry.add_floor(floor_id, total_capacity)
    }

    /// Remove a floor; fails with `FloorOccupied` while it has active sessions
    pub fn remove_floor(&self, floor_id: FloorId) -> Result<()> {
        self.registry.remove_floor(floor_id)
    }

    /// Evict closed sessions past retention. Returns them for archiving.
    pub fn prune_closed(&self, now: DateTime<Utc>) -> Vec<ParkingSession> {
        let evicted = self.store.lock().prune_closed(now);
        if !evicted.is_empty() {
            self.metrics.record_sessions_pruned(evicted.len() as u64);
        }
        evicted
    }

    /// Recount active sessions per floor and compare with the registry
    pub fn verify_invariants(&self) -> Result<()> {
        let guards = self.registry.lock_all();
        let store = self.store.lock();
        let counts = store.active_count_by_floor();

        for guard in &guards {
            let floor = guard.snapshot();
            let active = counts.get(&floor.floor_id).copied().unwrap_or(0);
            if floor.occupied != active || floor.occupied > floor.total_capacity {
                self.metrics.record_invariant_violation();
                error!(
                    floor_id = %floor.floor_id,
                    occupied = %floor.occupied,
                    active_sessions = %active,
                    total_capacity = %floor.total_capacity,
                    "occupancy_mismatch"
                );
                return Err(ParkingError::InvariantViolation(format!(
                    "floor {} occupied {} but {} active sessions",
                    floor.floor_id, floor.occupied, active
                )));
            }
        }

        let known: usize = guards
            .iter()
            .map(|g| counts.get(&g.floor_id()).copied().unwrap_or(0) as usize)
            .sum();
        if known != store.active_count() {
            self.metrics.record_invariant_violation();
            error!(active = %store.active_count(), on_known_floors = %known, "sessions_on_unknown_floor");
            return Err(ParkingError::InvariantViolation(
                "active sessions reference floors missing from the registry".to_string(),
            ));
        }
        Ok(())
    }
}
