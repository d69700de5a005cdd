//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics updated on the admit/release hot path.
//! `report()` is the only operation that resets anything (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must never drive engine decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Operation latency bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
pub const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
pub const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Upper bound of each bucket (last bucket uses 2x the previous bound)
const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
    [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Why an admit was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitRejection {
    Duplicate,
    NoCapacity,
    InvalidPlate,
    UnknownFloor,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Sessions opened (monotonic)
    admits_total: AtomicU64,
    /// Sessions closed (monotonic)
    releases_total: AtomicU64,
    /// Operations since last report (reset on report)
    ops_since_report: AtomicU64,
    /// Sum of admit/release latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Admit/release latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Same histogram, never reset (Prometheus)
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    /// Sum of all latencies ever recorded (Prometheus)
    latency_sum_total_us: AtomicU64,
    rejected_duplicate: AtomicU64,
    rejected_no_capacity: AtomicU64,
    rejected_invalid_plate: AtomicU64,
    rejected_unknown_floor: AtomicU64,
    /// Release with no matching active session (monotonic)
    release_not_found: AtomicU64,
    /// Release with exit before entry (monotonic)
    release_invalid_interval: AtomicU64,
    /// Reservations lost to a concurrent admit and retried elsewhere
    reservation_retries: AtomicU64,
    /// Internal consistency failures (monotonic, should stay at zero)
    invariant_violations: AtomicU64,
    /// Sum of fees charged (monotonic)
    revenue_total: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    /// Notifications dropped because the queue was full
    notifications_dropped: AtomicU64,
    recognition_failures: AtomicU64,
    /// Lane protocol requests handled (monotonic)
    lane_requests_total: AtomicU64,
    /// Closed sessions evicted by retention (monotonic)
    sessions_pruned: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            admits_total: AtomicU64::new(0),
            releases_total: AtomicU64::new(0),
            ops_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            rejected_duplicate: AtomicU64::new(0),
            rejected_no_capacity: AtomicU64::new(0),
            rejected_invalid_plate: AtomicU64::new(0),
            rejected_unknown_floor: AtomicU64::new(0),
            release_not_found: AtomicU64::new(0),
            release_invalid_interval: AtomicU64::new(0),
            reservation_retries: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            revenue_total: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            recognition_failures: AtomicU64::new(0),
            lane_requests_total: AtomicU64::new(0),
            sessions_pruned: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    fn record_latency(&self, latency_us: u64) {
        self.ops_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        let idx = bucket_index(latency_us);
        self.latency_buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.latency_buckets_total[idx].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a successful admit (lock-free)
    #[inline]
    pub fn record_admit(&self, latency_us: u64) {
        self.admits_total.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    /// Record a successful release and the fee charged (lock-free)
    #[inline]
    pub fn record_release(&self, fee: u64, latency_us: u64) {
        self.releases_total.fetch_add(1, Ordering::Relaxed);
        self.revenue_total.fetch_add(fee, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    #[inline]
    pub fn record_admit_rejected(&self, reason: AdmitRejection) {
        let counter = match reason {
            AdmitRejection::Duplicate => &self.rejected_duplicate,
            AdmitRejection::NoCapacity => &self.rejected_no_capacity,
            AdmitRejection::InvalidPlate => &self.rejected_invalid_plate,
            AdmitRejection::UnknownFloor => &self.rejected_unknown_floor,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release_not_found(&self) {
        self.release_not_found.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release_invalid_interval(&self) {
        self.release_invalid_interval.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reservation_retry(&self) {
        self.reservation_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recognition_failure(&self) {
        self.recognition_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lane_request(&self) {
        self.lane_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sessions_pruned(&self, count: u64) {
        self.sessions_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn admits_total(&self) -> u64 {
        self.admits_total.load(Ordering::Relaxed)
    }

    pub fn releases_total(&self) -> u64 {
        self.releases_total.load(Ordering::Relaxed)
    }

    pub fn revenue_total(&self) -> u64 {
        self.revenue_total.load(Ordering::Relaxed)
    }

    pub fn admit_rejected(&self, reason: AdmitRejection) -> u64 {
        match reason {
            AdmitRejection::Duplicate => self.rejected_duplicate.load(Ordering::Relaxed),
            AdmitRejection::NoCapacity => self.rejected_no_capacity.load(Ordering::Relaxed),
            AdmitRejection::InvalidPlate => self.rejected_invalid_plate.load(Ordering::Relaxed),
            AdmitRejection::UnknownFloor => self.rejected_unknown_floor.load(Ordering::Relaxed),
        }
    }

    pub fn release_not_found(&self) -> u64 {
        self.release_not_found.load(Ordering::Relaxed)
    }

    pub fn release_invalid_interval(&self) -> u64 {
        self.release_invalid_interval.load(Ordering::Relaxed)
    }

    pub fn reservation_retries(&self) -> u64 {
        self.reservation_retries.load(Ordering::Relaxed)
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    pub fn recognition_failures(&self) -> u64 {
        self.recognition_failures.load(Ordering::Relaxed)
    }

    pub fn lane_requests_total(&self) -> u64 {
        self.lane_requests_total.load(Ordering::Relaxed)
    }

    pub fn sessions_pruned(&self) -> u64 {
        self.sessions_pruned.load(Ordering::Relaxed)
    }

    /// Cumulative latency histogram since startup
    pub fn latency_buckets_total(&self) -> [u64; NUM_BUCKETS] {
        load_buckets(&self.latency_buckets_total)
    }

    pub fn latency_sum_total_us(&self) -> u64 {
        self.latency_sum_total_us.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self, active_sessions: usize, occupied: u64, capacity: u64) -> MetricsSummary {
        let ops_count = self.ops_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ops_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ops_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if ops_count > 0 { latency_sum / ops_count } else { 0 };

        MetricsSummary {
            admits_total: self.admits_total(),
            releases_total: self.releases_total(),
            ops_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            active_sessions,
            occupied,
            capacity,
            revenue_total: self.revenue_total(),
            rejected_total: self.rejected_duplicate.load(Ordering::Relaxed)
                + self.rejected_no_capacity.load(Ordering::Relaxed)
                + self.rejected_invalid_plate.load(Ordering::Relaxed)
                + self.rejected_unknown_floor.load(Ordering::Relaxed),
            release_not_found: self.release_not_found(),
            invariant_violations: self.invariant_violations(),
            notifications_dropped: self.notifications_dropped(),
            notifications_failed: self.notifications_failed(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics summary for one reporting interval
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub admits_total: u64,
    pub releases_total: u64,
    pub ops_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Admit/release latency histogram for this interval
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub active_sessions: usize,
    pub occupied: u64,
    pub capacity: u64,
    pub revenue_total: u64,
    pub rejected_total: u64,
    pub release_not_found: u64,
    pub invariant_violations: u64,
    pub notifications_dropped: u64,
    pub notifications_failed: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            admits_total = %self.admits_total,
            releases_total = %self.releases_total,
            ops_per_sec = format!("{:.1}", self.ops_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p50_us = %self.lat_p50_us,
            p99_us = %self.lat_p99_us,
            active_sessions = %self.active_sessions,
            occupied = %self.occupied,
            capacity = %self.capacity,
            revenue_total = %self.revenue_total,
            rejected = %self.rejected_total,
            release_not_found = %self.release_not_found,
            invariant_violations = %self.invariant_violations,
            notify_dropped = %self.notifications_dropped,
            notify_failed = %self.notifications_failed,
            "metrics"
        );
    }
}
