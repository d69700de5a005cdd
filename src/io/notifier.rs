//! Best-effort backend notification of entries and exits
//!
//! The engine enqueues with `try_send` and never waits. A worker task POSTs
//! each notification to `{url}/entry` or `{url}/exit`, retrying with linear
//! backoff. Failures are logged and counted, nothing more.

use crate::domain::session::ParkingSession;
use crate::domain::types::{FloorId, VehicleType};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

pub const DEFAULT_ENTRY_LANE: u32 = 1;
pub const DEFAULT_EXIT_LANE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Entry,
    Exit,
}

impl NotificationKind {
    /// Path segment appended to the backend base url
    pub fn path(&self) -> &'static str {
        match self {
            NotificationKind::Entry => "entry",
            NotificationKind::Exit => "exit",
        }
    }
}

/// Request body sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBody {
    pub license_plate: String,
    pub lane_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<VehicleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor: Option<FloorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub body: NotificationBody,
    /// When the notification was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

impl Notification {
    pub fn entry(session: &ParkingSession) -> Self {
        Self {
            kind: NotificationKind::Entry,
            body: NotificationBody {
                license_plate: session.license_plate.clone(),
                lane_id: DEFAULT_ENTRY_LANE,
                vehicle_type: Some(session.vehicle_type),
                floor: Some(session.floor_id),
                slot: Some(session.slot_number),
                fee: None,
            },
            enqueued_at: Instant::now(),
        }
    }

    pub fn exit(session: &ParkingSession) -> Self {
        Self {
            kind: NotificationKind::Exit,
            body: NotificationBody {
                license_plate: session.license_plate.clone(),
                lane_id: DEFAULT_EXIT_LANE,
                vehicle_type: None,
                floor: None,
                slot: None,
                fee: session.fee,
            },
            enqueued_at: Instant::now(),
        }
    }
}

/// Non-blocking handle used by the engine
#[derive(Clone)]
pub struct NotifySender {
    tx: mpsc::Sender<Notification>,
    metrics: Arc<Metrics>,
}

impl NotifySender {
    pub fn new(tx: mpsc::Sender<Notification>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Enqueue without waiting; dropped (and counted) when the queue is full
    pub fn send(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                self.metrics.record_notification_dropped();
                warn!(kind = %n.kind.path(), plate = %n.body.license_plate, "notification_dropped");
            }
            Err(TrySendError::Closed(n)) => {
                self.metrics.record_notification_dropped();
                debug!(kind = %n.kind.path(), "notification_channel_closed");
            }
        }
    }
}

/// Retry settings for the worker
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl NotifierConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.notify_url().trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.notify_timeout_ms()),
            max_retries: config.notify_max_retries(),
            retry_backoff: Duration::from_millis(config.notify_retry_backoff_ms()),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

/// Worker that delivers notifications off the engine's path
pub struct NotifyWorker {
    config: NotifierConfig,
    client: reqwest::Client,
    rx: mpsc::Receiver<Notification>,
    metrics: Arc<Metrics>,
}

impl NotifyWorker {
    pub fn new(
        config: NotifierConfig,
        rx: mpsc::Receiver<Notification>,
        metrics: Arc<Metrics>,
    ) -> reqwest::Result<Self> {
        // One client for the worker's lifetime (connection pooling)
        let client = reqwest::Client::builder().timeout(config.timeout).http1_only().build()?;
        Ok(Self { config, client, rx, metrics })
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!(url = %self.config.base_url, "notify_worker_started");

        while let Some(notification) = self.rx.recv().await {
            let queue_delay_us = notification.enqueued_at.elapsed().as_micros() as u64;
            if self.deliver(&notification).await {
                self.metrics.record_notification_sent();
                debug!(
                    kind = %notification.kind.path(),
                    plate = %notification.body.license_plate,
                    queue_delay_us = %queue_delay_us,
                    "notification_sent"
                );
            } else {
                self.metrics.record_notification_failed();
            }
        }

        info!("notify_worker_stopped");
    }

    async fn deliver(&self, notification: &Notification) -> bool {
        let url = format!("{}/{}", self.config.base_url, notification.kind.path());
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            let result = self
                .client
                .post(&url)
                .json(&notification.body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(_) => return true,
                Err(e) if attempt < attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        url = %url,
                        attempt = %attempt,
                        retry_in_ms = %delay.as_millis(),
                        error = %e,
                        "notification_retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        attempts = %attempts,
                        plate = %notification.body.license_plate,
                        error = %e,
                        "notification_failed"
                    );
                }
            }
        }
        false
    }
}

/// Create a notification channel and worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_notifier(
    config: NotifierConfig,
    metrics: Arc<Metrics>,
    queue_size: usize,
) -> reqwest::Result<(NotifySender, NotifyWorker)> {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let worker = NotifyWorker::new(config, rx, metrics.clone())?;
    Ok((NotifySender::new(tx, metrics), worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session() -> ParkingSession {
        let entry = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        ParkingSession::new("51F-12345", VehicleType::Car, FloorId(2), 7, entry)
    }

    fn test_config() -> NotifierConfig {
        NotifierConfig {
            // Nothing listens on port 9 locally; every attempt fails fast
            base_url: "http://127.0.0.1:9/api/camera".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 1,
            retry_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_entry_body_shape() {
        let body = serde_json::to_value(&Notification::entry(&session()).body).unwrap();
        assert_eq!(body["licensePlate"], "51F-12345");
        assert_eq!(body["laneId"], 1);
        assert_eq!(body["vehicleType"], "car");
        assert_eq!(body["floor"], 2);
        assert_eq!(body["slot"], 7);
        assert!(body.get("fee").is_none());
    }

    #[test]
    fn test_exit_body_shape() {
        let mut s = session();
        s.fee = Some(20_000);
        let body = serde_json::to_value(&Notification::exit(&s).body).unwrap();
        assert_eq!(body["laneId"], 2);
        assert_eq!(body["fee"], 20_000);
        assert!(body.get("floor").is_none());
    }

    #[test]
    fn test_linear_backoff() {
        let config = NotifierConfig { retry_backoff: Duration::from_millis(500), ..test_config() };
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(3), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (tx, _rx) = mpsc::channel(1);
        let sender = NotifySender::new(tx, metrics.clone());

        sender.send(Notification::entry(&session()));
        sender.send(Notification::entry(&session()));

        assert_eq!(metrics.notifications_dropped(), 1);
    }

    #[tokio::test]
    async fn test_worker_counts_failed_delivery() {
        let metrics = Arc::new(Metrics::new());
        let (sender, worker) = create_notifier(test_config(), metrics.clone(), 4).unwrap();

        sender.send(Notification::exit(&session()));
        drop(sender);
        worker.run().await;

        assert_eq!(metrics.notifications_failed(), 1);
        assert_eq!(metrics.notifications_sent(), 0);
    }
}
