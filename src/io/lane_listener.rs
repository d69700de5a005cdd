//! Lane TCP listener - JSON-lines request protocol for entry/exit lanes
//!
//! Listens on port 25900 (configurable). Each line is one JSON request:
//!   {"op":"admit","plate":"51F-12345","vehicle_type":"car","floor":2}
//!   {"op":"release","key":"51F-12345","resolved_plate":"51F-12346"}
//!   {"op":"floors"} | {"op":"active"} | {"op":"stats"}
//! and gets exactly one JSON response line:
//!   {"ok":true,"data":...} or {"ok":false,"error":"<kind>","message":"..."}
//!
//! `now` is read here, when the request arrives; the engine itself stays
//! clock-free. Admit and release may carry a base64 `image` captured by
//! the lane camera, in which case the plate recognizer is consulted first.
//! The listener never touches the local filesystem on a peer's behalf.

use crate::domain::error::ParkingError;
use crate::domain::types::{FloorId, VehicleType};
use crate::infra::metrics::Metrics;
use crate::io::recognition::{resolve_exit_plate, PlateReading, PlateRecognizer};
use crate::services::engine::{AdmitRequest, ParkingEngine};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lane listener configuration
#[derive(Debug, Clone)]
pub struct LaneListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for LaneListenerConfig {
    fn default() -> Self {
        Self { port: 25900, enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LaneRequest {
    Admit {
        #[serde(default)]
        plate: String,
        vehicle_type: VehicleType,
        #[serde(default)]
        floor: Option<FloorId>,
        /// Base64-encoded capture, read when `plate` is empty
        #[serde(default)]
        image: Option<String>,
    },
    Release {
        key: String,
        #[serde(default)]
        resolved_plate: Option<String>,
        #[serde(default)]
        image: Option<String>,
        /// Use the exit reading even if it differs from the stored plate
        #[serde(default)]
        accept_reading: bool,
    },
    Floors,
    Active,
    Stats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LaneResponse {
    fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self { ok: true, data: Some(data), error: None, message: None },
            Err(e) => Self::failure("internal", &e.to_string()),
        }
    }

    fn failure(kind: &str, message: &str) -> Self {
        Self { ok: false, data: None, error: Some(kind.to_string()), message: Some(message.to_string()) }
    }

    fn from_error(e: &ParkingError) -> Self {
        Self::failure(e.kind(), &e.to_string())
    }

    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"internal"}"#.to_string());
        line.push('\n');
        line
    }
}

/// Dispatches lane requests to the engine
pub struct LaneHandler {
    engine: Arc<ParkingEngine>,
    recognizer: Option<Arc<dyn PlateRecognizer>>,
    metrics: Arc<Metrics>,
}

impl LaneHandler {
    pub fn new(engine: Arc<ParkingEngine>, metrics: Arc<Metrics>) -> Self {
        Self { engine, recognizer: None, metrics }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn PlateRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Handle one request line received at `now`
    pub async fn handle_line(&self, line: &str, now: DateTime<Utc>) -> LaneResponse {
        self.metrics.record_lane_request();
        match serde_json::from_str::<LaneRequest>(line) {
            Ok(request) => self.handle(request, now).await,
            Err(e) => {
                debug!(line = %line, error = %e, "lane_bad_request");
                LaneResponse::failure("bad_request", &e.to_string())
            }
        }
    }

    pub async fn handle(&self, request: LaneRequest, now: DateTime<Utc>) -> LaneResponse {
        match request {
            LaneRequest::Admit { plate, vehicle_type, floor, image } => {
                let mut admit = AdmitRequest::new(&plate, vehicle_type, now).with_preferred_floor(floor);
                if plate.trim().is_empty() && !vehicle_type.uses_pseudo_plate() {
                    if let Some(encoded) = image {
                        match self.recognize_image(&encoded).await {
                            Ok(reading) => {
                                admit.plate = reading.plate;
                                admit.confidence = reading.confidence;
                                admit.recognition_method = reading.method;
                            }
                            Err(e) => return LaneResponse::from_error(&e),
                        }
                    }
                }
                match self.engine.admit_request(admit) {
                    Ok(session) => LaneResponse::data(&session),
                    Err(e) => LaneResponse::from_error(&e),
                }
            }
            LaneRequest::Release { key, resolved_plate, image, accept_reading } => {
                let resolved = match (resolved_plate, image) {
                    (Some(plate), _) => Some(plate),
                    (None, Some(encoded)) => self.exit_plate_from_image(&key, &encoded, accept_reading).await,
                    (None, None) => None,
                };
                match self.engine.release(&key, now, resolved.as_deref()) {
                    Ok(session) => LaneResponse::data(&session),
                    Err(e) => LaneResponse::from_error(&e),
                }
            }
            LaneRequest::Floors => LaneResponse::data(&self.engine.floor_snapshot()),
            LaneRequest::Active => LaneResponse::data(&self.engine.active_sessions()),
            LaneRequest::Stats => LaneResponse::data(&self.engine.statistics()),
        }
    }

    async fn recognize_image(&self, encoded: &str) -> Result<PlateReading, ParkingError> {
        let Some(ref recognizer) = self.recognizer else {
            return Err(ParkingError::RecognitionFailed("no recognizer configured".to_string()));
        };
        let image = BASE64.decode(encoded.trim()).map_err(|e| {
            debug!(error = %e, "lane_image_decode_failed");
            self.metrics.record_recognition_failure();
            ParkingError::RecognitionFailed("image is not valid base64".to_string())
        })?;
        recognizer.recognize(&image).await.inspect_err(|_| self.metrics.record_recognition_failure())
    }

    /// A failed exit reading never blocks the release; the stored plate stands
    async fn exit_plate_from_image(&self, key: &str, encoded: &str, accept: bool) -> Option<String> {
        let stored = self.engine.find_active(key)?.license_plate;
        match self.recognize_image(encoded).await {
            Ok(reading) => {
                if reading.plate != stored && !accept {
                    info!(stored = %stored, read = %reading.plate, "exit_plate_mismatch_kept_stored");
                }
                resolve_exit_plate(&stored, Some(&reading), accept)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "exit_recognition_failed");
                None
            }
        }
    }
}

/// Start the lane TCP listener
pub async fn start_lane_listener(
    config: LaneListenerConfig,
    handler: Arc<LaneHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("lane_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "lane_listener_started");

    serve(listener, handler, shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, handler: Arc<LaneHandler>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("lane_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let h = handler.clone();
                        tokio::spawn(async move {
                            handle_lane_connection(socket, addr, h).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "lane_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_lane_connection(socket: TcpStream, addr: SocketAddr, handler: Arc<LaneHandler>) {
    debug!(peer = %addr, "lane_connection_accepted");

    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handler.handle_line(line, Utc::now()).await;
        if let Err(e) = write_half.write_all(response.to_line().as_bytes()).await {
            warn!(peer = %addr, error = %e, "lane_response_write_failed");
            break;
        }
    }

    debug!(peer = %addr, "lane_connection_closed");
}
