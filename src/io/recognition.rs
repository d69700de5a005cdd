//! License-plate recognition client
//!
//! The recognizer is a caller-side collaborator: lanes call it before
//! admit/release and hand the engine a plate string. Recognition may be
//! slow and is never retried here.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::normalize_plate;
use crate::infra::config::Config;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// A successful plate reading
#[derive(Debug, Clone, PartialEq)]
pub struct PlateReading {
    pub plate: String,
    pub confidence: Option<f64>,
    pub method: Option<String>,
}

#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    /// Read a plate from an encoded image
    async fn recognize(&self, image: &[u8]) -> Result<PlateReading>;
}

/// Response body of the recognition service
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    license_plate: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl DetectResponse {
    fn into_reading(self) -> Result<PlateReading> {
        let plate = self.license_plate.as_deref().map(normalize_plate).unwrap_or_default();
        if !self.success || plate.is_empty() {
            let reason = self.error.unwrap_or_else(|| "no plate detected".to_string());
            return Err(ParkingError::RecognitionFailed(reason));
        }
        Ok(PlateReading { plate, confidence: self.confidence, method: self.method })
    }
}

/// HTTP client for the `/detect-file` recognition endpoint
pub struct HttpRecognizer {
    url: String,
    client: reqwest::Client,
}

impl HttpRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParkingError::RecognitionFailed(e.to_string()))?;
        Ok(Self { url: format!("{}/detect-file", base_url.trim_end_matches('/')), client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.recognition_url(), Duration::from_millis(config.recognition_timeout_ms()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PlateRecognizer for HttpRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<PlateReading> {
        let failed = |e: reqwest::Error| {
            warn!(url = %self.url, error = %e, "recognition_request_failed");
            ParkingError::RecognitionFailed(e.to_string())
        };

        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("capture.jpg");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?;
        let body: DetectResponse = response.json().await.map_err(failed)?;

        let reading = body.into_reading()?;
        debug!(plate = %reading.plate, confidence = ?reading.confidence, "plate_recognized");
        Ok(reading)
    }
}

/// Pick the plate to close a session under.
///
/// Keeps `stored` unless a differing `reading` exists and the caller
/// explicitly accepted it. Returns `None` when the stored plate stands.
pub fn resolve_exit_plate(stored: &str, reading: Option<&PlateReading>, accept_reading: bool) -> Option<String> {
    let reading = reading?;
    let stored = normalize_plate(stored);
    if reading.plate == stored || !accept_reading {
        return None;
    }
    Some(reading.plate.clone())
}
