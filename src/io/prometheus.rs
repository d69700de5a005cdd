//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server. Reads only monotonic counters and live
//! floor state, so scraping never disturbs the periodic log reporter.

use crate::infra::metrics::{Metrics, BUCKET_BOUNDS, NUM_BUCKETS};
use crate::services::engine::ParkingEngine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(engine: &ParkingEngine, site: &str) -> String {
    let metrics = engine.metrics();
    let mut output = String::with_capacity(4096);

    write_session_metrics(&mut output, site, metrics);
    write_rejection_metrics(&mut output, site, metrics);
    write_notify_metrics(&mut output, site, metrics);
    write_floor_metrics(&mut output, site, engine);

    output
}

fn write_session_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    write_metric(output, "parking_admits_total", "Sessions opened", MetricType::Counter, site, metrics.admits_total());
    write_metric(
        output,
        "parking_releases_total",
        "Sessions closed",
        MetricType::Counter,
        site,
        metrics.releases_total(),
    );
    write_metric(
        output,
        "parking_revenue_total",
        "Fees charged, in currency units",
        MetricType::Counter,
        site,
        metrics.revenue_total(),
    );
    write_metric(
        output,
        "parking_sessions_pruned_total",
        "Closed sessions evicted by retention",
        MetricType::Counter,
        site,
        metrics.sessions_pruned(),
    );
    write_metric(
        output,
        "parking_lane_requests_total",
        "Lane protocol requests handled",
        MetricType::Counter,
        site,
        metrics.lane_requests_total(),
    );
    write_histogram(
        output,
        "parking_operation_latency_us",
        "Admit/release latency in microseconds",
        site,
        &metrics.latency_buckets_total(),
        metrics.latency_sum_total_us(),
    );
}

fn write_rejection_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    use crate::infra::metrics::AdmitRejection;

    let _ = writeln!(output, "# HELP parking_admit_rejected_total Admits turned away, by reason");
    let _ = writeln!(output, "# TYPE parking_admit_rejected_total counter");
    for (reason, label) in [
        (AdmitRejection::Duplicate, "duplicate_active_session"),
        (AdmitRejection::NoCapacity, "no_capacity"),
        (AdmitRejection::InvalidPlate, "invalid_plate"),
        (AdmitRejection::UnknownFloor, "unknown_floor"),
    ] {
        let _ = writeln!(
            output,
            "parking_admit_rejected_total{{site=\"{site}\",reason=\"{label}\"}} {}",
            metrics.admit_rejected(reason)
        );
    }

    write_metric(
        output,
        "parking_release_not_found_total",
        "Releases with no matching active session",
        MetricType::Counter,
        site,
        metrics.release_not_found(),
    );
    write_metric(
        output,
        "parking_release_invalid_interval_total",
        "Releases with exit before entry",
        MetricType::Counter,
        site,
        metrics.release_invalid_interval(),
    );
    write_metric(
        output,
        "parking_reservation_retries_total",
        "Reservations lost to a concurrent admit",
        MetricType::Counter,
        site,
        metrics.reservation_retries(),
    );
    write_metric(
        output,
        "parking_invariant_violations_total",
        "Internal consistency failures",
        MetricType::Counter,
        site,
        metrics.invariant_violations(),
    );
    write_metric(
        output,
        "parking_recognition_failures_total",
        "Plate recognition failures seen by lanes",
        MetricType::Counter,
        site,
        metrics.recognition_failures(),
    );
}

fn write_notify_metrics(output: &mut String, site: &str, metrics: &Metrics) {
    write_metric(
        output,
        "parking_notifications_sent_total",
        "Backend notifications delivered",
        MetricType::Counter,
        site,
        metrics.notifications_sent(),
    );
    write_metric(
        output,
        "parking_notifications_failed_total",
        "Backend notifications given up after retries",
        MetricType::Counter,
        site,
        metrics.notifications_failed(),
    );
    write_metric(
        output,
        "parking_notifications_dropped_total",
        "Backend notifications dropped due to full queue",
        MetricType::Counter,
        site,
        metrics.notifications_dropped(),
    );
}

fn write_floor_metrics(output: &mut String, site: &str, engine: &ParkingEngine) {
    let floors = engine.floor_snapshot();

    let _ = writeln!(output, "# HELP parking_floor_capacity Total slots per floor");
    let _ = writeln!(output, "# TYPE parking_floor_capacity gauge");
    for floor in &floors {
        let _ = writeln!(
            output,
            "parking_floor_capacity{{site=\"{site}\",floor=\"{}\"}} {}",
            floor.floor_id, floor.total_capacity
        );
    }

    let _ = writeln!(output, "# HELP parking_floor_occupied Occupied slots per floor");
    let _ = writeln!(output, "# TYPE parking_floor_occupied gauge");
    for floor in &floors {
        let _ = writeln!(
            output,
            "parking_floor_occupied{{site=\"{site}\",floor=\"{}\"}} {}",
            floor.floor_id, floor.occupied
        );
    }

    let capacity: u64 = floors.iter().map(|f| u64::from(f.total_capacity)).sum();
    let occupied: u64 = floors.iter().map(|f| u64::from(f.occupied)).sum();
    let rate = if capacity > 0 { occupied as f64 / capacity as f64 } else { 0.0 };
    write_gauge_f64(output, "parking_occupancy_ratio", "Occupied share of total capacity", site, rate);
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    engine: Arc<ParkingEngine>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&engine, &site_id),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    engine: Arc<ParkingEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(engine.site_id().to_string());

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let engine = engine.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let engine = engine.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, engine, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{FloorId, VehicleType};
    use crate::infra::config::Config;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Arc::new(Metrics::new());
        let config = Config::default().with_floors(&[(1, 4), (2, 4)]);
        let engine = ParkingEngine::from_config(&config, metrics).unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();

        engine.admit("A", VehicleType::Car, Some(FloorId(2)), t).unwrap();
        engine.admit("A", VehicleType::Car, None, t).unwrap_err();

        let output = format_prometheus_metrics(&engine, "mall");

        assert!(output.contains("parking_admits_total{site=\"mall\"} 1"));
        assert!(output.contains(
            "parking_admit_rejected_total{site=\"mall\",reason=\"duplicate_active_session\"} 1"
        ));
        assert!(output.contains("parking_floor_occupied{site=\"mall\",floor=\"2\"} 1"));
        assert!(output.contains("parking_floor_capacity{site=\"mall\",floor=\"1\"} 4"));
        assert!(output.contains("parking_operation_latency_us_count{site=\"mall\"} 1"));
        assert!(output.contains("parking_occupancy_ratio{site=\"mall\"} 0.125000"));
    }

    #[test]
    fn test_scrape_does_not_reset_reporter() {
        let metrics = Arc::new(Metrics::new());
        let engine = ParkingEngine::from_config(&Config::default(), metrics.clone()).unwrap();
        let t = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        engine.admit("A", VehicleType::Car, None, t).unwrap();

        format_prometheus_metrics(&engine, "mall");
        assert_eq!(metrics.report(1, 1, 920).lat_buckets.iter().sum::<u64>(), 1);
    }
}
