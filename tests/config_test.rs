//! Integration tests for configuration loading

use parking_engine::domain::types::{FloorId, VehicleType};
use parking_engine::infra::{Config, Metrics};
use parking_engine::services::{ParkingEngine, SlotMode};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "test-site"

[[floors]]
id = 1
capacity = 10

[[floors]]
id = 2
capacity = 5

[rates]
car = 12000
motorcycle = 6000
bicycle = 3000

[allocation]
slot_mode = "free_list"

[retention]
max_closed_sessions = 50
closed_ttl_secs = 600
archive_file = "/tmp/archive.jsonl"

[notify]
enabled = true
url = "http://backend:8080/api/camera"
max_retries = 5

[lanes]
listener_port = 26000

[metrics]
interval_secs = 15
prometheus_port = 9091
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.floors(), &[(FloorId(1), 10), (FloorId(2), 5)]);
    assert_eq!(config.total_capacity(), 15);
    assert_eq!(config.rates().rate(VehicleType::Car), 12_000);
    assert_eq!(config.rates().rate(VehicleType::Bicycle), 3_000);
    assert_eq!(config.slot_mode(), SlotMode::FreeList);
    assert_eq!(config.retention().max_closed, 50);
    assert_eq!(config.closed_ttl_secs(), 600);
    assert_eq!(config.archive_file(), "/tmp/archive.jsonl");
    assert!(config.notify_enabled());
    assert_eq!(config.notify_url(), "http://backend:8080/api/camera");
    assert_eq!(config.notify_max_retries(), 5);
    assert_eq!(config.lane_listener_port(), 26000);
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_file = write_config("[site]\nid = \"lot-b\"\n");
    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "lot-b");
    assert_eq!(config.floors().len(), 4);
    assert_eq!(config.total_capacity(), 920);
    assert_eq!(config.slot_mode(), SlotMode::Sequential);
    assert!(!config.notify_enabled());
}

#[test]
fn test_invalid_config_is_rejected() {
    let duplicate_floor = write_config("[[floors]]\nid = 1\ncapacity = 3\n\n[[floors]]\nid = 1\ncapacity = 4\n");
    assert!(Config::from_file(duplicate_floor.path()).is_err());

    let zero_rate = write_config("[rates]\ncar = 0\n");
    assert!(Config::from_file(zero_rate.path()).is_err());

    let garbage = write_config("this is = = not toml");
    assert!(Config::from_file(garbage.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.site_id(), "parking");
    assert_eq!(config.total_capacity(), 920);
    assert_eq!(config.rates().rate(VehicleType::Motorcycle), 5_000);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_engine_from_loaded_config() {
    let temp_file = write_config("[[floors]]\nid = 3\ncapacity = 1\n\n[[floors]]\nid = 7\ncapacity = 2\n");
    let config = Config::from_file(temp_file.path()).unwrap();
    let engine = ParkingEngine::from_config(&config, Arc::new(Metrics::new())).unwrap();

    let floors = engine.floor_snapshot();
    assert_eq!(floors.iter().map(|f| f.floor_id).collect::<Vec<_>>(), vec![FloorId(3), FloorId(7)]);
    assert_eq!(engine.statistics().total_capacity, 3);
}
