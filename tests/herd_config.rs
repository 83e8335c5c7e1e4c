use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use herd_monitor::config::{HerdConfig, ENV_KEYS};
use herd_monitor::records::{AttendancePolicy, StorageBackend};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "records_path": "farm/records.csv",
        "storage": { "backend": "csv", "attendance": "count_every_sighting" },
        "api": { "addr": "0.0.0.0:9000" },
        "detector": { "backend": "stub", "species": ["cow", "sheep"] },
        "analysis": { "sample_every": 5, "low_activity_below": 4.0, "restless_above": 30.0 },
        "camera": { "enabled": true, "device": "/dev/video2", "width": 320, "height": 240 },
        "profile": { "name": "Asha", "farm": "Green Acres", "location": "Pune" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("HERD_CONFIG", file.path());
    std::env::set_var("HERD_STORAGE_BACKEND", "sqlite");
    std::env::set_var("HERD_SAMPLE_EVERY", "3");
    std::env::set_var("HERD_FARM_LOCATION", "Nashik");
    std::env::set_var("HERD_CAMERA_DEVICE", "stub://barn");

    let cfg = HerdConfig::load().expect("load config");

    assert_eq!(cfg.records_path, PathBuf::from("farm/records.csv"));
    assert_eq!(cfg.storage_backend, StorageBackend::Sqlite);
    assert_eq!(cfg.attendance, AttendancePolicy::CountEverySighting);
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.detector.species, vec!["cow", "sheep"]);
    assert_eq!(cfg.analysis.sample_every, 3);
    assert_eq!(cfg.analysis.low_activity_below, 4.0);
    assert_eq!(cfg.analysis.restless_above, 30.0);
    assert!(cfg.camera.enabled);
    assert_eq!(cfg.camera.device, "stub://barn");
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.profile.name, "Asha");
    assert_eq!(cfg.profile.location, "Nashik");

    clear_env();
}

#[test]
fn env_alone_overrides_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HERD_RECORDS_PATH", "pen.csv");
    std::env::set_var("HERD_API_ADDR", "127.0.0.1:9999");
    let cfg = HerdConfig::load().expect("load config");
    assert_eq!(cfg.records_path, PathBuf::from("pen.csv"));
    assert_eq!(cfg.api_addr, "127.0.0.1:9999");
    assert_eq!(cfg.analysis.sample_every, 10);
    assert_eq!(cfg.storage_backend, StorageBackend::Csv);

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HERD_SAMPLE_EVERY", "often");
    assert!(HerdConfig::load().is_err());
    clear_env();

    std::env::set_var("HERD_SAMPLE_EVERY", "0");
    assert!(HerdConfig::load().is_err());
    clear_env();

    std::env::set_var("HERD_STORAGE_BACKEND", "postgres");
    assert!(HerdConfig::load().is_err());
    clear_env();

    std::env::set_var("HERD_DETECTOR_BACKEND", "yolo9000");
    let cfg = HerdConfig::load().expect("backend names are checked when the registry is built");
    assert_eq!(cfg.detector.backend, "yolo9000");
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HERD_CONFIG", "/definitely/not/here.json");
    let err = HerdConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
