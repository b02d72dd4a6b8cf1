use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use multicam_acquire::config::AcquireConfig;
use multicam_acquire::ingest::{DeviceKind, SyntheticBehavior};
use multicam_acquire::PresentationSize;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MULTICAM_CONFIG",
        "MULTICAM_PACKET_SIZE",
        "MULTICAM_LINK_SPEED_GBPS",
        "MULTICAM_RETRIEVE_TIMEOUT_MS",
        "MULTICAM_DISPLAY_SIZE",
        "MULTICAM_CAMERAS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AcquireConfig::load().expect("load config");
    assert_eq!(cfg.pacing.packet_size_bytes, 9000);
    assert_eq!(cfg.pacing.link_speed_gbps, 1.0);
    assert_eq!(cfg.retrieve_timeout, Duration::from_millis(1000));
    assert_eq!(cfg.poll_interval, Duration::from_millis(100));
    assert!(cfg.gev_only);
    assert_eq!(cfg.display, PresentationSize::default());
    assert_eq!(cfg.cameras.len(), 3);
    for camera in &cfg.cameras {
        assert_eq!(camera.pixel_format, "BayerRG12");
        assert_eq!((camera.width, camera.height, camera.fps), (640, 480, 15));
        assert_eq!(camera.kind, DeviceKind::Gev);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "pacing": { "packet_size_bytes": 1500, "link_speed_gbps": 10.0 },
        "acquisition": { "retrieve_timeout_ms": 250, "gev_only": false },
        "display": { "width": 640, "height": 360 },
        "cameras": [
            { "connection_id": "left", "pixel_format": "BayerGR8", "fps": 30 },
            { "connection_id": "right", "transport": "usb3", "behavior": "stall", "source": "Source1" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MULTICAM_CONFIG", file.path());
    std::env::set_var("MULTICAM_RETRIEVE_TIMEOUT_MS", "500");
    std::env::set_var("MULTICAM_DISPLAY_SIZE", "1280x720");

    let cfg = AcquireConfig::load().expect("load config");
    assert_eq!(cfg.pacing.packet_size_bytes, 1500);
    assert_eq!(cfg.pacing.link_speed_gbps, 10.0);
    assert_eq!(cfg.retrieve_timeout, Duration::from_millis(500));
    assert!(!cfg.gev_only);
    assert_eq!(
        cfg.display,
        PresentationSize {
            width: 1280,
            height: 720
        }
    );
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].connection_id, "left");
    assert_eq!(cfg.cameras[0].pixel_format, "BayerGR8");
    assert_eq!(cfg.cameras[0].fps, 30);
    assert_eq!(cfg.cameras[1].kind, DeviceKind::Usb3);
    assert_eq!(cfg.cameras[1].behavior, SyntheticBehavior::Stall);
    assert_eq!(cfg.cameras[1].source.as_deref(), Some("Source1"));

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [pacing]
        packet_size_bytes = 8000

        [[cameras]]
        connection_id = "only"
        width = 320
        height = 240
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = AcquireConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.pacing.packet_size_bytes, 8000);
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!((cfg.cameras[0].width, cfg.cameras[0].height), (320, 240));
    assert_eq!(cfg.cameras[0].pixel_format, "BayerRG12");
}

#[test]
fn camera_count_env_resizes_list() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MULTICAM_CAMERAS", "5");
    let cfg = AcquireConfig::load().expect("load config");
    assert_eq!(cfg.cameras.len(), 5);
    assert_eq!(cfg.cameras[4].connection_id, "cam4");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MULTICAM_PACKET_SIZE", "0");
    let err = AcquireConfig::load().expect_err("zero packet size");
    assert!(err.to_string().contains("packet size"));
    clear_env();

    std::env::set_var("MULTICAM_LINK_SPEED_GBPS", "fast");
    assert!(AcquireConfig::load().is_err());
    clear_env();

    std::env::set_var("MULTICAM_RETRIEVE_TIMEOUT_MS", "0");
    assert!(AcquireConfig::load().is_err());
    clear_env();

    std::env::set_var("MULTICAM_DISPLAY_SIZE", "0x600");
    assert!(AcquireConfig::load().is_err());
    clear_env();

    std::env::set_var("MULTICAM_CAMERAS", "256");
    assert!(AcquireConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_duplicate_camera_ids() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "cameras": [ { "connection_id": "a" }, { "connection_id": "a" } ] }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    let err = AcquireConfig::load_from(Some(file.path())).expect_err("duplicate ids");
    assert!(err.to_string().contains("duplicate camera connection id 'a'"));
}

#[test]
fn reports_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    let err = AcquireConfig::load_from(Some(file.path())).expect_err("malformed config");
    assert!(err.to_string().starts_with("invalid config file"));
}
