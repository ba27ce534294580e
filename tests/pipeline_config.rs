use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use gauge_relay::config::{DetectorKind, PipelineConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GAUGE_RELAY_RTSP_URL",
        "GAUGE_RELAY_HTTP_URL",
        "GAUGE_RELAY_BUFFER_SIZE",
        "GAUGE_RELAY_OUTPUT_PORT",
        "GAUGE_RELAY_LOG_LEVEL",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(raw: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(raw.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [system]
        log_level = "debug"

        [receive]
        rtsp_url = "rtsp://camera-1/stream"
        http_url = "http://camera-1/snapshot"
        reconnect_backoff_secs = 5
        read_timeout_ms = 750

        [output]
        port = 9000
        width = 320
        height = 240
        fps = 15

        [[output.channels]]
        name = "detections"

        [[output.channels]]
        name = "ocr"
        mount = "/digits"
        width = 480
        height = 360

        [[output.channels]]
        name = "classification"

        [routing]
        default_task = "classification"
        routes = [{ label = "digital-gauge", task = "ocr" }]
        "#,
    );

    std::env::set_var("GAUGE_RELAY_HTTP_URL", "http://camera-2/snapshot");
    std::env::set_var("GAUGE_RELAY_OUTPUT_PORT", "9100");

    let cfg = PipelineConfig::load(Some(file.path())).expect("load config");

    assert_eq!(cfg.system.log_level, "debug");
    assert_eq!(cfg.receive.rtsp_url, "rtsp://camera-1/stream");
    assert_eq!(cfg.receive.http_url, "http://camera-2/snapshot");
    assert_eq!(cfg.receive.reconnect_backoff, Duration::from_secs(5));
    assert_eq!(cfg.receive.read_timeout, Duration::from_millis(750));
    assert_eq!(cfg.output.port, 9100);

    let ocr = cfg.channel("ocr").unwrap();
    assert_eq!(ocr.mount, "/digits");
    assert_eq!((ocr.width, ocr.height, ocr.fps), (480, 360, 15));
    let detections = cfg.channel("detections").unwrap();
    assert_eq!(detections.mount, "/detections");
    assert_eq!((detections.width, detections.height), (320, 240));

    assert_eq!(
        cfg.routing.routes,
        vec![("digital-gauge".to_string(), "ocr".to_string())]
    );

    clear_env();
}

#[test]
fn missing_explicit_config_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let err = PipelineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.toml"));
}

#[test]
fn malformed_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[receive]\nbuffer_size = 2\n");
    std::env::set_var("GAUGE_RELAY_BUFFER_SIZE", "many");
    let err = PipelineConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("GAUGE_RELAY_BUFFER_SIZE"));

    std::env::set_var("GAUGE_RELAY_BUFFER_SIZE", "0");
    let err = PipelineConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("buffer_size"));

    clear_env();
}

#[test]
fn rejects_route_to_unknown_channel() {
    let err = PipelineConfig::from_toml_str(
        r#"
        [routing]
        routes = [{ label = "analog-gauge", task = "needle" }]
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("needle"));
}

#[test]
fn rejects_missing_detections_channel() {
    let err = PipelineConfig::from_toml_str(
        r#"
        [[output.channels]]
        name = "classification"
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("detections"));
}

#[test]
fn rejects_unknown_sections() {
    assert!(PipelineConfig::from_toml_str("[storage]\npath = \"x\"\n").is_err());
}

#[test]
fn onnx_backend_needs_a_model() {
    let err = PipelineConfig::from_toml_str("[detection]\nbackend = \"onnx\"\n").unwrap_err();
    assert!(err.to_string().contains("model_path"));

    let cfg = PipelineConfig::from_toml_str(
        "[detection]\nbackend = \"onnx\"\nmodel_path = \"models/gauges.onnx\"\n",
    )
    .unwrap();
    assert_eq!(cfg.detection.backend, DetectorKind::Onnx);
}
