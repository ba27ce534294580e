use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::output::ChannelSpec;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config.toml";
pub const DETECTIONS_CHANNEL: &str = "detections";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_FONT_PATH: &str = "fonts/DejaVuSans.ttf";
const DEFAULT_RTSP_URL: &str = "stub://camera";
const DEFAULT_HTTP_URL: &str = "http://localhost:1984/image";
const DEFAULT_BUFFER_SIZE: usize = 1;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_POLL_BACKOFF_SECS: u64 = 3;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_FIRST_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OUTPUT_ADDR: &str = "0.0.0.0";
const DEFAULT_OUTPUT_PORT: u16 = 8555;
const DEFAULT_OUTPUT_WIDTH: u32 = 640;
const DEFAULT_OUTPUT_HEIGHT: u32 = 480;
const DEFAULT_OUTPUT_FPS: u32 = 30;
const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.25;
const DEFAULT_DETECTION_IOU: f32 = 0.45;
const DEFAULT_DETECTION_INPUT: u32 = 640;
const DEFAULT_STUB_LABEL: &str = "digital-gauge";
const DEFAULT_OCR_CONFIDENCE: f32 = 0.8;
const DEFAULT_CLASSIFICATION_IMG_SIZE: u32 = 112;
const DEFAULT_CLASSIFICATION_SHOTS: usize = 20;
const DEFAULT_TASK: &str = "classification";
const DEFAULT_ROUTES: &[(&str, &str)] = &[("digital-gauge", "ocr")];
const DEFAULT_CHANNELS: &[(&str, &str)] = &[
    (DETECTIONS_CHANNEL, "/detections"),
    ("ocr", "/ocr"),
    ("classification", "/classification"),
];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    system: Option<SystemConfigFile>,
    receive: Option<ReceiveConfigFile>,
    output: Option<OutputConfigFile>,
    detection: Option<DetectionConfigFile>,
    ocr: Option<OcrConfigFile>,
    classification: Option<ClassificationConfigFile>,
    routing: Option<RoutingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SystemConfigFile {
    log_level: Option<String>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ReceiveConfigFile {
    rtsp_url: Option<String>,
    http_url: Option<String>,
    buffer_size: Option<usize>,
    reconnect_backoff_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    poll_backoff_secs: Option<u64>,
    read_timeout_ms: Option<u64>,
    first_read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    address: Option<String>,
    port: Option<u16>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    buffer_size: Option<usize>,
    channels: Option<Vec<ChannelConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct ChannelConfigFile {
    name: String,
    mount: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    labels: Option<Vec<String>>,
    stub_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OcrConfigFile {
    model_dir: Option<PathBuf>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassificationConfigFile {
    model_path: Option<PathBuf>,
    dataset_root: Option<PathBuf>,
    img_size: Option<u32>,
    shots: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RoutingConfigFile {
    default_task: Option<String>,
    routes: Option<Vec<RouteConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct RouteConfigFile {
    label: String,
    task: String,
}

/// Which detection backend drives the router.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Stub,
    Onnx,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub system: SystemSettings,
    pub receive: ReceiveSettings,
    pub output: OutputSettings,
    pub detection: DetectionSettings,
    pub ocr: OcrSettings,
    pub classification: ClassificationSettings,
    pub routing: RoutingSettings,
}

#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub log_level: String,
    pub font_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    pub rtsp_url: String,
    pub http_url: String,
    pub buffer_size: usize,
    pub reconnect_backoff: Duration,
    pub poll_interval: Duration,
    pub poll_backoff: Duration,
    pub read_timeout: Duration,
    /// Bound for the first read after each connect (stream negotiation and
    /// first keyframe).
    pub first_read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub address: String,
    pub port: u16,
    pub buffer_size: usize,
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub labels: Vec<String>,
    pub stub_label: String,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub model_dir: Option<PathBuf>,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ClassificationSettings {
    pub model_path: Option<PathBuf>,
    pub dataset_root: Option<PathBuf>,
    pub img_size: u32,
    pub shots: usize,
}

#[derive(Debug, Clone)]
pub struct RoutingSettings {
    pub default_task: String,
    /// `(label, task)` pairs; each task name is also an output channel.
    pub routes: Vec<(String, String)>,
}

impl PipelineConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `configs/config.toml` is
    /// used when present and built-in defaults otherwise. Environment
    /// overrides are applied last, then the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    read_config_file(default_path)?
                } else {
                    PipelineConfigFile::default()
                }
            }
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a TOML document without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file_cfg: PipelineConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file_cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let system = file.system.unwrap_or_default();
        let receive = file.receive.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let ocr = file.ocr.unwrap_or_default();
        let classification = file.classification.unwrap_or_default();
        let routing = file.routing.unwrap_or_default();

        let shared_width = output.width.unwrap_or(DEFAULT_OUTPUT_WIDTH);
        let shared_height = output.height.unwrap_or(DEFAULT_OUTPUT_HEIGHT);
        let shared_fps = output.fps.unwrap_or(DEFAULT_OUTPUT_FPS);
        let channels = match output.channels {
            Some(channels) => channels
                .into_iter()
                .map(|ch| ChannelSpec {
                    mount: ch.mount.unwrap_or_else(|| format!("/{}", ch.name)),
                    name: ch.name,
                    width: ch.width.unwrap_or(shared_width),
                    height: ch.height.unwrap_or(shared_height),
                    fps: ch.fps.unwrap_or(shared_fps),
                })
                .collect(),
            None => DEFAULT_CHANNELS
                .iter()
                .map(|(name, mount)| ChannelSpec {
                    name: name.to_string(),
                    mount: mount.to_string(),
                    width: shared_width,
                    height: shared_height,
                    fps: shared_fps,
                })
                .collect(),
        };

        Self {
            system: SystemSettings {
                log_level: system
                    .log_level
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                font_path: system
                    .font_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT_PATH)),
            },
            receive: ReceiveSettings {
                rtsp_url: receive
                    .rtsp_url
                    .unwrap_or_else(|| DEFAULT_RTSP_URL.to_string()),
                http_url: receive
                    .http_url
                    .unwrap_or_else(|| DEFAULT_HTTP_URL.to_string()),
                buffer_size: receive.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
                reconnect_backoff: Duration::from_secs(
                    receive
                        .reconnect_backoff_secs
                        .unwrap_or(DEFAULT_RECONNECT_BACKOFF_SECS),
                ),
                poll_interval: Duration::from_secs(
                    receive
                        .poll_interval_secs
                        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
                ),
                poll_backoff: Duration::from_secs(
                    receive.poll_backoff_secs.unwrap_or(DEFAULT_POLL_BACKOFF_SECS),
                ),
                read_timeout: Duration::from_millis(
                    receive.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
                first_read_timeout: Duration::from_millis(
                    receive
                        .first_read_timeout_ms
                        .unwrap_or(DEFAULT_FIRST_READ_TIMEOUT_MS),
                ),
            },
            output: OutputSettings {
                address: output
                    .address
                    .unwrap_or_else(|| DEFAULT_OUTPUT_ADDR.to_string()),
                port: output.port.unwrap_or(DEFAULT_OUTPUT_PORT),
                buffer_size: output.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
                channels,
            },
            detection: DetectionSettings {
                backend: detection.backend.unwrap_or(DetectorKind::Stub),
                model_path: detection.model_path,
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_DETECTION_CONFIDENCE),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_DETECTION_IOU),
                input_size: detection.input_size.unwrap_or(DEFAULT_DETECTION_INPUT),
                labels: detection.labels.unwrap_or_default(),
                stub_label: detection
                    .stub_label
                    .unwrap_or_else(|| DEFAULT_STUB_LABEL.to_string()),
            },
            ocr: OcrSettings {
                model_dir: ocr.model_dir,
                confidence_threshold: ocr
                    .confidence_threshold
                    .unwrap_or(DEFAULT_OCR_CONFIDENCE),
            },
            classification: ClassificationSettings {
                model_path: classification.model_path,
                dataset_root: classification.dataset_root,
                img_size: classification
                    .img_size
                    .unwrap_or(DEFAULT_CLASSIFICATION_IMG_SIZE),
                shots: classification.shots.unwrap_or(DEFAULT_CLASSIFICATION_SHOTS),
            },
            routing: RoutingSettings {
                default_task: routing
                    .default_task
                    .unwrap_or_else(|| DEFAULT_TASK.to_string()),
                routes: match routing.routes {
                    Some(routes) => routes.into_iter().map(|r| (r.label, r.task)).collect(),
                    None => DEFAULT_ROUTES
                        .iter()
                        .map(|(label, task)| (label.to_string(), task.to_string()))
                        .collect(),
                },
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("GAUGE_RELAY_RTSP_URL") {
            if !url.trim().is_empty() {
                self.receive.rtsp_url = url;
            }
        }
        if let Ok(url) = std::env::var("GAUGE_RELAY_HTTP_URL") {
            if !url.trim().is_empty() {
                self.receive.http_url = url;
            }
        }
        if let Ok(size) = std::env::var("GAUGE_RELAY_BUFFER_SIZE") {
            self.receive.buffer_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("GAUGE_RELAY_BUFFER_SIZE must be a positive integer"))?;
        }
        if let Ok(port) = std::env::var("GAUGE_RELAY_OUTPUT_PORT") {
            self.output.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("GAUGE_RELAY_OUTPUT_PORT must be a port number"))?;
        }
        if let Ok(level) = std::env::var("GAUGE_RELAY_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.system.log_level = level;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.receive.buffer_size == 0 {
            return Err(anyhow!("receive.buffer_size must be at least 1"));
        }
        if self.output.buffer_size == 0 {
            return Err(anyhow!("output.buffer_size must be at least 1"));
        }
        if self.receive.poll_interval.is_zero() {
            return Err(anyhow!("receive.poll_interval_secs must be greater than zero"));
        }

        let mut names = HashSet::new();
        for channel in &self.output.channels {
            if channel.name.trim().is_empty() {
                return Err(anyhow!("output channel name must not be empty"));
            }
            if !names.insert(channel.name.as_str()) {
                return Err(anyhow!("duplicate output channel '{}'", channel.name));
            }
            if !channel.mount.starts_with('/') {
                return Err(anyhow!(
                    "mount '{}' for channel '{}' must start with '/'",
                    channel.mount,
                    channel.name
                ));
            }
            if channel.width == 0 || channel.height == 0 || channel.fps == 0 {
                return Err(anyhow!(
                    "channel '{}' needs non-zero width, height and fps",
                    channel.name
                ));
            }
        }
        if !names.contains(DETECTIONS_CHANNEL) {
            return Err(anyhow!(
                "output channel '{}' must be configured",
                DETECTIONS_CHANNEL
            ));
        }
        if !names.contains(self.routing.default_task.as_str()) {
            return Err(anyhow!(
                "default task '{}' has no output channel",
                self.routing.default_task
            ));
        }
        for (label, task) in &self.routing.routes {
            if !names.contains(task.as_str()) {
                return Err(anyhow!(
                    "route '{}' -> '{}' targets an unknown channel",
                    label,
                    task
                ));
            }
        }
        if self.detection.backend == DetectorKind::Onnx && self.detection.model_path.is_none() {
            return Err(anyhow!("detection.model_path is required for the onnx backend"));
        }
        Ok(())
    }

    /// Look up a configured output channel.
    pub fn channel(&self, name: &str) -> Option<&ChannelSpec> {
        self.output.channels.iter().find(|ch| ch.name == name)
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.receive.buffer_size, 1);
        assert_eq!(cfg.receive.reconnect_backoff, Duration::from_secs(3));
        assert_eq!(cfg.receive.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.output.channels.len(), 3);
        assert_eq!(cfg.channel("ocr").unwrap().mount, "/ocr");
        assert_eq!(cfg.routing.default_task, "classification");
        assert_eq!(
            cfg.routing.routes,
            vec![("digital-gauge".to_string(), "ocr".to_string())]
        );
    }

    #[test]
    fn channel_inherits_shared_dimensions() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [output]
            width = 320
            height = 240
            fps = 15

            [[output.channels]]
            name = "detections"

            [[output.channels]]
            name = "classification"
            mount = "/cls"
            width = 224
            height = 224
            "#,
        )
        .unwrap();
        let detections = cfg.channel("detections").unwrap();
        assert_eq!(detections.mount, "/detections");
        assert_eq!((detections.width, detections.height, detections.fps), (320, 240, 15));
        let cls = cfg.channel("classification").unwrap();
        assert_eq!((cls.width, cls.height, cls.fps), (224, 224, 15));
    }

    #[test]
    fn rejects_zero_buffer() {
        let err = PipelineConfig::from_toml_str("[receive]\nbuffer_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("buffer_size"));
    }

    #[test]
    fn rejects_route_to_unknown_channel() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[routing.routes]]
            label = "analog-gauge"
            task = "analog"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("analog"));
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
    fn onnx_backend_requires_model() {
        assert!(PipelineConfig::from_toml_str("[detection]\nbackend = \"onnx\"\n").is_err());
    }
}
