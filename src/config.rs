use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::class_id_for_name;

const DEFAULT_CAMERA_URL: &str = "http://127.0.0.1:8080/video";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_CLASS: &str = "person";
const DEFAULT_DEVICE_LABEL: &str = "CPU";
const DEFAULT_EVERY_NTH_FRAME: u64 = 3;
const DEFAULT_MIN_INFERENCE_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_INFERENCE_WIDTH: u32 = 640;
const DEFAULT_MAX_AGE_MS: u64 = 1_500;
const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_STREAM_INTERVAL_MS: u64 = 33;
const DEFAULT_LOOP_INTERVAL_MS: u64 = 33;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct SkydraConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    inference: Option<InferenceConfigFile>,
    tracking: Option<TrackingConfigFile>,
    api: Option<ApiConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<String>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    classes: Option<Vec<String>>,
    device_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    every_nth_frame: Option<u64>,
    min_interval_ms: Option<u64>,
    max_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    max_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    stream_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    loop_interval_ms: Option<u64>,
    reconnect_backoff_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct SkydraConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub inference: InferenceSettings,
    pub max_detection_age: Duration,
    pub api_addr: String,
    pub stream_interval: Duration,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<String>,
    pub input_size: u32,
    pub confidence: f32,
    pub classes: Vec<String>,
    pub device_label: String,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub every_nth_frame: u64,
    pub min_interval: Duration,
    pub max_width: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub loop_interval: Duration,
    pub reconnect_backoff: Duration,
    pub stop_timeout: Duration,
}

impl Default for SkydraConfig {
    fn default() -> Self {
        // Defaults cannot fail to resolve.
        Self::from_file(SkydraConfigFile::default())
    }
}

impl SkydraConfig {
    /// Load configuration from `SKYDRA_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SKYDRA_CONFIG").ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load configuration from an explicit file path, then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SkydraConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SkydraConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let inference = file.inference.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();

        Self {
            camera: CameraSettings {
                url: camera
                    .url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                connect_timeout: Duration::from_millis(
                    camera
                        .connect_timeout_ms
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                ),
                read_timeout: Duration::from_millis(
                    camera.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                classes: detector
                    .classes
                    .unwrap_or_else(|| vec![DEFAULT_CLASS.to_string()]),
                device_label: detector
                    .device_label
                    .unwrap_or_else(|| DEFAULT_DEVICE_LABEL.to_string()),
            },
            inference: InferenceSettings {
                every_nth_frame: inference
                    .every_nth_frame
                    .unwrap_or(DEFAULT_EVERY_NTH_FRAME),
                min_interval: Duration::from_millis(
                    inference
                        .min_interval_ms
                        .unwrap_or(DEFAULT_MIN_INFERENCE_INTERVAL_MS),
                ),
                max_width: inference.max_width.unwrap_or(DEFAULT_MAX_INFERENCE_WIDTH),
            },
            max_detection_age: Duration::from_millis(
                tracking.max_age_ms.unwrap_or(DEFAULT_MAX_AGE_MS),
            ),
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            stream_interval: Duration::from_millis(
                api.stream_interval_ms.unwrap_or(DEFAULT_STREAM_INTERVAL_MS),
            ),
            pipeline: PipelineSettings {
                loop_interval: Duration::from_millis(
                    pipeline.loop_interval_ms.unwrap_or(DEFAULT_LOOP_INTERVAL_MS),
                ),
                reconnect_backoff: Duration::from_millis(
                    pipeline
                        .reconnect_backoff_ms
                        .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
                ),
                stop_timeout: Duration::from_millis(
                    pipeline.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SKYDRA_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(addr) = std::env::var("SKYDRA_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(backend) = std::env::var("SKYDRA_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("SKYDRA_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(path);
            }
        }
        if let Ok(classes) = std::env::var("SKYDRA_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detector.classes = parsed;
            }
        }
        if let Ok(confidence) = std::env::var("SKYDRA_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SKYDRA_CONFIDENCE must be a number between 0 and 1"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!(
                "detector confidence must be within [0, 1], got {}",
                self.detector.confidence
            ));
        }
        if self.detector.classes.is_empty() {
            return Err(anyhow!("detector class filter must name at least one class"));
        }
        self.detector.classes = self
            .detector
            .classes
            .iter()
            .map(|class| class.trim().to_lowercase())
            .collect();
        for class in &self.detector.classes {
            if class_id_for_name(class).is_none() {
                return Err(anyhow!("unknown detector class '{}'", class));
            }
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if self.inference.every_nth_frame == 0 {
            return Err(anyhow!("inference every_nth_frame must be greater than zero"));
        }
        if self.inference.max_width == 0 {
            return Err(anyhow!("inference max_width must be greater than zero"));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("tract backend requires detector.model_path"));
        }
        Ok(())
    }

    /// Class ids for the configured class filter. Names were checked in `validate`.
    pub fn class_filter(&self) -> Vec<usize> {
        self.detector
            .classes
            .iter()
            .filter_map(|name| class_id_for_name(name))
            .collect()
    }
}

fn read_config_file(path: &Path) -> Result<SkydraConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
