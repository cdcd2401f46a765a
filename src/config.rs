use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::controller::{SendPolicy, TimingConfig};
use crate::frame::{DEFAULT_JPEG_QUALITY, DEFAULT_NAME_PREFIX};
use crate::ingest::CameraConfig;
use crate::secs_to_duration;
use crate::transport::{validate_endpoint_url, UploaderConfig};
use crate::uplink::UplinkSettings;

pub const CONFIG_ENV: &str = "MOTION_UPLINK_CONFIG";

const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_ACTIVE_DURATION_SECS: f64 = 120.0;
const DEFAULT_FRAME_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_MOTION_DEBOUNCE_SECS: f64 = 5.0;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_WARMUP_SECS: f64 = 1.0;
const DEFAULT_MOTION_SOURCE: &str = "/sys/class/gpio/gpio4/value";
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct UplinkConfigFile {
    endpoint: Option<EndpointConfigFile>,
    timing: Option<TimingConfigFile>,
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    upload: Option<UploadConfigFile>,
    #[serde(rename = "loop")]
    poll: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EndpointConfigFile {
    url: Option<String>,
    timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimingConfigFile {
    active_duration_secs: Option<f64>,
    frame_interval_secs: Option<f64>,
    motion_debounce_secs: Option<f64>,
    send_policy: Option<SendPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    warmup_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    source: Option<String>,
    active_low: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct UploadConfigFile {
    name_prefix: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoopConfigFile {
    poll_interval_ms: Option<u64>,
    status_interval_secs: Option<u64>,
}

/// Values that take precedence over both the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub camera: Option<String>,
    pub motion: Option<String>,
}

/// Fully resolved configuration for the uplink daemon.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub endpoint_url: String,
    pub upload_timeout: Duration,
    pub timing: TimingConfig,
    pub camera: CameraConfig,
    pub warmup: Duration,
    pub motion: MotionSettings,
    pub name_prefix: String,
    pub jpeg_quality: u8,
    pub poll_interval: Duration,
    pub status_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    /// GPIO value file path, or a `stub://` synthetic source.
    pub source: String,
    pub active_low: bool,
}

impl UplinkConfig {
    /// Load from `$MOTION_UPLINK_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &ConfigOverrides::default())
    }

    /// Like `load_from`, with command-line overrides applied after the environment.
    pub fn load_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => UplinkConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: UplinkConfigFile) -> Result<Self> {
        let endpoint = file.endpoint.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let poll = file.poll.unwrap_or_default();

        Ok(Self {
            // An empty URL is caught by validate() unless the env supplies one.
            endpoint_url: endpoint.url.unwrap_or_default(),
            upload_timeout: secs_to_duration(
                "endpoint.timeout_secs",
                endpoint.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            )?,
            timing: TimingConfig {
                active_duration: secs_to_duration(
                    "timing.active_duration_secs",
                    timing
                        .active_duration_secs
                        .unwrap_or(DEFAULT_ACTIVE_DURATION_SECS),
                )?,
                frame_interval: secs_to_duration(
                    "timing.frame_interval_secs",
                    timing
                        .frame_interval_secs
                        .unwrap_or(DEFAULT_FRAME_INTERVAL_SECS),
                )?,
                motion_debounce: secs_to_duration(
                    "timing.motion_debounce_secs",
                    timing
                        .motion_debounce_secs
                        .unwrap_or(DEFAULT_MOTION_DEBOUNCE_SECS),
                )?,
                send_policy: timing.send_policy.unwrap_or_default(),
            },
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            warmup: secs_to_duration(
                "camera.warmup_secs",
                camera.warmup_secs.unwrap_or(DEFAULT_WARMUP_SECS),
            )?,
            motion: MotionSettings {
                source: motion
                    .source
                    .unwrap_or_else(|| DEFAULT_MOTION_SOURCE.to_string()),
                active_low: motion.active_low.unwrap_or(false),
            },
            name_prefix: upload
                .name_prefix
                .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string()),
            jpeg_quality: upload.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            poll_interval: Duration::from_millis(
                poll.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            status_interval: Duration::from_secs(
                poll.status_interval_secs
                    .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("MOTION_UPLINK_URL") {
            if !url.trim().is_empty() {
                self.endpoint_url = url.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("MOTION_UPLINK_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(source) = std::env::var("MOTION_UPLINK_MOTION_SOURCE") {
            if !source.trim().is_empty() {
                self.motion.source = source;
            }
        }
        if let Some(value) = env_secs("MOTION_UPLINK_ACTIVE_SECS")? {
            self.timing.active_duration = value;
        }
        if let Some(value) = env_secs("MOTION_UPLINK_FRAME_INTERVAL_SECS")? {
            self.timing.frame_interval = value;
        }
        if let Some(value) = env_secs("MOTION_UPLINK_DEBOUNCE_SECS")? {
            self.timing.motion_debounce = value;
        }
        if let Ok(raw) = std::env::var("MOTION_UPLINK_SEND_POLICY") {
            if !raw.trim().is_empty() {
                let Some(policy) = SendPolicy::parse(&raw) else {
                    return Err(anyhow!(
                        "MOTION_UPLINK_SEND_POLICY must be on_success or on_attempt (got {})",
                        raw
                    ));
                };
                self.timing.send_policy = policy;
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.url {
            self.endpoint_url = url.trim().to_string();
        }
        if let Some(device) = &overrides.camera {
            self.camera.device = device.clone();
        }
        if let Some(source) = &overrides.motion {
            self.motion.source = source.clone();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(anyhow!(
                "upload endpoint url must be set (endpoint.url or MOTION_UPLINK_URL)"
            ));
        }
        validate_endpoint_url(&self.endpoint_url)?;
        if self.upload_timeout.is_zero() {
            return Err(anyhow!("endpoint.timeout_secs must be greater than zero"));
        }
        if self.timing.active_duration.is_zero() {
            return Err(anyhow!(
                "timing.active_duration_secs must be greater than zero"
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "upload.jpeg_quality must be within 1..=100 (got {})",
                self.jpeg_quality
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera dimensions must be non-zero (got {}x{})",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.motion.source.trim().is_empty() {
            return Err(anyhow!("motion.source must not be empty"));
        }
        Ok(())
    }

    pub fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            url: self.endpoint_url.clone(),
            timeout: self.upload_timeout,
        }
    }

    pub fn uplink_settings(&self) -> UplinkSettings {
        UplinkSettings {
            name_prefix: self.name_prefix.clone(),
            jpeg_quality: self.jpeg_quality,
            poll_interval: self.poll_interval,
            status_interval: self.status_interval,
            max_uploads: None,
        }
    }
}

fn read_config_file(path: &Path) -> Result<UplinkConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be a number of seconds", key))?;
    secs_to_duration(key, secs).map(Some)
}
