use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::display::PresentationSize;
use crate::ingest::{DeviceKind, SyntheticBehavior, SyntheticCameraConfig};
use crate::orchestrator::OrchestratorConfig;
use crate::pacing::{PacingParams, DEFAULT_LINK_SPEED_GBPS, DEFAULT_PACKET_SIZE_BYTES};
use crate::session::SessionConfig;

const DEFAULT_RETRIEVE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DISPLAY_WIDTH: u32 = 800;
const DEFAULT_DISPLAY_HEIGHT: u32 = 600;
const DEFAULT_CAMERA_COUNT: usize = 3;
const DEFAULT_CAMERA_PIXEL_FORMAT: &str = "BayerRG12";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const MAX_CAMERAS: usize = 255;

#[derive(Debug, Deserialize, Default)]
struct AcquireConfigFile {
    pacing: Option<PacingConfigFile>,
    acquisition: Option<AcquisitionConfigFile>,
    display: Option<DisplayConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct PacingConfigFile {
    packet_size_bytes: Option<u32>,
    link_speed_gbps: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AcquisitionConfigFile {
    retrieve_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    gev_only: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    connection_id: Option<String>,
    pixel_format: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    source: Option<String>,
    transport: Option<String>,
    behavior: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AcquireConfig {
    pub pacing: PacingParams,
    pub retrieve_timeout: Duration,
    pub poll_interval: Duration,
    pub gev_only: bool,
    pub display: PresentationSize,
    /// Devices served by the synthetic backend.
    pub cameras: Vec<SyntheticCameraConfig>,
}

impl AcquireConfig {
    /// Load from the file named by `MULTICAM_CONFIG` (if any), then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MULTICAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AcquireConfigFile) -> Result<Self> {
        let pacing = PacingParams {
            packet_size_bytes: file
                .pacing
                .as_ref()
                .and_then(|pacing| pacing.packet_size_bytes)
                .unwrap_or(DEFAULT_PACKET_SIZE_BYTES),
            link_speed_gbps: file
                .pacing
                .as_ref()
                .and_then(|pacing| pacing.link_speed_gbps)
                .unwrap_or(DEFAULT_LINK_SPEED_GBPS),
        };
        let retrieve_timeout = Duration::from_millis(
            file.acquisition
                .as_ref()
                .and_then(|acq| acq.retrieve_timeout_ms)
                .unwrap_or(DEFAULT_RETRIEVE_TIMEOUT_MS),
        );
        let poll_interval = Duration::from_millis(
            file.acquisition
                .as_ref()
                .and_then(|acq| acq.poll_interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );
        let gev_only = file
            .acquisition
            .as_ref()
            .and_then(|acq| acq.gev_only)
            .unwrap_or(true);
        let display = PresentationSize {
            width: file
                .display
                .as_ref()
                .and_then(|display| display.width)
                .unwrap_or(DEFAULT_DISPLAY_WIDTH),
            height: file
                .display
                .as_ref()
                .and_then(|display| display.height)
                .unwrap_or(DEFAULT_DISPLAY_HEIGHT),
        };
        let cameras = match file.cameras {
            Some(cameras) => cameras
                .into_iter()
                .enumerate()
                .map(|(index, camera)| camera_from_file(index, camera))
                .collect::<Result<Vec<_>>>()?,
            None => (0..DEFAULT_CAMERA_COUNT).map(default_camera).collect(),
        };
        Ok(Self {
            pacing,
            retrieve_timeout,
            poll_interval,
            gev_only,
            display,
            cameras,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(size) = std::env::var("MULTICAM_PACKET_SIZE") {
            self.pacing.packet_size_bytes = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("MULTICAM_PACKET_SIZE must be an integer number of bytes"))?;
        }
        if let Ok(speed) = std::env::var("MULTICAM_LINK_SPEED_GBPS") {
            self.pacing.link_speed_gbps = speed
                .trim()
                .parse()
                .map_err(|_| anyhow!("MULTICAM_LINK_SPEED_GBPS must be a number"))?;
        }
        if let Ok(timeout) = std::env::var("MULTICAM_RETRIEVE_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("MULTICAM_RETRIEVE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.retrieve_timeout = Duration::from_millis(millis);
        }
        if let Ok(size) = std::env::var("MULTICAM_DISPLAY_SIZE") {
            if !size.trim().is_empty() {
                self.display = parse_display_size(&size)?;
            }
        }
        if let Ok(count) = std::env::var("MULTICAM_CAMERAS") {
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("MULTICAM_CAMERAS must be an integer"))?;
            self.set_camera_count(count);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pacing.packet_size_bytes == 0 {
            return Err(anyhow!("packet size must be greater than zero"));
        }
        if !self.pacing.link_speed_gbps.is_finite() || self.pacing.link_speed_gbps <= 0.0 {
            return Err(anyhow!("link speed must be a positive number of Gbps"));
        }
        if self.retrieve_timeout.is_zero() {
            return Err(anyhow!("retrieve timeout must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display size must be non-zero"));
        }
        if self.cameras.len() > MAX_CAMERAS {
            return Err(anyhow!("at most {} cameras are supported", MAX_CAMERAS));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.connection_id.as_str()) {
                return Err(anyhow!(
                    "duplicate camera connection id '{}'",
                    camera.connection_id
                ));
            }
            if camera.width == 0 || camera.height == 0 || camera.fps == 0 {
                return Err(anyhow!(
                    "camera '{}' needs non-zero width, height and fps",
                    camera.connection_id
                ));
            }
        }
        Ok(())
    }

    /// Shrink or grow the synthetic camera list; new entries use the defaults.
    pub fn set_camera_count(&mut self, count: usize) {
        if count <= self.cameras.len() {
            self.cameras.truncate(count);
            return;
        }
        let start = self.cameras.len();
        self.cameras.extend((start..count).map(default_camera));
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            pacing: self.pacing,
            session: SessionConfig {
                retrieve_timeout: self.retrieve_timeout,
                fill_poll: self.poll_interval,
                presentation: self.display,
            },
            gev_only: self.gev_only,
            poll_interval: self.poll_interval,
        }
    }
}

fn default_camera(index: usize) -> SyntheticCameraConfig {
    SyntheticCameraConfig::new(format!("cam{index}"))
        .with_pixel_format(DEFAULT_CAMERA_PIXEL_FORMAT)
        .with_size(DEFAULT_CAMERA_WIDTH, DEFAULT_CAMERA_HEIGHT)
        .with_fps(DEFAULT_CAMERA_FPS)
}

fn camera_from_file(index: usize, file: CameraConfigFile) -> Result<SyntheticCameraConfig> {
    let mut camera = default_camera(index);
    if let Some(id) = file.connection_id {
        camera.connection_id = id;
    }
    if let Some(pixel_format) = file.pixel_format {
        camera.pixel_format = pixel_format;
    }
    camera.width = file.width.unwrap_or(camera.width);
    camera.height = file.height.unwrap_or(camera.height);
    camera.fps = file.fps.unwrap_or(camera.fps);
    camera.source = file.source;
    if let Some(transport) = file.transport.as_deref() {
        camera.kind = parse_transport(transport)?;
    }
    if let Some(behavior) = file.behavior.as_deref() {
        camera.behavior = parse_behavior(behavior)?;
    }
    Ok(camera)
}

fn parse_transport(value: &str) -> Result<DeviceKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "gev" | "gige" => Ok(DeviceKind::Gev),
        "usb3" | "u3v" => Ok(DeviceKind::Usb3),
        other => Err(anyhow!("unknown camera transport '{}'", other)),
    }
}

fn parse_behavior(value: &str) -> Result<SyntheticBehavior> {
    match value.trim().to_ascii_lowercase().as_str() {
        "normal" => Ok(SyntheticBehavior::Normal),
        "stall" => Ok(SyntheticBehavior::Stall),
        "empty-frames" => Ok(SyntheticBehavior::EmptyFrames),
        "fail-bind" => Ok(SyntheticBehavior::FailBind),
        "reject-pixel-format" => Ok(SyntheticBehavior::RejectPixelFormat),
        "fail-connect" => Ok(SyntheticBehavior::FailConnect),
        other => Err(anyhow!("unknown camera behavior '{}'", other)),
    }
}

fn parse_display_size(value: &str) -> Result<PresentationSize> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("MULTICAM_DISPLAY_SIZE must look like 800x600"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("MULTICAM_DISPLAY_SIZE must look like 800x600"))
    };
    Ok(PresentationSize {
        width: parse(width)?,
        height: parse(height)?,
    })
}

fn read_config_file(path: &Path) -> Result<AcquireConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
