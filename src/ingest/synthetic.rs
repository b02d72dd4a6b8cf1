//! In-memory devices for tests and the demo binary.
//!
//! A `SyntheticCamera` behaves like a GigE Vision (or USB3) camera as far as the
//! acquisition core can tell: it has a parameter map, accepts `AcquisitionStart` and
//! `AcquisitionStop`, and its `SyntheticStream` produces frames at a fixed rate in the
//! device's current pixel format, only while both the streaming path is enabled and
//! acquisition has been started.
//!
//! Every command and parameter write is appended to a shared `CommandLog` so tests
//! can observe ordering across devices.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{features, ConnectionId, Device, DeviceDiscovery, DeviceInfo, DeviceKind, Stream};
use crate::error::{DeviceError, StreamError};
use crate::frame::{FrameInfo, PixelType};
use crate::ingest::pixel_format::{BaseFormat, PixelDescriptor};

const FLAG_POLL: Duration = Duration::from_millis(2);

static NEXT_PORT: AtomicU16 = AtomicU16::new(49152);

/// Failure injection for a synthetic camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyntheticBehavior {
    #[default]
    Normal,
    /// Every fill times out.
    Stall,
    /// Frames arrive with a zero-size payload.
    EmptyFrames,
    /// Stream open fails.
    FailBind,
    /// Pixel format writes are rejected.
    RejectPixelFormat,
    /// Discovery finds the device but connecting fails.
    FailConnect,
}

#[derive(Clone, Debug)]
pub struct SyntheticCameraConfig {
    pub connection_id: String,
    pub kind: DeviceKind,
    pub source: Option<String>,
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub behavior: SyntheticBehavior,
}

impl SyntheticCameraConfig {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            kind: DeviceKind::Gev,
            source: None,
            pixel_format: "BayerRG12".to_string(),
            width: 64,
            height: 48,
            fps: 30,
            behavior: SyntheticBehavior::Normal,
        }
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = pixel_format.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_behavior(mut self, behavior: SyntheticBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

// ----------------------------------------------------------------------------
// CommandLog
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CommandRecord {
    pub device: String,
    pub action: String,
    pub at: Instant,
}

/// Shared, append-only record of device interactions.
#[derive(Clone, Debug, Default)]
pub struct CommandLog {
    records: Arc<Mutex<Vec<CommandRecord>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, device: &str, action: impl Into<String>) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(CommandRecord {
            device: device.to_string(),
            action: action.into(),
            at: Instant::now(),
        });
    }

    pub fn records(&self) -> Vec<CommandRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Actions recorded for one device, in order.
    pub fn actions_for(&self, device: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| record.device == device)
            .map(|record| record.action)
            .collect()
    }

    /// How many times `action` was recorded across all devices.
    pub fn count(&self, action: &str) -> usize {
        self.records()
            .iter()
            .filter(|record| record.action == action)
            .count()
    }

    pub fn first(&self, device: &str, action: &str) -> Option<Instant> {
        self.records()
            .into_iter()
            .find(|record| record.device == device && record.action == action)
            .map(|record| record.at)
    }
}

// ----------------------------------------------------------------------------
// SyntheticCamera
// ----------------------------------------------------------------------------

/// State shared between a camera and the streams it created.
#[derive(Debug)]
struct SharedState {
    pixel_format: Mutex<String>,
    streaming: AtomicBool,
    capturing: AtomicBool,
}

impl SharedState {
    fn pixel_format(&self) -> String {
        self.pixel_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn producing(&self) -> bool {
        self.streaming.load(Ordering::Acquire) && self.capturing.load(Ordering::Acquire)
    }
}

pub struct SyntheticCamera {
    config: SyntheticCameraConfig,
    state: Arc<SharedState>,
    integers: HashMap<String, i64>,
    source_selector: Option<String>,
    log: CommandLog,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig, log: CommandLog) -> Self {
        let mut integers = HashMap::new();
        integers.insert("Width".to_string(), config.width as i64);
        integers.insert("Height".to_string(), config.height as i64);
        if config.kind.is_network() {
            integers.insert(features::PACKET_DELAY.to_string(), 0);
        }
        Self {
            state: Arc::new(SharedState {
                pixel_format: Mutex::new(config.pixel_format.clone()),
                streaming: AtomicBool::new(false),
                capturing: AtomicBool::new(false),
            }),
            integers,
            source_selector: config.source.clone(),
            config,
            log,
        }
    }

    fn name(&self) -> &str {
        &self.config.connection_id
    }
}

/// Bytes per pixel for a format name; deeper formats use 16-bit containers.
fn bytes_per_pixel(pixel_format: &str) -> usize {
    match PixelDescriptor::parse(pixel_format) {
        Ok(descriptor) => {
            let channels = match descriptor.base_format {
                BaseFormat::Rgb | BaseFormat::Bgr => 3,
                _ => 1,
            };
            channels * (descriptor.bit_depth as usize).div_ceil(8)
        }
        Err(_) => 1,
    }
}

impl Device for SyntheticCamera {
    fn kind(&self) -> DeviceKind {
        self.config.kind
    }

    fn get_integer(&mut self, name: &str) -> Result<i64, DeviceError> {
        self.integers
            .get(name)
            .copied()
            .ok_or_else(|| DeviceError::UnknownParameter(name.to_string()))
    }

    fn set_integer(&mut self, name: &str, value: i64) -> Result<(), DeviceError> {
        let slot = self
            .integers
            .get_mut(name)
            .ok_or_else(|| DeviceError::UnknownParameter(name.to_string()))?;
        *slot = value;
        self.log.record(&self.config.connection_id, format!("{name}={value}"));
        Ok(())
    }

    fn get_enum(&mut self, name: &str) -> Result<String, DeviceError> {
        match name {
            features::PIXEL_FORMAT => Ok(self.state.pixel_format()),
            features::SOURCE_SELECTOR => self
                .source_selector
                .clone()
                .ok_or_else(|| DeviceError::UnknownParameter(name.to_string())),
            _ => Err(DeviceError::UnknownParameter(name.to_string())),
        }
    }

    fn set_enum(&mut self, name: &str, value: &str) -> Result<(), DeviceError> {
        match name {
            features::PIXEL_FORMAT => {
                if self.config.behavior == SyntheticBehavior::RejectPixelFormat {
                    return Err(DeviceError::Rejected {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                *self
                    .state
                    .pixel_format
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = value.to_string();
            }
            features::SOURCE_SELECTOR => self.source_selector = Some(value.to_string()),
            _ => return Err(DeviceError::UnknownParameter(name.to_string())),
        }
        self.log.record(self.name(), format!("{name}={value}"));
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<(), DeviceError> {
        match command {
            features::ACQUISITION_START => self.state.capturing.store(true, Ordering::Release),
            features::ACQUISITION_STOP => self.state.capturing.store(false, Ordering::Release),
            _ => return Err(DeviceError::Command(command.to_string())),
        }
        self.log.record(self.name(), command);
        Ok(())
    }

    fn stream_enable(&mut self) -> Result<(), DeviceError> {
        self.state.streaming.store(true, Ordering::Release);
        self.log.record(self.name(), "StreamEnable");
        Ok(())
    }

    fn stream_disable(&mut self) -> Result<(), DeviceError> {
        self.state.streaming.store(false, Ordering::Release);
        self.log.record(self.name(), "StreamDisable");
        Ok(())
    }

    fn set_stream_destination(
        &mut self,
        endpoint: SocketAddr,
        channel: u32,
    ) -> Result<(), DeviceError> {
        if !self.config.kind.is_network() {
            return Err(DeviceError::UnknownParameter(
                "GevSCDA".to_string(),
            ));
        }
        self.log
            .record(self.name(), format!("Destination[{channel}]={endpoint}"));
        Ok(())
    }

    fn payload_size(&mut self) -> Result<u64, DeviceError> {
        let pixels = self.config.width as u64 * self.config.height as u64;
        Ok(pixels * bytes_per_pixel(&self.state.pixel_format()) as u64)
    }

    fn create_stream(&self) -> Box<dyn Stream> {
        Box::new(SyntheticStream {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            log: self.log.clone(),
            open: false,
            local: match self.config.kind {
                DeviceKind::Gev => Some(SocketAddr::from((
                    [127, 0, 0, 1],
                    NEXT_PORT.fetch_add(1, Ordering::Relaxed),
                ))),
                DeviceKind::Usb3 => None,
            },
            last_frame_at: None,
            block_id: 0,
        })
    }
}

// ----------------------------------------------------------------------------
// SyntheticStream
// ----------------------------------------------------------------------------

pub struct SyntheticStream {
    config: SyntheticCameraConfig,
    state: Arc<SharedState>,
    log: CommandLog,
    open: bool,
    local: Option<SocketAddr>,
    last_frame_at: Option<Instant>,
    block_id: u64,
}

impl SyntheticStream {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64)
    }

    /// Wait until the device is producing and the next frame is due, or `deadline`.
    fn wait_for_frame(&self, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            if self.state.producing() {
                let due = self
                    .last_frame_at
                    .map_or(now, |last| last + self.frame_interval());
                if due <= now {
                    return true;
                }
                if due > deadline {
                    std::thread::sleep(deadline.saturating_duration_since(now));
                    return false;
                }
                std::thread::sleep(due - now);
                continue;
            }
            if now >= deadline {
                return false;
            }
            std::thread::sleep(FLAG_POLL.min(deadline - now));
        }
    }

    fn generate(&mut self, buffer: &mut [u8]) -> FrameInfo {
        let pixel_format = self.state.pixel_format();
        let width = self.config.width as usize;
        let len = if self.config.behavior == SyntheticBehavior::EmptyFrames {
            0
        } else {
            (width * self.config.height as usize * bytes_per_pixel(&pixel_format)).min(buffer.len())
        };

        // Diagonal gradient drifting one step per frame.
        let shift = self.block_id as usize;
        for (i, byte) in buffer[..len].iter_mut().enumerate() {
            let x = i % width.max(1);
            let y = i / width.max(1);
            *byte = ((x + y + shift) % 256) as u8;
        }

        FrameInfo {
            pixel_type: PixelType::from_name(&pixel_format),
            width: self.config.width,
            height: self.config.height,
            len,
            block_id: self.block_id,
        }
    }
}

impl Stream for SyntheticStream {
    fn open(&mut self, connection_id: &ConnectionId) -> Result<(), StreamError> {
        if self.config.behavior == SyntheticBehavior::FailBind {
            return Err(StreamError::Bind {
                connection_id: connection_id.to_string(),
                reason: "synthetic bind failure".to_string(),
            });
        }
        self.open = true;
        self.log.record(&self.config.connection_id, "StreamOpen");
        Ok(())
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local
    }

    fn fill(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<FrameInfo, StreamError> {
        if !self.open {
            return Err(StreamError::NotOpen);
        }
        if self.config.behavior == SyntheticBehavior::Stall {
            std::thread::sleep(timeout);
            return Err(StreamError::Timeout(timeout));
        }
        if !self.wait_for_frame(Instant::now() + timeout) {
            return Err(StreamError::Timeout(timeout));
        }
        self.last_frame_at = Some(Instant::now());
        self.block_id += 1;
        Ok(self.generate(buffer))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.record(&self.config.connection_id, "StreamClose");
        }
    }
}

// ----------------------------------------------------------------------------
// SyntheticDiscovery
// ----------------------------------------------------------------------------

pub struct SyntheticDiscovery {
    cameras: Vec<SyntheticCameraConfig>,
    log: CommandLog,
}

impl SyntheticDiscovery {
    pub fn new(cameras: Vec<SyntheticCameraConfig>) -> Self {
        Self {
            cameras,
            log: CommandLog::new(),
        }
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl DeviceDiscovery for SyntheticDiscovery {
    fn find(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self
            .cameras
            .iter()
            .map(|camera| DeviceInfo {
                display_id: camera.connection_id.clone(),
                connection_id: ConnectionId(camera.connection_id.clone()),
                kind: camera.kind,
                source: camera.source.clone(),
            })
            .collect())
    }

    fn connect(&mut self, info: &DeviceInfo) -> Result<Box<dyn Device>, DeviceError> {
        let config = self
            .cameras
            .iter()
            .find(|camera| camera.connection_id == info.connection_id.0)
            .ok_or_else(|| DeviceError::Connect(format!("{} not found", info.connection_id)))?;
        if config.behavior == SyntheticBehavior::FailConnect {
            return Err(DeviceError::Connect(format!(
                "{} refused connection",
                info.connection_id
            )));
        }
        log::info!("SyntheticDiscovery: connected to {} (synthetic)", info.display_id);
        Ok(Box::new(SyntheticCamera::new(config.clone(), self.log.clone())))
    }
}
