//! Device, stream and discovery capabilities.
//!
//! The acquisition core never talks to hardware directly. It is written against:
//! - `DeviceDiscovery`: enumerate reachable devices and connect to them
//! - `Device`: parameter get/set, commands, streaming path, destination binding
//! - `Stream`: a receive channel bound to a local endpoint
//!
//! Transport variants (GigE Vision-like vs. everything else) are reported by
//! `Device::kind()` and selected at discovery time. The `synthetic` backend implements
//! all three traits in memory for tests and the demo binary.
//!
//! Also here:
//! - Pixel format descriptor parsing (`pixel_format`)
//! - Pixel normalization into the canonical display encoding (`normalize`)

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{DeviceError, StreamError};
use crate::frame::FrameInfo;

pub mod normalize;
pub mod pixel_format;
pub mod synthetic;

pub use normalize::{normalize, InvalidReason, Normalized};
pub use pixel_format::{BaseFormat, PixelDescriptor};
pub use synthetic::{
    CommandLog, CommandRecord, SyntheticBehavior, SyntheticCamera, SyntheticCameraConfig,
    SyntheticDiscovery, SyntheticStream,
};

/// GenICam feature names the session reads and writes.
pub mod features {
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    pub const SOURCE_SELECTOR: &str = "SourceSelector";
    pub const PACKET_DELAY: &str = "GevSCPD";
    pub const ACQUISITION_START: &str = "AcquisitionStart";
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
}

/// Transport family of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// GigE Vision-like: needs a stream destination and honours packet pacing.
    Gev,
    /// USB3 Vision-like: point-to-point, no destination or pacing registers.
    Usb3,
}

impl DeviceKind {
    pub fn is_network(self) -> bool {
        matches!(self, Self::Gev)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gev => f.write_str("GEV"),
            Self::Usb3 => f.write_str("U3V"),
        }
    }
}

/// Identifier used to (re)open the transport stream of a device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device found by discovery, not yet connected.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub display_id: String,
    pub connection_id: ConnectionId,
    pub kind: DeviceKind,
    /// Source selector for multi-source devices.
    pub source: Option<String>,
}

/// Enumerates and connects devices.
pub trait DeviceDiscovery {
    fn find(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn connect(&mut self, info: &DeviceInfo) -> Result<Box<dyn Device>, DeviceError>;
}

/// A connected device. Exclusively owned by one source session.
pub trait Device: Send {
    fn kind(&self) -> DeviceKind;

    fn get_integer(&mut self, name: &str) -> Result<i64, DeviceError>;

    fn set_integer(&mut self, name: &str, value: i64) -> Result<(), DeviceError>;

    fn get_enum(&mut self, name: &str) -> Result<String, DeviceError>;

    fn set_enum(&mut self, name: &str, value: &str) -> Result<(), DeviceError>;

    /// Execute a named command (e.g. `AcquisitionStart`).
    fn execute(&mut self, command: &str) -> Result<(), DeviceError>;

    /// Enable the device-side streaming path.
    fn stream_enable(&mut self) -> Result<(), DeviceError>;

    fn stream_disable(&mut self) -> Result<(), DeviceError>;

    /// Point the device's stream channel at a local receive endpoint.
    fn set_stream_destination(
        &mut self,
        endpoint: SocketAddr,
        channel: u32,
    ) -> Result<(), DeviceError>;

    /// Bytes needed to hold one frame in the current configuration.
    fn payload_size(&mut self) -> Result<u64, DeviceError>;

    /// Create an unopened stream matching this device's transport.
    fn create_stream(&self) -> Box<dyn Stream>;
}

/// A receive channel for frame payloads.
pub trait Stream: Send {
    fn open(&mut self, connection_id: &ConnectionId) -> Result<(), StreamError>;

    /// Local endpoint to register with network devices. `None` for point-to-point.
    fn local_endpoint(&self) -> Option<SocketAddr>;

    /// Block up to `timeout` for the next frame and write its payload into `buffer`.
    fn fill(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<FrameInfo, StreamError>;

    fn close(&mut self);
}
