//! Frame memory and pixel tags.
//!
//! - `PixelType`: per-frame pixel encoding tag reported by the transport.
//! - `FrameInfo`: metadata written by a stream alongside the payload.
//! - `FrameBuffer`: pool-owned receive buffer. Moved out of the pool on retrieve and
//!   moved back on release, so a buffer cannot be released twice.
//! - `Image`: owned, normalized image ready for presentation.

use std::fmt;

// ----------------------------------------------------------------------------
// PixelType: wire-level pixel encoding of a captured frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelType {
    Mono8,
    BayerBG8,
    BayerGB8,
    BayerGR8,
    BayerRG8,
    Rgb8,
    Bgr8,
    /// Any encoding the normalizer has no conversion for (deeper bit depths,
    /// YUV, packed formats). Carries the device's name for logging.
    Other(String),
}

impl PixelType {
    /// Map a GenICam-style pixel format name to a tag.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Mono8" => Self::Mono8,
            "BayerBG8" => Self::BayerBG8,
            "BayerGB8" => Self::BayerGB8,
            "BayerGR8" => Self::BayerGR8,
            "BayerRG8" => Self::BayerRG8,
            "RGB8" | "RGB8Packed" => Self::Rgb8,
            "BGR8" | "BGR8Packed" => Self::Bgr8,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Mono8 => "Mono8",
            Self::BayerBG8 => "BayerBG8",
            Self::BayerGB8 => "BayerGB8",
            Self::BayerGR8 => "BayerGR8",
            Self::BayerRG8 => "BayerRG8",
            Self::Rgb8 => "RGB8",
            Self::Bgr8 => "BGR8",
            Self::Other(name) => name,
        }
    }

    /// Bytes per pixel on the wire, when known.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Mono8 | Self::BayerBG8 | Self::BayerGB8 | Self::BayerGR8 | Self::BayerRG8 => {
                Some(1)
            }
            Self::Rgb8 | Self::Bgr8 => Some(3),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata a stream reports for one filled buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub pixel_type: PixelType,
    pub width: u32,
    pub height: u32,
    /// Number of payload bytes written into the buffer.
    pub len: usize,
    /// Transport block id, monotonically increasing per stream.
    pub block_id: u64,
}

// ----------------------------------------------------------------------------
// FrameBuffer: pool-owned receive memory
// ----------------------------------------------------------------------------

/// Whether a filled buffer carries usable payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferStatus {
    Valid,
    /// Zero-size payload. Never rendered.
    Invalid,
}

/// One receive buffer from a `BufferPipeline`.
///
/// Not `Clone`: the pipeline hands out the only handle and takes it back on release.
/// Dropping a retrieved buffer instead of releasing it permanently shrinks the pool.
pub struct FrameBuffer {
    pool_id: u64,
    index: usize,
    data: Vec<u8>,
    info: Option<FrameInfo>,
}

impl FrameBuffer {
    pub(crate) fn new(pool_id: u64, index: usize, size: usize) -> Self {
        Self {
            pool_id,
            index,
            data: vec![0u8; size],
            info: None,
        }
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Full backing memory, for the stream to write into.
    pub(crate) fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_filled(&mut self, mut info: FrameInfo) {
        info.len = info.len.min(self.data.len());
        self.info = Some(info);
    }

    pub(crate) fn reset(&mut self) {
        self.info = None;
    }

    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size of the backing memory, independent of what was filled.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn info(&self) -> Option<&FrameInfo> {
        self.info.as_ref()
    }

    pub fn pixel_type(&self) -> Option<&PixelType> {
        self.info.as_ref().map(|info| &info.pixel_type)
    }

    /// Filled payload bytes. Empty for an unfilled or zero-size frame.
    pub fn payload(&self) -> &[u8] {
        let len = self.info.as_ref().map_or(0, |info| info.len);
        &self.data[..len]
    }

    pub fn status(&self) -> BufferStatus {
        if self.payload().is_empty() {
            BufferStatus::Invalid
        } else {
            BufferStatus::Valid
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("pool_id", &self.pool_id)
            .field("index", &self.index)
            .field("capacity", &self.data.len())
            .field("info", &self.info)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Image: normalized pixels
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    /// Interleaved 8-bit RGB, the canonical display encoding.
    Rgb8,
    /// Single 8-bit channel, displayed as-is.
    Mono8,
}

impl ImageLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Mono8 => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub layout: ImageLayout,
    pub data: Vec<u8>,
}

impl Image {
    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout: ImageLayout::Rgb8,
            data,
        }
    }

    pub fn mono(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout: ImageLayout::Mono8,
            data,
        }
    }
}
