//! Display hand-off.
//!
//! Rendering is an external concern. Sessions scale each normalized image to a fixed
//! presentation size and pass it to a `DisplaySink`, which must not block the
//! acquisition loop for longer than a frame interval.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::frame::{Image, ImageLayout};

/// Presentation size frames are scaled to before display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentationSize {
    pub width: u32,
    pub height: u32,
}

impl Default for PresentationSize {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Receives presented frames, keyed by source id.
pub trait DisplaySink: Send + Sync {
    fn show(&self, source_id: &str, frame: &Image);
}

/// Scale `image` to `size` with linear interpolation.
///
/// Returns the input unchanged when it already has the target size. A buffer that does
/// not match its declared dimensions yields an empty image.
pub fn present(image: Image, size: PresentationSize) -> Image {
    if image.width == size.width && image.height == size.height {
        return image;
    }
    let Image {
        width,
        height,
        layout,
        data,
    } = image;
    match layout {
        ImageLayout::Rgb8 => match RgbImage::from_raw(width, height, data) {
            Some(rgb) => {
                let scaled = imageops::resize(&rgb, size.width, size.height, FilterType::Triangle);
                Image::rgb(size.width, size.height, scaled.into_raw())
            }
            None => {
                log::warn!("present: RGB buffer does not match {}x{}", width, height);
                Image::rgb(width, height, Vec::new())
            }
        },
        ImageLayout::Mono8 => match GrayImage::from_raw(width, height, data) {
            Some(gray) => {
                let scaled = imageops::resize(&gray, size.width, size.height, FilterType::Triangle);
                Image::mono(size.width, size.height, scaled.into_raw())
            }
            None => {
                log::warn!("present: mono buffer does not match {}x{}", width, height);
                Image::mono(width, height, Vec::new())
            }
        },
    }
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceFrameStats {
    pub frames: u64,
    pub last_width: u32,
    pub last_height: u32,
    pub last_layout: Option<ImageLayout>,
}

/// Counts presented frames per source. Used by the binary for status output.
#[derive(Debug, Default)]
pub struct FrameStatsSink {
    stats: Mutex<BTreeMap<String, SourceFrameStats>>,
}

impl FrameStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, SourceFrameStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frames(&self, source_id: &str) -> u64 {
        self.snapshot().get(source_id).map_or(0, |stats| stats.frames)
    }
}

impl DisplaySink for FrameStatsSink {
    fn show(&self, source_id: &str, frame: &Image) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(source_id.to_string()).or_default();
        entry.frames += 1;
        entry.last_width = frame.width;
        entry.last_height = frame.height;
        entry.last_layout = Some(frame.layout);
    }
}

/// Logs every presented frame at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn show(&self, source_id: &str, frame: &Image) {
        log::debug!(
            "{}: frame {}x{} {:?} ({} bytes)",
            source_id,
            frame.width,
            frame.height,
            frame.layout,
            frame.data.len()
        );
    }
}
