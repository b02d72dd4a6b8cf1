//! Pixel normalization into the canonical display encoding (interleaved RGB8).
//!
//! `normalize` is total: every tag maps to `Converted`, `PassThrough` or `Invalid`,
//! and an unknown tag never panics.

use crate::frame::{Image, PixelType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// Zero-size payload.
    Empty,
    /// No conversion exists for this tag.
    Unsupported(PixelType),
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized {
    /// Converted into RGB8.
    Converted(Image),
    /// Already displayable (Mono8). Use the raw payload unmodified.
    PassThrough,
    /// Must not be rendered.
    Invalid(InvalidReason),
}

impl Normalized {
    pub fn is_renderable(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }
}

/// Color of each site in a 2x2 Bayer tile, row-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    R,
    G,
    B,
}

fn bayer_tile(pixel_type: &PixelType) -> Option<[Channel; 4]> {
    use Channel::*;
    match pixel_type {
        PixelType::BayerRG8 => Some([R, G, G, B]),
        PixelType::BayerBG8 => Some([B, G, G, R]),
        PixelType::BayerGR8 => Some([G, R, B, G]),
        PixelType::BayerGB8 => Some([G, B, R, G]),
        _ => None,
    }
}

pub fn normalize(pixel_type: &PixelType, data: &[u8], width: u32, height: u32) -> Normalized {
    if data.is_empty() {
        return Normalized::Invalid(InvalidReason::Empty);
    }
    let Some(bytes_per_pixel) = pixel_type.bytes_per_pixel() else {
        return Normalized::Invalid(InvalidReason::Unsupported(pixel_type.clone()));
    };
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(bytes_per_pixel));
    match expected {
        Some(expected) if expected == data.len() => {}
        Some(expected) => {
            return Normalized::Invalid(InvalidReason::SizeMismatch {
                expected,
                actual: data.len(),
            })
        }
        None => {
            return Normalized::Invalid(InvalidReason::SizeMismatch {
                expected: usize::MAX,
                actual: data.len(),
            })
        }
    }

    match pixel_type {
        PixelType::Mono8 => Normalized::PassThrough,
        PixelType::Rgb8 => Normalized::Converted(Image::rgb(width, height, data.to_vec())),
        PixelType::Bgr8 => Normalized::Converted(Image::rgb(width, height, bgr_to_rgb(data))),
        PixelType::BayerBG8 | PixelType::BayerGB8 | PixelType::BayerGR8 | PixelType::BayerRG8 => {
            match bayer_tile(pixel_type) {
                Some(tile) => Normalized::Converted(Image::rgb(
                    width,
                    height,
                    demosaic_bilinear(data, width as usize, height as usize, tile),
                )),
                None => Normalized::Invalid(InvalidReason::Unsupported(pixel_type.clone())),
            }
        }
        PixelType::Other(_) => Normalized::Invalid(InvalidReason::Unsupported(pixel_type.clone())),
    }
}

fn bgr_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// Bilinear demosaic: each missing channel is the mean of the same-colored sites in
/// the 3x3 neighbourhood, clamped at the borders.
fn demosaic_bilinear(raw: &[u8], w: usize, h: usize, tile: [Channel; 4]) -> Vec<u8> {
    let color_at = |x: usize, y: usize| tile[(y & 1) * 2 + (x & 1)];
    let mut rgb = vec![0u8; w * h * 3];

    for y in 0..h {
        for x in 0..w {
            let mut sums = [0u32; 3];
            let mut counts = [0u32; 3];
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let slot = channel_slot(color_at(nx, ny));
                    sums[slot] += raw[ny * w + nx] as u32;
                    counts[slot] += 1;
                }
            }

            let own = channel_slot(color_at(x, y));
            let offset = (y * w + x) * 3;
            for slot in 0..3 {
                rgb[offset + slot] = if slot == own {
                    raw[y * w + x]
                } else if counts[slot] == 0 {
                    0
                } else {
                    ((sums[slot] + counts[slot] / 2) / counts[slot]) as u8
                };
            }
        }
    }

    rgb
}

fn channel_slot(channel: Channel) -> usize {
    match channel {
        Channel::R => 0,
        Channel::G => 1,
        Channel::B => 2,
    }
}
