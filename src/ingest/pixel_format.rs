use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::OpenError;

/// Pixel format family without the bit depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseFormat {
    Mono,
    BayerBG,
    BayerGB,
    BayerGR,
    BayerRG,
    Rgb,
    Bgr,
    Other(String),
}

impl BaseFormat {
    fn from_name(name: &str) -> Self {
        match name {
            "Mono" => Self::Mono,
            "BayerBG" => Self::BayerBG,
            "BayerGB" => Self::BayerGB,
            "BayerGR" => Self::BayerGR,
            "BayerRG" => Self::BayerRG,
            "RGB" => Self::Rgb,
            "BGR" => Self::Bgr,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Mono => "Mono",
            Self::BayerBG => "BayerBG",
            Self::BayerGB => "BayerGB",
            Self::BayerGR => "BayerGR",
            Self::BayerRG => "BayerRG",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Other(name) => name,
        }
    }
}

/// Structured form of a device pixel format name such as `BayerRG12`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelDescriptor {
    pub base_format: BaseFormat,
    pub bit_depth: u32,
}

fn format_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Base name, bit depth, optional packing marker: "Mono12p", "RGB8Packed".
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z]+?)(\d+)(?:p|Packed)?$").unwrap())
}

impl PixelDescriptor {
    pub fn parse(name: &str) -> Result<Self, OpenError> {
        let captures = format_pattern()
            .captures(name.trim())
            .ok_or_else(|| OpenError::PixelFormat(name.to_string()))?;
        let bit_depth: u32 = captures[2]
            .parse()
            .map_err(|_| OpenError::PixelFormat(name.to_string()))?;
        if bit_depth == 0 {
            return Err(OpenError::PixelFormat(name.to_string()));
        }
        Ok(Self {
            base_format: BaseFormat::from_name(&captures[1]),
            bit_depth,
        })
    }

    pub fn needs_reduction(&self) -> bool {
        self.bit_depth > 8
    }

    /// Name of the 8-bit variant of this format.
    pub fn eight_bit_name(&self) -> String {
        format!("{}8", self.base_format.name())
    }

    pub fn reduced_to_eight_bits(&self) -> Self {
        Self {
            base_format: self.base_format.clone(),
            bit_depth: 8,
        }
    }
}

impl fmt::Display for PixelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_format.name(), self.bit_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bayer_with_depth() -> anyhow::Result<()> {
        let descriptor = PixelDescriptor::parse("BayerRG12")?;
        assert_eq!(descriptor.base_format, BaseFormat::BayerRG);
        assert_eq!(descriptor.bit_depth, 12);
        assert!(descriptor.needs_reduction());
        assert_eq!(descriptor.eight_bit_name(), "BayerRG8");
        Ok(())
    }

    #[test]
    fn accepts_packing_markers() -> anyhow::Result<()> {
        assert_eq!(PixelDescriptor::parse("Mono12p")?.bit_depth, 12);
        let rgb = PixelDescriptor::parse("RGB8Packed")?;
        assert_eq!(rgb.base_format, BaseFormat::Rgb);
        assert!(!rgb.needs_reduction());
        Ok(())
    }

    #[test]
    fn malformed_names_are_open_errors() {
        for name in ["", "Mono", "12", "YUV422_8", "Mono0"] {
            assert!(
                matches!(PixelDescriptor::parse(name), Err(OpenError::PixelFormat(_))),
                "{name} should not parse"
            );
        }
    }

    #[test]
    fn reduction_keeps_base_format() -> anyhow::Result<()> {
        let reduced = PixelDescriptor::parse("BayerGB10")?.reduced_to_eight_bits();
        assert_eq!(reduced.to_string(), "BayerGB8");
        Ok(())
    }
}
