// SPDX-License-Identifier: GPL-3.0-only

//! Core types for frame decoding results

use crate::constants::{SCAN_REGION_MARGIN, SCAN_REGION_MAX};
use serde::{Deserialize, Serialize};

/// Barcode encoding standards the scanner asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code128,
    Code39,
    Code93,
    Codabar,
    Itf,
    QrCode,
    DataMatrix,
}

impl Symbology {
    /// Full retail set
    pub const ALL: [Symbology; 11] = [
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::UpcA,
        Symbology::UpcE,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::Code93,
        Symbology::Codabar,
        Symbology::Itf,
        Symbology::QrCode,
        Symbology::DataMatrix,
    ];

    /// Subset requested by the web-restricted scanner
    pub const WEB: [Symbology; 8] = [
        Symbology::QrCode,
        Symbology::Ean13,
        Symbology::Ean8,
        Symbology::Code128,
        Symbology::Code39,
        Symbology::DataMatrix,
        Symbology::UpcA,
        Symbology::UpcE,
    ];

    /// Name used by barcode detector APIs
    pub fn as_str(self) -> &'static str {
        match self {
            Symbology::Ean13 => "ean_13",
            Symbology::Ean8 => "ean_8",
            Symbology::UpcA => "upc_a",
            Symbology::UpcE => "upc_e",
            Symbology::Code128 => "code_128",
            Symbology::Code39 => "code_39",
            Symbology::Code93 => "code_93",
            Symbology::Codabar => "codabar",
            Symbology::Itf => "itf",
            Symbology::QrCode => "qr_code",
            Symbology::DataMatrix => "data_matrix",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Symbology::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Symbology::Ean13 => "EAN-13",
            Symbology::Ean8 => "EAN-8",
            Symbology::UpcA => "UPC-A",
            Symbology::UpcE => "UPC-E",
            Symbology::Code128 => "Code 128",
            Symbology::Code39 => "Code 39",
            Symbology::Code93 => "Code 93",
            Symbology::Codabar => "Codabar",
            Symbology::Itf => "ITF",
            Symbology::QrCode => "QR Code",
            Symbology::DataMatrix => "Data Matrix",
        }
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A candidate decoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub raw_value: String,
    /// Milliseconds since the controller started
    pub timestamp_ms: u64,
    pub format: Option<Symbology>,
}

/// One symbol found in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBarcode {
    pub raw_value: String,
    pub format: Symbology,
    /// Bounding box, normalized to the full frame
    pub region: Option<FrameRegion>,
}

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(rect: PixelRect, frame_width: u32, frame_height: u32) -> Self {
        Self {
            x: rect.x as f32 / frame_width as f32,
            y: rect.y as f32 / frame_height as f32,
            width: rect.width as f32 / frame_width as f32,
            height: rect.height as f32 / frame_height as f32,
        }
    }
}

/// Rectangle in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Square detection box centred in the preview.
///
/// Sized in container (display) pixels, `min(width - 40, 250)` per side, and
/// mapped to frame pixels assuming the frame fills the container width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    pub side: u32,
    pub container_width: u32,
}

impl ScanRegion {
    pub fn for_container(container_width: u32) -> Self {
        Self {
            side: container_width
                .saturating_sub(SCAN_REGION_MARGIN)
                .min(SCAN_REGION_MAX),
            container_width,
        }
    }

    /// Region in frame pixels, clamped to the frame.
    /// `None` means decode the whole frame.
    pub fn frame_rect(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        if self.side == 0 || self.container_width == 0 || frame_width == 0 || frame_height == 0 {
            return None;
        }
        let scale = frame_width as f64 / self.container_width as f64;
        let side = ((self.side as f64 * scale).round() as u32)
            .min(frame_width)
            .min(frame_height)
            .max(1);
        Some(PixelRect {
            x: (frame_width - side) / 2,
            y: (frame_height - side) / 2,
            width: side,
            height: side,
        })
    }
}
