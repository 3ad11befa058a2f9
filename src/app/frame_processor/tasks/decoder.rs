// SPDX-License-Identifier: GPL-3.0-only

//! Frame decoding engines
//!
//! A [`FrameDecoder`] turns one frame into the barcodes visible in it. Both
//! scan strategies use one: the continuous strategy directly, the polling
//! strategy through [`DecoderBackedDetector`](super::native_poll::DecoderBackedDetector)
//! when the host has no detector of its own.
//!
//! Frames are reduced to an 8-bit luminance image first, cropped to the scan
//! region and downscaled so decoding stays within the frame budget.

use crate::app::frame_processor::types::{DetectedBarcode, PixelRect, Symbology};
use crate::backends::camera::types::{CameraFrame, PixelFormat};
use std::sync::Arc;
use tracing::warn;

/// A barcode decoding engine
pub trait FrameDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Symbologies this engine can read
    fn symbologies(&self) -> &[Symbology];

    /// Decode `frame`, restricted to `region` when given.
    /// An empty result is a normal miss, not an error.
    fn decode(&self, frame: &CameraFrame, region: Option<PixelRect>) -> Vec<DetectedBarcode>;
}

/// Run a decoder on the blocking pool
pub async fn decode_blocking(
    decoder: Arc<dyn FrameDecoder>,
    frame: Arc<CameraFrame>,
    region: Option<PixelRect>,
) -> Vec<DetectedBarcode> {
    tokio::task::spawn_blocking(move || decoder.decode(&frame, region))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Decode task panicked");
            Vec::new()
        })
}

/// 8-bit luminance image, tightly packed
#[derive(Debug, Clone, PartialEq)]
pub struct LumaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Frame pixels per luma pixel
    pub scale: f32,
    /// Top-left of the crop in frame pixels
    pub origin: (u32, u32),
}

impl LumaImage {
    /// Crop `frame` to `region`, convert to luminance and downscale so the
    /// longer side is at most `max_dimension`
    pub fn from_frame(
        frame: &CameraFrame,
        region: Option<PixelRect>,
        max_dimension: u32,
    ) -> Option<Self> {
        if !frame.is_well_formed() {
            warn!(?frame, "Malformed frame skipped");
            return None;
        }
        let rect = region.unwrap_or(PixelRect {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
        });
        if rect.width == 0
            || rect.height == 0
            || rect.x + rect.width > frame.width
            || rect.y + rect.height > frame.height
        {
            return None;
        }

        let longest = rect.width.max(rect.height);
        let scale = if max_dimension > 0 && longest > max_dimension {
            longest as f32 / max_dimension as f32
        } else {
            1.0
        };
        let width = ((rect.width as f32 / scale) as u32).max(1);
        let height = ((rect.height as f32 / scale) as u32).max(1);

        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let src_y = rect.y + ((y as f32 * scale) as u32).min(rect.height - 1);
            for x in 0..width {
                let src_x = rect.x + ((x as f32 * scale) as u32).min(rect.width - 1);
                data.push(luma_at(frame, src_x, src_y));
            }
        }

        Some(Self {
            width,
            height,
            data,
            scale,
            origin: (rect.x, rect.y),
        })
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width as usize + x]
    }

    /// Map a point in this image back to frame pixels
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.origin.0 as f32 + x * self.scale,
            self.origin.1 as f32 + y * self.scale,
        )
    }
}

/// BT.601 luma of one pixel, honouring stride
fn luma_at(frame: &CameraFrame, x: u32, y: u32) -> u8 {
    let row = y as usize * frame.stride as usize;
    match frame.format {
        PixelFormat::Gray8 => frame.data[row + x as usize],
        PixelFormat::Rgba => {
            let offset = row + x as usize * 4;
            let r = frame.data[offset] as u32;
            let g = frame.data[offset + 1] as u32;
            let b = frame.data[offset + 2] as u32;
            ((299 * r + 587 * g + 114 * b) / 1000) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_ignores_stride_padding() {
        let data: Vec<u8> = vec![
            255, 255, 255, 255, // White pixel
            0, 0, 0, 255, // Black pixel
            9, 9, // stride padding
            255, 0, 0, 255, // Red pixel
            0, 0, 255, 255, // Blue pixel
            9, 9, // stride padding
        ];
        let frame = CameraFrame {
            stride: 10,
            ..CameraFrame::from_rgba(2, 2, data)
        };

        let luma = LumaImage::from_frame(&frame, None, 640).unwrap();
        assert_eq!((luma.width, luma.height), (2, 2));
        assert_eq!(luma.data, vec![255, 0, 76, 29]);
    }

    #[test]
    fn test_crop_and_downscale() {
        // 8x4 gradient where each pixel equals its x coordinate * 10
        let data: Vec<u8> = (0..4).flat_map(|_| (0..8).map(|x| x * 10)).collect();
        let frame = CameraFrame::from_gray(8, 4, data);
        let region = PixelRect {
            x: 4,
            y: 0,
            width: 4,
            height: 4,
        };

        let luma = LumaImage::from_frame(&frame, Some(region), 2).unwrap();
        assert_eq!((luma.width, luma.height), (2, 2));
        assert_eq!(luma.get(0, 0), 40);
        assert_eq!(luma.get(1, 0), 60);
        assert_eq!(luma.to_frame(1.0, 1.0), (6.0, 2.0));
    }

    #[test]
    fn test_region_outside_frame_rejected() {
        let frame = CameraFrame::from_gray(4, 4, vec![0; 16]);
        let region = PixelRect {
            x: 2,
            y: 2,
            width: 4,
            height: 4,
        };
        assert!(LumaImage::from_frame(&frame, Some(region), 640).is_none());
    }
}
