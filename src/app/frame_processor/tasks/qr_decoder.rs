// SPDX-License-Identifier: GPL-3.0-only

//! QR code decoding with rqrr
//!
//! The bundled engine of the continuous strategy. rqrr reads QR codes only,
//! so this decoder reports `[QrCode]` as its symbology set; linear codes
//! need a platform detector.

use super::decoder::{FrameDecoder, LumaImage};
use crate::app::frame_processor::types::{DetectedBarcode, FrameRegion, PixelRect, Symbology};
use crate::backends::camera::types::CameraFrame;
use tracing::{debug, trace};

const SUPPORTED: [Symbology; 1] = [Symbology::QrCode];

/// QR decoder
///
/// Optimized for real-time processing with frame downscaling.
pub struct QrFrameDecoder {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QrFrameDecoder {
    pub fn new() -> Self {
        Self { max_dimension: 640 }
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl FrameDecoder for QrFrameDecoder {
    fn name(&self) -> &str {
        "rqrr"
    }

    fn symbologies(&self) -> &[Symbology] {
        &SUPPORTED
    }

    fn decode(&self, frame: &CameraFrame, region: Option<PixelRect>) -> Vec<DetectedBarcode> {
        let start = std::time::Instant::now();
        let Some(luma) = LumaImage::from_frame(frame, region, self.max_dimension) else {
            return Vec::new();
        };

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            luma.width as usize,
            luma.height as usize,
            |x, y| luma.get(x, y),
        );
        let grids = prepared.detect_grids();

        let mut found = Vec::with_capacity(grids.len());
        for grid in grids {
            let content = match grid.decode() {
                Ok((_meta, content)) => content,
                Err(e) => {
                    trace!(error = %e, "QR grid did not decode");
                    continue;
                }
            };

            let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
            let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
            for corner in grid.bounds.iter() {
                let (fx, fy) = luma.to_frame(corner.x as f32, corner.y as f32);
                min_x = min_x.min(fx);
                min_y = min_y.min(fy);
                max_x = max_x.max(fx);
                max_y = max_y.max(fy);
            }
            let rect = PixelRect {
                x: min_x.max(0.0) as u32,
                y: min_y.max(0.0) as u32,
                width: (max_x - min_x).max(0.0) as u32,
                height: (max_y - min_y).max(0.0) as u32,
            };

            debug!(content = %content, "Decoded QR code");
            found.push(DetectedBarcode {
                raw_value: content,
                format: Symbology::QrCode,
                region: Some(FrameRegion::from_pixels(rect, frame.width, frame.height)),
            });
        }

        trace!(
            count = found.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "QR decode pass complete"
        );
        found
    }
}
