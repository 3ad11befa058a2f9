// SPDX-License-Identifier: GPL-3.0-only

//! Still-image frame sources for virtual cameras

use crate::backends::camera::types::{CameraFrame, PlatformError, PlatformResult};
use std::path::Path;
use tracing::info;

/// Load an image file as an RGBA frame
pub fn load_image_as_frame(path: &Path) -> PlatformResult<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| {
        PlatformError::new(
            "EncodingError",
            format!("Failed to load image '{}': {}", path.display(), e),
        )
    })?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    info!(width, height, "Image loaded");

    Ok(CameraFrame::from_rgba(width, height, rgba.into_raw()))
}

/// Uniform grey frame, for cameras that only need to produce "something"
pub fn blank_frame(width: u32, height: u32, luma: u8) -> CameraFrame {
    CameraFrame::from_gray(width, height, vec![luma; (width * height) as usize])
}
