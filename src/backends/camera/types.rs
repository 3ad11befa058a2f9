// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera platforms

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Which side of the device a camera looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// Rear camera, facing mode `environment`
    #[default]
    Back,
    /// Selfie camera, facing mode `user`
    Front,
}

impl CameraFacing {
    /// Media-stack facing mode hint
    pub fn facing_mode(self) -> &'static str {
        match self {
            CameraFacing::Back => "environment",
            CameraFacing::Front => "user",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            CameraFacing::Back => CameraFacing::Front,
            CameraFacing::Front => CameraFacing::Back,
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Back => write!(f, "back"),
            CameraFacing::Front => write!(f, "front"),
        }
    }
}

/// How a camera is picked for acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSelector {
    /// Facing-mode hint; the platform picks a matching camera
    Facing(CameraFacing),
    /// Exact device identifier from enumeration
    Device(String),
}

/// Constraints passed to [`CameraPlatform::get_user_media`](super::CameraPlatform::get_user_media)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    pub selector: CameraSelector,
    /// Preferred capture size; platforms pick the closest they support
    pub ideal_size: Option<(u32, u32)>,
}

impl CameraConstraints {
    pub fn facing(facing: CameraFacing) -> Self {
        Self {
            selector: CameraSelector::Facing(facing),
            ideal_size: None,
        }
    }

    pub fn device(id: impl Into<String>) -> Self {
        Self {
            selector: CameraSelector::Device(id.into()),
            ideal_size: None,
        }
    }

    pub fn with_ideal_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.ideal_size = size;
        self
    }
}

impl std::fmt::Display for CameraConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            CameraSelector::Facing(facing) => write!(f, "facingMode={}", facing.facing_mode())?,
            CameraSelector::Device(id) => write!(f, "deviceId={}", id)?,
        }
        if let Some((w, h)) = self.ideal_size {
            write!(f, " ideal={}x{}", w, h)?;
        }
        Ok(())
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Identifier accepted by [`CameraSelector::Device`]
    pub id: String,
    /// Human-readable label (may be empty before permission is granted)
    pub label: String,
    /// Facing reported by the platform, if it knows
    pub facing: Option<CameraFacing>,
}

/// Zoom factors a track accepts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Optional features of a live video track
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackCapabilities {
    pub zoom: Option<ZoomRange>,
    pub torch: bool,
}

/// A constraint applied to a live track
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackConstraint {
    /// Zoom factor, 1.0 = no zoom
    Zoom(f64),
    Torch(bool),
}

/// How much media a video surface has buffered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Pixel layout of [`CameraFrame::data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, R G B A
    Rgba,
    /// 1 byte per pixel, luminance only
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A single video frame
#[derive(Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Bytes per row, may include padding
    pub stride: u32,
    pub captured_at: Instant,
}

impl CameraFrame {
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            format: PixelFormat::Rgba,
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }

    pub fn from_gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            format: PixelFormat::Gray8,
            stride: width,
            captured_at: Instant::now(),
        }
    }

    /// Whether `data` is large enough for the declared geometry
    pub fn is_well_formed(&self) -> bool {
        let row = self.width as usize * self.format.bytes_per_pixel();
        self.stride as usize >= row
            && self.data.len() >= self.stride as usize * self.height.saturating_sub(1) as usize + row
    }
}

impl std::fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Error reported by a camera platform, named the way media stacks name them
/// (`NotAllowedError`, `NotReadableError`, ...)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct PlatformError {
    pub name: String,
    pub message: String,
}

impl PlatformError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_modes() {
        assert_eq!(CameraFacing::Back.facing_mode(), "environment");
        assert_eq!(CameraFacing::Front.facing_mode(), "user");
        assert_eq!(CameraFacing::Back.opposite(), CameraFacing::Front);
    }

    #[test]
    fn test_constraints_display() {
        let c = CameraConstraints::facing(CameraFacing::Back).with_ideal_size(Some((1280, 720)));
        assert_eq!(c.to_string(), "facingMode=environment ideal=1280x720");
        assert_eq!(CameraConstraints::device("/dev/video2").to_string(), "deviceId=/dev/video2");
    }

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveMetadata < ReadyState::HaveCurrentData);
        assert!(ReadyState::HaveEnoughData >= ReadyState::HaveCurrentData);
    }

    #[test]
    fn test_frame_geometry_check() {
        assert!(CameraFrame::from_gray(4, 2, vec![0; 8]).is_well_formed());
        assert!(!CameraFrame::from_rgba(4, 2, vec![0; 8]).is_well_formed());
    }
}
