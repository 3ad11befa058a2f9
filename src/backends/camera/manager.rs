// SPDX-License-Identifier: GPL-3.0-only

//! Camera session manager
//!
//! The manager provides:
//! - Camera acquisition with classified errors (no internal retries)
//! - Exclusive handles that release the hardware on every exit path
//! - A defensive sweep for streams left attached to any surface

use super::types::*;
use super::{CameraPlatform, FrameReceiver, MediaStream, MediaTrack, VideoSurface};
use crate::errors::{ErrorKind, ScanError, ScanResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exclusive owner of one acquired camera stream.
///
/// Releasing stops every track, detaches the stream from its surface and
/// clears the references. Explicit release, dropping the handle, fallback
/// stage changes and session teardown all end in [`release`](Self::release).
pub struct CameraDeviceHandle {
    stream: Option<MediaStream>,
    surface: Option<Arc<VideoSurface>>,
    constraints: CameraConstraints,
    label: String,
}

impl CameraDeviceHandle {
    fn new(stream: MediaStream, constraints: CameraConstraints) -> Self {
        let label = stream
            .video_track()
            .map(|t| t.label().to_string())
            .unwrap_or_default();
        Self {
            stream: Some(stream),
            surface: None,
            constraints,
            label,
        }
    }

    /// Constraints this handle was acquired with
    pub fn constraints(&self) -> &CameraConstraints {
        &self.constraints
    }

    /// Label of the video track
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.id())
    }

    pub fn video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.stream.as_ref().and_then(|s| s.video_track())
    }

    /// Capabilities of the video track; empty once released
    pub fn capabilities(&self) -> TrackCapabilities {
        self.video_track()
            .map(|t| t.capabilities())
            .unwrap_or_default()
    }

    pub fn frames(&self) -> Option<FrameReceiver> {
        self.stream.as_ref().map(|s| s.frames())
    }

    pub fn surface(&self) -> Option<&Arc<VideoSurface>> {
        self.surface.as_ref()
    }

    /// Show the stream on `surface` and start playback, detaching it from
    /// any surface it was shown on before
    pub fn attach_to(&mut self, surface: Arc<VideoSurface>) {
        let Some(stream) = &self.stream else {
            warn!(surface = surface.label(), "Attach on a released camera handle");
            return;
        };
        if let Some(previous) = self.surface.take() {
            previous.detach_if(stream.id());
        }
        surface.attach(stream);
        surface.play();
        self.surface = Some(surface);
    }

    pub fn live_track_count(&self) -> usize {
        self.stream
            .as_ref()
            .map(|s| s.live_track_count())
            .unwrap_or(0)
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    /// Stop all tracks and detach. Safe to call repeatedly.
    /// Returns the number of tracks that were still live.
    pub fn release(&mut self) -> usize {
        let Some(stream) = self.stream.take() else {
            return 0;
        };
        let stopped = stream.stop_all();
        if let Some(surface) = self.surface.take() {
            // Only detach our own stream; a newer one may already be shown
            surface.detach_if(stream.id());
        }
        debug!(
            stream = stream.id(),
            label = %self.label,
            stopped,
            "Released camera handle"
        );
        stopped
    }
}

impl Drop for CameraDeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraDeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDeviceHandle")
            .field("label", &self.label)
            .field("constraints", &self.constraints)
            .field("stream", &self.stream_id())
            .field("live_tracks", &self.live_track_count())
            .finish()
    }
}

/// Acquires and releases cameras on a platform
pub struct CameraSessionManager<P: CameraPlatform> {
    platform: Arc<P>,
}

impl<P: CameraPlatform> Clone for CameraSessionManager<P> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
        }
    }
}

impl<P: CameraPlatform> CameraSessionManager<P> {
    pub fn new(platform: Arc<P>) -> Self {
        info!(platform = platform.name(), "Creating camera session manager");
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// Open a camera. Errors are classified; nothing is retried here.
    pub async fn acquire(&self, constraints: CameraConstraints) -> ScanResult<CameraDeviceHandle> {
        info!(%constraints, "Acquiring camera");

        let stream = match self.platform.get_user_media(constraints.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let error = ScanError::from_platform(e);
                warn!(%constraints, kind = %error.kind(), error = %error, "Camera acquisition failed");
                return Err(error);
            }
        };

        if stream.video_track().is_none() {
            stream.stop_all();
            return Err(ScanError::camera(
                ErrorKind::GenericStartFailure,
                "AbortError",
                "stream has no video track",
            ));
        }

        let handle = CameraDeviceHandle::new(stream, constraints);
        info!(label = %handle.label(), stream = ?handle.stream_id(), "Camera acquired");
        Ok(handle)
    }

    pub async fn enumerate_cameras(&self) -> ScanResult<Vec<CameraDevice>> {
        let devices = self
            .platform
            .enumerate_devices()
            .await
            .map_err(ScanError::from_platform)?;
        debug!(count = devices.len(), "Enumerated cameras");
        Ok(devices)
    }

    /// Release the handle in `slot`, if any, then sweep for orphans.
    /// Idempotent; an empty slot only runs the sweep.
    pub fn release(&self, slot: &mut Option<CameraDeviceHandle>) -> usize {
        let stopped = slot.take().map(|mut h| h.release()).unwrap_or(0);
        stopped + self.sweep_orphans()
    }

    /// Force-release streams still attached to any surface of the platform
    pub fn sweep_orphans(&self) -> usize {
        self.platform.surfaces().sweep()
    }
}

impl<P: CameraPlatform> std::fmt::Debug for CameraSessionManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSessionManager")
            .field("platform", &self.platform.name())
            .finish()
    }
}
