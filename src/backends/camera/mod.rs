// SPDX-License-Identifier: GPL-3.0-only

//! Camera platform abstraction
//!
//! The engine talks to cameras the way a media stack exposes them: a
//! platform hands out [`MediaStream`]s made of [`MediaTrack`]s, streams are
//! shown on [`VideoSurface`]s, and failures come back as named
//! [`PlatformError`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ ScanSessionController│
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CameraSessionManager │  ← acquire / release / orphan sweep
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CameraPlatform trait │  ← getUserMedia-style interface
//! └──────────┬───────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐  ┌─────────┐
//!   │ V4L2 │  │ Virtual │
//!   └──────┘  └─────────┘
//! ```

pub mod manager;
pub mod surface;
pub mod types;

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod frame_loop;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;
#[cfg(target_os = "linux")]
pub mod v4l2_controls;

pub use manager::{CameraDeviceHandle, CameraSessionManager};
pub use surface::{SurfaceRegistry, VideoSurface};
pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Latest-frame channel of a stream; `None` until the first frame arrives
pub type FrameReceiver = watch::Receiver<Option<Arc<CameraFrame>>>;

/// Host camera stack
///
/// Mirrors what browsers and mobile WebViews expose, so the engine has one
/// model for every host:
/// - `get_user_media` opens a camera matching the constraints
/// - `enumerate_devices` lists video inputs
/// - `surfaces` is the set of display surfaces, swept for leaked streams
pub trait CameraPlatform: Send + Sync + 'static {
    /// Platform name for logging
    fn name(&self) -> &str;

    // ===== Acquisition =====

    /// Open a camera stream. Never retries internally.
    fn get_user_media(
        &self,
        constraints: CameraConstraints,
    ) -> BoxFuture<'_, PlatformResult<MediaStream>>;

    /// List video input devices
    fn enumerate_devices(&self) -> BoxFuture<'_, PlatformResult<Vec<CameraDevice>>>;

    // ===== Surfaces =====

    fn surfaces(&self) -> &SurfaceRegistry;

    /// Create a display surface tracked by the orphan sweep
    fn create_surface(&self, label: &str) -> Arc<VideoSurface> {
        self.surfaces().create(label)
    }
}

/// One live video track
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> &str;

    /// Stop the track and free the hardware. Idempotent.
    fn stop(&self);

    fn is_live(&self) -> bool;

    /// Zoom range and torch support, probed once when the track started
    fn capabilities(&self) -> TrackCapabilities;

    fn apply_constraint(&self, constraint: TrackConstraint) -> BoxFuture<'_, PlatformResult<()>>;
}

/// Tracks opened together plus the frames they produce
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
    frames: FrameReceiver,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>, frames: FrameReceiver) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
            frames,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// The track zoom and torch constraints are applied to
    pub fn video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.tracks.first().cloned()
    }

    pub fn latest_frame(&self) -> Option<Arc<CameraFrame>> {
        self.frames.borrow().clone()
    }

    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every live track. Returns how many were live.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for track in &self.tracks {
            if track.is_live() {
                track.stop();
                stopped += 1;
            }
        }
        stopped
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("live", &self.live_track_count())
            .finish()
    }
}
