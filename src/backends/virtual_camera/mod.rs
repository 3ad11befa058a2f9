// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera platform
//!
//! Scripted cameras that replay still frames at a fixed rate. Used by the
//! test suite and by `hyperpos-scanner scan --image`, so the whole engine
//! (fallback stages, debouncing, teardown) runs without hardware.
//!
//! Failures are injected per facing mode, per device id, or for
//! enumeration, and every acquisition attempt is logged so tests can check
//! the order in which the fallback stages ran.

mod file_source;

pub use file_source::{blank_frame, load_image_as_frame};

use crate::backends::camera::types::*;
use crate::backends::camera::{CameraPlatform, MediaStream, MediaTrack, SurfaceRegistry};
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

const DEFAULT_FPS: u32 = 30;

/// A scripted camera
#[derive(Clone)]
pub struct VirtualCamera {
    pub device: CameraDevice,
    frames: Vec<Arc<CameraFrame>>,
    capabilities: TrackCapabilities,
    fps: u32,
}

impl VirtualCamera {
    /// Camera that never produces a frame
    pub fn new(id: &str, label: &str, facing: Option<CameraFacing>) -> Self {
        Self {
            device: CameraDevice {
                id: id.to_string(),
                label: label.to_string(),
                facing,
            },
            frames: Vec::new(),
            capabilities: TrackCapabilities::default(),
            fps: DEFAULT_FPS,
        }
    }

    /// Camera showing a small grey frame
    pub fn blank(id: &str, label: &str, facing: CameraFacing) -> Self {
        Self::new(id, label, Some(facing)).with_frames(vec![blank_frame(64, 48, 128)])
    }

    /// Camera cycling through image files
    pub fn from_images(id: &str, label: &str, paths: &[PathBuf]) -> PlatformResult<Self> {
        let frames = paths
            .iter()
            .map(|p| load_image_as_frame(p))
            .collect::<PlatformResult<Vec<_>>>()?;
        Ok(Self::new(id, label, Some(CameraFacing::Back)).with_frames(frames))
    }

    pub fn with_frames(mut self, frames: Vec<CameraFrame>) -> Self {
        self.frames = frames.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: TrackCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }
}

#[derive(Debug, Clone)]
enum FailureTarget {
    Facing(CameraFacing),
    Device(String),
    Any,
}

#[derive(Debug, Clone)]
struct Failure {
    target: FailureTarget,
    error: PlatformError,
}

#[derive(Default)]
struct PlatformState {
    cameras: Vec<VirtualCamera>,
    failures: Vec<Failure>,
    enumeration_failure: Option<PlatformError>,
    acquisitions: Vec<CameraConstraints>,
    acquire_delay: Duration,
    strict_facing: bool,
    tracks: Vec<Weak<VirtualTrack>>,
    tracks_started: usize,
}

/// Camera platform backed by [`VirtualCamera`]s
pub struct VirtualPlatform {
    state: Mutex<PlatformState>,
    applied: Arc<Mutex<Vec<TrackConstraint>>>,
    surfaces: SurfaceRegistry,
}

impl Default for VirtualPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState::default()),
            applied: Arc::new(Mutex::new(Vec::new())),
            surfaces: SurfaceRegistry::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_camera(&self, camera: VirtualCamera) {
        self.state().cameras.push(camera);
    }

    // ===== Scripting =====

    /// Every acquisition with this facing mode fails
    pub fn fail_facing(&self, facing: CameraFacing, error: PlatformError) {
        self.state().failures.push(Failure {
            target: FailureTarget::Facing(facing),
            error,
        });
    }

    /// Every acquisition of this device id fails
    pub fn fail_device(&self, id: &str, error: PlatformError) {
        self.state().failures.push(Failure {
            target: FailureTarget::Device(id.to_string()),
            error,
        });
    }

    /// Every acquisition fails
    pub fn fail_all(&self, error: PlatformError) {
        self.state().failures.push(Failure {
            target: FailureTarget::Any,
            error,
        });
    }

    pub fn fail_enumeration(&self, error: PlatformError) {
        self.state().enumeration_failure = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.enumeration_failure = None;
    }

    /// Delay every acquisition, to keep attempts in flight
    pub fn set_acquire_delay(&self, delay: Duration) {
        self.state().acquire_delay = delay;
    }

    /// Reject facing modes no camera reports instead of picking any camera
    pub fn set_strict_facing(&self, strict: bool) {
        self.state().strict_facing = strict;
    }

    // ===== Inspection =====

    /// Constraints of every acquisition attempt, in order
    pub fn acquisitions(&self) -> Vec<CameraConstraints> {
        self.state().acquisitions.clone()
    }

    /// Tracks started and not yet stopped
    pub fn live_tracks(&self) -> usize {
        let mut state = self.state();
        state.tracks.retain(|t| t.strong_count() > 0);
        state
            .tracks
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|t| t.is_live())
            .count()
    }

    pub fn tracks_started(&self) -> usize {
        self.state().tracks_started
    }

    /// Constraints applied to any track, in order
    pub fn applied_constraints(&self) -> Vec<TrackConstraint> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn scripted_failure(state: &PlatformState, constraints: &CameraConstraints) -> Option<PlatformError> {
        state
            .failures
            .iter()
            .find(|f| match (&f.target, &constraints.selector) {
                (FailureTarget::Any, _) => true,
                (FailureTarget::Facing(want), CameraSelector::Facing(got)) => want == got,
                (FailureTarget::Device(want), CameraSelector::Device(got)) => want == got,
                _ => false,
            })
            .map(|f| f.error.clone())
    }

    fn select_camera(state: &PlatformState, selector: &CameraSelector) -> PlatformResult<VirtualCamera> {
        if state.cameras.is_empty() {
            return Err(PlatformError::new(
                "NotFoundError",
                "Requested device not found",
            ));
        }
        match selector {
            CameraSelector::Device(id) => state
                .cameras
                .iter()
                .find(|c| &c.device.id == id)
                .cloned()
                .ok_or_else(|| PlatformError::new("NotFoundError", format!("No device {id}"))),
            CameraSelector::Facing(facing) => {
                let matching = state
                    .cameras
                    .iter()
                    .find(|c| c.device.facing == Some(*facing));
                match matching {
                    Some(camera) => Ok(camera.clone()),
                    None if state.strict_facing => Err(PlatformError::new(
                        "OverconstrainedError",
                        format!("No camera with facingMode {}", facing.facing_mode()),
                    )),
                    // facingMode is only a hint
                    None => Ok(state.cameras[0].clone()),
                }
            }
        }
    }

    fn start_camera(&self, camera: VirtualCamera) -> MediaStream {
        let (sender, receiver) = watch::channel(None);
        let track = Arc::new(VirtualTrack {
            id: uuid::Uuid::new_v4().to_string(),
            label: camera.device.label.clone(),
            live: AtomicBool::new(true),
            capabilities: camera.capabilities,
            applied: Arc::clone(&self.applied),
        });

        {
            let mut state = self.state();
            state.tracks.retain(|t| t.strong_count() > 0);
            state.tracks.push(Arc::downgrade(&track));
            state.tracks_started += 1;
        }

        if !camera.frames.is_empty() {
            let period = Duration::from_millis(1000 / u64::from(camera.fps.max(1)));
            let pump_track = Arc::clone(&track);
            let frames = camera.frames;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                let mut index = 0usize;
                loop {
                    ticker.tick().await;
                    if !pump_track.is_live() || sender.is_closed() {
                        break;
                    }
                    sender.send_replace(Some(Arc::clone(&frames[index % frames.len()])));
                    index = index.wrapping_add(1);
                }
                debug!(track = %pump_track.id, "Virtual frame pump stopped");
            });
        }

        info!(label = %camera.device.label, "Virtual camera started");
        MediaStream::new(vec![track as Arc<dyn MediaTrack>], receiver)
    }
}

impl CameraPlatform for VirtualPlatform {
    fn name(&self) -> &str {
        "virtual"
    }

    fn get_user_media(
        &self,
        constraints: CameraConstraints,
    ) -> BoxFuture<'_, PlatformResult<MediaStream>> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.acquisitions.push(constraints.clone());
                state.acquire_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let camera = {
                let state = self.state();
                if let Some(error) = Self::scripted_failure(&state, &constraints) {
                    debug!(%constraints, %error, "Scripted acquisition failure");
                    return Err(error);
                }
                Self::select_camera(&state, &constraints.selector)?
            };

            Ok(self.start_camera(camera))
        })
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, PlatformResult<Vec<CameraDevice>>> {
        Box::pin(async move {
            let state = self.state();
            if let Some(error) = &state.enumeration_failure {
                return Err(error.clone());
            }
            Ok(state.cameras.iter().map(|c| c.device.clone()).collect())
        })
    }

    fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }
}

struct VirtualTrack {
    id: String,
    label: String,
    live: AtomicBool,
    capabilities: TrackCapabilities,
    applied: Arc<Mutex<Vec<TrackConstraint>>>,
}

impl MediaTrack for VirtualTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(track = %self.id, "Virtual track stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> TrackCapabilities {
        self.capabilities
    }

    fn apply_constraint(&self, constraint: TrackConstraint) -> BoxFuture<'_, PlatformResult<()>> {
        Box::pin(async move {
            if !self.is_live() {
                return Err(PlatformError::new("InvalidStateError", "track ended"));
            }
            let supported = match constraint {
                TrackConstraint::Zoom(z) => self
                    .capabilities
                    .zoom
                    .is_some_and(|range| z >= range.min && z <= range.max),
                TrackConstraint::Torch(_) => self.capabilities.torch,
            };
            if !supported {
                return Err(PlatformError::new(
                    "OverconstrainedError",
                    format!("{:?} not supported", constraint),
                ));
            }
            self.applied
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(constraint);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_facing_hint_falls_back_to_first_camera() {
        let platform = VirtualPlatform::new();
        platform.add_camera(VirtualCamera::blank("only", "USB Camera", CameraFacing::Front));
        let stream = platform
            .get_user_media(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap();
        assert_eq!(stream.video_track().unwrap().label(), "USB Camera");
    }

    #[tokio::test]
    async fn test_strict_facing_is_overconstrained() {
        let platform = VirtualPlatform::new();
        platform.add_camera(VirtualCamera::blank("only", "USB Camera", CameraFacing::Front));
        platform.set_strict_facing(true);
        let err = platform
            .get_user_media(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap_err();
        assert_eq!(err.name, "OverconstrainedError");
    }

    #[tokio::test]
    async fn test_no_cameras_not_found() {
        let platform = VirtualPlatform::new();
        let err = platform
            .get_user_media(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap_err();
        assert_eq!(err.name, "NotFoundError");
        assert_eq!(platform.acquisitions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_flow_until_stopped() {
        let platform = VirtualPlatform::new();
        platform.add_camera(VirtualCamera::blank("cam", "Back", CameraFacing::Back));
        let stream = platform
            .get_user_media(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stream.latest_frame().is_some());
        assert_eq!(platform.live_tracks(), 1);

        assert_eq!(stream.stop_all(), 1);
        assert_eq!(platform.live_tracks(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_constraint_rejected() {
        let platform = VirtualPlatform::new();
        platform.add_camera(VirtualCamera::blank("cam", "Back", CameraFacing::Back));
        let stream = platform
            .get_user_media(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap();
        let track = stream.video_track().unwrap();
        assert!(track.apply_constraint(TrackConstraint::Torch(true)).await.is_err());
        assert!(platform.applied_constraints().is_empty());
    }
}
