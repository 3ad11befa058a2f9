// SPDX-License-Identifier: GPL-3.0-only

//! Video surfaces and the registry used for the orphan sweep
//!
//! A [`VideoSurface`] is where a stream is shown and where the native
//! detector reads its frames from. Every surface is created through the
//! platform's [`SurfaceRegistry`], which keeps weak references so that a
//! sweep can find streams left attached after an abnormal exit.

use super::types::{CameraFrame, ReadyState};
use super::MediaStream;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info};

#[derive(Default)]
struct SurfaceState {
    source: Option<MediaStream>,
    playing: bool,
}

/// Display target for a media stream
pub struct VideoSurface {
    label: String,
    state: Mutex<SurfaceState>,
}

impl VideoSurface {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(SurfaceState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Show `stream` on this surface, replacing whatever was attached
    pub fn attach(&self, stream: &MediaStream) {
        let mut state = self.state();
        debug!(surface = %self.label, stream = stream.id(), "Attaching stream");
        state.source = Some(stream.clone());
        state.playing = false;
    }

    pub fn play(&self) {
        let mut state = self.state();
        state.playing = state.source.is_some();
    }

    /// Pause and clear the source. Returns the id of the detached stream.
    pub fn detach(&self) -> Option<String> {
        let mut state = self.state();
        state.playing = false;
        state.source.take().map(|s| s.id().to_string())
    }

    /// Detach only if `stream_id` is still the attached source
    pub fn detach_if(&self, stream_id: &str) -> bool {
        let mut state = self.state();
        if state.source.as_ref().is_some_and(|s| s.id() == stream_id) {
            state.source = None;
            state.playing = false;
            true
        } else {
            false
        }
    }

    pub fn source_id(&self) -> Option<String> {
        self.state().source.as_ref().map(|s| s.id().to_string())
    }

    pub fn ready_state(&self) -> ReadyState {
        let state = self.state();
        let Some(source) = &state.source else {
            return ReadyState::HaveNothing;
        };
        if source.live_track_count() == 0 {
            return ReadyState::HaveNothing;
        }
        match (source.latest_frame().is_some(), state.playing) {
            (false, _) => ReadyState::HaveMetadata,
            (true, false) => ReadyState::HaveCurrentData,
            (true, true) => ReadyState::HaveEnoughData,
        }
    }

    /// Frame currently shown, if any has arrived
    pub fn current_frame(&self) -> Option<Arc<CameraFrame>> {
        self.state().source.as_ref().and_then(|s| s.latest_frame())
    }

    /// Stop every live track of the attached stream and detach it.
    /// Returns the number of tracks stopped.
    pub fn force_release(&self) -> usize {
        let source = {
            let mut state = self.state();
            state.playing = false;
            state.source.take()
        };
        source.map(|s| s.stop_all()).unwrap_or(0)
    }
}

impl std::fmt::Debug for VideoSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSurface")
            .field("label", &self.label)
            .field("source", &self.source_id())
            .finish()
    }
}

/// Every surface a platform has handed out
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<Vec<Weak<VideoSurface>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, label: &str) -> Arc<VideoSurface> {
        let surface = Arc::new(VideoSurface::new(label));
        let mut surfaces = self.surfaces.lock().unwrap_or_else(|e| e.into_inner());
        surfaces.retain(|weak| weak.strong_count() > 0);
        surfaces.push(Arc::downgrade(&surface));
        surface
    }

    fn live(&self) -> Vec<Arc<VideoSurface>> {
        let mut surfaces = self.surfaces.lock().unwrap_or_else(|e| e.into_inner());
        surfaces.retain(|weak| weak.strong_count() > 0);
        surfaces.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-release every stream still attached to any surface.
    /// Returns the number of tracks that were still live.
    pub fn sweep(&self) -> usize {
        let stopped: usize = self.live().iter().map(|s| s.force_release()).sum();
        if stopped > 0 {
            info!(stopped, "Sweep stopped orphaned camera tracks");
        }
        stopped
    }
}
