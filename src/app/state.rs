// SPDX-License-Identifier: GPL-3.0-only

//! Scan session state

use crate::app::debouncer::DetectionDebouncer;
use crate::app::fallback::RetryStage;
use crate::app::frame_processor::DecodeLoop;
use crate::backends::camera::CameraDeviceHandle;
use crate::backends::camera::types::CameraFacing;
use crate::config::Locale;
use crate::errors::ErrorKind;
use serde::Serialize;

/// Session lifecycle
///
/// `Closed -> Opening -> Active -> (Error | Closed)`. Any state may close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "kind")]
pub enum SessionState {
    #[default]
    Closed,
    /// Acquisition in progress
    Opening,
    /// Camera running and decoding
    Active,
    /// Acquisition ended with a classified error
    Error(ErrorKind),
}

impl SessionState {
    pub fn is_open(self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// One camera scanning session
///
/// Holds at most one camera handle. Installing a new handle always releases
/// the previous one first.
pub struct ScanSession {
    pub state: SessionState,
    pub is_loading: bool,
    pub last_error: Option<ErrorKind>,
    pub facing: CameraFacing,
    pub zoom_level: f64,
    pub max_zoom: f64,
    pub has_torch: bool,
    pub torch_on: bool,
    pub retry_stage: RetryStage,
    /// Bumped by every open, close and camera switch; stale attempts compare
    /// against it and bail out
    pub(crate) generation: u64,
    pub(crate) debouncer: DetectionDebouncer,
    pub(crate) handle: Option<CameraDeviceHandle>,
    pub(crate) decode_loop: Option<DecodeLoop>,
    /// `on_close` already fired for this session
    pub(crate) close_notified: bool,
}

impl ScanSession {
    pub(crate) fn new(debouncer: DetectionDebouncer) -> Self {
        Self {
            state: SessionState::Closed,
            is_loading: false,
            last_error: None,
            facing: CameraFacing::Back,
            zoom_level: 1.0,
            max_zoom: 1.0,
            has_torch: false,
            torch_on: false,
            retry_stage: RetryStage::Preferred,
            generation: 0,
            debouncer,
            handle: None,
            decode_loop: None,
            close_notified: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn has_scanned(&self) -> bool {
        self.debouncer.has_scanned()
    }

    /// Clean slate for a new open, keeping the generation counter
    pub(crate) fn reset(&mut self) {
        self.state = SessionState::Closed;
        self.is_loading = false;
        self.last_error = None;
        self.facing = CameraFacing::Back;
        self.retry_stage = RetryStage::Preferred;
        self.close_notified = false;
        self.debouncer.reset();
        self.reset_camera_controls();
    }

    pub(crate) fn reset_camera_controls(&mut self) {
        self.zoom_level = 1.0;
        self.max_zoom = 1.0;
        self.has_torch = false;
        self.torch_on = false;
    }

    /// Advance the generation so in-flight attempts become stale
    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Stop decoding and hand back the camera so the caller can release it
    /// outside the session lock
    pub(crate) fn take_camera(&mut self) -> Option<CameraDeviceHandle> {
        if let Some(mut decode_loop) = self.decode_loop.take() {
            decode_loop.stop();
        }
        self.handle.take()
    }

    pub fn snapshot(&self, locale: Locale) -> ScanSessionSnapshot {
        ScanSessionSnapshot {
            state: self.state,
            is_open: self.is_open(),
            is_loading: self.is_loading,
            last_error: self.last_error,
            error_message: self.last_error.map(|k| k.message(locale).to_string()),
            facing: self.facing,
            zoom_level: self.zoom_level,
            max_zoom: self.max_zoom,
            has_torch: self.has_torch,
            torch_on: self.torch_on,
            has_scanned: self.has_scanned(),
            retry_stage: self.retry_stage,
            camera: self.handle.as_ref().map(|h| h.label().to_string()),
        }
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("facing", &self.facing)
            .field("retry_stage", &self.retry_stage)
            .field("handle", &self.handle)
            .field("decoding", &self.decode_loop.is_some())
            .finish_non_exhaustive()
    }
}

/// Public view of a session, as handed to callers and printed by the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSessionSnapshot {
    pub state: SessionState,
    pub is_open: bool,
    pub is_loading: bool,
    pub last_error: Option<ErrorKind>,
    /// `last_error` rendered in the configured locale
    pub error_message: Option<String>,
    pub facing: CameraFacing,
    pub zoom_level: f64,
    pub max_zoom: f64,
    pub has_torch: bool,
    pub torch_on: bool,
    pub has_scanned: bool,
    pub retry_stage: RetryStage,
    /// Label of the camera in use
    pub camera: Option<String>,
}
