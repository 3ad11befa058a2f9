// SPDX-License-Identifier: GPL-3.0-only

//! Barcode scan sessions
//!
//! This module ties the camera manager, a decode strategy, the fallback
//! orchestrator and the debouncer into one caller-facing session.
//!
//! # Architecture
//!
//! - `state`: Session state and its serialisable snapshot
//! - `fallback`: Ordered camera acquisition stages
//! - `debouncer`: One-shot guard, validation and same-value window
//! - `frame_processor`: Decode strategies and decoders
//! - `builder`: Assembles a controller from a profile or config
//!
//! # Main Types
//!
//! - `ScanSessionController`: Drives open, close, switching, zoom and torch
//! - `ScanCallbacks`: Where accepted values and close notifications go
//!
//! Session state sits behind a `std::sync::Mutex` that is never held across
//! an await. Every open, close and camera switch bumps a generation counter;
//! asynchronous work compares its generation before touching the session, so
//! a superseded acquisition releases its camera instead of installing it.

mod builder;
pub mod debouncer;
pub mod fallback;
pub mod frame_processor;
pub mod state;

pub use builder::ScanSessionBuilder;
pub use debouncer::{DetectionDebouncer, Rejection, Verdict};
pub use fallback::{FallbackOrchestrator, RetryStage, StageOutcome, StageRunner};
pub use state::{ScanSession, ScanSessionSnapshot, SessionState};

use crate::backends::camera::types::{
    CameraConstraints, CameraDevice, CameraFacing, TrackConstraint,
};
use crate::backends::camera::{CameraDeviceHandle, CameraPlatform, CameraSessionManager};
use crate::config::Locale;
use crate::constants::{MAX_ZOOM_FACTOR, ScannerProfile};
use crate::errors::{ScanError, ScanResult};
use crate::feedback::FeedbackDispatcher;
use crate::storage::PendingScanSlot;
use frame_processor::{DecodeStrategy, DetectionEvent, DetectionSink};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Caller side of a session
#[derive(Clone)]
pub struct ScanCallbacks {
    /// Receives each accepted, trimmed barcode value
    pub on_scan: Arc<dyn Fn(&str) + Send + Sync>,
    /// Fires once when the session closes
    pub on_close: Arc<dyn Fn() + Send + Sync>,
}

impl ScanCallbacks {
    pub fn new(
        on_scan: impl Fn(&str) + Send + Sync + 'static,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_scan: Arc::new(on_scan),
            on_close: Arc::new(on_close),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {}, || {})
    }
}

impl std::fmt::Debug for ScanCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCallbacks").finish_non_exhaustive()
    }
}

struct Shared<P: CameraPlatform> {
    manager: CameraSessionManager<P>,
    strategy: Arc<dyn DecodeStrategy>,
    orchestrator: FallbackOrchestrator,
    profile: ScannerProfile,
    pending: PendingScanSlot,
    feedback: FeedbackDispatcher,
    locale: Locale,
    callbacks: ScanCallbacks,
    session: Mutex<ScanSession>,
    /// Serialises camera acquisitions
    acquire_lock: tokio::sync::Mutex<()>,
    /// Zero point of detection timestamps
    epoch: Instant,
}

/// Drives one scan session over a camera platform.
///
/// Cheap to clone; clones share the session. Dropping the last clone
/// releases the camera.
pub struct ScanSessionController<P: CameraPlatform> {
    shared: Arc<Shared<P>>,
}

impl<P: CameraPlatform> Clone for ScanSessionController<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: CameraPlatform> ScanSessionController<P> {
    pub(crate) fn from_parts(
        manager: CameraSessionManager<P>,
        strategy: Arc<dyn DecodeStrategy>,
        profile: ScannerProfile,
        pending: PendingScanSlot,
        feedback: FeedbackDispatcher,
        locale: Locale,
        callbacks: ScanCallbacks,
    ) -> Self {
        let orchestrator = FallbackOrchestrator::new(profile.stage_settle_delay, profile.ideal_size);
        let session = ScanSession::new(DetectionDebouncer::from_profile(&profile));
        info!(
            variant = profile.variant.display_name(),
            strategy = strategy.name(),
            multi_scan = profile.multi_scan,
            "Creating scan session controller"
        );
        Self {
            shared: Arc::new(Shared {
                manager,
                strategy,
                orchestrator,
                profile,
                pending,
                feedback,
                locale,
                callbacks,
                session: Mutex::new(session),
                acquire_lock: tokio::sync::Mutex::new(()),
                epoch: Instant::now(),
            }),
        }
    }

    /// Open the session: settle, check the decoder, then walk the fallback
    /// stages from the back camera. A no-op unless the session is closed.
    pub async fn open(&self) -> ScanResult<()> {
        self.shared.open().await
    }

    /// Close from any state. Fires `on_close` once per session.
    pub fn close(&self) {
        self.shared.shutdown(true);
    }

    /// Visibility binding. `true` opens in the background and must be called
    /// inside a tokio runtime; `false` tears down without notifying.
    pub fn set_open(&self, open: bool) {
        if open {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = shared.open().await {
                    debug!(error = %e, "Background open ended without a camera");
                }
            });
        } else {
            self.shared.shutdown(false);
        }
    }

    /// Flip to the other camera and re-run acquisition from that side
    pub async fn switch_camera(&self) -> ScanResult<()> {
        self.shared.switch_camera().await
    }

    /// Step zoom 1, 2, ... up to the maximum, then back to 1
    pub async fn toggle_zoom(&self) -> ScanResult<()> {
        self.shared.toggle_zoom().await
    }

    pub async fn toggle_torch(&self) -> ScanResult<()> {
        self.shared.toggle_torch().await
    }

    /// Start over from stage 0 after an error. A no-op in any other state.
    pub async fn retry(&self) -> ScanResult<()> {
        self.shared.retry().await
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_open()
    }

    pub fn has_scanned(&self) -> bool {
        self.shared.lock().has_scanned()
    }

    pub fn snapshot(&self) -> ScanSessionSnapshot {
        self.shared.lock().snapshot(self.shared.locale)
    }

    /// Localised message for the last error, if any
    pub fn error_message(&self) -> Option<&'static str> {
        self.shared
            .lock()
            .last_error
            .map(|kind| kind.message(self.shared.locale))
    }

    pub fn profile(&self) -> &ScannerProfile {
        &self.shared.profile
    }

    pub fn manager(&self) -> &CameraSessionManager<P> {
        &self.shared.manager
    }
}

impl<P: CameraPlatform> std::fmt::Debug for ScanSessionController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSessionController")
            .field("manager", &self.shared.manager)
            .field("strategy", &self.shared.strategy.name())
            .field("session", &*self.shared.lock())
            .finish()
    }
}

impl<P: CameraPlatform> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, ScanSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn release(&self, camera: Option<CameraDeviceHandle>) -> usize {
        let mut slot = camera;
        self.manager.release(&mut slot)
    }

    async fn open(self: &Arc<Self>) -> ScanResult<()> {
        let generation = {
            let mut session = self.lock();
            if session.is_open() {
                debug!(state = ?session.state, "Open ignored, session already open");
                return Ok(());
            }
            session.reset();
            session.state = SessionState::Opening;
            session.is_loading = true;
            session.bump_generation()
        };
        info!(generation, "Opening scan session");

        self.establish(generation, CameraFacing::Back, self.profile.open_settle_delay)
            .await
    }

    /// Settle, probe the decoder and run the fallback walk for `generation`
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        preferred: CameraFacing,
        settle: Duration,
    ) -> ScanResult<()> {
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let result = match self.strategy.ensure_available().await {
            Ok(()) => {
                let runner = SessionRunner {
                    shared: self,
                    generation,
                };
                self.orchestrator.run(&runner, preferred).await
            }
            Err(e) => Err(e),
        };

        self.finish_attempt(generation, result)
    }

    fn finish_attempt(&self, generation: u64, result: ScanResult<StageOutcome>) -> ScanResult<()> {
        let mut session = self.lock();
        if session.generation != generation {
            return Err(ScanError::Superseded);
        }

        match result {
            Ok(outcome) => {
                session.state = SessionState::Active;
                session.is_loading = false;
                session.last_error = None;
                session.facing = outcome.facing;
                session.retry_stage = outcome.stage;
                info!(
                    stage = %outcome.stage,
                    facing = %outcome.facing,
                    max_zoom = session.max_zoom,
                    torch = session.has_torch,
                    "Scan session active"
                );
                Ok(())
            }
            Err(ScanError::Superseded) => Err(ScanError::Superseded),
            Err(e) => {
                let kind = e.kind();
                let camera = session.take_camera();
                session.state = SessionState::Error(kind);
                session.is_loading = false;
                session.last_error = Some(kind);
                drop(session);

                self.release(camera);
                warn!(%kind, error = %e, "Scan session failed to start");
                Err(e)
            }
        }
    }

    /// Put a freshly acquired camera into the session and start decoding
    fn install(
        self: &Arc<Self>,
        generation: u64,
        mut handle: CameraDeviceHandle,
    ) -> ScanResult<()> {
        let mut session = self.lock();
        if session.generation != generation || !session.is_open() {
            drop(session);
            debug!(label = %handle.label(), "Discarding camera from a superseded attempt");
            handle.release();
            return Err(ScanError::Superseded);
        }

        // Release sweeps every surface, so it runs before the new attach
        let previous = session.take_camera();
        self.release(previous);

        let sink = self.detection_sink(generation);
        let decode_loop = match self.strategy.start(&mut handle, sink) {
            Ok(decode_loop) => decode_loop,
            Err(e) => {
                drop(session);
                handle.release();
                return Err(e);
            }
        };

        let capabilities = handle.capabilities();
        session.zoom_level = 1.0;
        session.max_zoom = capabilities
            .zoom
            .map(|range| range.max.min(MAX_ZOOM_FACTOR).max(1.0))
            .unwrap_or(1.0);
        session.has_torch = capabilities.torch;
        session.torch_on = false;
        session.handle = Some(handle);
        session.decode_loop = Some(decode_loop);
        Ok(())
    }

    fn detection_sink(self: &Arc<Self>, generation: u64) -> DetectionSink {
        // Weak: the loop lives inside the session it reports to
        let weak = Arc::downgrade(self);
        DetectionSink::new(self.epoch, move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_detection(generation, event);
            }
        })
    }

    fn on_detection(self: &Arc<Self>, generation: u64, event: DetectionEvent) {
        let single_scan = !self.profile.multi_scan;
        let value = {
            let mut session = self.lock();
            let running = matches!(session.state, SessionState::Opening | SessionState::Active);
            if session.generation != generation || !running || session.handle.is_none() {
                trace!("Detection for a stale session dropped");
                return;
            }
            match session.debouncer.offer(&event) {
                Verdict::Accepted(value) => {
                    if single_scan {
                        if let Some(mut decode_loop) = session.decode_loop.take() {
                            decode_loop.stop();
                        }
                    }
                    value
                }
                Verdict::Rejected(reason) => {
                    trace!(?reason, "Detection rejected");
                    return;
                }
            }
        };

        info!(value = %value, format = ?event.format, "Barcode accepted");
        // Persisted before the caller hears about it
        if let Err(e) = self.pending.record(&value) {
            warn!(error = %e, "Failed to persist pending scan");
        }
        self.feedback.confirm();
        (self.callbacks.on_scan)(&value);

        if single_scan {
            self.schedule_auto_close(generation);
        }
    }

    fn schedule_auto_close(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.profile.auto_close_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.is_current(generation) {
                debug!("Closing after accepted scan");
                shared.shutdown(true);
            }
        });
    }

    /// Common teardown for close, visibility off and drop
    fn shutdown(&self, notify: bool) {
        let (camera, fire) = {
            let mut session = self.lock();
            session.bump_generation();
            let camera = session.take_camera();
            session.state = SessionState::Closed;
            session.is_loading = false;
            session.reset_camera_controls();
            let fire = notify && !session.close_notified;
            session.close_notified = true;
            (camera, fire)
        };

        let stopped = self.release(camera);
        info!(stopped, notify = fire, "Scan session closed");
        if fire {
            (self.callbacks.on_close)();
        }
    }

    async fn switch_camera(self: &Arc<Self>) -> ScanResult<()> {
        let (generation, facing, camera) = {
            let mut session = self.lock();
            if !session.is_open() {
                debug!("Switch ignored, session closed");
                return Ok(());
            }
            session.facing = session.facing.opposite();
            session.debouncer.reset_guard();
            session.reset_camera_controls();
            // An active session stays active while its handle is replaced
            if matches!(session.state, SessionState::Error(_)) {
                session.state = SessionState::Opening;
            }
            session.is_loading = true;
            let generation = session.bump_generation();
            (generation, session.facing, session.take_camera())
        };
        self.release(camera);
        info!(%facing, generation, "Switching camera");

        self.establish(generation, facing, self.orchestrator.settle_delay())
            .await
    }

    async fn toggle_zoom(&self) -> ScanResult<()> {
        let (track, next, generation) = {
            let session = self.lock();
            let Some(track) = session.handle.as_ref().and_then(|h| h.video_track()) else {
                return Ok(());
            };
            if track.capabilities().zoom.is_none() || session.max_zoom <= 1.0 {
                return Ok(());
            }
            let next = if session.zoom_level < session.max_zoom {
                (session.zoom_level + 1.0).min(session.max_zoom)
            } else {
                1.0
            };
            (track, next, session.generation)
        };

        track
            .apply_constraint(TrackConstraint::Zoom(next))
            .await
            .map_err(|e| {
                warn!(zoom = next, error = %e, "Zoom constraint rejected");
                ScanError::from_platform(e)
            })?;

        let mut session = self.lock();
        if session.generation == generation {
            debug!(zoom = next, "Zoom applied");
            session.zoom_level = next;
        }
        Ok(())
    }

    async fn toggle_torch(&self) -> ScanResult<()> {
        let (track, next, generation) = {
            let session = self.lock();
            if !session.has_torch {
                return Ok(());
            }
            let Some(track) = session.handle.as_ref().and_then(|h| h.video_track()) else {
                return Ok(());
            };
            (track, !session.torch_on, session.generation)
        };

        track
            .apply_constraint(TrackConstraint::Torch(next))
            .await
            .map_err(|e| {
                warn!(torch = next, error = %e, "Torch constraint rejected");
                ScanError::from_platform(e)
            })?;

        let mut session = self.lock();
        if session.generation == generation {
            session.torch_on = next;
        }
        Ok(())
    }

    async fn retry(self: &Arc<Self>) -> ScanResult<()> {
        let camera = {
            let mut session = self.lock();
            if !matches!(session.state, SessionState::Error(_)) {
                debug!(state = ?session.state, "Retry ignored outside the error state");
                return Ok(());
            }
            session.state = SessionState::Closed;
            session.retry_stage = RetryStage::Preferred;
            session.last_error = None;
            session.take_camera()
        };
        self.release(camera);
        info!("Retrying camera acquisition");
        self.open().await
    }
}

impl<P: CameraPlatform> Drop for Shared<P> {
    fn drop(&mut self) {
        let camera = {
            let session = self.session.get_mut().unwrap_or_else(|e| e.into_inner());
            session.bump_generation();
            session.take_camera()
        };
        let mut slot = camera;
        self.manager.release(&mut slot);
    }
}

/// Runs fallback stages against the session of one generation
struct SessionRunner<'a, P: CameraPlatform> {
    shared: &'a Arc<Shared<P>>,
    generation: u64,
}

impl<P: CameraPlatform> StageRunner for SessionRunner<'_, P> {
    fn enter_stage(&self, stage: RetryStage) -> ScanResult<()> {
        let camera = {
            let mut session = self.shared.lock();
            if session.generation != self.generation {
                return Err(ScanError::Superseded);
            }
            session.retry_stage = stage;
            session.take_camera()
        };
        let released = self.shared.release(camera);
        debug!(%stage, released, "Entered acquisition stage");
        Ok(())
    }

    fn acquire(&self, constraints: CameraConstraints) -> BoxFuture<'_, ScanResult<()>> {
        Box::pin(async move {
            let _serial = self.shared.acquire_lock.lock().await;
            if !self.shared.is_current(self.generation) {
                return Err(ScanError::Superseded);
            }
            let handle = self.shared.manager.acquire(constraints).await?;
            self.shared.install(self.generation, handle)
        })
    }

    fn enumerate(&self) -> BoxFuture<'_, ScanResult<Vec<CameraDevice>>> {
        Box::pin(async move { self.shared.manager.enumerate_cameras().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::frame_processor::{BarcodeDetector, DetectedBarcode, Symbology};
    use crate::backends::camera::types::{
        CameraFrame, PlatformError, PlatformResult, TrackCapabilities, ZoomRange,
    };
    use crate::backends::virtual_camera::{VirtualCamera, VirtualPlatform};
    use crate::constants::ScannerVariant;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports the same EAN-13 in every frame
    struct ConstantDetector(&'static str);

    impl BarcodeDetector for ConstantDetector {
        fn supported_formats(&self) -> BoxFuture<'_, PlatformResult<Vec<Symbology>>> {
            Box::pin(async { Ok(Symbology::ALL.to_vec()) })
        }
        fn detect(&self, _frame: Arc<CameraFrame>) -> BoxFuture<'_, PlatformResult<Vec<DetectedBarcode>>> {
            let value = self.0.to_string();
            Box::pin(async move {
                Ok(vec![DetectedBarcode {
                    raw_value: value,
                    format: Symbology::Ean13,
                    region: None,
                }])
            })
        }
    }

    fn platform() -> Arc<VirtualPlatform> {
        let platform = VirtualPlatform::new();
        platform.add_camera(
            VirtualCamera::blank("back", "Back Camera", CameraFacing::Back).with_capabilities(
                TrackCapabilities {
                    zoom: Some(ZoomRange {
                        min: 1.0,
                        max: 8.0,
                        step: 0.1,
                    }),
                    torch: true,
                },
            ),
        );
        platform.add_camera(VirtualCamera::blank("front", "Front Camera", CameraFacing::Front));
        Arc::new(platform)
    }

    fn controller(
        platform: &Arc<VirtualPlatform>,
        scans: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    ) -> ScanSessionController<VirtualPlatform> {
        ScanSessionBuilder::new(Arc::clone(platform), ScannerVariant::Offline.profile())
            .detector(Arc::new(ConstantDetector("6281000000011")))
            .build(ScanCallbacks::new(
                move |_| {
                    scans.fetch_add(1, Ordering::SeqCst);
                },
                move || {
                    closes.fetch_add(1, Ordering::SeqCst);
                },
            ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_reaches_active_with_capabilities() {
        let platform = platform();
        let (scans, closes) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let controller = controller(&platform, scans, closes);
        controller.open().await.unwrap();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(snapshot.facing, CameraFacing::Back);
        assert_eq!(snapshot.max_zoom, MAX_ZOOM_FACTOR);
        assert!(snapshot.has_torch);
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_scan_then_auto_close() {
        let platform = platform();
        let (scans, closes) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let controller = controller(&platform, Arc::clone(&scans), Arc::clone(&closes));
        controller.open().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(scans.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(platform.live_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zoom_cycles_and_clamps() {
        let platform = platform();
        let controller = ScanSessionBuilder::new(Arc::clone(&platform), ScannerVariant::Offline.profile())
            .detector(Arc::new(crate::app::frame_processor::DecoderBackedDetector::new(
                Arc::new(crate::app::frame_processor::QrFrameDecoder::new()),
            )))
            .build(ScanCallbacks::noop());
        controller.open().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..6 {
            controller.toggle_zoom().await.unwrap();
            seen.push(controller.snapshot().zoom_level);
        }
        assert_eq!(seen, vec![2.0, 3.0, 4.0, 5.0, 1.0, 2.0]);

        controller.toggle_torch().await.unwrap();
        assert!(controller.snapshot().torch_on);
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_missing_is_terminal() {
        let platform = platform();
        let controller = ScanSessionBuilder::new(Arc::clone(&platform), ScannerVariant::Web.profile())
            .build(ScanCallbacks::noop());
        let err = controller.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectorUnavailable);
        assert_eq!(
            controller.state(),
            SessionState::Error(ErrorKind::DetectorUnavailable)
        );
        assert!(platform.acquisitions().is_empty());
        assert!(controller.error_message().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_error() {
        let platform = platform();
        platform.fail_all(PlatformError::new("NotAllowedError", "denied"));
        let (scans, closes) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let controller = controller(&platform, scans, closes);

        let err = controller.open().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(controller.snapshot().retry_stage, RetryStage::Enumerated);

        platform.clear_failures();
        controller.retry().await.unwrap();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Active);
        assert_eq!(snapshot.retry_stage, RetryStage::Preferred);
        assert!(snapshot.last_error.is_none());
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_camera() {
        let platform = platform();
        let (scans, closes) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let controller = controller(&platform, scans, Arc::clone(&closes));
        controller.open().await.unwrap();
        assert_eq!(platform.live_tracks(), 1);

        drop(controller);
        assert_eq!(platform.live_tracks(), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
