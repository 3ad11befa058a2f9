// SPDX-License-Identifier: GPL-3.0-only

//! Polling a host barcode detector
//!
//! The stream is shown on a caller-owned surface. Every poll interval the
//! surface's current frame goes to the detector, and the first result in an
//! active symbology is emitted. Polls before the surface has a frame are
//! skipped.
//!
//! Before the first poll the detector is asked which symbologies it reads;
//! the active set is the intersection with the desired set. No detector, or
//! an empty intersection, makes the strategy unavailable.

use super::decoder::{FrameDecoder, decode_blocking};
use super::{DecodeLoop, DecodeStrategy, DetectionSink};
use crate::app::frame_processor::types::{DetectedBarcode, Symbology};
use crate::backends::camera::types::{CameraFrame, PlatformResult, ReadyState};
use crate::backends::camera::{CameraDeviceHandle, VideoSurface};
use crate::errors::{DETECTOR_NOT_SUPPORTED, NO_SUPPORTED_FORMATS, ScanError, ScanResult};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A point-in-time barcode detector provided by the host
pub trait BarcodeDetector: Send + Sync {
    /// Symbologies the host can detect
    fn supported_formats(&self) -> BoxFuture<'_, PlatformResult<Vec<Symbology>>>;

    /// Detect barcodes in one frame
    fn detect(&self, frame: Arc<CameraFrame>) -> BoxFuture<'_, PlatformResult<Vec<DetectedBarcode>>>;
}

/// Exposes a [`FrameDecoder`] as a host detector
pub struct DecoderBackedDetector {
    decoder: Arc<dyn FrameDecoder>,
}

impl DecoderBackedDetector {
    pub fn new(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self { decoder }
    }
}

impl BarcodeDetector for DecoderBackedDetector {
    fn supported_formats(&self) -> BoxFuture<'_, PlatformResult<Vec<Symbology>>> {
        let formats = self.decoder.symbologies().to_vec();
        Box::pin(async move { Ok(formats) })
    }

    fn detect(&self, frame: Arc<CameraFrame>) -> BoxFuture<'_, PlatformResult<Vec<DetectedBarcode>>> {
        let decoder = Arc::clone(&self.decoder);
        Box::pin(async move { Ok(decode_blocking(decoder, frame, None).await) })
    }
}

pub struct NativePollStrategy {
    detector: Option<Arc<dyn BarcodeDetector>>,
    surface: Arc<VideoSurface>,
    desired: Vec<Symbology>,
    interval: Duration,
    active: Mutex<Option<Arc<[Symbology]>>>,
}

impl NativePollStrategy {
    /// `detector` is `None` on hosts without a detector API
    pub fn new(
        detector: Option<Arc<dyn BarcodeDetector>>,
        surface: Arc<VideoSurface>,
        desired: Vec<Symbology>,
        interval: Duration,
    ) -> Self {
        Self {
            detector,
            surface,
            desired,
            interval,
            active: Mutex::new(None),
        }
    }

    /// Symbologies in use, once availability has been checked
    pub fn active_formats(&self) -> Option<Arc<[Symbology]>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl DecodeStrategy for NativePollStrategy {
    fn name(&self) -> &str {
        "native-poll"
    }

    fn ensure_available(&self) -> BoxFuture<'_, ScanResult<()>> {
        Box::pin(async move {
            let Some(detector) = &self.detector else {
                warn!("No barcode detector on this host");
                return Err(ScanError::DetectorUnavailable(
                    DETECTOR_NOT_SUPPORTED.to_string(),
                ));
            };
            if self.active_formats().is_some() {
                return Ok(());
            }

            let formats: Vec<Symbology> = match detector.supported_formats().await {
                Ok(supported) => self
                    .desired
                    .iter()
                    .copied()
                    .filter(|s| supported.contains(s))
                    .collect(),
                Err(e) => {
                    // Some hosts cannot list formats but still detect them
                    debug!(error = %e, "Format query failed, using the desired set");
                    self.desired.clone()
                }
            };

            if formats.is_empty() {
                warn!("Barcode detector supports none of the desired symbologies");
                return Err(ScanError::DetectorUnavailable(
                    NO_SUPPORTED_FORMATS.to_string(),
                ));
            }

            info!(
                formats = ?formats.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                "Barcode detector ready"
            );
            *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(formats.into());
            Ok(())
        })
    }

    fn start(
        &self,
        handle: &mut CameraDeviceHandle,
        sink: DetectionSink,
    ) -> ScanResult<DecodeLoop> {
        let Some(detector) = self.detector.clone() else {
            return Err(ScanError::DetectorUnavailable(
                DETECTOR_NOT_SUPPORTED.to_string(),
            ));
        };
        let formats = self
            .active_formats()
            .unwrap_or_else(|| self.desired.clone().into());

        handle.attach_to(Arc::clone(&self.surface));
        info!(
            surface = self.surface.label(),
            interval_ms = self.interval.as_millis(),
            "Starting detector polling"
        );

        let surface = Arc::clone(&self.surface);
        Ok(DecodeLoop::start("native-poll", self.interval, move || {
            if surface.ready_state() < ReadyState::HaveCurrentData {
                return None;
            }
            let frame = surface.current_frame()?;
            let detector = Arc::clone(&detector);
            let formats = Arc::clone(&formats);
            let sink = sink.clone();
            Some(async move {
                match detector.detect(frame).await {
                    Ok(found) => {
                        let hit = found
                            .into_iter()
                            .find(|b| formats.contains(&b.format) && !b.raw_value.is_empty());
                        if let Some(hit) = hit {
                            sink.emit(hit.raw_value, Some(hit.format));
                        }
                    }
                    // A failed detect call is a miss, not an error
                    Err(e) => trace!(error = %e, "Detect call failed"),
                }
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PlatformError;
    use crate::backends::camera::CameraPlatform;
    use crate::backends::virtual_camera::VirtualPlatform;
    use crate::errors::ErrorKind;

    struct ScriptedDetector {
        supported: PlatformResult<Vec<Symbology>>,
    }

    impl BarcodeDetector for ScriptedDetector {
        fn supported_formats(&self) -> BoxFuture<'_, PlatformResult<Vec<Symbology>>> {
            let supported = self.supported.clone();
            Box::pin(async move { supported })
        }
        fn detect(
            &self,
            _frame: Arc<CameraFrame>,
        ) -> BoxFuture<'_, PlatformResult<Vec<DetectedBarcode>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn strategy(detector: Option<Arc<dyn BarcodeDetector>>) -> NativePollStrategy {
        let platform = VirtualPlatform::new();
        NativePollStrategy::new(
            detector,
            platform.create_surface("video"),
            Symbology::WEB.to_vec(),
            Duration::from_millis(180),
        )
    }

    #[tokio::test]
    async fn test_missing_detector_unavailable() {
        let err = strategy(None).ensure_available().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectorUnavailable);
    }

    #[tokio::test]
    async fn test_intersects_supported_formats() {
        let s = strategy(Some(Arc::new(ScriptedDetector {
            supported: Ok(vec![Symbology::QrCode, Symbology::Codabar, Symbology::Ean13]),
        })));
        s.ensure_available().await.unwrap();
        assert_eq!(
            &*s.active_formats().unwrap(),
            &[Symbology::QrCode, Symbology::Ean13]
        );
    }

    #[tokio::test]
    async fn test_empty_intersection_unavailable() {
        let s = strategy(Some(Arc::new(ScriptedDetector {
            supported: Ok(vec![Symbology::Codabar, Symbology::Itf]),
        })));
        let err = s.ensure_available().await.unwrap_err();
        assert!(matches!(err, ScanError::DetectorUnavailable(ref m) if m == NO_SUPPORTED_FORMATS));
        assert!(s.active_formats().is_none());
    }

    #[tokio::test]
    async fn test_failed_query_uses_desired_set() {
        let s = strategy(Some(Arc::new(ScriptedDetector {
            supported: Err(PlatformError::new("NotSupportedError", "no list")),
        })));
        s.ensure_available().await.unwrap();
        assert_eq!(s.active_formats().unwrap().len(), Symbology::WEB.len());
    }
}
