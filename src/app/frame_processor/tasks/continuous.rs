// SPDX-License-Identifier: GPL-3.0-only

//! Continuous decoding with the bundled engine
//!
//! Shows the stream on the strategy's own preview surface and decodes the
//! latest frame at a fixed rate, restricted to the centred scan region.
//! Frames without a symbol are silent misses.

use super::decoder::{FrameDecoder, decode_blocking};
use super::{DecodeLoop, DecodeStrategy, DetectionSink};
use crate::app::frame_processor::types::ScanRegion;
use crate::backends::camera::types::ReadyState;
use crate::backends::camera::{CameraDeviceHandle, VideoSurface};
use crate::errors::ScanResult;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct ContinuousScanStrategy {
    decoder: Arc<dyn FrameDecoder>,
    surface: Arc<VideoSurface>,
    region: ScanRegion,
    period: Duration,
}

impl ContinuousScanStrategy {
    /// `fps` decode passes per second over a region sized for `container_width`
    pub fn new(
        decoder: Arc<dyn FrameDecoder>,
        surface: Arc<VideoSurface>,
        container_width: u32,
        fps: u32,
    ) -> Self {
        Self {
            decoder,
            surface,
            region: ScanRegion::for_container(container_width),
            period: Duration::from_millis(1000 / u64::from(fps.max(1))),
        }
    }

    pub fn region(&self) -> ScanRegion {
        self.region
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl DecodeStrategy for ContinuousScanStrategy {
    fn name(&self) -> &str {
        "continuous"
    }

    fn ensure_available(&self) -> BoxFuture<'_, ScanResult<()>> {
        // The engine is compiled in
        Box::pin(async { Ok(()) })
    }

    fn start(
        &self,
        handle: &mut CameraDeviceHandle,
        sink: DetectionSink,
    ) -> ScanResult<DecodeLoop> {
        handle.attach_to(Arc::clone(&self.surface));
        info!(
            decoder = self.decoder.name(),
            region = self.region.side,
            period_ms = self.period.as_millis(),
            "Starting continuous decoding"
        );

        let surface = Arc::clone(&self.surface);
        let decoder = Arc::clone(&self.decoder);
        let region = self.region;

        Ok(DecodeLoop::start("continuous-decode", self.period, move || {
            if surface.ready_state() < ReadyState::HaveCurrentData {
                return None;
            }
            let frame = surface.current_frame()?;
            let rect = region.frame_rect(frame.width, frame.height);
            let decoder = Arc::clone(&decoder);
            let sink = sink.clone();
            Some(async move {
                let found = decode_blocking(decoder, frame, rect).await;
                if let Some(first) = found.into_iter().next() {
                    debug!(format = %first.format, "Frame decoded");
                    sink.emit(first.raw_value, Some(first.format));
                }
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::frame_processor::types::{DetectedBarcode, PixelRect, Symbology};
    use crate::backends::camera::types::{CameraConstraints, CameraFacing, CameraFrame};
    use crate::backends::camera::{CameraPlatform, CameraSessionManager};
    use crate::backends::virtual_camera::{VirtualCamera, VirtualPlatform};
    use std::sync::Mutex;

    /// Reports every frame as containing the same code and records regions
    struct FixedDecoder {
        regions: Mutex<Vec<Option<PixelRect>>>,
    }

    impl FrameDecoder for FixedDecoder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn symbologies(&self) -> &[Symbology] {
            &[Symbology::Ean13]
        }
        fn decode(&self, _frame: &CameraFrame, region: Option<PixelRect>) -> Vec<DetectedBarcode> {
            self.regions.lock().unwrap().push(region);
            vec![DetectedBarcode {
                raw_value: "6281000000011".into(),
                format: Symbology::Ean13,
                region: None,
            }]
        }
    }

    #[tokio::test]
    async fn test_emits_decoded_values_with_region() {
        let platform = Arc::new(VirtualPlatform::new());
        platform.add_camera(
            VirtualCamera::new("cam", "Back", Some(CameraFacing::Back))
                .with_frames(vec![CameraFrame::from_gray(600, 400, vec![0; 600 * 400])]),
        );
        let manager = CameraSessionManager::new(Arc::clone(&platform));
        let mut handle = manager
            .acquire(CameraConstraints::facing(CameraFacing::Back))
            .await
            .unwrap();

        let decoder = Arc::new(FixedDecoder {
            regions: Mutex::new(Vec::new()),
        });
        let strategy = ContinuousScanStrategy::new(
            decoder.clone(),
            platform.create_surface("library"),
            300,
            10,
        );
        assert_eq!(strategy.period(), Duration::from_millis(100));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = DetectionSink::new(tokio::time::Instant::now(), move |event| {
            let _ = tx.send(event);
        });
        let mut decode_loop = strategy.start(&mut handle, sink).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.raw_value, "6281000000011");
        assert_eq!(event.format, Some(Symbology::Ean13));
        decode_loop.stop();

        // 250px box in a 300px container, frame is 600px wide
        let first = decoder.regions.lock().unwrap()[0].unwrap();
        assert_eq!((first.width, first.height), (400, 400));
        assert_eq!((first.x, first.y), (100, 0));
    }
}
