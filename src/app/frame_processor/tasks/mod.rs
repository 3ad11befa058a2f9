// SPDX-License-Identifier: GPL-3.0-only

//! Decode strategies
//!
//! A strategy turns the frames of an acquired camera into a push-style
//! stream of [`DetectionEvent`]s. Two interchangeable implementations exist:
//!
//! - [`ContinuousScanStrategy`]: bundled decoder, fixed decode rate, square
//!   scan region
//! - [`NativePollStrategy`]: polls a host barcode detector against a
//!   caller-owned video surface
//!
//! Both skip frames until the surface has one buffered and never run two
//! decode attempts at once (see [`DecodeLoop`]).

pub mod continuous;
pub mod decode_loop;
pub mod decoder;
pub mod native_poll;
pub mod qr_decoder;

pub use continuous::ContinuousScanStrategy;
pub use decode_loop::DecodeLoop;
pub use decoder::{FrameDecoder, LumaImage, decode_blocking};
pub use native_poll::{BarcodeDetector, DecoderBackedDetector, NativePollStrategy};
pub use qr_decoder::QrFrameDecoder;

use crate::app::frame_processor::types::{DetectionEvent, Symbology};
use crate::backends::camera::CameraDeviceHandle;
use crate::errors::ScanResult;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::time::Instant;

/// Receives detections from a running strategy
#[derive(Clone)]
pub struct DetectionSink {
    epoch: Instant,
    deliver: Arc<dyn Fn(DetectionEvent) + Send + Sync>,
}

impl DetectionSink {
    /// Timestamps are milliseconds since `epoch`
    pub fn new(epoch: Instant, deliver: impl Fn(DetectionEvent) + Send + Sync + 'static) -> Self {
        Self {
            epoch,
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, raw_value: String, format: Option<Symbology>) {
        let event = DetectionEvent {
            raw_value,
            timestamp_ms: self.epoch.elapsed().as_millis() as u64,
            format,
        };
        (self.deliver)(event);
    }
}

/// Common contract of the decode strategies
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Check the decoder can run before any camera is acquired.
    /// Fails with `DetectorUnavailable` when it cannot.
    fn ensure_available(&self) -> BoxFuture<'_, ScanResult<()>>;

    /// Begin decoding the frames of `handle`. Decoding stops when the
    /// returned loop is stopped or dropped.
    fn start(&self, handle: &mut CameraDeviceHandle, sink: DetectionSink)
    -> ScanResult<DecodeLoop>;
}
