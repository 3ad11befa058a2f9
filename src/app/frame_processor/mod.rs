// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing for barcode capture
//!
//! Decode strategies sample camera frames and report candidate values as
//! [`DetectionEvent`]s; validation and debouncing happen downstream.

pub mod tasks;
pub mod types;

pub use tasks::{
    BarcodeDetector, ContinuousScanStrategy, DecodeLoop, DecodeStrategy, DecoderBackedDetector,
    DetectionSink, FrameDecoder, NativePollStrategy, QrFrameDecoder,
};
pub use types::{DetectedBarcode, DetectionEvent, FrameRegion, PixelRect, ScanRegion, Symbology};
