// SPDX-License-Identifier: GPL-3.0-only

//! HyperPOS Scanner - camera barcode capture for the HyperPOS point of sale
//!
//! This library opens a camera, decodes barcodes from its frames and hands
//! one validated value per scan to the host application.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`app`]: Scan session controller, fallback stages and detection debouncing
//! - [`backends`]: Camera platforms (V4L2 and a scripted virtual platform)
//! - [`config`]: User configuration handling
//! - [`storage`]: Pending-scan persistence
//! - [`feedback`]: Confirmation tone and haptic pulse
//!
//! # Example
//!
//! ```ignore
//! let controller = ScanSessionBuilder::new(platform, ScannerVariant::Library.profile())
//!     .build(ScanCallbacks::new(|value| println!("{value}"), || {}));
//! controller.open().await?;
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod feedback;
pub mod storage;

// Re-export commonly used types
pub use app::frame_processor::{DetectionEvent, Symbology};
pub use app::{
    RetryStage, ScanCallbacks, ScanSessionBuilder, ScanSessionController, ScanSessionSnapshot,
    SessionState,
};
pub use config::{Config, Locale};
pub use constants::{ScannerProfile, ScannerVariant};
pub use errors::{ErrorKind, ScanError, ScanResult};
