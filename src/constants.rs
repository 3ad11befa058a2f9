// SPDX-License-Identifier: GPL-3.0-only

//! Scanner-wide constants and variant profiles

use crate::app::frame_processor::types::Symbology;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Durable key holding the last accepted barcode
pub const PENDING_SCAN_KEY: &str = "hyperpos_pending_scan";

/// Wait between releasing one camera handle and the next acquisition
pub const STAGE_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Identical values accepted again only after this window (detector variants)
pub const DEDUP_WINDOW: Duration = Duration::from_millis(2000);

/// Decode rate of the continuous library strategy
pub const LIBRARY_DECODE_FPS: u32 = 10;

/// Native detector polling periods
pub const OFFLINE_POLL_INTERVAL: Duration = Duration::from_millis(150);
pub const WEB_POLL_INTERVAL: Duration = Duration::from_millis(180);

/// Accepted barcode length for the general (library) scanner, in characters
pub const MIN_BARCODE_LEN: usize = 3;
pub const MAX_BARCODE_LEN: usize = 50;

/// Scan region: `min(container_width - margin, max)` pixels per side
pub const SCAN_REGION_MAX: u32 = 250;
pub const SCAN_REGION_MARGIN: u32 = 40;
/// Container width assumed when the caller does not report one
pub const DEFAULT_CONTAINER_WIDTH: u32 = 300;

/// Lower-cased label fragments identifying a rear camera
pub const BACK_CAMERA_TOKENS: [&str; 5] = ["back", "rear", "environment", "0", "خلفي"];

/// Resolution requested by the offline variant
pub const IDEAL_WIDTH: u32 = 1280;
pub const IDEAL_HEIGHT: u32 = 720;

/// Confirmation tone
pub const BEEP_FREQUENCY_HZ: u32 = 1800;
pub const BEEP_DURATION: Duration = Duration::from_millis(150);
pub const BEEP_VOLUME: f32 = 0.3;

/// Largest zoom factor offered, even if the hardware reports more
pub const MAX_ZOOM_FACTOR: f64 = 5.0;

/// Which of the three scanner front ends is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScannerVariant {
    /// Bundled decoder library, continuous frame decoding
    #[default]
    Library,
    /// Native detector polling, works without network access
    Offline,
    /// Native detector polling with the web-restricted symbology set
    Web,
}

/// How a variant turns frames into detections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Continuous,
    NativePoll,
}

/// Validation applied to a trimmed raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    /// Character count within the inclusive range
    Length { min: usize, max: usize },
    /// Anything non-empty
    NonEmpty,
}

impl ValidationRule {
    pub fn accepts(&self, value: &str) -> bool {
        match *self {
            ValidationRule::Length { min, max } => {
                let len = value.chars().count();
                (min..=max).contains(&len)
            }
            ValidationRule::NonEmpty => !value.is_empty(),
        }
    }
}

impl ScannerVariant {
    /// Get all variants for CLI iteration
    pub const ALL: [ScannerVariant; 3] = [
        ScannerVariant::Library,
        ScannerVariant::Offline,
        ScannerVariant::Web,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ScannerVariant::Library => "Library",
            ScannerVariant::Offline => "Offline",
            ScannerVariant::Web => "Web",
        }
    }

    /// Timing and validation profile for this variant
    pub fn profile(self) -> ScannerProfile {
        match self {
            ScannerVariant::Library => ScannerProfile {
                variant: self,
                strategy: StrategyKind::Continuous,
                validation: ValidationRule::Length {
                    min: MIN_BARCODE_LEN,
                    max: MAX_BARCODE_LEN,
                },
                dedup_window: None,
                poll_interval: Duration::from_millis(1000 / u64::from(LIBRARY_DECODE_FPS)),
                open_settle_delay: Duration::from_millis(300),
                auto_close_delay: Duration::from_millis(100),
                stage_settle_delay: STAGE_SETTLE_DELAY,
                ideal_size: None,
                haptic_pulse: Duration::from_millis(100),
                symbologies: Symbology::ALL.to_vec(),
                multi_scan: false,
            },
            ScannerVariant::Offline => ScannerProfile {
                variant: self,
                strategy: StrategyKind::NativePoll,
                validation: ValidationRule::NonEmpty,
                dedup_window: Some(DEDUP_WINDOW),
                poll_interval: OFFLINE_POLL_INTERVAL,
                open_settle_delay: Duration::ZERO,
                auto_close_delay: Duration::ZERO,
                stage_settle_delay: STAGE_SETTLE_DELAY,
                ideal_size: Some((IDEAL_WIDTH, IDEAL_HEIGHT)),
                haptic_pulse: Duration::from_millis(150),
                symbologies: Symbology::ALL.to_vec(),
                multi_scan: false,
            },
            ScannerVariant::Web => ScannerProfile {
                variant: self,
                strategy: StrategyKind::NativePoll,
                validation: ValidationRule::NonEmpty,
                dedup_window: Some(DEDUP_WINDOW),
                poll_interval: WEB_POLL_INTERVAL,
                open_settle_delay: Duration::from_millis(100),
                auto_close_delay: Duration::from_millis(50),
                stage_settle_delay: STAGE_SETTLE_DELAY,
                ideal_size: None,
                haptic_pulse: Duration::from_millis(120),
                symbologies: Symbology::WEB.to_vec(),
                multi_scan: false,
            },
        }
    }
}

impl std::str::FromStr for ScannerVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScannerVariant::ALL
            .into_iter()
            .find(|v| v.display_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown scanner variant: {s}"))
    }
}

/// Everything that differs between scanner variants
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerProfile {
    pub variant: ScannerVariant,
    pub strategy: StrategyKind,
    pub validation: ValidationRule,
    /// Same-value suppression window, detector variants only
    pub dedup_window: Option<Duration>,
    /// Decode tick (library) or detector polling period
    pub poll_interval: Duration,
    /// Wait after `open()` before the first acquisition
    pub open_settle_delay: Duration,
    /// Wait between an accepted scan and the automatic close
    pub auto_close_delay: Duration,
    /// Wait between fallback stages, after the previous handle is released
    pub stage_settle_delay: Duration,
    /// Capture size requested with facing-mode constraints
    pub ideal_size: Option<(u32, u32)>,
    pub haptic_pulse: Duration,
    /// Desired symbologies, before intersecting with what the host supports
    pub symbologies: Vec<Symbology>,
    /// Keep decoding after an acceptance instead of closing
    pub multi_scan: bool,
}

impl ScannerProfile {
    pub fn with_multi_scan(mut self, multi_scan: bool) -> Self {
        self.multi_scan = multi_scan;
        self
    }
}
