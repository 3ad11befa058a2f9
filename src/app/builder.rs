// SPDX-License-Identifier: GPL-3.0-only

//! Controller assembly
//!
//! Picks the decode strategy for a scanner profile and wires the pending
//! slot, feedback and locale into a [`ScanSessionController`].

use super::frame_processor::{
    BarcodeDetector, ContinuousScanStrategy, DecodeStrategy, FrameDecoder, NativePollStrategy,
    QrFrameDecoder,
};
use super::{ScanCallbacks, ScanSessionController};
use crate::backends::camera::{CameraPlatform, CameraSessionManager};
use crate::config::{Config, Locale};
use crate::constants::{DEFAULT_CONTAINER_WIDTH, LIBRARY_DECODE_FPS, ScannerProfile, StrategyKind};
use crate::feedback::FeedbackDispatcher;
use crate::storage::{MemoryStore, PendingScanSlot};
use std::sync::Arc;

pub struct ScanSessionBuilder<P: CameraPlatform> {
    platform: Arc<P>,
    profile: ScannerProfile,
    container_width: u32,
    decoder: Arc<dyn FrameDecoder>,
    detector: Option<Arc<dyn BarcodeDetector>>,
    strategy: Option<Arc<dyn DecodeStrategy>>,
    pending: Option<PendingScanSlot>,
    feedback: FeedbackDispatcher,
    locale: Locale,
}

impl<P: CameraPlatform> ScanSessionBuilder<P> {
    /// Defaults: bundled QR decoder, no host detector, in-memory pending
    /// slot, silent feedback
    pub fn new(platform: Arc<P>, profile: ScannerProfile) -> Self {
        Self {
            platform,
            profile,
            container_width: DEFAULT_CONTAINER_WIDTH,
            decoder: Arc::new(QrFrameDecoder::new()),
            detector: None,
            strategy: None,
            pending: None,
            feedback: FeedbackDispatcher::silent(),
            locale: Locale::default(),
        }
    }

    /// Variant, multi-scan, container width and locale from `config`
    pub fn from_config(platform: Arc<P>, config: &Config) -> Self {
        Self::new(platform, config.profile())
            .container_width(config.container_width)
            .locale(config.locale)
    }

    pub fn container_width(mut self, width: u32) -> Self {
        self.container_width = width;
        self
    }

    /// Engine for the continuous strategy
    pub fn decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Host detector for the polling strategy
    pub fn detector(mut self, detector: Arc<dyn BarcodeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Use `strategy` instead of the one the profile selects
    pub fn strategy(mut self, strategy: Arc<dyn DecodeStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn pending_slot(mut self, slot: PendingScanSlot) -> Self {
        self.pending = Some(slot);
        self
    }

    pub fn feedback(mut self, feedback: FeedbackDispatcher) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn build(self, callbacks: ScanCallbacks) -> ScanSessionController<P> {
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => match self.profile.strategy {
                StrategyKind::Continuous => Arc::new(ContinuousScanStrategy::new(
                    self.decoder,
                    self.platform.create_surface("scanner-preview"),
                    self.container_width,
                    LIBRARY_DECODE_FPS,
                )) as Arc<dyn DecodeStrategy>,
                StrategyKind::NativePoll => Arc::new(NativePollStrategy::new(
                    self.detector,
                    self.platform.create_surface("scanner-video"),
                    self.profile.symbologies.clone(),
                    self.profile.poll_interval,
                )),
            },
        };
        let pending = self
            .pending
            .unwrap_or_else(|| PendingScanSlot::new(Arc::new(MemoryStore::new())));

        ScanSessionController::from_parts(
            CameraSessionManager::new(self.platform),
            strategy,
            self.profile,
            pending,
            self.feedback,
            self.locale,
            callbacks,
        )
    }
}
