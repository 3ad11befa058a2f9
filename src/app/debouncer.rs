// SPDX-License-Identifier: GPL-3.0-only

//! Detection debouncer
//!
//! Turns a noisy stream of detections into one accepted value per session.
//! Checks run in a fixed order: one-shot guard, validation, same-value
//! window. The caller holds the session lock across [`offer`], so the guard
//! check and set cannot interleave with another detection.
//!
//! [`offer`]: DetectionDebouncer::offer

use crate::app::frame_processor::types::DetectionEvent;
use crate::constants::{ScannerProfile, ValidationRule};
use std::time::Duration;
use tracing::trace;

/// Why a detection was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A value was already accepted this session
    AlreadyScanned,
    /// Empty, or outside the length bounds
    Invalid,
    /// Same value accepted again within the dedup window
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward this trimmed value
    Accepted(String),
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct DetectionDebouncer {
    rule: ValidationRule,
    dedup_window: Option<Duration>,
    /// Multi-scan sessions never latch the guard
    multi_scan: bool,
    has_scanned: bool,
    last_accepted: Option<(String, u64)>,
}

impl DetectionDebouncer {
    pub fn new(rule: ValidationRule, dedup_window: Option<Duration>, multi_scan: bool) -> Self {
        Self {
            rule,
            dedup_window,
            multi_scan,
            has_scanned: false,
            last_accepted: None,
        }
    }

    pub fn from_profile(profile: &ScannerProfile) -> Self {
        Self::new(profile.validation, profile.dedup_window, profile.multi_scan)
    }

    pub fn offer(&mut self, event: &DetectionEvent) -> Verdict {
        if self.has_scanned {
            return Verdict::Rejected(Rejection::AlreadyScanned);
        }

        let value = event.raw_value.trim();
        if !self.rule.accepts(value) {
            trace!(len = value.chars().count(), "Detection failed validation");
            return Verdict::Rejected(Rejection::Invalid);
        }

        if let (Some(window), Some((last, at))) = (self.dedup_window, &self.last_accepted) {
            let elapsed = event.timestamp_ms.saturating_sub(*at);
            if last == value && u128::from(elapsed) < window.as_millis() {
                trace!(elapsed_ms = elapsed, "Duplicate detection inside window");
                return Verdict::Rejected(Rejection::Duplicate);
            }
        }

        if !self.multi_scan {
            self.has_scanned = true;
        }
        self.last_accepted = Some((value.to_string(), event.timestamp_ms));
        Verdict::Accepted(value.to_string())
    }

    pub fn has_scanned(&self) -> bool {
        self.has_scanned
    }

    /// Value and timestamp of the last acceptance
    pub fn last_accepted(&self) -> Option<(&str, u64)> {
        self.last_accepted.as_ref().map(|(v, t)| (v.as_str(), *t))
    }

    /// Re-arm the one-shot guard. The dedup record survives.
    pub fn reset_guard(&mut self) {
        self.has_scanned = false;
    }

    /// Clean slate for a new session
    pub fn reset(&mut self) {
        self.has_scanned = false;
        self.last_accepted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEDUP_WINDOW, ScannerVariant};

    fn event(value: &str, at: u64) -> DetectionEvent {
        DetectionEvent {
            raw_value: value.to_string(),
            timestamp_ms: at,
            format: None,
        }
    }

    fn accepted(verdict: Verdict) -> bool {
        matches!(verdict, Verdict::Accepted(_))
    }

    #[test]
    fn test_first_valid_event_wins() {
        let mut debouncer = DetectionDebouncer::from_profile(&ScannerVariant::Library.profile());
        assert_eq!(
            debouncer.offer(&event("12", 0)),
            Verdict::Rejected(Rejection::Invalid)
        );
        assert_eq!(
            debouncer.offer(&event("  4006381333931 ", 10)),
            Verdict::Accepted("4006381333931".into())
        );
        assert_eq!(
            debouncer.offer(&event("9780201379624", 20)),
            Verdict::Rejected(Rejection::AlreadyScanned)
        );
        assert!(debouncer.has_scanned());
    }

    #[test]
    fn test_length_boundaries() {
        let profile = ScannerVariant::Library.profile();
        for (len, ok) in [(2, false), (3, true), (50, true), (51, false)] {
            let mut debouncer = DetectionDebouncer::from_profile(&profile);
            assert_eq!(
                accepted(debouncer.offer(&event(&"7".repeat(len), 0))),
                ok,
                "length {len}"
            );
        }
    }

    #[test]
    fn test_detector_variant_accepts_short_values() {
        let mut debouncer = DetectionDebouncer::from_profile(&ScannerVariant::Offline.profile());
        assert!(accepted(debouncer.offer(&event("7", 0))));
    }

    #[test]
    fn test_whitespace_only_rejected() {
        let mut debouncer = DetectionDebouncer::from_profile(&ScannerVariant::Web.profile());
        assert_eq!(
            debouncer.offer(&event("   ", 0)),
            Verdict::Rejected(Rejection::Invalid)
        );
        assert!(!debouncer.has_scanned());
    }

    #[test]
    fn test_guard_supersedes_window() {
        let mut debouncer =
            DetectionDebouncer::new(ValidationRule::NonEmpty, Some(DEDUP_WINDOW), false);
        assert!(accepted(debouncer.offer(&event("ABC", 1000))));
        assert_eq!(
            debouncer.offer(&event("ABC", 1500)),
            Verdict::Rejected(Rejection::AlreadyScanned)
        );
    }

    #[test]
    fn test_window_without_guard() {
        let mut debouncer =
            DetectionDebouncer::new(ValidationRule::NonEmpty, Some(DEDUP_WINDOW), true);
        assert!(accepted(debouncer.offer(&event("ABC", 0))));
        assert_eq!(
            debouncer.offer(&event("ABC", 1900)),
            Verdict::Rejected(Rejection::Duplicate)
        );
        assert!(accepted(debouncer.offer(&event("ABC", 2100))));
        // Other values are not held back
        assert!(accepted(debouncer.offer(&event("XYZ", 2200))));
    }

    #[test]
    fn test_window_survives_guard_reset() {
        let mut debouncer =
            DetectionDebouncer::new(ValidationRule::NonEmpty, Some(DEDUP_WINDOW), false);
        assert!(accepted(debouncer.offer(&event("ABC", 0))));
        debouncer.reset_guard();
        assert_eq!(
            debouncer.offer(&event("ABC", 500)),
            Verdict::Rejected(Rejection::Duplicate)
        );
        assert!(accepted(debouncer.offer(&event("ABC", 2000))));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut debouncer =
            DetectionDebouncer::new(ValidationRule::NonEmpty, Some(DEDUP_WINDOW), false);
        assert!(accepted(debouncer.offer(&event("ABC", 0))));
        debouncer.reset();
        assert!(debouncer.last_accepted().is_none());
        assert!(accepted(debouncer.offer(&event("ABC", 10))));
    }
}
