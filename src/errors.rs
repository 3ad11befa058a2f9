// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanner engine
//!
//! Camera platforms report failures as a `(name, message)` pair, the way
//! media stacks do (`NotAllowedError`, `NotReadableError`, ...). Those are
//! classified into an [`ErrorKind`] by substring matching, and every kind
//! has a user-facing message in each supported locale.

use crate::backends::camera::types::PlatformError;
use crate::config::Locale;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// Detector error names reported when the native detector path cannot run
pub const DETECTOR_NOT_SUPPORTED: &str = "BARCODE_DETECTOR_NOT_SUPPORTED";
pub const NO_SUPPORTED_FORMATS: &str = "NO_SUPPORTED_FORMATS";

/// Classified failure cause surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// User (or policy) declined camera access
    PermissionDenied,
    /// No camera hardware present or enumerable
    DeviceNotFound,
    /// Camera already claimed by another process
    DeviceBusy,
    /// Requested facing mode or resolution not supported
    ConstraintsUnsatisfiable,
    /// No native detector, or no overlap with the desired symbologies
    DetectorUnavailable,
    /// Anything else that prevented the camera from starting
    GenericStartFailure,
}

impl ErrorKind {
    /// Classify a platform error from its name and message.
    ///
    /// Name matches win over message matches, since messages are free-form
    /// and sometimes localized by the host.
    pub fn classify(error: &PlatformError) -> Self {
        Self::from_signal(&error.name)
            .or_else(|| Self::from_signal(&error.message))
            .unwrap_or(ErrorKind::GenericStartFailure)
    }

    fn from_signal(signal: &str) -> Option<Self> {
        if signal.contains(DETECTOR_NOT_SUPPORTED) || signal.contains(NO_SUPPORTED_FORMATS) {
            return Some(ErrorKind::DetectorUnavailable);
        }

        let lower = signal.to_lowercase();
        if lower.contains("notallowed") || lower.contains("permission") || lower.contains("security")
        {
            Some(ErrorKind::PermissionDenied)
        } else if lower.contains("notfound") || lower.contains("devicesnotfound") {
            Some(ErrorKind::DeviceNotFound)
        } else if lower.contains("notreadable")
            || lower.contains("trackstart")
            || lower.contains("in use")
            || lower.contains("busy")
        {
            Some(ErrorKind::DeviceBusy)
        } else if lower.contains("overconstrained") || lower.contains("constraint") {
            Some(ErrorKind::ConstraintsUnsatisfiable)
        } else {
            None
        }
    }

    /// Whether the fallback orchestrator may try another acquisition stage
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::DetectorUnavailable)
    }

    /// User-facing message in the given locale
    pub fn message(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (ErrorKind::PermissionDenied, Locale::English) => {
                "Camera permission was denied. Allow camera access and try again."
            }
            (ErrorKind::PermissionDenied, Locale::Arabic) => "تم رفض صلاحية الكاميرا",
            (ErrorKind::DeviceNotFound, Locale::English) => "No camera was found on this device.",
            (ErrorKind::DeviceNotFound, Locale::Arabic) => "لم يتم العثور على كاميرا",
            (ErrorKind::DeviceBusy, Locale::English) => {
                "The camera is being used by another application."
            }
            (ErrorKind::DeviceBusy, Locale::Arabic) => "الكاميرا قيد الاستخدام من تطبيق آخر",
            (ErrorKind::ConstraintsUnsatisfiable, Locale::English) => {
                "The camera does not support the requested settings."
            }
            (ErrorKind::ConstraintsUnsatisfiable, Locale::Arabic) => {
                "الكاميرا لا تدعم الإعدادات المطلوبة"
            }
            (ErrorKind::DetectorUnavailable, Locale::English) => {
                "Barcode detection is not supported here. Use the standard scanner instead."
            }
            (ErrorKind::DetectorUnavailable, Locale::Arabic) => {
                "قارئ الباركود غير مدعوم. استخدم الماسح العادي بدلاً منه"
            }
            (ErrorKind::GenericStartFailure, Locale::English) => {
                "Failed to open the camera. Please try again."
            }
            (ErrorKind::GenericStartFailure, Locale::Arabic) => {
                "فشل في فتح الكاميرا. حاول مرة أخرى."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::DeviceNotFound => "device not found",
            ErrorKind::DeviceBusy => "device busy",
            ErrorKind::ConstraintsUnsatisfiable => "constraints unsatisfiable",
            ErrorKind::DetectorUnavailable => "detector unavailable",
            ErrorKind::GenericStartFailure => "start failure",
        };
        f.write_str(name)
    }
}

/// Errors produced by the scanner engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScanError {
    /// Camera acquisition or start failed
    #[error("camera {kind}: {source}")]
    Camera {
        kind: ErrorKind,
        #[source]
        source: PlatformError,
    },
    /// Native detector missing or unusable
    #[error("barcode detector unavailable: {0}")]
    DetectorUnavailable(String),
    /// A newer acquisition attempt replaced this one
    #[error("acquisition superseded by a newer attempt")]
    Superseded,
    /// Durable key-value store failure
    #[error("storage error: {0}")]
    Storage(String),
    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Classify a platform error into a camera error
    pub fn from_platform(source: PlatformError) -> Self {
        ScanError::Camera {
            kind: ErrorKind::classify(&source),
            source,
        }
    }

    /// Camera error of a fixed kind, for failures detected locally
    pub fn camera(kind: ErrorKind, name: &str, message: impl Into<String>) -> Self {
        ScanError::Camera {
            kind,
            source: PlatformError::new(name, message),
        }
    }

    /// Kind shown to the user when this error ends an attempt
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Camera { kind, .. } => *kind,
            ScanError::DetectorUnavailable(_) => ErrorKind::DetectorUnavailable,
            ScanError::Superseded | ScanError::Storage(_) | ScanError::Config(_) => {
                ErrorKind::GenericStartFailure
            }
        }
    }

    /// Errors after which no other acquisition stage is worth trying
    pub fn is_terminal(&self) -> bool {
        match self {
            ScanError::Camera { kind, .. } => !kind.is_recoverable(),
            ScanError::DetectorUnavailable(_) | ScanError::Superseded => true,
            ScanError::Storage(_) | ScanError::Config(_) => false,
        }
    }
}

impl From<PlatformError> for ScanError {
    fn from(source: PlatformError) -> Self {
        ScanError::from_platform(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(name: &str, message: &str) -> ErrorKind {
        ErrorKind::classify(&PlatformError::new(name, message))
    }

    #[test]
    fn test_classify_by_name() {
        assert_eq!(classify("NotAllowedError", ""), ErrorKind::PermissionDenied);
        assert_eq!(classify("SecurityError", ""), ErrorKind::PermissionDenied);
        assert_eq!(classify("NotFoundError", ""), ErrorKind::DeviceNotFound);
        assert_eq!(classify("DevicesNotFoundError", ""), ErrorKind::DeviceNotFound);
        assert_eq!(classify("NotReadableError", ""), ErrorKind::DeviceBusy);
        assert_eq!(classify("TrackStartError", ""), ErrorKind::DeviceBusy);
        assert_eq!(
            classify("OverconstrainedError", ""),
            ErrorKind::ConstraintsUnsatisfiable
        );
        assert_eq!(classify("AbortError", ""), ErrorKind::GenericStartFailure);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            classify("Error", "Permission denied by system"),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify("Error", "Could not start video source: device in use"),
            ErrorKind::DeviceBusy
        );
        assert_eq!(
            classify("Error", DETECTOR_NOT_SUPPORTED),
            ErrorKind::DetectorUnavailable
        );
        assert_eq!(
            classify("Error", NO_SUPPORTED_FORMATS),
            ErrorKind::DetectorUnavailable
        );
    }

    #[test]
    fn test_name_wins_over_message() {
        assert_eq!(
            classify("NotReadableError", "permission"),
            ErrorKind::DeviceBusy
        );
    }

    #[test]
    fn test_terminal_errors() {
        assert!(ScanError::Superseded.is_terminal());
        assert!(ScanError::DetectorUnavailable("x".into()).is_terminal());
        assert!(!ScanError::camera(ErrorKind::DeviceBusy, "NotReadableError", "").is_terminal());
        assert!(
            !ScanError::camera(ErrorKind::PermissionDenied, "NotAllowedError", "").is_terminal()
        );
    }

    #[test]
    fn test_every_kind_has_messages() {
        let kinds = [
            ErrorKind::PermissionDenied,
            ErrorKind::DeviceNotFound,
            ErrorKind::DeviceBusy,
            ErrorKind::ConstraintsUnsatisfiable,
            ErrorKind::DetectorUnavailable,
            ErrorKind::GenericStartFailure,
        ];
        for kind in kinds {
            assert!(!kind.message(Locale::English).is_empty());
            assert!(!kind.message(Locale::Arabic).is_empty());
        }
    }
}
