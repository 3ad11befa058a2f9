// SPDX-License-Identifier: GPL-3.0-only

//! Camera acquisition fallback
//!
//! Acquisition walks an ordered set of stages until one yields a running
//! camera:
//!
//! ```text
//! stage 0  facing mode, preferred side
//!    |  any camera failure
//! stage 1  facing mode, opposite side
//!    |  any camera failure
//! stage 2  enumerate, pick a rear-looking label, acquire by device id
//!    |  failure
//! terminal error
//! ```
//!
//! Before each stage the previous stage's handle is released; stages 1 and 2
//! then wait a settle delay because several camera stacks free the hardware
//! asynchronously. Detector and supersession errors end the walk at once, and
//! no stage is ever repeated within one run.

use crate::backends::camera::types::{CameraConstraints, CameraDevice, CameraFacing};
use crate::constants::{BACK_CAMERA_TOKENS, STAGE_SETTLE_DELAY};
use crate::errors::{ErrorKind, ScanError, ScanResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which fallback stage is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RetryStage {
    /// Facing mode, preferred side
    #[default]
    Preferred,
    /// Facing mode, the other side
    Opposite,
    /// Explicit device from enumeration
    Enumerated,
}

impl RetryStage {
    pub fn index(self) -> u8 {
        match self {
            RetryStage::Preferred => 0,
            RetryStage::Opposite => 1,
            RetryStage::Enumerated => 2,
        }
    }
}

impl From<RetryStage> for u8 {
    fn from(stage: RetryStage) -> Self {
        stage.index()
    }
}

impl TryFrom<u8> for RetryStage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RetryStage::Preferred),
            1 => Ok(RetryStage::Opposite),
            2 => Ok(RetryStage::Enumerated),
            other => Err(format!("invalid retry stage: {other}")),
        }
    }
}

impl std::fmt::Display for RetryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Session side of the fallback walk
pub trait StageRunner: Send + Sync {
    /// Release whatever the previous stage acquired and record `stage` as
    /// active. Fails with [`ScanError::Superseded`] when the attempt is stale.
    fn enter_stage(&self, stage: RetryStage) -> ScanResult<()>;

    /// Acquire a camera and start decoding on it
    fn acquire(&self, constraints: CameraConstraints) -> BoxFuture<'_, ScanResult<()>>;

    fn enumerate(&self) -> BoxFuture<'_, ScanResult<Vec<CameraDevice>>>;
}

/// Where the walk ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: RetryStage,
    pub facing: CameraFacing,
    /// Device picked by enumeration, stage 2 only
    pub device: Option<CameraDevice>,
}

#[derive(Debug, Clone)]
pub struct FallbackOrchestrator {
    settle: Duration,
    ideal_size: Option<(u32, u32)>,
}

impl Default for FallbackOrchestrator {
    fn default() -> Self {
        Self::new(STAGE_SETTLE_DELAY, None)
    }
}

impl FallbackOrchestrator {
    /// `ideal_size` is requested with the facing-mode stages only
    pub fn new(settle: Duration, ideal_size: Option<(u32, u32)>) -> Self {
        Self { settle, ideal_size }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle
    }

    /// Walk the stages starting from `preferred`
    pub async fn run<R>(&self, runner: &R, preferred: CameraFacing) -> ScanResult<StageOutcome>
    where
        R: StageRunner + ?Sized,
    {
        // Stage 0
        runner.enter_stage(RetryStage::Preferred)?;
        let first = match self.try_facing(runner, preferred).await {
            Ok(()) => return Ok(self.outcome(RetryStage::Preferred, preferred, None)),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => e,
        };

        // Stage 1
        let opposite = preferred.opposite();
        info!(
            failed = %first.kind(),
            next = %opposite,
            "Stage 0 failed, trying the other camera"
        );
        self.transition(runner, RetryStage::Opposite).await?;
        let second = match self.try_facing(runner, opposite).await {
            Ok(()) => return Ok(self.outcome(RetryStage::Opposite, opposite, None)),
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => e,
        };

        // Stage 2
        info!(failed = %second.kind(), "Stage 1 failed, enumerating cameras");
        self.transition(runner, RetryStage::Enumerated).await?;
        let devices = runner.enumerate().await?;
        let Some((device, matched)) = select_rear_camera(&devices) else {
            warn!("No cameras to fall back to");
            return Err(ScanError::camera(
                ErrorKind::DeviceNotFound,
                "NotFoundError",
                "no video input devices",
            ));
        };
        let device = device.clone();
        debug!(id = %device.id, label = %device.label, matched, "Stage 2 picked a camera");

        runner
            .acquire(CameraConstraints::device(device.id.clone()))
            .await
            .inspect_err(|e| warn!(error = %e, "All acquisition stages failed"))?;

        let facing = device
            .facing
            .unwrap_or(if matched { CameraFacing::Back } else { preferred });
        Ok(self.outcome(RetryStage::Enumerated, facing, Some(device)))
    }

    async fn try_facing<R>(&self, runner: &R, facing: CameraFacing) -> ScanResult<()>
    where
        R: StageRunner + ?Sized,
    {
        runner
            .acquire(CameraConstraints::facing(facing).with_ideal_size(self.ideal_size))
            .await
    }

    async fn transition<R>(&self, runner: &R, stage: RetryStage) -> ScanResult<()>
    where
        R: StageRunner + ?Sized,
    {
        runner.enter_stage(stage)?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    fn outcome(
        &self,
        stage: RetryStage,
        facing: CameraFacing,
        device: Option<CameraDevice>,
    ) -> StageOutcome {
        info!(%stage, %facing, "Camera acquired");
        StageOutcome {
            stage,
            facing,
            device,
        }
    }
}

/// First camera whose label looks rear-facing, else the first camera.
/// The flag tells whether a label matched.
pub fn select_rear_camera(devices: &[CameraDevice]) -> Option<(&CameraDevice, bool)> {
    devices
        .iter()
        .find(|device| {
            let label = device.label.to_lowercase();
            BACK_CAMERA_TOKENS.iter().any(|token| label.contains(token))
        })
        .map(|device| (device, true))
        .or_else(|| devices.first().map(|device| (device, false)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{CameraSelector, PlatformError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Enter(u8),
        Acquire(CameraSelector),
        Enumerate,
    }

    /// Plays back one scripted result per acquisition
    struct ScriptedRunner {
        results: Mutex<VecDeque<ScanResult<()>>>,
        devices: Vec<CameraDevice>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<ScanResult<()>>, devices: Vec<CameraDevice>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                devices,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StageRunner for ScriptedRunner {
        fn enter_stage(&self, stage: RetryStage) -> ScanResult<()> {
            self.calls.lock().unwrap().push(Call::Enter(stage.index()));
            Ok(())
        }

        fn acquire(&self, constraints: CameraConstraints) -> BoxFuture<'_, ScanResult<()>> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Acquire(constraints.selector));
            let result = self.results.lock().unwrap().pop_front().unwrap_or(Ok(()));
            Box::pin(async move { result })
        }

        fn enumerate(&self) -> BoxFuture<'_, ScanResult<Vec<CameraDevice>>> {
            self.calls.lock().unwrap().push(Call::Enumerate);
            let devices = self.devices.clone();
            Box::pin(async move { Ok(devices) })
        }
    }

    fn device(id: &str, label: &str) -> CameraDevice {
        CameraDevice {
            id: id.into(),
            label: label.into(),
            facing: None,
        }
    }

    fn fail(name: &str) -> ScanResult<()> {
        Err(ScanError::from_platform(PlatformError::new(name, "scripted")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_zero_success() {
        let runner = ScriptedRunner::new(vec![Ok(())], vec![]);
        let outcome = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap();
        assert_eq!(outcome.stage, RetryStage::Preferred);
        assert_eq!(outcome.facing, CameraFacing::Back);
        assert_eq!(
            runner.calls(),
            vec![
                Call::Enter(0),
                Call::Acquire(CameraSelector::Facing(CameraFacing::Back))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_back_camera_falls_to_front() {
        let runner = ScriptedRunner::new(vec![fail("NotReadableError"), Ok(())], vec![]);
        let start = tokio::time::Instant::now();
        let outcome = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap();
        assert_eq!(outcome.stage, RetryStage::Opposite);
        assert_eq!(outcome.facing, CameraFacing::Front);
        assert!(start.elapsed() >= STAGE_SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_two_runs_exactly_once() {
        let runner = ScriptedRunner::new(
            vec![
                fail("NotAllowedError"),
                fail("OverconstrainedError"),
                fail("NotReadableError"),
            ],
            vec![device("a", "USB Webcam"), device("b", "Rear Camera")],
        );
        let err = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
        assert_eq!(
            runner.calls(),
            vec![
                Call::Enter(0),
                Call::Acquire(CameraSelector::Facing(CameraFacing::Back)),
                Call::Enter(1),
                Call::Acquire(CameraSelector::Facing(CameraFacing::Front)),
                Call::Enter(2),
                Call::Enumerate,
                Call::Acquire(CameraSelector::Device("b".into())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_two_success_reports_back() {
        let runner = ScriptedRunner::new(
            vec![fail("NotFoundError"), fail("NotFoundError"), Ok(())],
            vec![device("x", "camera2 0, facing back")],
        );
        let outcome = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap();
        assert_eq!(outcome.stage, RetryStage::Enumerated);
        assert_eq!(outcome.facing, CameraFacing::Back);
        assert_eq!(outcome.device.unwrap().id, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_enumeration_not_found() {
        let runner = ScriptedRunner::new(vec![fail("AbortError"), fail("AbortError")], vec![]);
        let err = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_stops_walk() {
        let runner = ScriptedRunner::new(vec![Err(ScanError::Superseded)], vec![]);
        let err = FallbackOrchestrator::default()
            .run(&runner, CameraFacing::Back)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Superseded));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ideal_size_on_facing_stages() {
        struct Recording(Mutex<Vec<CameraConstraints>>);
        impl StageRunner for Recording {
            fn enter_stage(&self, _stage: RetryStage) -> ScanResult<()> {
                Ok(())
            }
            fn acquire(&self, constraints: CameraConstraints) -> BoxFuture<'_, ScanResult<()>> {
                self.0.lock().unwrap().push(constraints);
                Box::pin(async { Ok(()) })
            }
            fn enumerate(&self) -> BoxFuture<'_, ScanResult<Vec<CameraDevice>>> {
                Box::pin(async { Ok(Vec::new()) })
            }
        }

        let runner = Recording(Mutex::new(Vec::new()));
        FallbackOrchestrator::new(Duration::ZERO, Some((1280, 720)))
            .run(&runner, CameraFacing::Front)
            .await
            .unwrap();
        let recorded = runner.0.lock().unwrap();
        assert_eq!(recorded[0].ideal_size, Some((1280, 720)));
        assert_eq!(recorded[0].selector, CameraSelector::Facing(CameraFacing::Front));
    }

    #[test]
    fn test_select_rear_camera_tokens() {
        let devices = vec![
            device("1", "Integrated Webcam"),
            device("2", "USB Camera"),
        ];
        let (picked, matched) = select_rear_camera(&devices).unwrap();
        assert_eq!(picked.id, "1");
        assert!(!matched);

        let devices = vec![device("1", "Front"), device("2", "كاميرا خلفي")];
        let (picked, matched) = select_rear_camera(&devices).unwrap();
        assert_eq!(picked.id, "2");
        assert!(matched);

        let devices = vec![device("1", "Front"), device("2", "ENVIRONMENT cam")];
        assert_eq!(select_rear_camera(&devices).unwrap().0.id, "2");

        assert!(select_rear_camera(&[]).is_none());
    }

    #[test]
    fn test_stage_serializes_as_number() {
        assert_eq!(serde_json::to_string(&RetryStage::Enumerated).unwrap(), "2");
        let stage: RetryStage = serde_json::from_str("1").unwrap();
        assert_eq!(stage, RetryStage::Opposite);
        assert!(serde_json::from_str::<RetryStage>("3").is_err());
    }
}
