// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera platform
//!
//! Real cameras exposed as `/dev/video*`. Each opened camera captures on its
//! own thread (see [`CaptureThread`]) and publishes luma frames to the
//! stream's latest-frame channel. Device paths double as device ids.
//!
//! Open failures are named the way browser media stacks name them, so the
//! engine classifies them the same on every platform:
//!
//! | Failure                         | Name                   |
//! |---------------------------------|------------------------|
//! | EACCES / EPERM                  | `NotAllowedError`      |
//! | no such device                  | `NotFoundError`        |
//! | EBUSY, or no first frame        | `NotReadableError`     |
//! | no YUYV or GREY capture format  | `OverconstrainedError` |

use super::frame_loop::{CaptureThread, LoopAction};
use super::types::*;
use super::v4l2_controls::{self, ControlInfo, V4L2_CID_ZOOM_ABSOLUTE};
use super::{CameraPlatform, MediaStream, MediaTrack, SurfaceRegistry};
use futures::future::BoxFuture;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Highest `/dev/videoN` index probed during enumeration
const MAX_DEVICE_INDEX: usize = 16;
/// Upper bound on one blocking read, so a stopped thread lets go of the
/// device within the stage settle delay
const CAPTURE_TIMEOUT: Duration = Duration::from_millis(200);
const BUFFER_COUNT: u32 = 4;

#[derive(Default)]
pub struct V4l2Platform {
    surfaces: SurfaceRegistry,
    retired: Arc<RetiredCaptures>,
}

/// Capture threads that were told to stop but may still hold their device
#[derive(Default)]
struct RetiredCaptures {
    threads: Mutex<Vec<(String, CaptureThread)>>,
}

impl RetiredCaptures {
    fn retire(&self, path: &str, capture: CaptureThread) {
        capture.request_stop();
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.retain(|(_, thread)| thread.is_running());
        threads.push((path.to_string(), capture));
    }

    /// Remove the retired threads still attached to `path`
    fn take(&self, path: &str) -> Vec<CaptureThread> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let (matching, rest): (Vec<_>, Vec<_>) =
            threads.drain(..).partition(|(retired, _)| retired == path);
        *threads = rest;
        matching.into_iter().map(|(_, thread)| thread).collect()
    }
}

impl V4l2Platform {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Guess the facing from a device label
pub fn facing_from_label(label: &str) -> Option<CameraFacing> {
    let label = label.to_lowercase();
    if label.contains("front") || label.contains("user") {
        Some(CameraFacing::Front)
    } else if ["back", "rear", "environment"]
        .iter()
        .any(|token| label.contains(token))
    {
        Some(CameraFacing::Back)
    } else {
        None
    }
}

fn list_devices() -> Vec<CameraDevice> {
    let mut devices = Vec::new();

    for index in 0..MAX_DEVICE_INDEX {
        let Ok(dev) = Device::new(index) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            continue;
        }
        devices.push(CameraDevice {
            id: format!("/dev/video{index}"),
            facing: facing_from_label(&caps.card),
            label: caps.card,
        });
    }

    debug!(count = devices.len(), "Enumerated V4L2 capture devices");
    devices
}

fn select_device(devices: &[CameraDevice], selector: &CameraSelector) -> PlatformResult<CameraDevice> {
    if devices.is_empty() {
        return Err(PlatformError::new("NotFoundError", "Requested device not found"));
    }
    match selector {
        CameraSelector::Device(id) => devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::new("NotFoundError", format!("No device {id}"))),
        // facingMode is a hint; webcams rarely report one
        CameraSelector::Facing(facing) => Ok(devices
            .iter()
            .find(|d| d.facing == Some(*facing))
            .unwrap_or(&devices[0])
            .clone()),
    }
}

fn io_error(error: &io::Error, path: &str) -> PlatformError {
    let name = match error.kind() {
        io::ErrorKind::PermissionDenied => "NotAllowedError",
        io::ErrorKind::NotFound => "NotFoundError",
        _ if error.raw_os_error() == Some(libc::EBUSY) => "NotReadableError",
        _ => "AbortError",
    };
    PlatformError::new(name, format!("{path}: {error}"))
}

fn join_error(error: tokio::task::JoinError) -> PlatformError {
    PlatformError::new("AbortError", error.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Yuyv,
    Grey,
}

impl Layout {
    fn fourcc(self) -> FourCC {
        match self {
            Layout::Yuyv => FourCC::new(b"YUYV"),
            Layout::Grey => FourCC::new(b"GREY"),
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Layout::Yuyv => 2,
            Layout::Grey => 1,
        }
    }
}

/// Extract the luma plane of a packed buffer into a tight Gray8 frame
fn luma_frame(buf: &[u8], width: u32, height: u32, stride: usize, layout: Layout) -> Option<CameraFrame> {
    let (w, h) = (width as usize, height as usize);
    let step = layout.bytes_per_pixel();
    let stride = stride.max(w * step);
    if buf.len() < stride * h.saturating_sub(1) + w * step {
        return None;
    }

    let mut luma = Vec::with_capacity(w * h);
    for row in buf.chunks(stride).take(h) {
        luma.extend(row.iter().step_by(step).take(w));
    }
    Some(CameraFrame::from_gray(width, height, luma))
}

/// State owned by the capture thread
struct CaptureState {
    _device: Device,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    stride: usize,
    layout: Layout,
    sender: watch::Sender<Option<Arc<CameraFrame>>>,
    short_buffers: u64,
}

impl CaptureState {
    fn open(
        path: &str,
        ideal_size: Option<(u32, u32)>,
        sender: watch::Sender<Option<Arc<CameraFrame>>>,
    ) -> PlatformResult<Self> {
        let device = Device::with_path(path).map_err(|e| io_error(&e, path))?;
        let mut format = device.format().map_err(|e| io_error(&e, path))?;
        if let Some((width, height)) = ideal_size {
            format.width = width;
            format.height = height;
        }

        let mut chosen = None;
        for layout in [Layout::Yuyv, Layout::Grey] {
            format.fourcc = layout.fourcc();
            match device.set_format(&format) {
                Ok(applied) if applied.fourcc == layout.fourcc() => {
                    chosen = Some((layout, applied));
                    break;
                }
                Ok(applied) => debug!(path, requested = ?layout, got = ?applied.fourcc, "Format not accepted"),
                Err(e) => debug!(path, requested = ?layout, error = %e, "Could not set format"),
            }
        }
        let Some((layout, applied)) = chosen else {
            return Err(PlatformError::new(
                "OverconstrainedError",
                format!("{path}: no YUYV or GREY capture format"),
            ));
        };

        info!(
            path,
            width = applied.width,
            height = applied.height,
            fourcc = ?applied.fourcc,
            "Set V4L2 format"
        );

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| io_error(&e, path))?;
        stream.set_timeout(CAPTURE_TIMEOUT);

        let mut capture = Self {
            _device: device,
            stream,
            width: applied.width,
            height: applied.height,
            stride: applied.stride as usize,
            layout,
            sender,
            short_buffers: 0,
        };

        // Busy devices often accept the format and then never deliver
        capture.read_frame().map_err(|e| {
            PlatformError::new("NotReadableError", format!("{path}: TrackStartError: {e}"))
        })?;
        Ok(capture)
    }

    fn read_frame(&mut self) -> io::Result<()> {
        let (buf, _meta) = self.stream.next()?;
        match luma_frame(buf, self.width, self.height, self.stride, self.layout) {
            Some(frame) => {
                self.sender.send_replace(Some(Arc::new(frame)));
            }
            None => {
                self.short_buffers += 1;
                if self.short_buffers % 30 == 1 {
                    warn!(len = buf.len(), count = self.short_buffers, "Short capture buffer");
                }
            }
        }
        Ok(())
    }

    fn step(&mut self) -> LoopAction {
        if self.sender.is_closed() {
            return LoopAction::Stop;
        }
        if let Err(e) = self.read_frame() {
            if e.kind() != io::ErrorKind::TimedOut {
                warn!(error = %e, "Failed to capture frame");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        LoopAction::Continue
    }
}

struct V4l2Track {
    id: String,
    label: String,
    path: String,
    live: AtomicBool,
    capture: Mutex<Option<CaptureThread>>,
    retired: Arc<RetiredCaptures>,
    capabilities: TrackCapabilities,
    zoom: Option<ControlInfo>,
}

impl MediaTrack for V4l2Track {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        // The thread drops the stream, and with it the device, on its next
        // iteration. The next open of this path joins it first.
        if let Some(capture) = self.capture.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.retired.retire(&self.path, capture);
        }
        if self.capabilities.torch {
            let _ = v4l2_controls::set_torch(&self.path, false);
        }
        info!(path = %self.path, "V4L2 track stopped");
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> TrackCapabilities {
        self.capabilities
    }

    fn apply_constraint(&self, constraint: TrackConstraint) -> BoxFuture<'_, PlatformResult<()>> {
        Box::pin(async move {
            if !self.is_live() {
                return Err(PlatformError::new("InvalidStateError", "track ended"));
            }
            let path = self.path.clone();
            match constraint {
                TrackConstraint::Zoom(factor) => {
                    let Some(info) = &self.zoom else {
                        return Err(PlatformError::new("OverconstrainedError", "zoom not supported"));
                    };
                    let raw = info.zoom_raw(factor);
                    debug!(path = %path, factor, raw, "Setting zoom");
                    tokio::task::spawn_blocking(move || {
                        v4l2_controls::set_control(&path, V4L2_CID_ZOOM_ABSOLUTE, raw)
                    })
                    .await
                    .map_err(join_error)?
                }
                TrackConstraint::Torch(on) => {
                    if !self.capabilities.torch {
                        return Err(PlatformError::new("OverconstrainedError", "torch not supported"));
                    }
                    tokio::task::spawn_blocking(move || v4l2_controls::set_torch(&path, on))
                        .await
                        .map_err(join_error)?
                }
            }
        })
    }
}

impl Drop for V4l2Track {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CameraPlatform for V4l2Platform {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn get_user_media(
        &self,
        constraints: CameraConstraints,
    ) -> BoxFuture<'_, PlatformResult<MediaStream>> {
        Box::pin(async move {
            let devices = tokio::task::spawn_blocking(list_devices)
                .await
                .map_err(join_error)?;
            let device = select_device(&devices, &constraints.selector)?;
            let path = device.id.clone();

            let previous = self.retired.take(&path);
            if !previous.is_empty() {
                debug!(path = %path, count = previous.len(), "Waiting for stopped capture to release the device");
                tokio::task::spawn_blocking(move || {
                    for mut capture in previous {
                        capture.join();
                    }
                })
                .await
                .map_err(join_error)?;
            }
            info!(%constraints, path = %path, label = %device.label, "Opening V4L2 camera");

            let started = Instant::now();
            let (sender, receiver) = watch::channel(None);
            let open_path = path.clone();
            let ideal_size = constraints.ideal_size;
            let (capture, ready) = CaptureThread::start_with_init(
                &format!("v4l2-capture:{path}"),
                move || CaptureState::open(&open_path, ideal_size, sender),
                CaptureState::step,
            );

            match ready.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(PlatformError::new("AbortError", "capture thread ended"));
                }
            }

            let probe_path = path.clone();
            let (capabilities, zoom) =
                tokio::task::spawn_blocking(move || v4l2_controls::capabilities(&probe_path))
                    .await
                    .map_err(join_error)?;
            info!(
                path = %path,
                zoom = ?capabilities.zoom,
                torch = capabilities.torch,
                elapsed_ms = started.elapsed().as_millis(),
                "V4L2 camera streaming"
            );

            let track = Arc::new(V4l2Track {
                id: uuid::Uuid::new_v4().to_string(),
                label: device.label,
                path,
                live: AtomicBool::new(true),
                capture: Mutex::new(Some(capture)),
                retired: Arc::clone(&self.retired),
                capabilities,
                zoom,
            });
            Ok(MediaStream::new(vec![track as Arc<dyn MediaTrack>], receiver))
        })
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, PlatformResult<Vec<CameraDevice>>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(list_devices)
                .await
                .map_err(join_error)
        })
    }

    fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_from_label() {
        assert_eq!(facing_from_label("Front Camera"), Some(CameraFacing::Front));
        assert_eq!(facing_from_label("Rear camera (ov8858)"), Some(CameraFacing::Back));
        assert_eq!(facing_from_label("HD Pro Webcam C920"), None);
    }

    #[test]
    fn test_yuyv_luma_with_padding() {
        // 2x2 YUYV with 2 bytes of row padding
        let buf = [10, 128, 20, 128, 0, 0, 30, 128, 40, 128, 0, 0];
        let frame = luma_frame(&buf, 2, 2, 6, Layout::Yuyv).unwrap();
        assert_eq!(&*frame.data, &[10, 20, 30, 40]);
        assert_eq!(frame.format, PixelFormat::Gray8);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(luma_frame(&[0; 3], 2, 2, 2, Layout::Grey).is_none());
        assert!(luma_frame(&[1, 2, 3, 4], 2, 2, 2, Layout::Grey).is_some());
    }

    #[test]
    fn test_select_device() {
        let devices = vec![
            CameraDevice {
                id: "/dev/video0".into(),
                label: "Integrated Camera".into(),
                facing: None,
            },
            CameraDevice {
                id: "/dev/video2".into(),
                label: "Front Camera".into(),
                facing: Some(CameraFacing::Front),
            },
        ];
        let front = select_device(&devices, &CameraSelector::Facing(CameraFacing::Front)).unwrap();
        assert_eq!(front.id, "/dev/video2");
        let back = select_device(&devices, &CameraSelector::Facing(CameraFacing::Back)).unwrap();
        assert_eq!(back.id, "/dev/video0");

        let err = select_device(&devices, &CameraSelector::Device("/dev/video9".into())).unwrap_err();
        assert_eq!(err.name, "NotFoundError");
        assert!(select_device(&[], &CameraSelector::Facing(CameraFacing::Back)).is_err());
    }

    /// Stands in for an open device; flags when the capture thread drops it
    struct DeviceGuard(Arc<AtomicBool>);

    impl Drop for DeviceGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stopped_capture_released_before_reopen() {
        assert!(CAPTURE_TIMEOUT < crate::constants::STAGE_SETTLE_DELAY);

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let (capture, _ready) = CaptureThread::start_with_init(
            "retire-test",
            move || Ok::<_, String>(DeviceGuard(flag)),
            |_| {
                std::thread::sleep(Duration::from_millis(20));
                LoopAction::Continue
            },
        );

        let retired = RetiredCaptures::default();
        retired.retire("/dev/video0", capture);
        assert!(retired.take("/dev/video2").is_empty());

        let mut previous = retired.take("/dev/video0");
        assert_eq!(previous.len(), 1);
        for capture in &mut previous {
            capture.join();
        }
        assert!(released.load(Ordering::SeqCst));
        assert!(!previous[0].is_running());
        assert!(retired.take("/dev/video0").is_empty());
    }

    #[test]
    fn test_io_error_names() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(io_error(&denied, "/dev/video0").name, "NotAllowedError");
        let busy = io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(io_error(&busy, "/dev/video0").name, "NotReadableError");
    }
}
