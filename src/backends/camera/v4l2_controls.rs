// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 zoom and torch controls
//!
//! Queries and sets the two controls a scanner needs: absolute zoom from the
//! camera class and the LED mode from the flash class. Zoom is exposed to
//! callers as a factor where 1.0 is the widest setting.

use super::types::{PlatformError, PlatformResult, TrackCapabilities, ZoomRange};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CTRL_CLASS_FLASH: u32 = 0x009c0000;

const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;
const V4L2_CID_FLASH_CLASS_BASE: u32 = V4L2_CTRL_CLASS_FLASH | 0x900;

/// Absolute optical or digital zoom
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;
/// Flash LED mode: none, flash or torch
pub const V4L2_CID_FLASH_LED_MODE: u32 = V4L2_CID_FLASH_CLASS_BASE + 1;

pub const V4L2_FLASH_LED_MODE_NONE: i32 = 0;
pub const V4L2_FLASH_LED_MODE_TORCH: i32 = 2;

/// Raw zoom units per 1x step when the driver's minimum is zero
const ZOOM_UNITS_PER_STEP: f64 = 100.0;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// ===== V4L2 ioctl Numbers =====
// Calculated as: (dir << 30) | (size << 16) | ('V' << 8) | nr
// where dir: 2=READ, 1=WRITE, 3=READ|WRITE

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Range and default of a V4L2 control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    pub id: u32,
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
}

impl ControlInfo {
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    /// Zoom range as factors relative to the widest setting
    pub fn zoom_range(&self) -> ZoomRange {
        if self.minimum > 0 {
            let min = f64::from(self.minimum);
            ZoomRange {
                min: 1.0,
                max: f64::from(self.maximum) / min,
                step: f64::from(self.step.max(1)) / min,
            }
        } else {
            ZoomRange {
                min: 1.0,
                max: 1.0 + f64::from(self.maximum - self.minimum) / ZOOM_UNITS_PER_STEP,
                step: f64::from(self.step.max(1)) / ZOOM_UNITS_PER_STEP,
            }
        }
    }

    /// Raw control value for a zoom factor, clamped to the control range
    pub fn zoom_raw(&self, factor: f64) -> i32 {
        let raw = if self.minimum > 0 {
            factor * f64::from(self.minimum)
        } else {
            f64::from(self.minimum) + (factor - 1.0) * ZOOM_UNITS_PER_STEP
        };
        (raw.round() as i32).clamp(self.minimum, self.maximum)
    }
}

fn extract_name(bytes: &[u8; 32]) -> String {
    let name_len = bytes.iter().position(|&c| c == 0).unwrap_or(32);
    String::from_utf8_lossy(&bytes[..name_len]).to_string()
}

/// Query if a control exists and get its information
pub fn query_control(device_path: &str, control_id: u32) -> Option<ControlInfo> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };
    if result < 0 {
        return None;
    }

    Some(ControlInfo {
        id: qctrl.id,
        name: extract_name(&qctrl.name),
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step,
        default_value: qctrl.default_value,
        flags: qctrl.flags,
    })
}

/// Get current value of a control
pub fn get_control(device_path: &str, control_id: u32) -> Option<i32> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value: 0,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_G_CTRL, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        debug!(device_path, control_id, "Failed to get V4L2 control");
        return None;
    }

    Some(ctrl.value)
}

/// Set value of a control
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> PlatformResult<()> {
    let file = File::open(device_path)
        .map_err(|e| PlatformError::new("NotReadableError", format!("open {device_path}: {e}")))?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(
            device_path,
            control_id,
            value,
            ?errno,
            "Failed to set V4L2 control"
        );
        return Err(PlatformError::new(
            "OverconstrainedError",
            format!("control {control_id:#x}: {errno}"),
        ));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }

    Ok(())
}

/// Zoom and torch support of the device at `device_path`
pub fn capabilities(device_path: &str) -> (TrackCapabilities, Option<ControlInfo>) {
    let zoom = query_control(device_path, V4L2_CID_ZOOM_ABSOLUTE)
        .filter(|info| !info.is_disabled() && info.maximum > info.minimum);
    let torch = query_control(device_path, V4L2_CID_FLASH_LED_MODE)
        .is_some_and(|info| !info.is_disabled() && info.maximum >= V4L2_FLASH_LED_MODE_TORCH);

    let capabilities = TrackCapabilities {
        zoom: zoom.as_ref().map(ControlInfo::zoom_range),
        torch,
    };
    (capabilities, zoom)
}

pub fn set_torch(device_path: &str, on: bool) -> PlatformResult<()> {
    let mode = if on {
        V4L2_FLASH_LED_MODE_TORCH
    } else {
        V4L2_FLASH_LED_MODE_NONE
    };
    set_control(device_path, V4L2_CID_FLASH_LED_MODE, mode)
}
