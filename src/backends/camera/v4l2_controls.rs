// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 absolute zoom
//!
//! The scanner only drives `V4L2_CID_ZOOM_ABSOLUTE`. Devices exposing just
//! the relative or continuous zoom controls are reported as having no zoom.

use super::types::ZoomRange;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const CAMERA_CLASS_BASE: u32 = 0x009a_0900;

pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = CAMERA_CLASS_BASE + 13;
pub const V4L2_CID_ZOOM_RELATIVE: u32 = CAMERA_CLASS_BASE + 14;
pub const V4L2_CID_ZOOM_CONTINUOUS: u32 = CAMERA_CLASS_BASE + 15;

const FLAG_DISABLED: u32 = 0x0001;
const FLAG_INACTIVE: u32 = 0x0010;

// _IOWR('V', nr, size)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008_561B;
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008_561C;
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC044_5624;

/// `struct v4l2_control`
#[repr(C)]
#[derive(Default)]
struct RawValue {
    id: u32,
    value: i32,
}

/// `struct v4l2_queryctrl`
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct RawQuery {
    id: u32,
    kind: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Run one control ioctl against a freshly opened node
fn control_ioctl<T>(path: &str, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    let file = File::open(path)?;
    // SAFETY: the fd lives as long as `file` and `T` is one of the repr(C)
    // structs above, matching what `request` expects
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, arg as *mut T) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn query(path: &str, id: u32) -> io::Result<RawQuery> {
    let mut raw = RawQuery {
        id,
        ..RawQuery::default()
    };
    control_ioctl(path, VIDIOC_QUERYCTRL, &mut raw)?;
    Ok(raw)
}

/// Integer absolute zoom control of one capture node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoomControl {
    path: String,
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl ZoomControl {
    /// Look up the absolute zoom control of `path`
    ///
    /// `None` when the control is missing, disabled, inactive or spans a
    /// single value.
    pub fn probe(path: &str) -> Option<Self> {
        let raw = match query(path, V4L2_CID_ZOOM_ABSOLUTE) {
            Ok(raw) => raw,
            Err(_) => {
                let other = [V4L2_CID_ZOOM_RELATIVE, V4L2_CID_ZOOM_CONTINUOUS]
                    .into_iter()
                    .any(|id| query(path, id).is_ok());
                if other {
                    debug!(path, "Only relative or continuous zoom offered");
                }
                return None;
            }
        };

        let name_len = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
        let name = String::from_utf8_lossy(&raw.name[..name_len]);
        if raw.flags & (FLAG_DISABLED | FLAG_INACTIVE) != 0 || raw.maximum <= raw.minimum {
            debug!(path, %name, flags = raw.flags, "Zoom control not usable");
            return None;
        }

        debug!(
            path,
            %name,
            min = raw.minimum,
            max = raw.maximum,
            step = raw.step,
            default = raw.default_value,
            "Found absolute zoom"
        );
        Some(Self::new(path, raw.minimum, raw.maximum, raw.step))
    }

    fn new(path: &str, min: i32, max: i32, step: i32) -> Self {
        Self {
            path: path.to_string(),
            min,
            max,
            step: step.max(1),
        }
    }

    /// Range in the track's units, with the current position when readable
    pub fn range(&self) -> ZoomRange {
        ZoomRange {
            min: f64::from(self.min),
            max: f64::from(self.max),
            current: self.current().map(f64::from),
            step: Some(f64::from(self.step)),
        }
    }

    /// Position the driver reports right now
    pub fn current(&self) -> Option<i32> {
        let mut raw = RawValue {
            id: V4L2_CID_ZOOM_ABSOLUTE,
            ..RawValue::default()
        };
        match control_ioctl(&self.path, VIDIOC_G_CTRL, &mut raw) {
            Ok(()) => Some(raw.value),
            Err(e) => {
                debug!(path = %self.path, error = %e, "Cannot read zoom position");
                None
            }
        }
    }

    /// Nearest position on the control's step grid
    pub fn nearest(&self, value: f64) -> i32 {
        let offset = ((value - f64::from(self.min)) / f64::from(self.step)).round();
        let steps = offset.clamp(0.0, f64::from((self.max - self.min) / self.step)) as i32;
        self.min + steps * self.step
    }

    /// Move to the position nearest `value`
    ///
    /// Returns the position the driver wrote back, which can differ from the
    /// request when the driver clamps.
    pub fn apply(&self, value: f64) -> io::Result<i32> {
        let target = self.nearest(value);
        let mut raw = RawValue {
            id: V4L2_CID_ZOOM_ABSOLUTE,
            value: target,
        };
        if let Err(e) = control_ioctl(&self.path, VIDIOC_S_CTRL, &mut raw) {
            warn!(path = %self.path, target, error = %e, "Failed to set zoom");
            return Err(e);
        }
        if raw.value != target {
            debug!(path = %self.path, target, actual = raw.value, "Driver adjusted zoom");
        }
        Ok(raw.value)
    }
}
