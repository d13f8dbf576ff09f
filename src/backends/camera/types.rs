// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera platform abstraction

//! Shared types for camera platforms

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Opaque platform handle for a video input device
///
/// For V4L2 this is the device node path (e.g. `/dev/video0`), for the
/// virtual platform it is whatever id the device was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A device as reported by platform enumeration, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: DeviceId,
    /// Human readable label; may be empty before a permission grant
    pub label: String,
}

/// Requested camera facing, mirroring the `facingMode` constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera pointing at the user
    User,
    /// Rear camera pointing away from the user
    Environment,
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// A single constraint value
///
/// `Exact` must be satisfied or the request is rejected as over-constrained.
/// `Ideal` is a soft hint the platform may ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint<T> {
    Exact(T),
    Ideal(T),
}

impl<T> Constraint<T> {
    pub fn value(&self) -> &T {
        match self {
            Constraint::Exact(v) | Constraint::Ideal(v) => v,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Constraint::Exact(_))
    }
}

/// Stream acquisition request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    pub device_id: Option<Constraint<DeviceId>>,
    pub width: Option<Constraint<u32>>,
    pub height: Option<Constraint<u32>>,
    pub facing: Option<Constraint<FacingMode>>,
}

impl StreamConstraints {
    /// Any video device, no preferences
    pub fn any() -> Self {
        Self::default()
    }

    /// Only a soft facing preference
    pub fn facing(mode: FacingMode) -> Self {
        Self {
            facing: Some(Constraint::Ideal(mode)),
            ..Self::default()
        }
    }

    /// The exact device id this request is pinned to, if any
    pub fn exact_device(&self) -> Option<&DeviceId> {
        match &self.device_id {
            Some(Constraint::Exact(id)) => Some(id),
            _ => None,
        }
    }

    /// Requested resolution, if both dimensions are given
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match (&self.width, &self.height) {
            (Some(w), Some(h)) => Some((*w.value(), *h.value())),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.device_id {
            let kind = if id.is_exact() { "exact" } else { "ideal" };
            parts.push(format!("device={}({})", kind, id.value()));
        }
        if let Some((w, h)) = self.resolution() {
            parts.push(format!("{}x{}", w, h));
        }
        if let Some(facing) = &self.facing {
            parts.push(format!("facing={}", facing.value()));
        }
        if parts.is_empty() {
            write!(f, "any")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Zoom range reported by a track's capabilities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRange {
    pub min: f64,
    pub max: f64,
    /// Current setting, when the platform reports one
    pub current: Option<f64>,
    /// Granularity of integer controls
    pub step: Option<f64>,
}

impl ZoomRange {
    /// Clamp `value` into range and round it onto the step grid
    pub fn snap(&self, value: f64) -> f64 {
        let clamped = value.max(self.min).min(self.max);
        match self.step {
            Some(step) if step > 0.0 => {
                let snapped = self.min + ((clamped - self.min) / step).round() * step;
                if snapped > self.max { snapped - step } else { snapped }
            }
            _ => clamped,
        }
    }
}

/// Pixel format of frame data delivered by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    /// Common raw format from webcam sensors
    YUYV,
    /// Motion JPEG; each buffer is a complete JPEG image
    MJPEG,
}

impl PixelFormat {
    /// Parse from a V4L2 FourCC code
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"YUYV" => Some(Self::YUYV),
            b"MJPG" | b"JPEG" => Some(Self::MJPEG),
            b"GREY" => Some(Self::Gray8),
            b"RGB3" => Some(Self::RGB24),
            b"AB24" | b"RGBA" => Some(Self::RGBA),
            _ => None,
        }
    }

    /// V4L2 FourCC for this format
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::YUYV => *b"YUYV",
            Self::MJPEG => *b"MJPG",
            Self::Gray8 => *b"GREY",
            Self::RGB24 => *b"RGB3",
            Self::RGBA => *b"AB24",
        }
    }

    /// Bytes per pixel for packed formats (`None` for compressed data)
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            Self::RGBA => Some(4),
            Self::RGB24 => Some(3),
            Self::YUYV => Some(2),
            Self::Gray8 => Some(1),
            Self::MJPEG => None,
        }
    }
}

/// A single frame read from a live track
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Pixel data in `format`
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Row stride for the data (bytes per row, may include padding)
    pub stride: u32,
    /// Timestamp when frame was captured
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed greyscale frame
    pub fn from_gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            format: PixelFormat::Gray8,
            stride: width,
            captured_at: Instant::now(),
        }
    }

    /// Same pixels, fresh capture timestamp
    pub fn restamped(&self) -> Self {
        Self {
            captured_at: Instant::now(),
            ..self.clone()
        }
    }
}

/// Result type for platform operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for platform operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Access to the camera was refused
    PermissionDenied,
    /// Camera device not found
    DeviceNotFound(String),
    /// Camera is held by someone else
    Busy(String),
    /// An exact constraint could not be satisfied
    OverConstrained(String),
    /// The track was stopped or its device vanished
    TrackEnded,
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::PermissionDenied => write!(f, "Permission denied"),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::Busy(msg) => write!(f, "Device busy: {}", msg),
            BackendError::OverConstrained(msg) => write!(f, "Over-constrained: {}", msg),
            BackendError::TrackEnded => write!(f, "Track ended"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => BackendError::PermissionDenied,
            std::io::ErrorKind::NotFound => BackendError::DeviceNotFound(err.to_string()),
            std::io::ErrorKind::ResourceBusy => BackendError::Busy(err.to_string()),
            _ if err.raw_os_error() == Some(libc::EBUSY) => BackendError::Busy(err.to_string()),
            _ => BackendError::IoError(err.to_string()),
        }
    }
}
