// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Default interval between pull-mode decode ticks
    pub const DECODE_TICK: Duration = Duration::from_millis(100);

    /// Lower bound accepted from configuration
    pub const MIN_DECODE_TICK: Duration = Duration::from_millis(10);

    /// Frame poll interval of the continuous (push) decoder (~30fps)
    pub const PUSH_POLL_INTERVAL: Duration = Duration::from_millis(33);
}

/// Stream quality hints
pub mod quality {
    /// Ideal capture width requested on the first ladder attempt
    pub const IDEAL_WIDTH: u32 = 1280;

    /// Ideal capture height requested on the first ladder attempt
    pub const IDEAL_HEIGHT: u32 = 720;
}

/// Zoom control constants
pub mod zoom {
    /// Number of steps between minimum and maximum zoom
    pub const STEPS: f64 = 10.0;
}

/// Label terms used to classify devices (matched case-insensitively)
pub mod labels {
    /// Terms marking a rear-facing camera
    pub const BACK_TERMS: &[&str] = &["back", "rear", "environment", "main", "world"];

    /// Terms marking a user-facing camera
    pub const FRONT_TERMS: &[&str] = &["front", "user", "frontal", "facetime", "selfie"];

    /// Terms marking an ultra-wide lens
    pub const ULTRA_WIDE_TERMS: &[&str] = &["ultra wide", "ultrawide", "ultra-wide", "0.5x"];

    /// Terms marking a telephoto lens
    pub const TELEPHOTO_TERMS: &[&str] = &["tele", "telephoto", "2x", "3x", "5x"];
}

/// Accepted code shapes
pub mod patterns {
    /// Device serial number: `S` followed by at least 8 alphanumerics
    pub const SERIAL: &str = r"^S[A-Za-z0-9]{8,}$";

    /// IMEI: exactly 15 ASCII digits
    pub const IMEI: &str = r"^[0-9]{15}$";
}

/// QR decoder constants
pub mod qr {
    /// Frames larger than this on either side are downscaled before decoding
    pub const MAX_DIMENSION: u32 = 640;
}

/// V4L2 capture constants
pub mod v4l2 {
    use crate::backends::camera::types::PixelFormat;

    /// Memory-mapped buffers queued with the driver
    pub const BUFFER_COUNT: u32 = 4;

    /// Capture formats in order of preference
    ///
    /// YUYV and GREY carry luma directly; MJPEG needs a JPEG decode per tick.
    pub const PREFERRED_FORMATS: [PixelFormat; 5] = [
        PixelFormat::YUYV,
        PixelFormat::Gray8,
        PixelFormat::MJPEG,
        PixelFormat::RGB24,
        PixelFormat::RGBA,
    ];
}

/// Supported still image formats for `scan-image`
pub mod file_formats {
    /// Supported image file extensions
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("SCANCAM_BUILD_VERSION")
    }
}
