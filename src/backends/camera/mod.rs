// SPDX-License-Identifier: GPL-3.0-only

//! Camera platform abstraction
//!
//! Everything the capture session needs from the operating system sits
//! behind two traits: [`CameraPlatform`] (enumeration and stream
//! acquisition) and [`VideoTrack`] (one live video channel with frame access
//! and zoom control).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← state machine, single outcome
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraPlatform     │  ← enumerate / get_user_media
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐  ┌─────────┐
//!   │ V4L2 │  │ Virtual │  ← concrete platforms
//!   └──────┘  └─────────┘
//! ```

pub mod format_converters;
pub mod types;
pub mod v4l2;
pub mod v4l2_controls;
pub mod virtual_camera;

pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;

/// Platform services for video capture
pub trait CameraPlatform: Send + Sync {
    /// Short identifier for logging
    fn name(&self) -> &'static str;

    /// List video input devices
    ///
    /// Labels may be empty until a stream has been granted at least once.
    fn enumerate_devices(&self) -> BoxFuture<'_, BackendResult<Vec<DeviceEntry>>>;

    /// Acquire a stream satisfying `constraints`
    ///
    /// Exact constraints that cannot be met fail with
    /// [`BackendError::OverConstrained`]; ideal constraints are best effort.
    fn get_user_media<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, BackendResult<MediaStream>>;
}

/// One live video channel of a stream
pub trait VideoTrack: Send + Sync {
    /// Device this track reads from
    fn device_id(&self) -> &DeviceId;

    /// Device label as seen by the platform
    fn label(&self) -> &str;

    /// False once stopped or once the device has gone away
    fn is_live(&self) -> bool;

    /// Stop the track and release the underlying device. Idempotent.
    fn stop(&self);

    /// Most recent frame, or `None` when no frame data is buffered yet
    fn latest_frame(&self) -> Option<CameraFrame>;

    /// Zoom capability, `None` when the device has no zoom control
    fn zoom_range(&self) -> Option<ZoomRange>;

    /// Apply a zoom value, returning the level the device settled on
    ///
    /// Integer controls round to their step, so the result may differ from
    /// `value`.
    fn apply_zoom(&self, value: f64) -> BoxFuture<'_, BackendResult<f64>>;
}

/// A set of tracks acquired together
pub struct MediaStream {
    tracks: Vec<Arc<dyn VideoTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn VideoTrack>>) -> Self {
        Self { tracks }
    }

    /// All tracks of the stream
    pub fn tracks(&self) -> &[Arc<dyn VideoTrack>] {
        &self.tracks
    }

    /// Primary video track (the first live one)
    pub fn video_track(&self) -> Option<Arc<dyn VideoTrack>> {
        self.tracks.iter().find(|t| t.is_live()).cloned()
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Get the platform for the current system
pub fn default_platform() -> Arc<dyn CameraPlatform> {
    Arc::new(v4l2::V4l2Platform::new())
}
