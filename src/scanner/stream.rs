// SPDX-License-Identifier: GPL-3.0-only

//! Stream acquisition with a constraint fallback ladder
//!
//! Many platforms reject a request that pins a device id and a resolution
//! together. The first attempt asks for the exact device with an ideal
//! resolution and a soft rear-facing hint; anything but a permission denial
//! retries with the facing hint alone.

use crate::backends::camera::{
    BackendError, CameraPlatform, Constraint, DeviceId, FacingMode, MediaStream, StreamConstraints,
    VideoTrack,
};
use crate::constants::quality;
use crate::errors::{ScanError, ScanResult, UnavailableReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Preferred capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityHint {
    pub width: u32,
    pub height: u32,
}

impl Default for QualityHint {
    fn default() -> Self {
        Self {
            width: quality::IDEAL_WIDTH,
            height: quality::IDEAL_HEIGHT,
        }
    }
}

/// Opens streams on the platform
#[derive(Clone)]
pub struct StreamController {
    platform: Arc<dyn CameraPlatform>,
}

impl StreamController {
    pub fn new(platform: Arc<dyn CameraPlatform>) -> Self {
        Self { platform }
    }

    /// Constraint sets tried in order when opening `device_id`
    pub fn ladder(device_id: &DeviceId, quality: QualityHint) -> [StreamConstraints; 2] {
        [
            StreamConstraints {
                device_id: Some(Constraint::Exact(device_id.clone())),
                width: Some(Constraint::Ideal(quality.width)),
                height: Some(Constraint::Ideal(quality.height)),
                facing: Some(Constraint::Ideal(FacingMode::Environment)),
            },
            StreamConstraints::facing(FacingMode::Environment),
        ]
    }

    /// Open a stream on `device_id`
    pub async fn open(&self, device_id: &DeviceId, quality: QualityHint) -> ScanResult<StreamHandle> {
        let [preferred, fallback] = Self::ladder(device_id, quality);

        let stream = match self.platform.get_user_media(&preferred).await {
            Ok(stream) => stream,
            Err(BackendError::PermissionDenied) => return Err(ScanError::PermissionDenied),
            Err(e) => {
                info!(
                    device = %device_id,
                    error = %e,
                    fallback = %fallback,
                    "Preferred constraints rejected, retrying"
                );
                self.platform
                    .get_user_media(&fallback)
                    .await
                    .map_err(|e| {
                        warn!(device = %device_id, error = %e, "Fallback constraints rejected");
                        ScanError::from(e)
                    })?
            }
        };

        StreamHandle::from_stream(stream)
    }

    /// Release a stream opened by this controller
    pub fn close(&self, handle: &mut StreamHandle) {
        handle.close();
    }
}

/// An open stream and its primary video track
///
/// Closing stops every track of the stream. Dropping the handle closes it.
pub struct StreamHandle {
    stream: Option<MediaStream>,
    track: Arc<dyn VideoTrack>,
}

impl StreamHandle {
    /// Take ownership of an acquired stream
    ///
    /// A stream without a live video track is stopped and rejected.
    pub fn from_stream(stream: MediaStream) -> ScanResult<Self> {
        let Some(track) = stream.video_track() else {
            stream.stop_all();
            return Err(ScanError::CameraUnavailable(UnavailableReason::NoVideoTrack));
        };
        info!(device = %track.device_id(), label = %track.label(), "Stream opened");
        Ok(Self {
            stream: Some(stream),
            track,
        })
    }

    pub fn track(&self) -> &Arc<dyn VideoTrack> {
        &self.track
    }

    /// Device the platform actually opened (may differ from the request
    /// when the fallback rung was used)
    pub fn device_id(&self) -> &DeviceId {
        self.track.device_id()
    }

    pub fn label(&self) -> &str {
        self.track.label()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Stop all tracks. Idempotent.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(device = %self.track.device_id(), "Closing stream");
            stream.stop_all();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("device", self.track.device_id())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};

    #[test]
    fn test_ladder_shapes() {
        let [first, second] = StreamController::ladder(&DeviceId::from("cam1"), QualityHint::default());
        assert_eq!(first.exact_device(), Some(&DeviceId::from("cam1")));
        assert_eq!(first.resolution(), Some((1280, 720)));
        assert!(!first.width.as_ref().unwrap().is_exact());
        assert_eq!(second.device_id, None);
        assert_eq!(second.facing, Some(Constraint::Ideal(FacingMode::Environment)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam1", "Back"));
        let controller = StreamController::new(Arc::new(platform.clone()));

        let mut handle = controller
            .open(&DeviceId::from("cam1"), QualityHint::default())
            .await
            .unwrap();
        assert_eq!(platform.live_track_count(), 1);

        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(platform.live_track_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_closes_stream() {
        let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam1", "Back"));
        let controller = StreamController::new(Arc::new(platform.clone()));

        {
            let _handle = controller
                .open(&DeviceId::from("cam1"), QualityHint::default())
                .await
                .unwrap();
            assert_eq!(platform.live_track_count(), 1);
        }
        assert_eq!(platform.live_track_count(), 0);
    }
}
