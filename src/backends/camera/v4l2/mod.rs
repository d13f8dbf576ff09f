// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera platform
//!
//! Enumerates `/dev/video*` capture nodes with the `v4l` crate and opens
//! them through a dedicated [`capture::CaptureThread`] per track. Zoom goes
//! through the raw control ioctls in [`super::v4l2_controls`].
//!
//! V4L2 has no notion of facing, so a facing-only request resolves to the
//! first capture node; the label-based classification happens one layer up
//! in the device catalog.

pub mod capture;

use super::types::*;
use super::v4l2_controls::ZoomControl;
use super::{CameraPlatform, MediaStream, VideoTrack};
use capture::{CaptureRequest, CaptureThread, LatestFrame};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::prelude::*;

/// Platform backed by Video4Linux2 device nodes
#[derive(Debug, Clone)]
pub struct V4l2Platform {
    dev_dir: PathBuf,
}

impl Default for V4l2Platform {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Platform {
    pub fn new() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
        }
    }

    /// Scan a different directory for `video*` nodes
    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }
}

impl CameraPlatform for V4l2Platform {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, BackendResult<Vec<DeviceEntry>>> {
        let dev_dir = self.dev_dir.clone();
        Box::pin(async move { run_blocking(move || scan_capture_devices(&dev_dir)).await })
    }

    fn get_user_media<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, BackendResult<MediaStream>> {
        let dev_dir = self.dev_dir.clone();
        let constraints = constraints.clone();
        Box::pin(async move {
            run_blocking(move || {
                let devices = scan_capture_devices(&dev_dir)?;
                let entry = resolve_device(&devices, &constraints)?;
                let track = V4l2Track::open(entry, &constraints)?;
                let track: Arc<dyn VideoTrack> = Arc::new(track);
                Ok(MediaStream::new(vec![track]))
            })
            .await
        })
    }
}

/// Run a blocking V4L2 call off the async runtime
async fn run_blocking<T, F>(f: F) -> BackendResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> BackendResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Other(format!("V4L2 worker failed: {}", e)))?
}

/// Find every node that can capture video, ordered by node number
fn scan_capture_devices(dev_dir: &Path) -> BackendResult<Vec<DeviceEntry>> {
    let mut paths: Vec<(u32, PathBuf)> = std::fs::read_dir(dev_dir)?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name.to_str()?.strip_prefix("video")?.parse::<u32>().ok()?;
            Some((index, entry.path()))
        })
        .collect();
    paths.sort_by_key(|(index, _)| *index);

    let mut devices = Vec::new();
    let mut denied = 0usize;

    for (_, path) in paths {
        let dev = match Device::with_path(&path) {
            Ok(dev) => dev,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                denied += 1;
                continue;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unopenable node");
                continue;
            }
        };

        let caps = match dev.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "QUERYCAP failed");
                continue;
            }
        };

        // Metadata nodes share the driver but cannot stream video
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        devices.push(DeviceEntry {
            id: DeviceId::new(path.to_string_lossy()),
            label: caps.card.clone(),
        });
    }

    if devices.is_empty() && denied > 0 {
        warn!(denied, "Video devices exist but none could be opened");
        return Err(BackendError::PermissionDenied);
    }

    debug!(count = devices.len(), "Enumerated V4L2 capture devices");
    Ok(devices)
}

fn resolve_device<'d>(
    devices: &'d [DeviceEntry],
    constraints: &StreamConstraints,
) -> BackendResult<&'d DeviceEntry> {
    if let Some(requested) = &constraints.device_id {
        let found = devices.iter().find(|d| &d.id == requested.value());
        return match (found, requested) {
            (Some(entry), _) => Ok(entry),
            (None, Constraint::Exact(id)) => Err(BackendError::OverConstrained(format!(
                "device {} is not available",
                id
            ))),
            (None, Constraint::Ideal(_)) => devices
                .first()
                .ok_or_else(|| BackendError::DeviceNotFound("no capture devices".to_string())),
        };
    }

    if let Some(facing) = &constraints.facing {
        debug!(facing = %facing.value(), "V4L2 has no facing information, using first device");
    }

    devices
        .first()
        .ok_or_else(|| BackendError::DeviceNotFound("no capture devices".to_string()))
}

/// A live V4L2 capture node
pub struct V4l2Track {
    device_id: DeviceId,
    label: String,
    latest: LatestFrame,
    live: Arc<AtomicBool>,
    capture: Mutex<Option<CaptureThread>>,
    zoom: Option<ZoomControl>,
}

impl V4l2Track {
    fn open(entry: &DeviceEntry, constraints: &StreamConstraints) -> BackendResult<Self> {
        let exact_resolution = constraints.width.as_ref().is_some_and(|c| c.is_exact())
            || constraints.height.as_ref().is_some_and(|c| c.is_exact());
        let request = CaptureRequest {
            path: entry.id.as_str().to_string(),
            resolution: constraints.resolution(),
            exact_resolution,
        };

        let latest: LatestFrame = Arc::new(Mutex::new(None));
        let live = Arc::new(AtomicBool::new(true));
        let (capture, negotiated) =
            CaptureThread::spawn(request, Arc::clone(&latest), Arc::clone(&live))?;

        let zoom = ZoomControl::probe(entry.id.as_str());
        info!(
            device = %entry.id,
            label = %entry.label,
            width = negotiated.width,
            height = negotiated.height,
            zoom = zoom.is_some(),
            "Opened V4L2 track"
        );

        Ok(Self {
            device_id: entry.id.clone(),
            label: entry.label.clone(),
            latest,
            live,
            capture: Mutex::new(Some(capture)),
            zoom,
        })
    }
}

impl VideoTrack for V4l2Track {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        let capture = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut capture) = capture {
            info!(device = %self.device_id, "Stopping V4L2 track");
            capture.stop();
        }
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        if !self.is_live() {
            return None;
        }
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn zoom_range(&self) -> Option<ZoomRange> {
        self.zoom.as_ref().map(ZoomControl::range)
    }

    fn apply_zoom(&self, value: f64) -> BoxFuture<'_, BackendResult<f64>> {
        let zoom = self.zoom.clone();
        let live = self.is_live();
        Box::pin(async move {
            if !live {
                return Err(BackendError::TrackEnded);
            }
            let Some(zoom) = zoom else {
                return Err(BackendError::Other("device has no absolute zoom".to_string()));
            };
            run_blocking(move || {
                zoom.apply(value)
                    .map(f64::from)
                    .map_err(BackendError::from)
            })
            .await
        })
    }
}

impl Drop for V4l2Track {
    fn drop(&mut self) {
        self.stop();
    }
}
