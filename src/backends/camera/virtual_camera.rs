// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera platform
//!
//! An in-memory [`CameraPlatform`] whose devices replay still frames. It
//! backs the `scan-image` command and the test suite, and can reproduce the
//! platform behaviours a capture session has to survive: permission
//! prompts and denials, labels hidden until the first grant, rejected
//! constraint combinations, busy devices, slow stream acquisition, zoom
//! failures and devices disappearing mid-stream.
//!
//! Every request, track start/stop and zoom change is recorded as a
//! [`PlatformEvent`] so callers can assert on ordering.

use super::types::*;
use super::{CameraPlatform, MediaStream, VideoTrack};
use crate::constants::labels;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How the platform answers camera permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    /// Access already granted, labels visible from the start
    #[default]
    Granted,
    /// Access granted on first request; labels stay empty until then
    Prompt,
    /// Every stream request is refused
    Denied,
}

/// Something observable that happened on the platform
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    StreamRequested(StreamConstraints),
    TrackStarted(DeviceId),
    TrackStopped(DeviceId),
    TrackEnded(DeviceId),
    ZoomApplied(DeviceId, f64),
}

/// Description of one virtual device
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    id: DeviceId,
    label: String,
    frames: Vec<CameraFrame>,
    warmup_reads: usize,
    zoom: Option<ZoomRange>,
    zoom_fails: bool,
    busy: bool,
}

impl VirtualDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            label: label.into(),
            frames: Vec::new(),
            warmup_reads: 0,
            zoom: None,
            zoom_fails: false,
            busy: false,
        }
    }

    /// Device replaying the given image files in order
    pub fn from_images<P: AsRef<Path>>(
        id: impl Into<String>,
        label: impl Into<String>,
        paths: &[P],
    ) -> BackendResult<Self> {
        let frames = paths
            .iter()
            .map(|p| load_image_as_frame(p.as_ref()))
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Self::new(id, label).with_frames(frames))
    }

    pub fn with_frames(mut self, frames: Vec<CameraFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Report "no frame data yet" for the first `reads` frame reads
    pub fn with_warmup(mut self, reads: usize) -> Self {
        self.warmup_reads = reads;
        self
    }

    pub fn with_zoom(mut self, min: f64, max: f64) -> Self {
        self.zoom = Some(ZoomRange {
            min,
            max,
            current: None,
            step: None,
        });
        self
    }

    /// Zoom in whole multiples of `step`, like an integer V4L2 control
    pub fn with_zoom_step(mut self, step: f64) -> Self {
        if let Some(range) = self.zoom.as_mut() {
            range.step = Some(step);
        }
        self
    }

    /// Zoom is advertised but every apply call fails
    pub fn with_failing_zoom(mut self) -> Self {
        self.zoom_fails = true;
        self
    }

    /// Device is held by another process
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }
}

#[derive(Default)]
struct PlatformState {
    devices: Vec<VirtualDevice>,
    permission: PermissionMode,
    granted: bool,
    reject_combined: bool,
    queued_failures: VecDeque<BackendError>,
    open_delay: Option<Duration>,
    requests: Vec<StreamConstraints>,
    events: Vec<PlatformEvent>,
    tracks: Vec<Arc<VirtualTrack>>,
}

/// In-memory camera platform
#[derive(Clone, Default)]
pub struct VirtualPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl VirtualPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_device(self, device: VirtualDevice) -> Self {
        self.lock().devices.push(device);
        self
    }

    pub fn with_permission(self, mode: PermissionMode) -> Self {
        self.lock().permission = mode;
        self
    }

    /// Reject requests that pin a device id and a resolution together,
    /// the way many mobile browsers do
    pub fn rejecting_combined_constraints(self) -> Self {
        self.lock().reject_combined = true;
        self
    }

    /// Delay every stream acquisition
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.lock().open_delay = Some(delay);
        self
    }

    /// Fail the next stream request with `err`
    pub fn fail_next_request(&self, err: BackendError) {
        self.lock().queued_failures.push_back(err);
    }

    pub fn set_permission(&self, mode: PermissionMode) {
        self.lock().permission = mode;
    }

    /// Simulate the device being unplugged: its live tracks end
    pub fn disconnect(&self, id: &DeviceId) {
        let tracks: Vec<_> = self
            .lock()
            .tracks
            .iter()
            .filter(|t| &t.device_id == id && t.is_live())
            .cloned()
            .collect();
        for track in tracks {
            track.live.store(false, Ordering::SeqCst);
            self.record(PlatformEvent::TrackEnded(id.clone()));
        }
    }

    /// Every constraint set requested so far, in order
    pub fn requests(&self) -> Vec<StreamConstraints> {
        self.lock().requests.clone()
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.lock().events.clone()
    }

    /// Tracks that are currently live
    pub fn live_track_count(&self) -> usize {
        self.lock().tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Tracks ever started
    pub fn started_track_count(&self) -> usize {
        self.lock().tracks.len()
    }

    fn record(&self, event: PlatformEvent) {
        self.lock().events.push(event);
    }

    fn acquire(&self, constraints: &StreamConstraints) -> BackendResult<MediaStream> {
        let mut state = self.lock();
        state.requests.push(constraints.clone());
        state
            .events
            .push(PlatformEvent::StreamRequested(constraints.clone()));

        if state.permission == PermissionMode::Denied {
            return Err(BackendError::PermissionDenied);
        }
        if let Some(err) = state.queued_failures.pop_front() {
            return Err(err);
        }
        if state.reject_combined
            && constraints.exact_device().is_some()
            && constraints.resolution().is_some()
        {
            return Err(BackendError::OverConstrained(
                "device id combined with resolution".to_string(),
            ));
        }

        let device = resolve_device(&state.devices, constraints)?.clone();
        if device.busy {
            return Err(BackendError::Busy(device.id.to_string()));
        }

        state.granted = true;
        let track = Arc::new(VirtualTrack::new(&device, Arc::downgrade(&self.state)));
        state.tracks.push(Arc::clone(&track));
        state
            .events
            .push(PlatformEvent::TrackStarted(device.id.clone()));

        info!(device = %device.id, constraints = %constraints, "Virtual track started");
        let track: Arc<dyn VideoTrack> = track;
        Ok(MediaStream::new(vec![track]))
    }
}

impl CameraPlatform for VirtualPlatform {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, BackendResult<Vec<DeviceEntry>>> {
        Box::pin(async move {
            let state = self.lock();
            let hide_labels = state.permission != PermissionMode::Granted && !state.granted;
            Ok(state
                .devices
                .iter()
                .map(|d| DeviceEntry {
                    id: d.id.clone(),
                    label: if hide_labels {
                        String::new()
                    } else {
                        d.label.clone()
                    },
                })
                .collect())
        })
    }

    fn get_user_media<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, BackendResult<MediaStream>> {
        Box::pin(async move {
            let delay = self.lock().open_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.acquire(constraints)
        })
    }
}

fn resolve_device<'d>(
    devices: &'d [VirtualDevice],
    constraints: &StreamConstraints,
) -> BackendResult<&'d VirtualDevice> {
    if let Some(requested) = &constraints.device_id {
        if let Some(device) = devices.iter().find(|d| &d.id == requested.value()) {
            return Ok(device);
        }
        if requested.is_exact() {
            return Err(BackendError::OverConstrained(format!(
                "device {} is not available",
                requested.value()
            )));
        }
    }

    let terms: &[&str] = match constraints.facing.as_ref().map(|c| *c.value()) {
        Some(FacingMode::Environment) => labels::BACK_TERMS,
        Some(FacingMode::User) => labels::FRONT_TERMS,
        None => &[],
    };
    devices
        .iter()
        .find(|d| {
            let label = d.label.to_lowercase();
            terms.iter().any(|term| label.contains(term))
        })
        .or_else(|| devices.first())
        .ok_or_else(|| BackendError::DeviceNotFound("no virtual devices".to_string()))
}

/// Track replaying a virtual device's frames
struct VirtualTrack {
    device_id: DeviceId,
    label: String,
    frames: Vec<CameraFrame>,
    warmup_remaining: AtomicUsize,
    cursor: AtomicUsize,
    live: AtomicBool,
    zoom: Mutex<Option<ZoomRange>>,
    zoom_fails: bool,
    platform: Weak<Mutex<PlatformState>>,
}

impl VirtualTrack {
    fn new(device: &VirtualDevice, platform: Weak<Mutex<PlatformState>>) -> Self {
        let frames = if device.frames.is_empty() {
            vec![CameraFrame::from_gray(64, 48, vec![128; 64 * 48])]
        } else {
            device.frames.clone()
        };
        Self {
            device_id: device.id.clone(),
            label: device.label.clone(),
            frames,
            warmup_remaining: AtomicUsize::new(device.warmup_reads),
            cursor: AtomicUsize::new(0),
            live: AtomicBool::new(true),
            zoom: Mutex::new(device.zoom),
            zoom_fails: device.zoom_fails,
            platform,
        }
    }

    fn record(&self, event: PlatformEvent) {
        if let Some(state) = self.platform.upgrade() {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .events
                .push(event);
        }
    }
}

impl VideoTrack for VirtualTrack {
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
        if self.live.swap(false, Ordering::SeqCst) {
            debug!(device = %self.device_id, "Virtual track stopped");
            self.record(PlatformEvent::TrackStopped(self.device_id.clone()));
        }
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        if !self.is_live() {
            return None;
        }
        let warming_up = self
            .warmup_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if warming_up {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.frames.len();
        Some(self.frames[index].restamped())
    }

    fn zoom_range(&self) -> Option<ZoomRange> {
        *self.zoom.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_zoom(&self, value: f64) -> BoxFuture<'_, BackendResult<f64>> {
        Box::pin(async move {
            if !self.is_live() {
                return Err(BackendError::TrackEnded);
            }
            if self.zoom_fails {
                return Err(BackendError::Other("zoom constraint rejected".to_string()));
            }
            let applied = {
                let mut zoom = self.zoom.lock().unwrap_or_else(PoisonError::into_inner);
                match zoom.as_mut() {
                    Some(range) => {
                        let applied = range.snap(value);
                        range.current = Some(applied);
                        applied
                    }
                    None => value,
                }
            };
            self.record(PlatformEvent::ZoomApplied(self.device_id.clone(), applied));
            Ok(applied)
        })
    }
}

/// Load an image file as an RGBA frame
pub fn load_image_as_frame(path: &Path) -> BackendResult<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| {
        BackendError::Other(format!("Failed to load image '{}': {}", path.display(), e))
    })?;

    let rgba = img.to_rgba8();
    let width = rgba.width();
    let height = rgba.height();
    let data: Vec<u8> = rgba.into_raw();

    Ok(CameraFrame {
        data: Arc::from(data.into_boxed_slice()),
        width,
        height,
        stride: width * 4,
        format: PixelFormat::RGBA,
        captured_at: Instant::now(),
    })
}
