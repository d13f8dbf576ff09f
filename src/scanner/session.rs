// SPDX-License-Identifier: GPL-3.0-only

//! Capture session manager
//!
//! Composes the device catalog, stream controller, zoom controller, decoder
//! adapter and detection validator into one state machine:
//!
//! ```text
//! Idle ──open──▶ Initializing ──granted──▶ Scanning ──accepted──▶ Detected
//!                     │    ▲                  │
//!                     │    └──select_device───┤
//!                     ▼                       ▼
//!                   Error                 Cancelled (close)
//! ```
//!
//! Every open, device switch, close and acceptance bumps a generation
//! counter. Async continuations remember the generation they started under
//! and become no-ops once it has moved on; a stream acquired by such a stale
//! continuation is closed on the spot.
//!
//! The session mutex is never held across an `.await`. Device requests are
//! serialized by a separate async open gate: a new request waits for one
//! still in flight, and for that request's stale stream to be closed.

use super::catalog::{DeviceCatalog, classify, select_back_cameras};
use super::decode_loop::{LoopHandle, PullLoopConfig, start_pull_loop};
use super::decoder::{CandidateSink, DecoderAdapter, SinkTarget};
use super::stream::{QualityHint, StreamController, StreamHandle};
use super::types::{
    CameraDevice, DetectionCandidate, LoopAction, SessionSnapshot, SessionState,
};
use super::validator::{CodeFormat, DetectionValidator, Verdict};
use super::zoom::{ZoomController, ZoomRequest};
use crate::backends::camera::{CameraPlatform, DeviceEntry, DeviceId};
use crate::errors::{ScanError, ScanResult, UnavailableReason};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called once with the accepted code
pub type DetectedCallback = Box<dyn FnOnce(String) + Send>;
/// Called once when the user closes the scanner before a detection
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// Tunables of a capture session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub quality: QualityHint,
    pub pull: PullLoopConfig,
    /// Zoom level applied once scanning starts, clamped to the track's range
    pub initial_zoom: Option<f64>,
    /// Device to open instead of the first back camera, when present
    pub preferred_device: Option<DeviceId>,
    pub formats: Vec<CodeFormat>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            quality: QualityHint::default(),
            pull: PullLoopConfig::default(),
            initial_zoom: None,
            preferred_device: None,
            formats: vec![CodeFormat::serial(), CodeFormat::imei()],
        }
    }
}

struct Callbacks {
    on_detected: DetectedCallback,
    on_cancel: CancelCallback,
}

/// Resources owned by one open of the session
#[derive(Default)]
struct Resources {
    decode_loop: Option<LoopHandle>,
    stream: Option<StreamHandle>,
}

impl Resources {
    /// Stop the loop, wait for it, then close the stream
    async fn release(self) {
        let Resources {
            decode_loop,
            mut stream,
        } = self;
        if let Some(decode_loop) = decode_loop {
            decode_loop.stop().await;
        }
        if let Some(stream) = stream.as_mut() {
            stream.close();
        }
    }

    /// Signal the loop and close the stream without waiting
    ///
    /// Safe to call from inside the decode loop.
    fn release_now(self) {
        let Resources {
            decode_loop,
            mut stream,
        } = self;
        if let Some(decode_loop) = decode_loop {
            decode_loop.request_stop();
        }
        if let Some(stream) = stream.as_mut() {
            stream.close();
        }
    }
}

struct SessionData {
    generation: u64,
    state: SessionState,
    session_id: Option<Uuid>,
    device: Option<CameraDevice>,
    devices: Vec<CameraDevice>,
    resources: Resources,
    zoom: ZoomController,
    validator: DetectionValidator,
    callbacks: Option<Callbacks>,
    error: Option<ScanError>,
    detected: Option<String>,
}

impl SessionData {
    fn take_resources(&mut self) -> Resources {
        self.zoom = ZoomController::unsupported();
        std::mem::take(&mut self.resources)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            state: self.state,
            device: self.device.clone(),
            zoom: self.zoom.capability(),
            zoom_level: self.zoom.level(),
            error: self.error.as_ref().map(|e| e.to_string()),
            detected: self.detected.clone(),
        }
    }
}

struct SessionInner {
    catalog: DeviceCatalog,
    streams: StreamController,
    decoder: DecoderAdapter,
    options: SessionOptions,
    data: Mutex<SessionData>,
    snapshots: watch::Sender<SessionSnapshot>,
    /// Held while a device request is in flight
    open_gate: tokio::sync::Mutex<()>,
    weak: Weak<SessionInner>,
}

/// Owns the lifecycle of one scanner instance
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

impl CaptureSession {
    pub fn new(platform: Arc<dyn CameraPlatform>, decoder: DecoderAdapter) -> Self {
        Self::with_options(platform, decoder, SessionOptions::default())
    }

    pub fn with_options(
        platform: Arc<dyn CameraPlatform>,
        decoder: DecoderAdapter,
        options: SessionOptions,
    ) -> Self {
        let validator = DetectionValidator::new(options.formats.clone());
        let (snapshots, _) = watch::channel(SessionSnapshot::default());

        let inner = Arc::new_cyclic(|weak| SessionInner {
            catalog: DeviceCatalog::new(Arc::clone(&platform)),
            streams: StreamController::new(platform),
            decoder,
            options,
            data: Mutex::new(SessionData {
                generation: 0,
                state: SessionState::Idle,
                session_id: None,
                device: None,
                devices: Vec::new(),
                resources: Resources::default(),
                zoom: ZoomController::unsupported(),
                validator,
                callbacks: None,
                error: None,
                detected: None,
            }),
            snapshots,
            open_gate: tokio::sync::Mutex::new(()),
            weak: weak.clone(),
        });

        Self { inner }
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.inner.catalog
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receive a snapshot on every state, device or zoom change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn last_error(&self) -> Option<ScanError> {
        self.inner.lock().error.clone()
    }

    /// Devices seen by the last open
    pub fn devices(&self) -> Vec<CameraDevice> {
        self.inner.lock().devices.clone()
    }

    /// Open the scanner on the preferred back camera
    ///
    /// Allowed from every state except `Initializing` and `Scanning`.
    /// Returns once scanning has started, or once a `close_scanner` call
    /// superseded this open. On failure the session moves to `Error`, the
    /// callbacks are dropped and the error is returned.
    pub async fn open_scanner<D, C>(&self, on_detected: D, on_cancel: C) -> ScanResult<()>
    where
        D: FnOnce(String) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut data = self.inner.lock();
            if !data.state.can_open() {
                return Err(ScanError::InvalidState(format!(
                    "cannot open while {}",
                    data.state
                )));
            }
            data.generation += 1;
            data.state = SessionState::Initializing;
            data.session_id = Some(Uuid::new_v4());
            data.device = None;
            data.error = None;
            data.detected = None;
            data.zoom = ZoomController::unsupported();
            data.validator.reset();
            data.callbacks = Some(Callbacks {
                on_detected: Box::new(on_detected),
                on_cancel: Box::new(on_cancel),
            });
            info!(session = ?data.session_id, generation = data.generation, "Opening scanner");
            self.inner.publish(&data);
            data.generation
        };

        let result = match self.inner.choose_device(generation).await {
            Ok(Some(device)) => self.inner.start(generation, device).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.inner.fail(generation, e.clone());
        }
        result
    }

    /// Cancel the session and release the camera
    ///
    /// Idempotent. Fires `on_cancel` when a session was initializing or
    /// scanning; does nothing in any other state.
    pub async fn close_scanner(&self) {
        let (resources, callbacks) = {
            let mut data = self.inner.lock();
            if !data.state.is_active() {
                debug!(state = %data.state, "Nothing to close");
                return;
            }
            data.generation += 1;
            data.state = SessionState::Cancelled;
            let resources = data.take_resources();
            let callbacks = data.callbacks.take();
            info!(session = ?data.session_id, "Scanner closed");
            self.inner.publish(&data);
            (resources, callbacks)
        };

        resources.release().await;

        if let Some(callbacks) = callbacks {
            (callbacks.on_cancel)();
        }
    }

    /// Switch the running session to another device
    ///
    /// The current decode loop is stopped and joined and the current stream
    /// closed before the new device is requested. A request still in flight
    /// from an earlier open is waited for and its stream closed first.
    pub async fn select_device(&self, id: &DeviceId) -> ScanResult<()> {
        let (generation, resources, device) = {
            let mut data = self.inner.lock();
            if !data.state.is_active() {
                return Err(ScanError::InvalidState(format!(
                    "cannot switch device while {}",
                    data.state
                )));
            }
            data.generation += 1;
            data.state = SessionState::Initializing;
            data.device = None;
            let resources = data.take_resources();
            let device = data
                .devices
                .iter()
                .find(|d| &d.id == id)
                .cloned()
                .unwrap_or_else(|| {
                    classify(&DeviceEntry {
                        id: id.clone(),
                        label: String::new(),
                    })
                });
            info!(device = %id, generation = data.generation, "Switching device");
            self.inner.publish(&data);
            (data.generation, resources, device)
        };

        resources.release().await;

        let result = self.inner.start(generation, device).await;
        if let Err(e) = &result {
            self.inner.fail(generation, e.clone());
        }
        result
    }

    /// Clamp and apply a zoom level, returning the level in effect
    pub async fn set_zoom(&self, value: f64) -> f64 {
        self.inner.zoom(ZoomRequest::Set(value)).await
    }

    pub async fn zoom_in(&self) -> f64 {
        self.inner.zoom(ZoomRequest::In).await
    }

    pub async fn zoom_out(&self) -> f64 {
        self.inner.zoom(ZoomRequest::Out).await
    }

    pub async fn zoom_max(&self) -> f64 {
        self.inner.zoom(ZoomRequest::Max).await
    }

    pub async fn zoom_reset(&self) -> f64 {
        self.inner.zoom(ZoomRequest::Reset).await
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, data: &SessionData) {
        self.snapshots.send_replace(data.snapshot());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn sink(&self, generation: u64) -> CandidateSink {
        let target: Weak<dyn SinkTarget> = self.weak.clone();
        CandidateSink::new(generation, target)
    }

    /// Enumerate and pick the device to open
    ///
    /// `Ok(None)` when the generation moved on while enumerating.
    async fn choose_device(&self, generation: u64) -> ScanResult<Option<CameraDevice>> {
        let cameras = {
            let _gate = self.open_gate.lock().await;
            self.catalog.list_cameras().await?
        };

        let preferred = self
            .options
            .preferred_device
            .as_ref()
            .and_then(|id| cameras.iter().find(|d| &d.id == id).cloned());
        if preferred.is_none()
            && let Some(id) = &self.options.preferred_device
        {
            debug!(device = %id, "Preferred device not present, using back camera");
        }

        let device = match preferred {
            Some(device) => device,
            None => select_back_cameras(cameras.clone())?.remove(0),
        };

        let mut data = self.lock();
        if data.generation != generation {
            return Ok(None);
        }
        data.devices = cameras;
        Ok(Some(device))
    }

    /// Open `device`, probe zoom and arm the decoder
    async fn start(&self, generation: u64, device: CameraDevice) -> ScanResult<()> {
        let gate = self.open_gate.lock().await;
        if !self.is_current(generation) {
            return Ok(());
        }

        let handle = self.streams.open(&device.id, self.options.quality).await?;
        let zoom = ZoomController::probe(&handle);
        let track = Arc::clone(handle.track());

        {
            let mut data = self.lock();
            if data.generation != generation {
                drop(data);
                info!(device = %handle.device_id(), "Discarding stream opened after close");
                drop(handle);
                return Ok(());
            }

            let opened = if handle.device_id() == &device.id {
                device
            } else {
                data.devices
                    .iter()
                    .find(|d| d.id == *handle.device_id())
                    .cloned()
                    .unwrap_or_else(|| {
                        classify(&DeviceEntry {
                            id: handle.device_id().clone(),
                            label: handle.label().to_string(),
                        })
                    })
            };
            data.device = Some(opened);
            data.zoom = zoom;
            data.resources.stream = Some(handle);
            self.publish(&data);
        }
        drop(gate);

        let sink = self.sink(generation);
        let decode_loop = match &self.decoder {
            DecoderAdapter::Pull(decoder) => {
                start_pull_loop(track, Arc::clone(decoder), sink, self.options.pull)
            }
            DecoderAdapter::Push(decoder) => decoder.start(track, sink)?,
        };

        {
            let mut data = self.lock();
            if data.generation != generation || data.state != SessionState::Initializing {
                // Closed or already detected while the decoder was arming
                decode_loop.request_stop();
                return Ok(());
            }
            data.resources.decode_loop = Some(decode_loop);
            data.state = SessionState::Scanning;
            info!(
                session = ?data.session_id,
                device = ?data.device.as_ref().map(|d| &d.id),
                decoder = self.decoder.name(),
                "Scanning"
            );
            self.publish(&data);
        }

        if let Some(level) = self.options.initial_zoom {
            self.zoom(ZoomRequest::Set(level)).await;
        }
        Ok(())
    }

    /// Move to `Error` if `generation` is still the live one
    ///
    /// Never awaits, so it can run inside a decode loop.
    fn fail(&self, generation: u64, err: ScanError) {
        let resources = {
            let mut data = self.lock();
            if data.generation != generation || !data.state.is_active() {
                return;
            }
            data.generation += 1;
            data.state = SessionState::Error;
            warn!(session = ?data.session_id, error = %err, "Scanner failed");
            data.error = Some(err);
            data.callbacks = None;
            let resources = data.take_resources();
            self.publish(&data);
            resources
        };
        resources.release_now();
    }

    async fn zoom(&self, request: ZoomRequest) -> f64 {
        let (generation, mut zoom) = {
            let data = self.lock();
            (data.generation, data.zoom.clone())
        };

        let level = zoom.apply_request(request).await;

        let mut data = self.lock();
        if data.generation == generation {
            data.zoom = zoom;
            self.publish(&data);
        }
        level
    }
}

impl SinkTarget for SessionInner {
    fn offer(&self, generation: u64, candidate: DetectionCandidate) -> LoopAction {
        let (resources, callbacks, code) = {
            let mut data = self.lock();
            if data.generation != generation
                || !data.state.is_active()
                || data.resources.stream.is_none()
            {
                return LoopAction::Stop;
            }

            let code = match data.validator.validate(&candidate.raw) {
                Verdict::Accepted { code, format } => {
                    info!(code = %code, format = %format, at = %candidate.timestamp, "Detection accepted");
                    code
                }
                Verdict::Rejected(reason) => {
                    debug!(raw = %candidate.raw, ?reason, "Detection rejected");
                    return LoopAction::Continue;
                }
            };

            data.generation += 1;
            let mut resources = data.take_resources();
            // Loop stop and track stop happen before anyone hears about the code
            if let Some(decode_loop) = resources.decode_loop.take() {
                decode_loop.request_stop();
            }
            if let Some(stream) = resources.stream.as_mut() {
                stream.close();
            }
            data.state = SessionState::Detected;
            data.detected = Some(code.clone());
            self.publish(&data);
            (resources, data.callbacks.take(), code)
        };
        drop(resources);

        if let Some(callbacks) = callbacks {
            (callbacks.on_detected)(code);
        }
        LoopAction::Stop
    }

    fn track_lost(&self, generation: u64) {
        self.fail(
            generation,
            ScanError::CameraUnavailable(UnavailableReason::DeviceLost),
        );
    }
}
