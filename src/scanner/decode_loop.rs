// SPDX-License-Identifier: GPL-3.0-only

//! Owned decode loops
//!
//! Every decode loop runs as a tokio task controlled through a
//! [`LoopHandle`]. The loop checks its [`StopFlag`] on every tick. Code that
//! runs inside the loop (the acceptance path) may only call
//! [`LoopHandle::request_stop`]; awaiting [`LoopHandle::stop`] from inside
//! the task would wait on itself.

use super::decoder::{CandidateSink, DecodeError, FrameDecoder};
use super::types::LoopAction;
use crate::backends::camera::format_converters::{crop_center, frame_to_luma};
use crate::backends::camera::{CameraFrame, VideoTrack};
use crate::constants::timing;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Shared stop signal of a decode loop
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Controller for a running decode loop
pub struct LoopHandle {
    stop: StopFlag,
    task: Option<JoinHandle<()>>,
    name: &'static str,
}

impl LoopHandle {
    /// Spawn `body` on the current runtime
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_on(&tokio::runtime::Handle::current(), name, body)
    }

    /// Spawn `body` on a specific runtime
    pub fn spawn_on<F, Fut>(runtime: &tokio::runtime::Handle, name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = StopFlag::new();
        let task = runtime.spawn(body(stop.clone()));
        debug!(name, "Decode loop started");
        Self {
            stop,
            task: Some(task),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Signal the loop to stop (non-blocking, safe from inside the loop)
    pub fn request_stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop the loop and wait for the task to exit
    pub async fn stop(mut self) {
        self.request_stop();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(()) => debug!(name = self.name, "Decode loop finished"),
                Err(e) if e.is_panic() => warn!(name = self.name, "Decode loop panicked"),
                Err(_) => debug!(name = self.name, "Decode loop cancelled"),
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.request_stop();
        }
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.name)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}

/// Settings of the pull-mode loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullLoopConfig {
    pub tick: Duration,
    /// Side of a centred square to decode, `None` for the full frame
    pub scan_region: Option<u32>,
}

impl Default for PullLoopConfig {
    fn default() -> Self {
        Self {
            tick: timing::DECODE_TICK,
            scan_region: None,
        }
    }
}

/// Start a periodic loop feeding frames of `track` to `decoder`
///
/// Ticks shorter than [`timing::MIN_DECODE_TICK`] are raised to it.
pub fn start_pull_loop(
    track: Arc<dyn VideoTrack>,
    decoder: Arc<dyn FrameDecoder>,
    sink: CandidateSink,
    config: PullLoopConfig,
) -> LoopHandle {
    LoopHandle::spawn("pull-decode", move |stop| async move {
        let mut ticker = tokio::time::interval(config.tick.max(timing::MIN_DECODE_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if stop.is_stopped() {
                break;
            }
            if !track.is_live() {
                sink.track_lost();
                break;
            }

            let Some(frame) = track.latest_frame() else {
                trace!(device = %track.device_id(), "No frame data yet");
                continue;
            };

            let worker = Arc::clone(&decoder);
            let region = config.scan_region;
            let result =
                tokio::task::spawn_blocking(move || decode_frame(worker.as_ref(), &frame, region))
                    .await;

            let raw = match result {
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    trace!(decoder = decoder.name(), error = %e, "No candidate this tick");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Decode worker failed");
                    continue;
                }
            };

            // Closed while the worker was decoding
            if stop.is_stopped() {
                break;
            }
            if sink.offer(raw) == LoopAction::Stop {
                break;
            }
        }

        debug!(device = %track.device_id(), "Pull loop exiting");
    })
}

/// Convert a frame to greyscale, crop it and run one decode
pub fn decode_frame(
    decoder: &dyn FrameDecoder,
    frame: &CameraFrame,
    scan_region: Option<u32>,
) -> Result<Option<String>, DecodeError> {
    let luma = frame_to_luma(frame).map_err(|e| DecodeError::Image(e.to_string()))?;
    let luma = match scan_region {
        Some(size) => crop_center(&luma, size),
        None => luma,
    };
    decoder.decode(&luma)
}
