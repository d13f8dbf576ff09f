// SPDX-License-Identifier: GPL-3.0-only
//! Capture thread for V4L2 devices
//!
//! Each open track owns one thread that dequeues memory-mapped buffers and
//! keeps only the most recent frame. Decoders sample that slot at their own
//! pace, so a slow decode never backs up the driver queue.

use crate::backends::camera::types::{BackendError, BackendResult, CameraFrame, PixelFormat};
use crate::constants::v4l2 as v4l2_consts;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, sync_channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Slot holding the newest frame of a track
pub type LatestFrame = Arc<Mutex<Option<CameraFrame>>>;

/// What the capture thread should open
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub path: String,
    pub resolution: Option<(u32, u32)>,
    /// Fail instead of accepting whatever resolution the driver picks
    pub exact_resolution: bool,
}

/// Format the driver settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Controller for a running capture thread
pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    name: String,
}

impl CaptureThread {
    /// Open the device, negotiate a format and start streaming
    ///
    /// Blocks until the thread reports that streaming started (or failed),
    /// so errors such as a busy device are returned here rather than lost
    /// inside the thread.
    pub fn spawn(
        request: CaptureRequest,
        latest: LatestFrame,
        live: Arc<AtomicBool>,
    ) -> BackendResult<(Self, NegotiatedFormat)> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let name = format!("capture:{}", request.path);
        let (ready_tx, ready_rx) = sync_channel(1);

        info!(device_path = %request.path, "Starting capture thread");

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || capture_loop(request, ready_tx, latest, running_clone, live))
            .map_err(BackendError::from)?;

        let mut controller = Self {
            handle: Some(handle),
            running,
            name,
        };

        match ready_rx.recv() {
            Ok(Ok(negotiated)) => Ok((controller, negotiated)),
            Ok(Err(e)) => {
                controller.join();
                Err(e)
            }
            Err(_) => {
                controller.join();
                Err(BackendError::Other(
                    "Capture thread exited before reporting".to_string(),
                ))
            }
        }
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture stop");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to release the device
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "Capture thread panicked");
            } else {
                debug!(name = %self.name, "Capture thread finished");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(name = %self.name, "CaptureThread dropped, stopping loop");
            self.stop();
        }
    }
}

/// Main capture loop running in a separate thread
fn capture_loop(
    request: CaptureRequest,
    ready: SyncSender<BackendResult<NegotiatedFormat>>,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
) {
    let (dev, negotiated) = match open_and_configure(&request) {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut stream =
        match MmapStream::with_buffers(&dev, Type::VideoCapture, v4l2_consts::BUFFER_COUNT) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(BackendError::from(e)));
                return;
            }
        };

    info!(
        device_path = %request.path,
        width = negotiated.width,
        height = negotiated.height,
        format = ?negotiated.format,
        "V4L2 capture stream started"
    );
    let _ = ready.send(Ok(negotiated));

    while running.load(Ordering::SeqCst) {
        match stream.next() {
            Ok((buf, meta)) => {
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                let frame = CameraFrame {
                    width: negotiated.width,
                    height: negotiated.height,
                    data: Arc::from(&buf[..used]),
                    format: negotiated.format,
                    stride: negotiated.stride,
                    captured_at: Instant::now(),
                };
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
            }
            Err(e) => {
                warn!(device_path = %request.path, error = %e, "Capture failed, device lost");
                break;
            }
        }
    }

    live.store(false, Ordering::SeqCst);
    latest.lock().unwrap_or_else(PoisonError::into_inner).take();
    info!(device_path = %request.path, "Capture thread exiting");
}

fn open_and_configure(request: &CaptureRequest) -> BackendResult<(Device, NegotiatedFormat)> {
    let dev = Device::with_path(&request.path)?;

    let supported: Vec<PixelFormat> = dev
        .enum_formats()?
        .iter()
        .filter_map(|desc| PixelFormat::from_fourcc(&desc.fourcc.repr))
        .collect();

    let chosen = v4l2_consts::PREFERRED_FORMATS
        .iter()
        .copied()
        .find(|f| supported.contains(f))
        .ok_or_else(|| {
            BackendError::OverConstrained(format!(
                "{} offers no decodable pixel format",
                request.path
            ))
        })?;

    let mut format = dev.format()?;
    if let Some((width, height)) = request.resolution {
        format.width = width;
        format.height = height;
    }
    format.fourcc = FourCC::new(&chosen.fourcc());

    let actual = dev.set_format(&format)?;
    let pixel_format = PixelFormat::from_fourcc(&actual.fourcc.repr).ok_or_else(|| {
        BackendError::OverConstrained(format!("driver switched to {}", actual.fourcc))
    })?;

    if request.exact_resolution
        && let Some((width, height)) = request.resolution
        && (actual.width, actual.height) != (width, height)
    {
        return Err(BackendError::OverConstrained(format!(
            "requested {}x{}, driver offers {}x{}",
            width, height, actual.width, actual.height
        )));
    }

    let stride = match (actual.stride, pixel_format.bytes_per_pixel()) {
        (0, Some(bpp)) => actual.width * bpp,
        (stride, _) => stride,
    };

    Ok((
        dev,
        NegotiatedFormat {
            width: actual.width,
            height: actual.height,
            stride,
            format: pixel_format,
        },
    ))
}
