// SPDX-License-Identifier: GPL-3.0-only

//! QR code decoders built on `rqrr`
//!
//! [`QrFrameDecoder`] decodes single greyscale stills and is driven by the
//! session's pull loop. [`ContinuousQrDecoder`] runs its own loop over a
//! stream of frames from the track and pushes results to a sink.

use super::{CandidateSink, DecodeError, FrameDecoder, PushDecoder};
use crate::backends::camera::format_converters::frame_to_luma;
use crate::backends::camera::{CameraFrame, VideoTrack};
use crate::constants::{qr, timing};
use crate::errors::{ScanError, ScanResult};
use crate::scanner::decode_loop::{LoopHandle, StopFlag};
use crate::scanner::types::LoopAction;
use futures::{Stream, StreamExt, pin_mut};
use image::GrayImage;
use image::imageops::FilterType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Pull-mode QR decoder
///
/// Frames larger than `max_dimension` on either side are downscaled first;
/// QR codes held up to a camera are large enough to survive it.
#[derive(Debug, Clone)]
pub struct QrFrameDecoder {
    max_dimension: u32,
}

impl Default for QrFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl QrFrameDecoder {
    pub fn new() -> Self {
        Self {
            max_dimension: qr::MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Downscale `image` so neither side exceeds `max_dimension`
    pub fn prepare(&self, image: &GrayImage) -> Option<GrayImage> {
        let (width, height) = image.dimensions();
        if width <= self.max_dimension && height <= self.max_dimension {
            return None;
        }
        let scale = (width as f32 / self.max_dimension as f32)
            .max(height as f32 / self.max_dimension as f32);
        let new_width = ((width as f32 / scale) as u32).max(1);
        let new_height = ((height as f32 / scale) as u32).max(1);
        trace!(width, height, new_width, new_height, "Downscaling for QR decode");
        Some(image::imageops::resize(
            image,
            new_width,
            new_height,
            FilterType::Triangle,
        ))
    }
}

impl FrameDecoder for QrFrameDecoder {
    fn name(&self) -> &'static str {
        "qr"
    }

    fn decode(&self, image: &GrayImage) -> Result<Option<String>, DecodeError> {
        let start = std::time::Instant::now();
        let scaled = self.prepare(image);
        let image = scaled.as_ref().unwrap_or(image);

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32)[0],
        );
        let grids = prepared.detect_grids();
        if grids.is_empty() {
            return Ok(None);
        }

        let mut last_error = None;
        for grid in grids {
            match grid.decode() {
                Ok((_meta, content)) => {
                    debug!(
                        content = %content,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Decoded QR code"
                    );
                    return Ok(Some(content));
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(DecodeError::Decode(
            last_error.unwrap_or_else(|| "unreadable grid".to_string()),
        ))
    }
}

/// Push-mode QR decoder
///
/// Polls the track for frames on its own schedule and decodes every new
/// one, stopping after the sink accepts a code.
#[derive(Debug, Clone)]
pub struct ContinuousQrDecoder {
    frames: QrFrameDecoder,
    poll_interval: Duration,
}

impl Default for ContinuousQrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuousQrDecoder {
    pub fn new() -> Self {
        Self {
            frames: QrFrameDecoder::new(),
            poll_interval: timing::PUSH_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Frames of `track` until it ends or `stop` is raised
///
/// Frames with a timestamp already seen are skipped. Polling never runs
/// faster than [`timing::MIN_DECODE_TICK`].
fn frame_stream(
    track: Arc<dyn VideoTrack>,
    poll_interval: Duration,
    stop: StopFlag,
) -> impl Stream<Item = CameraFrame> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(poll_interval.max(timing::MIN_DECODE_TICK));
        let mut last_seen = None;
        while !stop.is_stopped() && track.is_live() {
            ticker.tick().await;
            let Some(frame) = track.latest_frame() else {
                continue;
            };
            if last_seen == Some(frame.captured_at) {
                continue;
            }
            last_seen = Some(frame.captured_at);
            yield frame;
        }
    }
}

impl PushDecoder for ContinuousQrDecoder {
    fn name(&self) -> &'static str {
        "qr-continuous"
    }

    fn start(&self, track: Arc<dyn VideoTrack>, sink: CandidateSink) -> ScanResult<LoopHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScanError::DecoderInitError(e.to_string()))?;
        if !track.is_live() {
            return Err(ScanError::DecoderInitError(format!(
                "track {} is not live",
                track.device_id()
            )));
        }

        let decoder = Arc::new(self.frames.clone());
        let poll_interval = self.poll_interval;

        Ok(LoopHandle::spawn_on(&runtime, "push-decode", move |stop| async move {
            let frames = frame_stream(Arc::clone(&track), poll_interval, stop.clone());
            pin_mut!(frames);

            while let Some(frame) = frames.next().await {
                let worker = Arc::clone(&decoder);
                let result = tokio::task::spawn_blocking(move || {
                    let luma = frame_to_luma(&frame).map_err(|e| DecodeError::Image(e.to_string()))?;
                    worker.decode(&luma)
                })
                .await;

                match result {
                    Ok(Ok(Some(raw))) => {
                        if stop.is_stopped() || sink.offer(raw) == LoopAction::Stop {
                            break;
                        }
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => trace!(error = %e, "No candidate in frame"),
                    Err(e) => warn!(error = %e, "Decode worker failed"),
                }
            }

            if !stop.is_stopped() && !track.is_live() {
                sink.track_lost();
            }
            debug!(device = %track.device_id(), "Push decoder exiting");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_blank_image_has_no_code() {
        let decoder = QrFrameDecoder::new();
        let image = GrayImage::from_pixel(320, 240, Luma([255]));
        assert_eq!(decoder.decode(&image), Ok(None));
    }

    #[test]
    fn test_large_frames_are_downscaled() {
        let decoder = QrFrameDecoder::new();
        let image = GrayImage::new(1280, 720);
        let scaled = decoder.prepare(&image).unwrap();
        assert_eq!(scaled.dimensions(), (640, 360));

        let small = GrayImage::new(320, 240);
        assert!(decoder.prepare(&small).is_none());
        assert!(QrFrameDecoder::with_max_dimension(1280).prepare(&image).is_none());
    }

    #[tokio::test]
    async fn test_push_decoder_runs_until_stopped() {
        use crate::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};
        use crate::backends::camera::{CameraPlatform, StreamConstraints};

        let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam", "Back"));
        let stream = platform
            .get_user_media(&StreamConstraints::any())
            .await
            .unwrap();
        let sink = CandidateSink::new(1, std::sync::Weak::<NoCode>::new());

        let handle = ContinuousQrDecoder::new()
            .with_poll_interval(Duration::from_millis(5))
            .start(stream.video_track().unwrap(), sink)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_zero_poll_interval_keeps_running() {
        use crate::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};
        use crate::backends::camera::{CameraPlatform, StreamConstraints};

        let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam", "Back"));
        let stream = platform
            .get_user_media(&StreamConstraints::any())
            .await
            .unwrap();
        let sink = CandidateSink::new(1, std::sync::Weak::<NoCode>::new());

        let handle = ContinuousQrDecoder::new()
            .with_poll_interval(Duration::ZERO)
            .start(stream.video_track().unwrap(), sink)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // A panicking task would already be finished
        assert!(!handle.is_finished());
        handle.stop().await;
    }

    struct NoCode;

    impl crate::scanner::decoder::SinkTarget for NoCode {
        fn offer(&self, _: u64, _: crate::scanner::types::DetectionCandidate) -> LoopAction {
            LoopAction::Stop
        }

        fn track_lost(&self, _: u64) {}
    }

    #[test]
    fn test_push_start_needs_runtime() {
        use crate::scanner::decoder::SinkTarget;
        use crate::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};
        use crate::backends::camera::{CameraPlatform, StreamConstraints};

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam", "Back"));
        let stream = runtime
            .block_on(platform.get_user_media(&StreamConstraints::any()))
            .unwrap();

        let sink = CandidateSink::new(1, std::sync::Weak::<NoTarget>::new());
        let result = ContinuousQrDecoder::new().start(stream.video_track().unwrap(), sink);
        assert!(matches!(result, Err(ScanError::DecoderInitError(_))));

        struct NoTarget;
        impl SinkTarget for NoTarget {
            fn offer(&self, _: u64, _: crate::scanner::types::DetectionCandidate) -> LoopAction {
                LoopAction::Stop
            }
            fn track_lost(&self, _: u64) {}
        }
    }
}
