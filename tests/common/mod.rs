// SPDX-License-Identifier: GPL-3.0-only

//! Shared helpers for the integration tests

#![allow(dead_code)]

use image::GrayImage;
use scancam::backends::camera::virtual_camera::{PlatformEvent, VirtualPlatform};
use scancam::scanner::decode_loop::{LoopHandle, StopFlag};
use scancam::scanner::decoder::{CandidateSink, DecodeError, FrameDecoder, PushDecoder};
use scancam::scanner::{CaptureSession, DecoderAdapter, PullLoopConfig, SessionOptions, SessionState};
use scancam::backends::camera::VideoTrack;
use scancam::{ScanError, ScanResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(3);

/// Pull decoder returning scripted results, then nothing
#[derive(Default)]
pub struct ScriptedDecoder {
    results: Mutex<VecDeque<Result<Option<String>, DecodeError>>>,
    calls: Mutex<usize>,
}

impl ScriptedDecoder {
    pub fn codes(codes: &[&str]) -> Arc<Self> {
        Self::results(codes.iter().map(|c| Ok(Some(c.to_string()))).collect())
    }

    pub fn results(results: Vec<Result<Option<String>, DecodeError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl FrameDecoder for ScriptedDecoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn decode(&self, _image: &GrayImage) -> Result<Option<String>, DecodeError> {
        *self.calls.lock().unwrap() += 1;
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

/// Push decoder offering every scripted code regardless of the sink's answer
pub struct ScriptedPushDecoder {
    codes: Vec<String>,
    fail_start: bool,
    pub stop_flags: Mutex<Vec<StopFlag>>,
    pub answers: Arc<Mutex<Vec<bool>>>,
}

impl ScriptedPushDecoder {
    pub fn new(codes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            fail_start: false,
            stop_flags: Mutex::new(Vec::new()),
            answers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            codes: Vec::new(),
            fail_start: true,
            stop_flags: Mutex::new(Vec::new()),
            answers: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl PushDecoder for ScriptedPushDecoder {
    fn name(&self) -> &'static str {
        "scripted-push"
    }

    fn start(&self, _track: Arc<dyn VideoTrack>, sink: CandidateSink) -> ScanResult<LoopHandle> {
        if self.fail_start {
            return Err(ScanError::DecoderInitError("scripted failure".to_string()));
        }
        let codes = self.codes.clone();
        let answers = Arc::clone(&self.answers);
        let handle = LoopHandle::spawn("scripted-push", move |stop| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for code in codes {
                let action = sink.offer(code);
                answers
                    .lock()
                    .unwrap()
                    .push(action == scancam::scanner::LoopAction::Continue);
            }
            while !stop.is_stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        self.stop_flags.lock().unwrap().push(handle.stop_flag());
        Ok(handle)
    }
}

pub fn fast_options() -> SessionOptions {
    SessionOptions {
        pull: PullLoopConfig {
            tick: Duration::from_millis(5),
            scan_region: None,
        },
        ..SessionOptions::default()
    }
}

pub fn pull_session(platform: &VirtualPlatform, decoder: Arc<ScriptedDecoder>) -> CaptureSession {
    CaptureSession::with_options(
        Arc::new(platform.clone()),
        DecoderAdapter::Pull(decoder),
        fast_options(),
    )
}

pub async fn wait_for_state(session: &CaptureSession, state: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}, at {}", state, session.state()))
        .unwrap();
}

/// Poll until `condition` holds; callbacks run after the state is published
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Tracks live just before `events[index]`, counted from the event log
pub fn live_tracks_before(events: &[PlatformEvent], index: usize) -> i64 {
    events[..index].iter().fold(0, |live, event| match event {
        PlatformEvent::TrackStarted(_) => live + 1,
        PlatformEvent::TrackStopped(_) | PlatformEvent::TrackEnded(_) => live - 1,
        _ => live,
    })
}
