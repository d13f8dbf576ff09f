// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture session state machine

mod common;

use common::*;
use scancam::backends::camera::virtual_camera::{
    PermissionMode, PlatformEvent, VirtualDevice, VirtualPlatform,
};
use futures::future::BoxFuture;
use scancam::backends::camera::{
    BackendResult, CameraPlatform, DeviceEntry, DeviceId, MediaStream, StreamConstraints,
};
use scancam::errors::UnavailableReason;
use scancam::scanner::decoder::DecodeError;
use scancam::scanner::{CaptureSession, DecoderAdapter, SessionState};
use scancam::ScanError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn back_camera() -> VirtualPlatform {
    VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera"))
}

#[tokio::test]
async fn test_track_stopped_before_detection_callback() {
    let platform = back_camera();
    let session = pull_session(&platform, ScriptedDecoder::codes(&["S1234567890"]));

    let observed = Arc::new(Mutex::new(None));
    let observed_in_callback = Arc::clone(&observed);
    let platform_in_callback = platform.clone();

    session
        .open_scanner(
            move |code| {
                let stopped = platform_in_callback
                    .events()
                    .iter()
                    .any(|e| matches!(e, PlatformEvent::TrackStopped(_)));
                *observed_in_callback.lock().unwrap() =
                    Some((code, platform_in_callback.live_track_count(), stopped));
            },
            || panic!("cancel must not fire"),
        )
        .await
        .unwrap();

    wait_for_state(&session, SessionState::Detected).await;
    wait_until(|| observed.lock().unwrap().is_some()).await;

    let (code, live, stopped) = observed.lock().unwrap().clone().unwrap();
    assert_eq!(code, "S1234567890");
    assert_eq!(live, 0);
    assert!(stopped);
    assert_eq!(session.snapshot().detected.as_deref(), Some("S1234567890"));
}

#[tokio::test]
async fn test_close_twice_releases_everything_once() {
    let platform = back_camera();
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));
    let cancels = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cancels);

    session
        .open_scanner(
            |_| panic!("nothing should be detected"),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();
    assert_eq!(platform.live_track_count(), 1);

    session.close_scanner().await;
    session.close_scanner().await;

    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(platform.live_track_count(), 0);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_code_keeps_scanning() {
    let platform = back_camera();
    let decoder = ScriptedDecoder::codes(&["12345", "  ", "S1234567890"]);
    let session = pull_session(&platform, Arc::clone(&decoder));
    let detected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&detected);

    session
        .open_scanner(move |code| sink.lock().unwrap().push(code), || {})
        .await
        .unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    wait_until(|| !detected.lock().unwrap().is_empty()).await;

    assert_eq!(*detected.lock().unwrap(), vec!["S1234567890".to_string()]);
    assert!(decoder.calls() >= 3);
}

#[tokio::test]
async fn test_rejected_code_does_not_end_session() {
    let platform = back_camera();
    let decoder = ScriptedDecoder::codes(&["12345"]);
    let session = pull_session(&platform, Arc::clone(&decoder));

    session.open_scanner(|_| {}, || {}).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while decoder.calls() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(session.state(), SessionState::Scanning);
    assert_eq!(platform.live_track_count(), 1);
    session.close_scanner().await;
}

#[tokio::test]
async fn test_repeated_code_reported_once() {
    let platform = back_camera();
    let push = ScriptedPushDecoder::new(&["S1234567890", "S1234567890"]);
    let session = CaptureSession::with_options(
        Arc::new(platform.clone()),
        DecoderAdapter::Push(push.clone()),
        fast_options(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    session
        .open_scanner(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        )
        .await
        .unwrap();
    wait_for_state(&session, SessionState::Detected).await;

    tokio::time::timeout(WAIT, async {
        while push.answers.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Neither offer asked the loop to keep going
    assert_eq!(*push.answers.lock().unwrap(), vec![false, false]);
}

#[tokio::test]
async fn test_push_decoder_stopped_on_acceptance() {
    let platform = back_camera();
    let push = ScriptedPushDecoder::new(&["356938035643809"]);
    let session = CaptureSession::with_options(
        Arc::new(platform.clone()),
        DecoderAdapter::Push(push.clone()),
        fast_options(),
    );

    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;

    let flags = push.stop_flags.lock().unwrap();
    assert_eq!(flags.len(), 1);
    assert!(flags[0].is_stopped());
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_decoder_errors_are_ignored() {
    let platform = back_camera();
    let decoder = ScriptedDecoder::results(vec![
        Err(DecodeError::Decode("ecc failure".into())),
        Err(DecodeError::Image("bad frame".into())),
        Ok(None),
        Ok(Some("S1234567890".into())),
    ]);
    let session = pull_session(&platform, decoder);

    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    assert_eq!(session.last_error(), None);
}

#[tokio::test]
async fn test_warming_track_skips_ticks() {
    let platform =
        VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera").with_warmup(4));
    let decoder = ScriptedDecoder::codes(&["S1234567890"]);
    let session = pull_session(&platform, Arc::clone(&decoder));

    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    assert_eq!(decoder.calls(), 1);
}

#[tokio::test]
async fn test_zoom_is_clamped_through_session() {
    let platform =
        VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera").with_zoom(1.0, 8.0));
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    session.open_scanner(|_| {}, || {}).await.unwrap();

    assert_eq!(session.set_zoom(0.1).await, 1.0);
    assert_eq!(session.set_zoom(100.0).await, 8.0);
    assert_eq!(session.zoom_reset().await, 1.0);
    assert!((session.zoom_in().await - 1.7).abs() < 1e-9);
    assert_eq!(session.zoom_max().await, 8.0);
    assert_eq!(session.snapshot().zoom_level, Some(8.0));

    assert!(platform
        .events()
        .contains(&PlatformEvent::ZoomApplied(DeviceId::from("cam0"), 8.0)));
    session.close_scanner().await;
}

#[tokio::test]
async fn test_zoom_failure_keeps_scanning() {
    let platform = VirtualPlatform::new().with_device(
        VirtualDevice::new("cam0", "Back Camera")
            .with_zoom(1.0, 4.0)
            .with_failing_zoom(),
    );
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    session.open_scanner(|_| {}, || {}).await.unwrap();
    assert_eq!(session.set_zoom(3.0).await, 1.0);
    assert_eq!(session.state(), SessionState::Scanning);
    assert_eq!(session.last_error(), None);
    session.close_scanner().await;
}

#[tokio::test]
async fn test_initial_zoom_applied() {
    let platform =
        VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera").with_zoom(1.0, 4.0));
    let mut options = fast_options();
    options.initial_zoom = Some(2.5);
    let session = CaptureSession::with_options(
        Arc::new(platform.clone()),
        DecoderAdapter::Pull(ScriptedDecoder::codes(&[])),
        options,
    );

    session.open_scanner(|_| {}, || {}).await.unwrap();
    assert_eq!(session.snapshot().zoom_level, Some(2.5));
    session.close_scanner().await;
}

#[tokio::test]
async fn test_device_switch_releases_before_next_request() {
    let platform = VirtualPlatform::new()
        .with_device(VirtualDevice::new("cam0", "Back Camera"))
        .with_device(VirtualDevice::new("cam1", "Back Ultra Wide Camera"));
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    session.open_scanner(|_| {}, || {}).await.unwrap();
    assert_eq!(
        session.snapshot().device.map(|d| d.id),
        Some(DeviceId::from("cam0"))
    );

    assert_eq!(session.devices().len(), 2);
    assert_eq!(session.catalog().list_back_cameras().await.unwrap().len(), 2);

    session.select_device(&DeviceId::from("cam1")).await.unwrap();
    assert_eq!(session.state(), SessionState::Scanning);
    assert_eq!(
        session.snapshot().device.map(|d| d.id),
        Some(DeviceId::from("cam1"))
    );
    assert_eq!(platform.live_track_count(), 1);

    let events = platform.events();
    let request = events
        .iter()
        .position(|e| {
            matches!(e, PlatformEvent::StreamRequested(c)
                if c.exact_device() == Some(&DeviceId::from("cam1")))
        })
        .unwrap();
    assert_eq!(live_tracks_before(&events, request), 0);

    session.close_scanner().await;
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_select_device_requires_active_session() {
    let session = pull_session(&back_camera(), ScriptedDecoder::codes(&[]));
    let result = session.select_device(&DeviceId::from("cam0")).await;
    assert!(matches!(result, Err(ScanError::InvalidState(_))));
}

#[tokio::test]
async fn test_front_only_is_no_camera_found() {
    let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Front Camera"));
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    let result = session.open_scanner(|_| {}, || {}).await;
    assert_eq!(result, Err(ScanError::NoCameraFound));
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_permission_denied_then_retry() {
    let platform = back_camera().with_permission(PermissionMode::Denied);
    let session = pull_session(&platform, ScriptedDecoder::codes(&["S1234567890"]));

    let result = session.open_scanner(|_| {}, || {}).await;
    assert_eq!(result, Err(ScanError::PermissionDenied));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Error);
    assert!(snapshot.error.is_some());

    platform.set_permission(PermissionMode::Prompt);
    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    assert_eq!(session.last_error(), None);
}

#[tokio::test]
async fn test_busy_device_after_both_attempts() {
    let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera").busy());
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    let result = session.open_scanner(|_| {}, || {}).await;
    assert!(matches!(
        result,
        Err(ScanError::CameraUnavailable(UnavailableReason::Busy(_)))
    ));
    // Permission probe plus both ladder rungs
    assert_eq!(platform.requests().len(), 3);
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_decoder_init_failure_releases_stream() {
    let platform = back_camera();
    let session = CaptureSession::with_options(
        Arc::new(platform.clone()),
        DecoderAdapter::Push(ScriptedPushDecoder::failing()),
        fast_options(),
    );

    let result = session.open_scanner(|_| {}, || {}).await;
    assert!(matches!(result, Err(ScanError::DecoderInitError(_))));
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_late_open_after_cancel_closes_stream() {
    let platform = back_camera().with_open_delay(Duration::from_millis(150));
    let session = pull_session(&platform, ScriptedDecoder::codes(&["S1234567890"]));
    let cancels = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cancels);

    let opener = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .open_scanner(
                    |_| panic!("closed sessions never detect"),
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .await
        })
    };

    // Permission probe takes one delay, the ladder's first rung a second
    tokio::time::sleep(Duration::from_millis(225)).await;
    session.close_scanner().await;
    assert_eq!(session.state(), SessionState::Cancelled);

    opener.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(platform.live_track_count(), 0);
}

/// Counts device requests that are in flight at the same time
struct CountingPlatform {
    inner: VirtualPlatform,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CameraPlatform for CountingPlatform {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, BackendResult<Vec<DeviceEntry>>> {
        self.inner.enumerate_devices()
    }

    fn get_user_media<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, BackendResult<MediaStream>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = self.inner.get_user_media(constraints).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

#[tokio::test]
async fn test_switch_during_open_waits_for_pending_request() {
    let virtual_platform = VirtualPlatform::new()
        .with_device(VirtualDevice::new("cam0", "Back Camera"))
        .with_device(VirtualDevice::new("cam1", "Back Ultra Wide Camera"))
        .with_open_delay(Duration::from_millis(150));
    let platform = Arc::new(CountingPlatform {
        inner: virtual_platform.clone(),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let session = CaptureSession::with_options(
        platform.clone(),
        DecoderAdapter::Pull(ScriptedDecoder::codes(&[])),
        fast_options(),
    );

    let opener = {
        let session = session.clone();
        tokio::spawn(async move { session.open_scanner(|_| {}, || {}).await })
    };

    // Past the permission grant, inside the request for cam0
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.state(), SessionState::Initializing);
    session.select_device(&DeviceId::from("cam1")).await.unwrap();
    opener.await.unwrap().unwrap();

    assert_eq!(platform.peak.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Scanning);
    assert_eq!(
        session.snapshot().device.map(|d| d.id),
        Some(DeviceId::from("cam1"))
    );
    assert_eq!(virtual_platform.live_track_count(), 1);

    let events = virtual_platform.events();
    let started: Vec<_> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, PlatformEvent::TrackStarted(_)))
        .collect();
    let (last, _) = started[started.len() - 1];
    assert_eq!(events[last], PlatformEvent::TrackStarted(DeviceId::from("cam1")));
    assert_eq!(live_tracks_before(&events, last), 0);
}

#[tokio::test]
async fn test_device_loss_moves_to_error() {
    let platform = back_camera();
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    session.open_scanner(|_| {}, || panic!("loss is not a cancel")).await.unwrap();
    platform.disconnect(&DeviceId::from("cam0"));

    wait_for_state(&session, SessionState::Error).await;
    assert_eq!(
        session.last_error(),
        Some(ScanError::CameraUnavailable(UnavailableReason::DeviceLost))
    );
    assert_eq!(platform.live_track_count(), 0);

    // Nothing left to cancel
    session.close_scanner().await;
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test]
async fn test_reopen_after_detection_accepts_same_code() {
    let platform = back_camera();
    let session = pull_session(
        &platform,
        ScriptedDecoder::codes(&["S1234567890", "S1234567890"]),
    );

    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    let first = session.snapshot().session_id;

    session.open_scanner(|_| {}, || {}).await.unwrap();
    wait_for_state(&session, SessionState::Detected).await;
    assert_ne!(session.snapshot().session_id, first);
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_fallback_rung_used_when_first_rejected() {
    let platform = back_camera().rejecting_combined_constraints();
    let session = pull_session(&platform, ScriptedDecoder::codes(&[]));

    session.open_scanner(|_| {}, || {}).await.unwrap();
    assert_eq!(session.state(), SessionState::Scanning);

    let requests = platform.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].exact_device().is_some());
    assert!(requests[2].device_id.is_none());
    session.close_scanner().await;
}
