// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for stream acquisition

use scancam::ScanError;
use scancam::backends::camera::virtual_camera::{VirtualDevice, VirtualPlatform};
use scancam::backends::camera::{BackendError, DeviceId, FacingMode, MediaStream};
use scancam::errors::UnavailableReason;
use scancam::scanner::{QualityHint, StreamController, StreamHandle};
use std::sync::Arc;

fn controller(platform: &VirtualPlatform) -> StreamController {
    StreamController::new(Arc::new(platform.clone()))
}

#[test]
fn test_ladder_shape() {
    let [preferred, fallback] =
        StreamController::ladder(&DeviceId::from("cam1"), QualityHint::default());

    assert_eq!(preferred.exact_device(), Some(&DeviceId::from("cam1")));
    assert_eq!(preferred.resolution(), Some((1280, 720)));
    assert!(!preferred.width.as_ref().unwrap().is_exact());
    assert_eq!(
        fallback.facing.as_ref().map(|f| *f.value()),
        Some(FacingMode::Environment)
    );
    assert!(fallback.device_id.is_none());
    assert!(fallback.resolution().is_none());
}

#[tokio::test]
async fn test_preferred_rung_opens_requested_device() {
    let platform = VirtualPlatform::new()
        .with_device(VirtualDevice::new("cam0", "Back Camera"))
        .with_device(VirtualDevice::new("cam1", "Back Ultra Wide Camera"));

    let handle = controller(&platform)
        .open(&DeviceId::from("cam1"), QualityHint::default())
        .await
        .unwrap();

    assert_eq!(handle.device_id(), &DeviceId::from("cam1"));
    assert_eq!(platform.requests().len(), 1);
}

#[tokio::test]
async fn test_fallback_after_over_constrained() {
    let platform = VirtualPlatform::new()
        .with_device(VirtualDevice::new("cam0", "Back Camera"))
        .rejecting_combined_constraints();

    let handle = controller(&platform)
        .open(&DeviceId::from("cam0"), QualityHint::default())
        .await
        .unwrap();

    assert!(handle.is_open());
    assert_eq!(platform.requests().len(), 2);
    assert_eq!(platform.live_track_count(), 1);
}

#[tokio::test]
async fn test_permission_denied_not_retried() {
    let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera"));
    platform.fail_next_request(BackendError::PermissionDenied);

    let result = controller(&platform)
        .open(&DeviceId::from("cam0"), QualityHint::default())
        .await;

    assert!(matches!(result, Err(ScanError::PermissionDenied)));
    assert_eq!(platform.requests().len(), 1);
}

#[tokio::test]
async fn test_both_rungs_rejected() {
    let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera"));
    platform.fail_next_request(BackendError::OverConstrained("deviceId".into()));
    platform.fail_next_request(BackendError::OverConstrained("facingMode".into()));

    let result = controller(&platform)
        .open(&DeviceId::from("cam0"), QualityHint::default())
        .await;

    assert!(matches!(
        result,
        Err(ScanError::CameraUnavailable(UnavailableReason::OverConstrained(_)))
    ));
    assert_eq!(platform.live_track_count(), 0);
}

#[tokio::test]
async fn test_close_and_drop_stop_tracks() {
    let platform = VirtualPlatform::new().with_device(VirtualDevice::new("cam0", "Back Camera"));
    let controller = controller(&platform);

    let mut handle = controller
        .open(&DeviceId::from("cam0"), QualityHint::default())
        .await
        .unwrap();
    controller.close(&mut handle);
    controller.close(&mut handle);
    assert!(!handle.is_open());
    assert_eq!(platform.live_track_count(), 0);

    let dropped = controller
        .open(&DeviceId::from("cam0"), QualityHint::default())
        .await
        .unwrap();
    assert_eq!(platform.live_track_count(), 1);
    drop(dropped);
    assert_eq!(platform.live_track_count(), 0);
}

#[test]
fn test_stream_without_video_track() {
    let result = StreamHandle::from_stream(MediaStream::new(Vec::new()));
    assert!(matches!(
        result,
        Err(ScanError::CameraUnavailable(UnavailableReason::NoVideoTrack))
    ));
}
