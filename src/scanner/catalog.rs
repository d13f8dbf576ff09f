// SPDX-License-Identifier: GPL-3.0-only

//! Device catalog
//!
//! Enumerates video inputs and classifies them from their labels. Labels are
//! often empty until camera access has been granted once, so every listing
//! first acquires and immediately releases a throwaway stream.

use super::types::{CameraDevice, Facing, LensKind};
use crate::backends::camera::{BackendError, CameraPlatform, DeviceEntry, StreamConstraints};
use crate::constants::labels;
use crate::errors::{ScanError, ScanResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Lists and classifies the platform's cameras
#[derive(Clone)]
pub struct DeviceCatalog {
    platform: Arc<dyn CameraPlatform>,
}

impl DeviceCatalog {
    pub fn new(platform: Arc<dyn CameraPlatform>) -> Self {
        Self { platform }
    }

    /// Back-facing cameras, main lens first
    ///
    /// Falls back to the last enumerated device when no label says "back",
    /// unless that device is labelled as front-facing.
    pub async fn list_back_cameras(&self) -> ScanResult<Vec<CameraDevice>> {
        let devices = self.list_cameras().await?;
        let back = select_back_cameras(devices)?;
        info!(
            count = back.len(),
            first = %back[0].id,
            "Selected back-facing cameras"
        );
        Ok(back)
    }

    /// Every video input, classified, in enumeration order
    pub async fn list_cameras(&self) -> ScanResult<Vec<CameraDevice>> {
        self.request_grant().await?;
        let entries = self.platform.enumerate_devices().await?;
        debug!(
            platform = self.platform.name(),
            count = entries.len(),
            "Enumerated video inputs"
        );
        Ok(entries.iter().map(classify).collect())
    }

    /// The camera a new session should open by default
    pub async fn preferred_camera(&self) -> ScanResult<CameraDevice> {
        let mut back = self.list_back_cameras().await?;
        Ok(back.remove(0))
    }

    /// Acquire and immediately release a stream so labels become visible
    async fn request_grant(&self) -> ScanResult<()> {
        match self
            .platform
            .get_user_media(&StreamConstraints::any())
            .await
        {
            Ok(stream) => {
                stream.stop_all();
                Ok(())
            }
            Err(BackendError::PermissionDenied) => Err(ScanError::PermissionDenied),
            Err(e) => {
                // Enumeration still decides whether a usable camera exists
                debug!(error = %e, "Permission probe failed");
                Ok(())
            }
        }
    }
}

fn label_matches(label: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| label.contains(term))
}

/// Classify a device from its label
pub fn classify(entry: &DeviceEntry) -> CameraDevice {
    let label = entry.label.to_lowercase();

    let front = label_matches(&label, labels::FRONT_TERMS);
    let facing = if front {
        Facing::Front
    } else if label_matches(&label, labels::BACK_TERMS) {
        Facing::Back
    } else {
        Facing::Unknown
    };

    // "0.5x" contains "5x", so ultra-wide has to be checked first
    let lens = if label_matches(&label, labels::ULTRA_WIDE_TERMS) {
        LensKind::UltraWide
    } else if label_matches(&label, labels::TELEPHOTO_TERMS) {
        LensKind::Telephoto
    } else {
        LensKind::Main
    };

    CameraDevice {
        id: entry.id.clone(),
        label: entry.label.clone(),
        facing,
        lens,
    }
}

/// Pick the back-facing devices out of a classified list
pub fn select_back_cameras(devices: Vec<CameraDevice>) -> ScanResult<Vec<CameraDevice>> {
    let mut back: Vec<CameraDevice> = devices
        .iter()
        .filter(|d| d.facing == Facing::Back)
        .cloned()
        .collect();

    if back.is_empty() {
        return match devices.into_iter().last() {
            Some(last) if last.facing != Facing::Front => {
                debug!(device = %last.id, label = %last.label, "No back label, using last device");
                Ok(vec![last])
            }
            _ => Err(ScanError::NoCameraFound),
        };
    }

    // Stable, so enumeration order is kept within each lens kind
    back.sort_by_key(|d| d.lens);
    Ok(back)
}
