// SPDX-License-Identifier: GPL-3.0-only

//! Zoom control for the active track
//!
//! A track without a usable zoom range is a normal condition: every
//! operation becomes a no-op that reports the last known level.

use super::stream::StreamHandle;
use super::types::ZoomCapability;
use crate::backends::camera::VideoTrack;
use crate::constants::zoom;
use crate::errors::ScanError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Zoom operations exposed to the hosting UI
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomRequest {
    Set(f64),
    In,
    Out,
    Max,
    Reset,
}

/// Zoom state of one stream
#[derive(Clone)]
pub struct ZoomController {
    track: Option<Arc<dyn VideoTrack>>,
    capability: ZoomCapability,
    level: f64,
    /// Smallest change the device can make, 0 for continuous ranges
    granularity: f64,
}

impl ZoomController {
    /// Read the zoom range of the handle's track
    pub fn probe(handle: &StreamHandle) -> Self {
        Self::probe_track(Arc::clone(handle.track()))
    }

    pub fn probe_track(track: Arc<dyn VideoTrack>) -> Self {
        match track.zoom_range() {
            Some(range) if range.max > range.min => {
                let level = range.current.unwrap_or(range.min).clamp(range.min, range.max);
                debug!(
                    device = %track.device_id(),
                    min = range.min,
                    max = range.max,
                    level,
                    "Zoom supported"
                );
                Self {
                    track: Some(track),
                    capability: ZoomCapability {
                        min: range.min,
                        max: range.max,
                        supported: true,
                    },
                    level,
                    granularity: range.step.filter(|s| *s > 0.0).unwrap_or(0.0),
                }
            }
            _ => {
                debug!(device = %track.device_id(), "Zoom not supported");
                Self::unsupported()
            }
        }
    }

    pub fn unsupported() -> Self {
        let capability = ZoomCapability::unsupported();
        Self {
            track: None,
            capability,
            level: capability.min,
            granularity: 0.0,
        }
    }

    pub fn capability(&self) -> ZoomCapability {
        self.capability
    }

    /// Current level, `None` when zoom is unsupported
    pub fn level(&self) -> Option<f64> {
        self.capability.supported.then_some(self.level)
    }

    /// Size of one zoom in/out step, never finer than the device allows
    pub fn step(&self) -> f64 {
        ((self.capability.max - self.capability.min) / zoom::STEPS).max(self.granularity)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.capability.min, self.capability.max)
    }

    /// Unclamped level a request aims for
    pub fn target(&self, request: ZoomRequest) -> f64 {
        match request {
            ZoomRequest::Set(value) => value,
            ZoomRequest::In => self.level + self.step(),
            ZoomRequest::Out => self.level - self.step(),
            ZoomRequest::Max => self.capability.max,
            ZoomRequest::Reset => self.capability.min,
        }
    }

    /// Apply a zoom request, returning the level in effect afterwards
    pub async fn apply_request(&mut self, request: ZoomRequest) -> f64 {
        let target = self.target(request);
        self.set_zoom(target).await
    }

    /// Clamp `value` into range and apply it
    ///
    /// Returns the level the track reports after applying, which may be
    /// rounded to the device's step. When applying fails the failure is
    /// logged and the previous level is returned.
    pub async fn set_zoom(&mut self, value: f64) -> f64 {
        let Some(track) = self.track.clone().filter(|_| self.capability.supported) else {
            return self.level;
        };
        if value.is_nan() {
            return self.level;
        }

        let clamped = self.clamp(value);
        match track.apply_zoom(clamped).await {
            Ok(applied) => {
                debug!(device = %track.device_id(), requested = value, applied, "Zoom applied");
                self.level = self.clamp(applied);
            }
            Err(e) => {
                let err = ScanError::TransientZoomFailure(e.to_string());
                warn!(device = %track.device_id(), error = %err, "Ignoring zoom failure");
            }
        }
        self.level
    }

    pub async fn zoom_in(&mut self) -> f64 {
        self.apply_request(ZoomRequest::In).await
    }

    pub async fn zoom_out(&mut self) -> f64 {
        self.apply_request(ZoomRequest::Out).await
    }

    pub async fn zoom_max(&mut self) -> f64 {
        self.apply_request(ZoomRequest::Max).await
    }

    pub async fn zoom_reset(&mut self) -> f64 {
        self.apply_request(ZoomRequest::Reset).await
    }
}

impl std::fmt::Debug for ZoomController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoomController")
            .field("capability", &self.capability)
            .field("level", &self.level)
            .finish()
    }
}
