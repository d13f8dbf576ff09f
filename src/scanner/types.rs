// SPDX-License-Identifier: GPL-3.0-only

//! Types shared across the capture session components

use crate::backends::camera::types::DeviceId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing open, no callbacks registered
    #[default]
    Idle,
    /// Acquiring a stream and arming the decoder
    Initializing,
    /// Decoder armed against a live track
    Scanning,
    /// A code was accepted (terminal)
    Detected,
    /// Closed by the user before a detection (terminal)
    Cancelled,
    /// Opening failed; inert until `open_scanner` is called again
    Error,
}

impl SessionState {
    /// Whether the session currently holds camera resources
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Scanning)
    }

    /// Whether `open_scanner` may start a new session from this state
    pub fn can_open(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Scanning => "scanning",
            SessionState::Detected => "detected",
            SessionState::Cancelled => "cancelled",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Which way a camera points, as far as its label tells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    Unknown,
}

/// Physical lens behind a camera device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LensKind {
    Main,
    UltraWide,
    Telephoto,
}

impl std::fmt::Display for LensKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensKind::Main => write!(f, "main"),
            LensKind::UltraWide => write!(f, "ultra-wide"),
            LensKind::Telephoto => write!(f, "telephoto"),
        }
    }
}

/// A classified video input device
///
/// Identity is the device id. Labels can be empty before the first
/// permission grant, so devices must be re-enumerated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraDevice {
    pub id: DeviceId,
    pub label: String,
    pub facing: Facing,
    pub lens: LensKind,
}

/// Zoom range of the active track
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomCapability {
    pub min: f64,
    pub max: f64,
    pub supported: bool,
}

impl ZoomCapability {
    pub const fn unsupported() -> Self {
        Self {
            min: 1.0,
            max: 1.0,
            supported: false,
        }
    }
}

impl Default for ZoomCapability {
    fn default() -> Self {
        Self::unsupported()
    }
}

/// A raw string produced by a decoder, not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionCandidate {
    pub raw: String,
    pub timestamp: DateTime<Utc>,
}

impl DetectionCandidate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            timestamp: Utc::now(),
        }
    }
}

/// What a decode loop should do after offering a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Read-only view of a session for the hosting UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Id of the current (or last) open, `None` before the first open
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub device: Option<CameraDevice>,
    pub zoom: ZoomCapability,
    /// Current zoom level, `None` when zoom is unsupported
    pub zoom_level: Option<f64>,
    /// Last error message, set in the `Error` state
    pub error: Option<String>,
    /// Accepted code, set in the `Detected` state
    pub detected: Option<String>,
}
