// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture sessions
//!
//! [`ScanError`] is what the hosting UI sees. Platform failures arrive as
//! [`BackendError`] and are mapped here at the catalog / stream boundary.

use crate::backends::camera::types::BackendError;
use std::fmt;

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// Session-level error taxonomy
#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
    /// The user or system refused camera access
    PermissionDenied,
    /// No usable (back-facing or fallback) camera exists
    NoCameraFound,
    /// A camera exists but could not be opened
    CameraUnavailable(UnavailableReason),
    /// The decoder could not be armed against the live track
    DecoderInitError(String),
    /// Applying zoom failed; never fatal to a session
    TransientZoomFailure(String),
    /// The requested operation is not valid in the current session state
    InvalidState(String),
    /// Configuration could not be read, written or compiled
    Config(String),
}

/// Why a camera could not be opened
#[derive(Debug, Clone, PartialEq)]
pub enum UnavailableReason {
    /// Device is held by another process
    Busy(String),
    /// Device disappeared or was never there
    NotFound(String),
    /// Every rung of the constraint ladder was rejected
    OverConstrained(String),
    /// The acquired stream carried no video track
    NoVideoTrack,
    /// The live track ended while scanning
    DeviceLost,
    /// Anything else the platform reported
    Other(String),
}

impl ScanError {
    /// Text suitable for showing to the person holding the camera
    pub fn user_message(&self) -> String {
        match self {
            ScanError::PermissionDenied => {
                "Camera access was denied. Allow camera access in your system settings and try again."
                    .to_string()
            }
            ScanError::NoCameraFound => "No suitable camera was found on this device.".to_string(),
            ScanError::CameraUnavailable(UnavailableReason::Busy(_)) => {
                "The camera is in use by another application.".to_string()
            }
            ScanError::CameraUnavailable(UnavailableReason::DeviceLost) => {
                "The camera was disconnected.".to_string()
            }
            ScanError::CameraUnavailable(_) => "The camera could not be started.".to_string(),
            ScanError::DecoderInitError(_) => "The code scanner could not be started.".to_string(),
            ScanError::TransientZoomFailure(_) => "Zoom could not be changed.".to_string(),
            ScanError::InvalidState(_) | ScanError::Config(_) => self.to_string(),
        }
    }

    /// Whether offering a "try again" affordance makes sense
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::PermissionDenied
            | ScanError::NoCameraFound
            | ScanError::CameraUnavailable(_)
            | ScanError::DecoderInitError(_) => true,
            ScanError::TransientZoomFailure(_)
            | ScanError::InvalidState(_)
            | ScanError::Config(_) => false,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied => write!(f, "Camera permission denied"),
            ScanError::NoCameraFound => write!(f, "No camera found"),
            ScanError::CameraUnavailable(reason) => write!(f, "Camera unavailable: {}", reason),
            ScanError::DecoderInitError(msg) => write!(f, "Decoder initialization failed: {}", msg),
            ScanError::TransientZoomFailure(msg) => write!(f, "Zoom failed: {}", msg),
            ScanError::InvalidState(msg) => write!(f, "Invalid session state: {}", msg),
            ScanError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::Busy(msg) => write!(f, "device busy ({})", msg),
            UnavailableReason::NotFound(msg) => write!(f, "device not found ({})", msg),
            UnavailableReason::OverConstrained(msg) => {
                write!(f, "no constraint set accepted ({})", msg)
            }
            UnavailableReason::NoVideoTrack => write!(f, "stream has no video track"),
            UnavailableReason::DeviceLost => write!(f, "device lost"),
            UnavailableReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<BackendError> for ScanError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied => ScanError::PermissionDenied,
            BackendError::DeviceNotFound(msg) => {
                ScanError::CameraUnavailable(UnavailableReason::NotFound(msg))
            }
            BackendError::Busy(msg) => ScanError::CameraUnavailable(UnavailableReason::Busy(msg)),
            BackendError::OverConstrained(msg) => {
                ScanError::CameraUnavailable(UnavailableReason::OverConstrained(msg))
            }
            BackendError::TrackEnded => ScanError::CameraUnavailable(UnavailableReason::DeviceLost),
            BackendError::IoError(msg) | BackendError::Other(msg) => {
                ScanError::CameraUnavailable(UnavailableReason::Other(msg))
            }
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}

impl From<regex::Error> for ScanError {
    fn from(err: regex::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}
