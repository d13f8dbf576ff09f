// SPDX-License-Identifier: GPL-3.0-only

//! scancam - camera capture sessions for barcode and QR scanning
//!
//! This library owns the lifecycle of a video device and turns its frames
//! into a single validated code, with the camera released on every exit
//! path (detection, cancel, permission denial, device loss).
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera platform abstraction (V4L2 and virtual devices)
//! - [`scanner`]: Device catalog, stream ladder, zoom, decoders and the session state machine
//! - [`config`]: User configuration handling
//! - [`errors`]: Session error taxonomy
//!
//! # Example
//!
//! ```ignore
//! let session = CaptureSession::new(default_platform(), DecoderAdapter::qr(DecoderMode::Pull));
//! session.open_scanner(|code| println!("{code}"), || println!("cancelled")).await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod scanner;

// Re-export commonly used types
pub use config::Config;
pub use errors::{ScanError, ScanResult};
pub use scanner::{CaptureSession, DecoderAdapter, DecoderMode, SessionSnapshot, SessionState};
