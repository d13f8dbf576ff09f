// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture sessions for barcode and QR scanning
//!
//! Components, leaf first:
//!
//! - [`catalog`]: enumerate and classify cameras
//! - [`stream`]: acquire a stream with a constraint fallback ladder
//! - [`zoom`]: clamped zoom control of the active track
//! - [`decoder`]: pull and push decoder adapters
//! - [`decode_loop`]: owned periodic decode task
//! - [`validator`]: code shape filter and repeat suppression
//! - [`session`]: the state machine tying it all together

pub mod catalog;
pub mod decode_loop;
pub mod decoder;
pub mod session;
pub mod stream;
pub mod types;
pub mod validator;
pub mod zoom;

pub use catalog::DeviceCatalog;
pub use decode_loop::{LoopHandle, PullLoopConfig};
pub use decoder::{CandidateSink, DecoderAdapter, DecoderMode, FrameDecoder, PushDecoder};
pub use session::{CaptureSession, SessionOptions};
pub use stream::{QualityHint, StreamController, StreamHandle};
pub use types::*;
pub use validator::{CodeFormat, DetectionValidator, Verdict};
pub use zoom::{ZoomController, ZoomRequest};
