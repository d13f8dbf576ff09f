// SPDX-License-Identifier: GPL-3.0-only

//! Decoder adapters
//!
//! Barcode libraries come in two shapes. Pull decoders ([`FrameDecoder`])
//! take one still image and return at most one string; the session owns the
//! timer that feeds them. Push decoders ([`PushDecoder`]) own their capture
//! loop and report candidates as they find them. Both report through the
//! same [`CandidateSink`].

pub mod qr;

use super::decode_loop::LoopHandle;
use super::types::{DetectionCandidate, LoopAction};
use crate::backends::camera::VideoTrack;
use crate::errors::ScanResult;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

pub use qr::{ContinuousQrDecoder, QrFrameDecoder};

/// Why a single decode produced nothing usable
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The frame could not be turned into a decoder buffer
    Image(String),
    /// A code was located but could not be read
    Decode(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Image(msg) => write!(f, "Image conversion failed: {}", msg),
            DecodeError::Decode(msg) => write!(f, "Decode failed: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decoder fed one greyscale still at a time
pub trait FrameDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode `image`, returning zero or one candidate
    fn decode(&self, image: &GrayImage) -> Result<Option<String>, DecodeError>;
}

/// Decoder that runs its own capture loop against a live track
pub trait PushDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start decoding `track`, reporting through `sink`
    ///
    /// Fails with [`crate::errors::ScanError::DecoderInitError`] when the
    /// loop cannot be started.
    fn start(&self, track: Arc<dyn VideoTrack>, sink: CandidateSink) -> ScanResult<LoopHandle>;
}

/// Which decoder shape a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecoderMode {
    #[default]
    Pull,
    Push,
}

impl std::fmt::Display for DecoderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderMode::Pull => write!(f, "pull"),
            DecoderMode::Push => write!(f, "push"),
        }
    }
}

/// Decoder of either shape
#[derive(Clone)]
pub enum DecoderAdapter {
    Pull(Arc<dyn FrameDecoder>),
    Push(Arc<dyn PushDecoder>),
}

impl DecoderAdapter {
    /// Built-in QR decoder of the given shape
    pub fn qr(mode: DecoderMode) -> Self {
        match mode {
            DecoderMode::Pull => DecoderAdapter::Pull(Arc::new(QrFrameDecoder::new())),
            DecoderMode::Push => DecoderAdapter::Push(Arc::new(ContinuousQrDecoder::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DecoderAdapter::Pull(decoder) => decoder.name(),
            DecoderAdapter::Push(decoder) => decoder.name(),
        }
    }

    pub fn mode(&self) -> DecoderMode {
        match self {
            DecoderAdapter::Pull(_) => DecoderMode::Pull,
            DecoderAdapter::Push(_) => DecoderMode::Push,
        }
    }
}

impl std::fmt::Debug for DecoderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecoderAdapter::{:?}({})", self.mode(), self.name())
    }
}

/// Receiver of candidates on the session side
pub trait SinkTarget: Send + Sync {
    /// Handle a candidate produced under `generation`
    fn offer(&self, generation: u64, candidate: DetectionCandidate) -> LoopAction;

    /// The track feeding the loop of `generation` ended on its own
    fn track_lost(&self, generation: u64);
}

/// Where a decode loop reports candidates
///
/// Holds only a weak reference to the session, so a loop that outlives its
/// session stops at the next offer.
#[derive(Clone)]
pub struct CandidateSink {
    generation: u64,
    target: Weak<dyn SinkTarget>,
}

impl CandidateSink {
    pub fn new(generation: u64, target: Weak<dyn SinkTarget>) -> Self {
        Self { generation, target }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Offer a raw decode result
    pub fn offer(&self, raw: impl Into<String>) -> LoopAction {
        match self.target.upgrade() {
            Some(target) => target.offer(self.generation, DetectionCandidate::new(raw)),
            None => LoopAction::Stop,
        }
    }

    pub fn track_lost(&self) {
        if let Some(target) = self.target.upgrade() {
            target.track_lost(self.generation);
        }
    }
}

impl std::fmt::Debug for CandidateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSink")
            .field("generation", &self.generation)
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}
