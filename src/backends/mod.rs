// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for video capture
//!
//! The backend layer abstracts hardware access so the capture session sees
//! the same API whether frames come from a V4L2 device node or from the
//! in-memory virtual platform:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Scanner Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │    V4L2     │    │     Virtual      │    │
//! │  │ (/dev/video)│    │ (stills, tests)  │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Platform traits, device enumeration and frame capture

pub mod camera;
