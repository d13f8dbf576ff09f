// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::DeviceId;
use crate::constants::{patterns, timing};
use crate::errors::{ScanError, ScanResult};
use crate::scanner::{
    CodeFormat, DecoderMode, PullLoopConfig, QualityHint, SessionOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration directory name under the user's config dir
const APP_DIR: &str = "scancam";
const CONFIG_FILE: &str = "config.json";

/// A code shape accepted by the scanner
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CodePattern {
    /// Name reported with accepted detections
    pub name: String,
    /// Regular expression the trimmed code must match
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between pull-mode decode ticks, in milliseconds
    pub tick_interval_ms: u64,
    /// Ideal capture resolution
    pub quality: QualityHint,
    /// Decoder shape (pull or push)
    pub decoder_mode: DecoderMode,
    /// Side of the centred square that is decoded, `None` for the full frame
    pub scan_region: Option<u32>,
    /// Accepted code shapes
    pub code_patterns: Vec<CodePattern>,
    /// Last used camera device
    pub last_device: Option<DeviceId>,
    /// Zoom applied when scanning starts
    pub initial_zoom: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: timing::DECODE_TICK.as_millis() as u64,
            quality: QualityHint::default(),
            decoder_mode: DecoderMode::default(),
            scan_region: None,
            code_patterns: vec![
                CodePattern {
                    name: "serial".to_string(),
                    pattern: patterns::SERIAL.to_string(),
                },
                CodePattern {
                    name: "imei".to_string(),
                    pattern: patterns::IMEI.to_string(),
                },
            ],
            last_device: None,
            initial_zoom: None,
        }
    }
}

impl Config {
    /// Default location: `<config dir>/scancam/config.json`
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> ScanResult<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> ScanResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self) -> ScanResult<()> {
        let path = Self::path()
            .ok_or_else(|| ScanError::Config("no config directory available".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> ScanResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Decode tick, never shorter than the supported minimum
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms).max(timing::MIN_DECODE_TICK)
    }

    /// Compile the configured code patterns
    pub fn code_formats(&self) -> ScanResult<Vec<CodeFormat>> {
        if self.code_patterns.is_empty() {
            return Err(ScanError::Config("no code patterns configured".to_string()));
        }
        self.code_patterns
            .iter()
            .map(|p| CodeFormat::new(p.name.clone(), &p.pattern))
            .collect()
    }

    /// Session options derived from this configuration
    pub fn session_options(&self) -> ScanResult<SessionOptions> {
        Ok(SessionOptions {
            quality: self.quality,
            pull: PullLoopConfig {
                tick: self.tick_interval(),
                scan_region: self.scan_region,
            },
            initial_zoom: self.initial_zoom,
            preferred_device: self.last_device.clone(),
            formats: self.code_formats()?,
        })
    }
}
