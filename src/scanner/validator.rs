// SPDX-License-Identifier: GPL-3.0-only

//! Detection validation
//!
//! A decoded string becomes a detection only when it has the shape of a
//! known code and differs from the previously accepted value.

use crate::constants::patterns;
use crate::errors::ScanResult;
use regex::Regex;
use tracing::trace;

/// A named code shape
#[derive(Debug, Clone)]
pub struct CodeFormat {
    name: String,
    pattern: Regex,
}

impl CodeFormat {
    pub fn new(name: impl Into<String>, pattern: &str) -> ScanResult<Self> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    /// Device serial numbers (`S` + 8 or more alphanumerics)
    pub fn serial() -> Self {
        Self::builtin("serial", patterns::SERIAL)
    }

    /// 15-digit IMEI
    pub fn imei() -> Self {
        Self::builtin("imei", patterns::IMEI)
    }

    fn builtin(name: &str, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(pattern) => Self {
                name: name.to_string(),
                pattern,
            },
            Err(e) => unreachable!("built-in pattern {} is invalid: {}", name, e),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accepted; carries the trimmed code and the matching format name
    Accepted { code: String, format: String },
    Rejected(RejectReason),
}

/// Why a candidate was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    NoMatchingFormat,
    Duplicate,
}

/// Filters candidates against code formats and suppresses repeats
#[derive(Debug, Clone)]
pub struct DetectionValidator {
    formats: Vec<CodeFormat>,
    last_accepted: Option<String>,
}

impl Default for DetectionValidator {
    fn default() -> Self {
        Self::new(vec![CodeFormat::serial(), CodeFormat::imei()])
    }
}

impl DetectionValidator {
    pub fn new(formats: Vec<CodeFormat>) -> Self {
        Self {
            formats,
            last_accepted: None,
        }
    }

    /// Forget the last accepted value (new session)
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    /// Check the shape of `raw` without touching dedup state
    pub fn check(&self, raw: &str) -> Verdict {
        let code = raw.trim();
        if code.is_empty() {
            return Verdict::Rejected(RejectReason::Empty);
        }
        match self.formats.iter().find(|f| f.matches(code)) {
            Some(format) => Verdict::Accepted {
                code: code.to_string(),
                format: format.name().to_string(),
            },
            None => Verdict::Rejected(RejectReason::NoMatchingFormat),
        }
    }

    /// Validate `raw`, recording it as the last accepted value on success
    pub fn validate(&mut self, raw: &str) -> Verdict {
        let verdict = self.check(raw);
        if let Verdict::Accepted { code, .. } = &verdict {
            if self.last_accepted.as_deref() == Some(code.as_str()) {
                trace!(code = %code, "Suppressing repeated detection");
                return Verdict::Rejected(RejectReason::Duplicate);
            }
            self.last_accepted = Some(code.clone());
        }
        verdict
    }
}
