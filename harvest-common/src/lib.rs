//! Common types and utilities shared across Harvest crates.
//!
//! This crate is intentionally small so every other crate can depend on it:
//!
//! - [`PacingMode`]: the closed set of pacing profiles selected by configuration
//! - [`observability`]: centralised tracing/logging initialisation
//!
//! # Examples
//!
//! ```rust
//! use harvest_common::PacingMode;
//!
//! let mode: PacingMode = "fast".parse().unwrap();
//! assert!(mode.is_fast());
//! assert_eq!(PacingMode::default(), PacingMode::Normal);
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod observability;

/// Pacing profile applied to every automated interaction.
///
/// `Fast` shortens literal wait sequences, settle windows, and row thresholds.
/// Callers pick a mode once at construction; nothing reads it ambiently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    #[default]
    Normal,
    Fast,
}

impl PacingMode {
    pub fn is_fast(self) -> bool {
        matches!(self, PacingMode::Fast)
    }
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacingMode::Normal => write!(f, "normal"),
            PacingMode::Fast => write!(f, "fast"),
        }
    }
}

impl FromStr for PacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(PacingMode::Normal),
            "fast" => Ok(PacingMode::Fast),
            other => Err(format!("unknown pacing mode: {other}")),
        }
    }
}
