//! Settings for the strata engine.
//!
//! The [`Settings`] struct holds engine configuration with sensible defaults.
//! Callers construct it directly, deserialize it from a TOML string, or load
//! it from a file. Nothing here is global: components receive their
//! configuration through constructors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StrataError, StrataResult};

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use strata_core::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert!(settings.atomic_steps);
/// assert_eq!(settings.log_level, "info");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether debug mode is enabled (affects the log output format).
    pub debug: bool,
    /// The tracing filter directive (e.g. "info", "strata=debug").
    pub log_level: String,
    /// Whether the plan executor wraps each step in its own atomic scope.
    pub atomic_steps: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            atomic_steps: true,
        }
    }
}

impl Settings {
    /// Parses settings from a TOML string. Missing keys fall back to
    /// defaults.
    pub fn from_toml_str(content: &str) -> StrataResult<Self> {
        toml::from_str(content)
            .map_err(|e| StrataError::Configuration(format!("Invalid settings TOML: {e}")))
    }

    /// Loads settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
