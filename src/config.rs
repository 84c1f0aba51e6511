//! Reconstruction settings
//!
//! Settings are loaded from TOML. Every table and field is optional and
//! falls back to its default, so an empty document is a valid configuration.
//!
//! ```toml
//! [reconstruction]
//! window = "hanning"      # "none" | "hanning"
//! output = "magnitude"    # "complex" | "magnitude" | "phase"
//! origin = "centered"     # "centered" | "corner"
//!
//! [transform]
//! max_prime_factor = 7    # omit to accept any axis length
//! parallel = false
//! ```
//!
//! After parsing, [`ReconSettings::validate`] rejects values that parse but
//! make no sense.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReconError, ReconResult};
use crate::experience::ReconParams;
use crate::fft::TransformPolicy;

/// Top-level reconstruction configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconSettings {
    /// Default parameters for contexts built from these settings
    pub reconstruction: ReconParams,
    /// Which transform lengths are accepted and how the transform runs
    pub transform: TransformPolicy,
}

impl ReconSettings {
    /// Parse and validate settings from a TOML document
    pub fn from_toml_str(text: &str) -> ReconResult<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML settings file
    pub fn from_file(path: impl AsRef<Path>) -> ReconResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), ?settings, "loaded reconstruction settings");
        Ok(settings)
    }

    pub fn validate(&self) -> ReconResult<()> {
        if let Some(limit) = self.transform.max_prime_factor {
            if limit < 2 {
                return Err(ReconError::Config(format!(
                    "transform.max_prime_factor must be at least 2, got {limit}"
                )));
            }
        }
        Ok(())
    }
}
