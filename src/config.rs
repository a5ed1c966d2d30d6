//! Export configuration.
//!
//! One immutable [`ExportConfig`] is built per run (from TOML or defaults)
//! and handed to every stage.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelkitError, Result};
use crate::io;
use crate::model::Architecture;

/// Default fixed-point scale.
pub const DEFAULT_SCALE: u32 = 10_000;

/// Default class index returned by `predict` for malformed input.
pub const DEFAULT_INVALID_INPUT_CODE: u32 = 999;

/// Default placeholder name (`@modelkit:begin model` / `@modelkit:end model`).
pub const DEFAULT_PLACEHOLDER: &str = "model";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub scale: u32,
    pub invalid_input_code: u32,
    pub architecture: Architecture,
    pub placeholder: PlaceholderConfig,
    pub samples: SamplesConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            invalid_input_code: DEFAULT_INVALID_INPUT_CODE,
            architecture: Architecture::default(),
            placeholder: PlaceholderConfig::default(),
            samples: SamplesConfig::default(),
        }
    }
}

impl ExportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&io::read_to_string(path)?)?;
        debug!(
            path = %path.display(),
            scale = config.scale,
            architecture = %config.architecture,
            "loaded config"
        );
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale == 0 {
            return Err(ModelkitError::InvalidConfig("scale must be positive".into()));
        }
        self.architecture.validate()?;
        if (self.invalid_input_code as usize) < self.architecture.output_size {
            return Err(ModelkitError::InvalidConfig(format!(
                "invalid_input_code {} collides with a class index (output_size {})",
                self.invalid_input_code, self.architecture.output_size
            )));
        }
        self.placeholder.validate()?;
        if self.samples.per_class == 0 {
            return Err(ModelkitError::InvalidConfig(
                "samples.per_class must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How the emitted unit is embedded into the template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedMode {
    /// Splice the unit verbatim.
    #[default]
    Raw,
    /// Escape for a JavaScript template literal (`` `...` ``).
    TemplateLiteral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaceholderConfig {
    pub name: String,
    pub embed: EmbedMode,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PLACEHOLDER.to_string(),
            embed: EmbedMode::Raw,
        }
    }
}

impl PlaceholderConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(ModelkitError::InvalidConfig(format!(
                "placeholder name '{}' must be non-empty and contain no whitespace",
                self.name
            )));
        }
        Ok(())
    }
}

/// Encoding of pixel values in a test-sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelEncoding {
    /// Intensities in `[0, 1]`.
    #[default]
    Normalized,
    /// Intensities in `[0, 255]`.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplesConfig {
    pub encoding: PixelEncoding,
    pub per_class: usize,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            encoding: PixelEncoding::Normalized,
            per_class: 1,
        }
    }
}
