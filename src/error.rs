//! Modelkit error types

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::Architecture;
use crate::quantize::Shape;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Load,
    Quantize,
    Headroom,
    Emit,
    Inject,
    Inference,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Load => "load",
            Stage::Quantize => "quantize",
            Stage::Headroom => "headroom",
            Stage::Emit => "emit",
            Stage::Inject => "inject",
            Stage::Inference => "inference",
            Stage::Verify => "verify",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ModelkitError {
    #[error("Invalid tensor {tensor}: {reason}")]
    InvalidTensor { tensor: String, reason: String },

    #[error("Shape mismatch for {tensor}: expected {expected}, got {actual}")]
    ShapeMismatch {
        tensor: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("Architecture mismatch: expected {expected}, got {actual}")]
    ArchitectureMismatch {
        expected: Architecture,
        actual: Architecture,
    },

    #[error("Placeholder '{marker}' not found (0 matches)")]
    PlaceholderNotFound { marker: String },

    #[error("Placeholder '{marker}' is ambiguous ({count} matches, expected 1)")]
    AmbiguousPlaceholder { marker: String, count: usize },

    #[error("Placeholder '{marker}' opened on line {line} is never closed")]
    UnterminatedPlaceholder { marker: String, line: usize },

    #[error("Placeholder '{marker}' on line {line}: begin and end markers must sit on separate lines")]
    MarkersOnSameLine { marker: String, line: usize },

    #[error("Emitted unit contains placeholder marker '{marker}'")]
    MarkerInUnit { marker: String },

    #[error("Input length mismatch: expected {expected}, got {actual}")]
    InputLength { expected: usize, actual: usize },

    #[error("Accumulator overflow risk in {layer} layer: worst-case magnitude {bound} exceeds i64")]
    OverflowRisk { layer: &'static str, bound: i128 },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid test samples: {0}")]
    InvalidSamples(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Render error: {0}")]
    Render(#[from] fmt::Error),
}

impl ModelkitError {
    /// Stage the failure is reported under.
    pub fn stage(&self) -> Stage {
        match self {
            ModelkitError::InvalidTensor { .. } => Stage::Quantize,
            ModelkitError::ShapeMismatch { .. } | ModelkitError::Render(_) => Stage::Emit,
            ModelkitError::ArchitectureMismatch { .. } => Stage::Quantize,
            ModelkitError::PlaceholderNotFound { .. }
            | ModelkitError::AmbiguousPlaceholder { .. }
            | ModelkitError::UnterminatedPlaceholder { .. }
            | ModelkitError::MarkersOnSameLine { .. }
            | ModelkitError::MarkerInUnit { .. } => Stage::Inject,
            ModelkitError::InputLength { .. } => Stage::Inference,
            ModelkitError::OverflowRisk { .. } => Stage::Headroom,
            ModelkitError::InvalidConfig(_) | ModelkitError::Toml(_) => Stage::Config,
            ModelkitError::InvalidSamples(_) => Stage::Verify,
            ModelkitError::Io { .. } | ModelkitError::Json(_) => Stage::Load,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelkitError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelkitError>;
