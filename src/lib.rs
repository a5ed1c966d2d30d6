//! Frostbite modelkit
//!
//! Exports a trained two-layer perceptron into fixed-point integers and emits
//! the integer-only forward pass as Rust source for Frostbite VM guests.
//!
//! Stages, in order: [`quantize`] → [`forward::check_headroom`] → [`emit`] →
//! [`inject`]. [`pipeline::export`] runs the in-memory stages, [`samples`]
//! validates the quantized model against labelled images.

pub mod config;
pub mod emit;
pub mod error;
pub mod forward;
pub mod inject;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod quantize;
pub mod samples;

pub use config::{EmbedMode, ExportConfig, PixelEncoding, DEFAULT_SCALE};
pub use emit::{emit_unit, EmittedUnit};
pub use error::{ModelkitError, Result, Stage};
pub use inject::{inject_file, inject_str, InjectOutcome, Placeholder};
pub use model::{Accuracy, Activation, Architecture, FloatModel, QuantizedExport, QuantizedModel};
pub use pipeline::{export, ExportArtifacts};
pub use quantize::{QuantizedTensor, Shape};
pub use samples::{TestSamples, ValidationReport};
